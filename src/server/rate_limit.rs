//! Rate limiting for the request API.
//!
//! Per-source sliding limits protect the mutation surface from abuse. Two
//! tiers exist: the default window (typical 100 requests per 15 minutes)
//! applied to lifecycle and token endpoints, and a raised per-minute limit
//! for `check`. `health` is left unlimited.
//!
//! # Configuration
//!
//! ```toml
//! [rate_limit]
//! enabled = true
//! window_secs = 900    # sliding window length
//! max_requests = 100   # requests per window per source
//! check_rpm = 300      # raised limit for /check
//! burst_size = 10
//! ```
//!
//! Uses `SmartIpKeyExtractor`, which honors X-Forwarded-For / X-Real-IP
//! before falling back to the peer address — required behind a proxy.
//! The server must be started with
//! `.into_make_service_with_connect_info::<SocketAddr>()` for IP extraction
//! to work.

use axum::{body::Body, http::StatusCode, response::Response};
use governor::middleware::NoOpMiddleware;
use std::sync::Arc;
use tower_governor::governor::GovernorConfigBuilder;

pub use tower_governor::key_extractor::SmartIpKeyExtractor;
pub use tower_governor::GovernorLayer;

use crate::config::RateLimitConfig;

/// Which limit tier a route group gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitTier {
    /// Lifecycle and token endpoints: the configured sliding window.
    Default,
    /// Validation traffic: raised per-minute limit.
    Check,
}

/// Create a rate limiting layer for the given tier.
pub fn create_rate_limiter(
    config: &RateLimitConfig,
    tier: RateLimitTier,
) -> GovernorLayer<SmartIpKeyExtractor, NoOpMiddleware> {
    // One replenished request every interval_ms sustains the configured
    // budget over the window.
    let interval_ms: u64 = match tier {
        RateLimitTier::Default => {
            u64::from(config.window_secs) * 1_000 / u64::from(config.max_requests.max(1))
        }
        RateLimitTier::Check => 60_000 / u64::from(config.check_rpm.max(1)),
    };

    let governor_config = GovernorConfigBuilder::default()
        .per_millisecond(interval_ms.max(1))
        .burst_size(config.burst_size.max(1))
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("failed to build governor config");

    GovernorLayer {
        config: Arc::new(governor_config),
    }
}

/// Custom error response for rate limiting.
///
/// Returns a 429 status code with a JSON error body and Retry-After header.
pub fn rate_limit_error_response(retry_after_secs: u64) -> Response<Body> {
    let retry_after = retry_after_secs.max(1);
    let body = serde_json::json!({
        "error": {
            "code": "RATE_LIMITED",
            "message": format!("Rate limit exceeded. Please retry after {} seconds.", retry_after),
            "details": { "retry_after_seconds": retry_after }
        }
    });

    Response::builder()
        .status(StatusCode::TOO_MANY_REQUESTS)
        .header("Content-Type", "application/json")
        .header("Retry-After", retry_after.to_string())
        .body(Body::from(body.to_string()))
        .expect("static response must build")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_config_defaults() {
        let config = RateLimitConfig::default();
        assert!(config.enabled);
        assert_eq!(config.window_secs, 900);
        assert_eq!(config.max_requests, 100);
        assert_eq!(config.check_rpm, 300);
    }

    #[test]
    fn rate_limit_error_response_format() {
        let response = rate_limit_error_response(30);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get("Retry-After").unwrap().to_str().unwrap(),
            "30"
        );
    }

    #[test]
    fn rate_limit_error_minimum_retry_after() {
        let response = rate_limit_error_response(0);
        assert_eq!(
            response.headers().get("Retry-After").unwrap().to_str().unwrap(),
            "1"
        );
    }

    #[test]
    fn create_rate_limiter_default_tier() {
        let config = RateLimitConfig::default();
        let _layer = create_rate_limiter(&config, RateLimitTier::Default);
    }

    #[test]
    fn create_rate_limiter_check_tier() {
        let config = RateLimitConfig::default();
        let _layer = create_rate_limiter(&config, RateLimitTier::Check);
    }
}
