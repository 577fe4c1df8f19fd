//! Router assembly for the Aegis server.

use std::time::Duration;

use axum::{
    error_handling::HandleErrorLayer,
    middleware,
    routing::{get, patch, post},
    Extension, Router,
};
use tower::{timeout::TimeoutLayer, BoxError, ServiceBuilder};

use crate::server::api_error::{ApiError, ErrorCode};

use crate::server::admin::{
    create_license_handler, delete_handler, extend_handler, get_license_handler,
    list_licenses_handler, login_handler, revoke_handler, stats_handler, toggle_handler,
    update_modules_handler, update_plan_handler,
};
use crate::server::gateway::ws_handler;
use crate::server::handlers::{
    check_handler, health_handler, refresh_handler, revoke_refresh_handler, token_pair_handler,
    AppState,
};
use crate::server::logging::request_logging_middleware;

#[cfg(feature = "rate-limiting")]
use crate::server::rate_limit::{create_rate_limiter, RateLimitTier};

/// Per-request deadline. The WebSocket upgrade completes well inside it;
/// the long-lived connection itself is not bounded by this.
const REQUEST_DEADLINE: Duration = Duration::from_secs(30);

/// Build the main application router.
///
/// # Routes
///
/// ## Client endpoints
/// - `POST /api/v1/check` - Validate a license token
/// - `POST /api/v1/token-pair` - Issue an access/refresh pair
/// - `POST /api/v1/refresh` - Exchange a refresh token for an access token
/// - `POST /api/v1/revoke-refresh` - Kill a refresh token
/// - `GET /ws` - Long-lived gateway connection
/// - `GET /health` - Liveness probe (unlimited)
///
/// ## Operator endpoints (admin session required)
/// - `POST /api/v1/admin/login`
/// - `POST|GET /api/v1/licenses`, plus per-license lifecycle routes
/// - `GET /api/v1/stats`
pub fn build_router(state: AppState) -> Router {
    // Validation traffic runs at a raised limit; everything else shares the
    // sliding window. Health and the WebSocket upgrade are unlimited.
    #[cfg(feature = "rate-limiting")]
    let rate_config = crate::config::get_config()
        .ok()
        .map(|c| c.rate_limit.clone())
        .filter(|c| c.enabled);

    let check_routes = Router::new().route("/api/v1/check", post(check_handler));
    #[cfg(feature = "rate-limiting")]
    let check_routes = match &rate_config {
        Some(cfg) => check_routes.layer(create_rate_limiter(cfg, RateLimitTier::Check)),
        None => check_routes,
    };

    let limited_routes = Router::new()
        .route("/api/v1/token-pair", post(token_pair_handler))
        .route("/api/v1/refresh", post(refresh_handler))
        .route("/api/v1/revoke-refresh", post(revoke_refresh_handler))
        .route("/api/v1/admin/login", post(login_handler))
        .route(
            "/api/v1/licenses",
            post(create_license_handler).get(list_licenses_handler),
        )
        .route(
            "/api/v1/licenses/:client_id",
            get(get_license_handler).delete(delete_handler),
        )
        .route("/api/v1/licenses/:client_id/toggle", post(toggle_handler))
        .route("/api/v1/licenses/:client_id/extend", post(extend_handler))
        .route("/api/v1/licenses/:client_id/revoke", post(revoke_handler))
        .route("/api/v1/licenses/:client_id/plan", patch(update_plan_handler))
        .route(
            "/api/v1/licenses/:client_id/modules",
            patch(update_modules_handler),
        );
    #[cfg(feature = "rate-limiting")]
    let limited_routes = match &rate_config {
        Some(cfg) => limited_routes.layer(create_rate_limiter(cfg, RateLimitTier::Default)),
        None => limited_routes,
    };

    let auth_state = state.auth.clone();

    Router::new()
        .merge(check_routes)
        .merge(limited_routes)
        .route("/api/v1/stats", get(stats_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(Extension(auth_state))
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(|_err: BoxError| async {
                    ApiError::new(ErrorCode::Timeout)
                }))
                .layer(TimeoutLayer::new(REQUEST_DEADLINE)),
        )
        .with_state(state)
}
