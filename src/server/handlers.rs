//! Client-facing request handlers: validation, token issuance, refresh.
//!
//! Admin lifecycle operations live in `server::admin`. Everything here is
//! reachable with possession of a license or refresh token; no operator
//! credentials are involved.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::clock::Clock;
use crate::config::GatewayConfig;
use crate::plans::Module;
use crate::server::api_error::{ApiError, ErrorCode};
use crate::server::auth::AuthState;
use crate::server::events::EventBus;
use crate::server::logging::HealthResponse;
use crate::server::service::LicenseService;
use crate::server::store::{Database, License};
use crate::server::validation::validate_client_id;

/// Shared application state for handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub service: Arc<LicenseService>,
    pub bus: Arc<EventBus>,
    pub clock: Arc<dyn Clock>,
    pub auth: AuthState,
    pub gateway: GatewayConfig,
    pub shutdown: CancellationToken,
}

/// Timestamp format used across all JSON responses.
pub fn format_ts(ts: chrono::NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// The license as clients and operators see it. Never contains secrets.
#[derive(Debug, Clone, Serialize)]
pub struct LicenseView {
    pub client_id: String,
    pub plan: String,
    pub status: String,
    pub modules: Vec<Module>,
    pub expires_at: String,
    pub days_remaining: i64,
    pub max_users: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    pub created_at: String,
}

impl LicenseView {
    pub fn from_license(license: &License, now: chrono::NaiveDateTime) -> Self {
        Self {
            client_id: license.client_id.clone(),
            plan: license.plan.to_string(),
            status: license.status.to_string(),
            modules: license.active_modules.iter().copied().collect(),
            expires_at: format_ts(license.expires_at),
            days_remaining: license.days_remaining(now),
            max_users: license.max_users(),
            last_check: license.last_check.map(format_ts),
            company_name: license.company_name.clone(),
            contact_email: license.contact_email.clone(),
            created_at: format_ts(license.created_at),
        }
    }
}

fn peer_ip(addr: Option<&ConnectInfo<SocketAddr>>) -> Option<String> {
    addr.map(|ConnectInfo(a)| a.ip().to_string())
}

// ============================================================================
// check
// ============================================================================

/// Request body for `POST /api/v1/check`.
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub client_id: Option<String>,
    pub token: Option<String>,
}

/// Successful validation answer, including the debug context clients use to
/// flip their feature gates.
#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub valid: bool,
    pub license: LicenseView,
}

/// Validate a presented token for a client.
///
/// `POST /api/v1/check`
pub async fn check_handler(
    State(state): State<AppState>,
    addr: Option<ConnectInfo<SocketAddr>>,
    Json(req): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, ApiError> {
    let (Some(client_id), Some(token)) = (req.client_id, req.token) else {
        return Err(ApiError::new(ErrorCode::MissingParameters));
    };
    validate_client_id(&client_id, "client_id")
        .map_err(|e| ApiError::invalid_field(&e.field, &e.message))?;

    let ip = peer_ip(addr.as_ref());
    let success = state
        .service
        .check(&client_id, &token, ip.as_deref())
        .await?;

    let now = state.clock.now();
    Ok(Json(CheckResponse {
        valid: true,
        license: LicenseView::from_license(&success.license, now),
    }))
}

// ============================================================================
// token-pair / refresh / revoke-refresh
// ============================================================================

/// Request body for `POST /api/v1/token-pair`.
#[derive(Debug, Deserialize)]
pub struct TokenPairRequest {
    pub client_id: Option<String>,
}

/// Response with a fresh access/refresh pair.
#[derive(Debug, Serialize)]
pub struct TokenPairResponse {
    pub access: String,
    pub refresh: String,
    /// Access-token lifetime in seconds
    pub expires_in: u64,
}

/// Issue a fresh access/refresh pair for an active license.
///
/// `POST /api/v1/token-pair`
pub async fn token_pair_handler(
    State(state): State<AppState>,
    Json(req): Json<TokenPairRequest>,
) -> Result<Json<TokenPairResponse>, ApiError> {
    let Some(client_id) = req.client_id else {
        return Err(ApiError::new(ErrorCode::MissingClientId));
    };
    validate_client_id(&client_id, "client_id")
        .map_err(|e| ApiError::invalid_field(&e.field, &e.message))?;

    let pair = state.service.issue_pair(&client_id, "client").await?;

    info!("Issued token pair for client {}", client_id);
    Ok(Json(TokenPairResponse {
        access: pair.access.token,
        refresh: pair.refresh.token,
        expires_in: state.service.codec().access_ttl_secs(),
    }))
}

/// Request body for `POST /api/v1/refresh` and `POST /api/v1/revoke-refresh`.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh: Option<String>,
}

/// Response with a freshly minted access token.
#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access: String,
    pub expires_in: u64,
}

/// Exchange a live refresh token for a new access token.
///
/// `POST /api/v1/refresh`
pub async fn refresh_handler(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let Some(refresh) = req.refresh else {
        return Err(ApiError::new(ErrorCode::InvalidRefresh));
    };

    let issued = state.service.refresh_access(&refresh).await?;

    Ok(Json(RefreshResponse {
        access: issued.token,
        expires_in: state.service.codec().access_ttl_secs(),
    }))
}

/// Kill a single refresh token.
///
/// `POST /api/v1/revoke-refresh`
pub async fn revoke_refresh_handler(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(refresh) = req.refresh else {
        return Err(ApiError::new(ErrorCode::InvalidRefresh));
    };

    state.service.revoke_refresh(&refresh).await?;

    Ok(Json(serde_json::json!({})))
}

// ============================================================================
// health
// ============================================================================

/// Liveness probe. Unauthenticated and unlimited.
///
/// `GET /health`
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::healthy(state.clock.now()))
}
