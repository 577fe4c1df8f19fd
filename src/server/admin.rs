//! Operator API: license lifecycle management.
//!
//! All endpoints except `login` require a valid admin session token (see
//! `server::auth`).
//!
//! # Endpoints
//!
//! - `POST /api/v1/admin/login` - Exchange credentials for a session token
//! - `POST /api/v1/licenses` - Create a license
//! - `GET /api/v1/licenses` - List licenses with pagination and filters
//! - `GET /api/v1/licenses/{client_id}` - Fetch one license
//! - `POST /api/v1/licenses/{client_id}/toggle` - Flip active/inactive
//! - `POST /api/v1/licenses/{client_id}/extend` - Push the deadline out
//! - `POST /api/v1/licenses/{client_id}/revoke` - Revoke
//! - `PATCH /api/v1/licenses/{client_id}/plan` - Change plan
//! - `PATCH /api/v1/licenses/{client_id}/modules` - Single-module override
//! - `DELETE /api/v1/licenses/{client_id}` - Remove the record
//! - `GET /api/v1/stats` - Counts by status and plan

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::plans::{Module, Plan};
use crate::server::api_error::{ApiError, ErrorCode};
use crate::server::audit::{AuditEvent, AuditKind, AuditStatus, Severity};
use crate::server::auth::{AdminUser, AuthState};
use crate::server::handlers::{format_ts, AppState, LicenseView};
use crate::server::service::CreateLicense;
use crate::server::store::LicenseStats;
use crate::server::validation::{
    validate_client_id, validate_email, validate_length, validate_not_empty,
    validate_optional_not_empty,
};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for operator login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Response carrying a fresh admin session token.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: u64,
}

/// Request body for creating a new license.
#[derive(Debug, Deserialize)]
pub struct CreateLicenseRequest {
    /// Plan name (required)
    pub plan: Option<String>,
    /// Explicit client id; generated when absent
    pub client_id: Option<String>,
    pub company: Option<String>,
    pub email: Option<String>,
    /// Days until expiry (required, positive)
    pub ttl_days: Option<i64>,
}

/// A mutated license plus the reissued token, if one was issued.
#[derive(Debug, Serialize)]
pub struct MutationResponse {
    pub license: LicenseView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Request body for extending a license.
#[derive(Debug, Deserialize)]
pub struct ExtendRequest {
    pub days: Option<i64>,
}

/// Request body for revoking a license.
#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub reason: Option<String>,
    pub description: Option<String>,
}

/// Response for a revocation.
#[derive(Debug, Serialize)]
pub struct RevokeResponse {
    pub revoked_at: String,
}

/// Request body for changing the plan.
#[derive(Debug, Deserialize)]
pub struct UpdatePlanRequest {
    pub plan: Option<String>,
}

/// Request body for the single-module override.
#[derive(Debug, Deserialize)]
pub struct UpdateModulesRequest {
    pub module: Option<String>,
    pub enabled: Option<bool>,
}

/// Response listing the effective module set after an override.
#[derive(Debug, Serialize)]
pub struct UpdateModulesResponse {
    pub active_modules: Vec<Module>,
}

/// Query parameters for listing licenses.
#[derive(Debug, Deserialize)]
pub struct ListLicensesQuery {
    /// Pagination: page number (1-indexed)
    #[serde(default = "default_page")]
    pub page: u32,
    /// Pagination: items per page
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Filter by status name
    pub status: Option<String>,
    /// Filter by plan name
    pub plan: Option<String>,
}

fn default_page() -> u32 {
    1
}
fn default_limit() -> u32 {
    50
}

/// Response for listing licenses.
#[derive(Debug, Serialize)]
pub struct ListLicensesResponse {
    pub items: Vec<LicenseView>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
}

/// Response for the stats endpoint.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: LicenseStats,
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_plan(raw: Option<String>) -> Result<Plan, ApiError> {
    let Some(plan) = raw else {
        return Err(ApiError::new(ErrorCode::MissingPlan));
    };
    plan.parse::<Plan>()
        .map_err(|e| ApiError::with_message(ErrorCode::InvalidPlan, e.to_string()))
}

// ============================================================================
// Handlers
// ============================================================================

/// Exchange operator credentials for a session token.
///
/// `POST /api/v1/admin/login`
pub async fn login_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let (Some(username), Some(password)) = (req.username, req.password) else {
        return Err(ApiError::new(ErrorCode::MissingParameters));
    };

    let now = state.clock.now();
    if !auth.credentials.verify(&username, &password) {
        let event = AuditEvent::failure(
            AuditKind::AdminLogin,
            None,
            &username,
            Severity::Medium,
            now,
        );
        let _ = state.db.append_audit(&event).await;
        return Err(ApiError::with_message(
            ErrorCode::Unauthorized,
            "invalid credentials",
        ));
    }

    let now_secs = now.and_utc().timestamp() as u64;
    let token = auth.sessions.create_token(&username, now_secs)?;

    let event = AuditEvent {
        status: AuditStatus::Success,
        ..AuditEvent::failure(AuditKind::AdminLogin, None, &username, Severity::Low, now)
    };
    let _ = state.db.append_audit(&event).await;

    info!("Operator {} logged in", username);
    Ok(Json(LoginResponse {
        expires_in: auth.sessions.session_ttl_secs(),
        token,
    }))
}

/// Create a new license.
///
/// `POST /api/v1/licenses`
pub async fn create_license_handler(
    State(state): State<AppState>,
    admin: AdminUser,
    Json(req): Json<CreateLicenseRequest>,
) -> Result<(StatusCode, Json<MutationResponse>), ApiError> {
    let plan = parse_plan(req.plan)?;
    let Some(ttl_days) = req.ttl_days else {
        return Err(ApiError::new(ErrorCode::MissingParameters));
    };

    if let Some(client_id) = req.client_id.as_deref() {
        validate_client_id(client_id, "client_id")
            .map_err(|e| ApiError::invalid_field(&e.field, &e.message))?;
    }
    if let Some(email) = req.email.as_deref() {
        validate_email(email, "email")
            .map_err(|e| ApiError::invalid_field(&e.field, &e.message))?;
    }
    validate_optional_not_empty(req.company.as_deref(), "company")
        .map_err(|e| ApiError::invalid_field(&e.field, &e.message))?;
    if let Some(company) = req.company.as_deref() {
        validate_length(company, 1, 200, "company")
            .map_err(|e| ApiError::invalid_field(&e.field, &e.message))?;
    }

    let mutated = state
        .service
        .create(
            CreateLicense {
                client_id: req.client_id,
                plan,
                company_name: req.company,
                contact_email: req.email,
                ttl_days,
            },
            &admin.subject,
        )
        .await?;

    let now = state.clock.now();
    Ok((
        StatusCode::CREATED,
        Json(MutationResponse {
            license: LicenseView::from_license(&mutated.license, now),
            token: mutated.token.map(|t| t.token),
        }),
    ))
}

/// Fetch one license.
///
/// `GET /api/v1/licenses/{client_id}`
pub async fn get_license_handler(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(client_id): Path<String>,
) -> Result<Json<LicenseView>, ApiError> {
    let license = state
        .db
        .get(&client_id)
        .await?
        .ok_or_else(|| ApiError::new(ErrorCode::LicenseNotFound))?;

    let now = state.clock.now();
    Ok(Json(LicenseView::from_license(&license, now)))
}

/// Flip a license between active and inactive.
///
/// `POST /api/v1/licenses/{client_id}/toggle`
pub async fn toggle_handler(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(client_id): Path<String>,
) -> Result<Json<MutationResponse>, ApiError> {
    let mutated = state.service.toggle(&client_id, &admin.subject).await?;

    let now = state.clock.now();
    Ok(Json(MutationResponse {
        license: LicenseView::from_license(&mutated.license, now),
        token: mutated.token.map(|t| t.token),
    }))
}

/// Push the expiry deadline out by a positive number of days.
///
/// `POST /api/v1/licenses/{client_id}/extend`
pub async fn extend_handler(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(client_id): Path<String>,
    Json(req): Json<ExtendRequest>,
) -> Result<Json<MutationResponse>, ApiError> {
    let Some(days) = req.days else {
        return Err(ApiError::new(ErrorCode::MissingParameters));
    };

    let mutated = state
        .service
        .extend(&client_id, days, &admin.subject)
        .await?;

    let now = state.clock.now();
    Ok(Json(MutationResponse {
        license: LicenseView::from_license(&mutated.license, now),
        token: mutated.token.map(|t| t.token),
    }))
}

/// Revoke a license and its current token.
///
/// `POST /api/v1/licenses/{client_id}/revoke`
pub async fn revoke_handler(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(client_id): Path<String>,
    Json(req): Json<RevokeRequest>,
) -> Result<Json<RevokeResponse>, ApiError> {
    let Some(reason) = req.reason else {
        return Err(ApiError::new(ErrorCode::MissingParameters));
    };
    validate_not_empty(&reason, "reason")
        .map_err(|e| ApiError::invalid_field(&e.field, &e.message))?;
    validate_length(&reason, 1, 200, "reason")
        .map_err(|e| ApiError::invalid_field(&e.field, &e.message))?;
    validate_optional_not_empty(req.description.as_deref(), "description")
        .map_err(|e| ApiError::invalid_field(&e.field, &e.message))?;

    let revoked_at = state
        .service
        .revoke(&client_id, &reason, req.description.as_deref(), &admin.subject)
        .await?;

    Ok(Json(RevokeResponse {
        revoked_at: format_ts(revoked_at),
    }))
}

/// Change the plan.
///
/// `PATCH /api/v1/licenses/{client_id}/plan`
pub async fn update_plan_handler(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(client_id): Path<String>,
    Json(req): Json<UpdatePlanRequest>,
) -> Result<Json<MutationResponse>, ApiError> {
    let plan = parse_plan(req.plan)?;

    let mutated = state
        .service
        .update_plan(&client_id, plan, &admin.subject)
        .await?;

    let now = state.clock.now();
    Ok(Json(MutationResponse {
        license: LicenseView::from_license(&mutated.license, now),
        token: mutated.token.map(|t| t.token),
    }))
}

/// Administrative single-module override.
///
/// `PATCH /api/v1/licenses/{client_id}/modules`
pub async fn update_modules_handler(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(client_id): Path<String>,
    Json(req): Json<UpdateModulesRequest>,
) -> Result<Json<UpdateModulesResponse>, ApiError> {
    let (Some(module), Some(enabled)) = (req.module, req.enabled) else {
        return Err(ApiError::new(ErrorCode::MissingParameters));
    };
    let module = module
        .parse::<Module>()
        .map_err(|e| ApiError::with_message(ErrorCode::UnknownModule, e.to_string()))?;

    let license = state
        .service
        .set_module(&client_id, module, enabled, &admin.subject)
        .await?;

    Ok(Json(UpdateModulesResponse {
        active_modules: license.active_modules.iter().copied().collect(),
    }))
}

/// Remove a license record.
///
/// `DELETE /api/v1/licenses/{client_id}`
pub async fn delete_handler(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(client_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.service.delete(&client_id, &admin.subject).await?;
    Ok(Json(serde_json::json!({})))
}

/// List licenses with pagination and filters.
///
/// `GET /api/v1/licenses`
pub async fn list_licenses_handler(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<ListLicensesQuery>,
) -> Result<Json<ListLicensesResponse>, ApiError> {
    let page = query.page.max(1);
    let limit = query.limit.clamp(1, 500);
    let offset = i64::from(page - 1) * i64::from(limit);

    let items = state
        .db
        .list(
            query.status.as_deref(),
            query.plan.as_deref(),
            i64::from(limit),
            offset,
        )
        .await?;
    let total = state
        .db
        .count(query.status.as_deref(), query.plan.as_deref())
        .await?;

    let now = state.clock.now();
    let total_pages = (total + i64::from(limit) - 1) / i64::from(limit);

    Ok(Json(ListLicensesResponse {
        items: items
            .iter()
            .map(|l| LicenseView::from_license(l, now))
            .collect(),
        pagination: Pagination {
            page,
            limit,
            total,
            total_pages,
        },
    }))
}

/// Counts by status and plan.
///
/// `GET /api/v1/stats`
pub async fn stats_handler(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<StatsResponse>, ApiError> {
    let stats = state.db.stats().await?;
    Ok(Json(StatsResponse { stats }))
}
