//! Handler-level tests for the request API: input validation, stable error
//! codes, and response shapes.

#![cfg(all(feature = "server", feature = "sqlite"))]

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::{Extension, Json};
use sqlx::sqlite::SqlitePoolOptions;
use tokio_util::sync::CancellationToken;

use aegis::clock::{Clock, ManualClock};
use aegis::config::{AuthConfig, GatewayConfig};
use aegis::server::admin::{
    create_license_handler, extend_handler, list_licenses_handler, login_handler, revoke_handler,
    stats_handler, toggle_handler, update_modules_handler, CreateLicenseRequest, ExtendRequest,
    ListLicensesQuery, LoginRequest, RevokeRequest, UpdateModulesRequest,
};
use aegis::server::api_error::ErrorCode;
use aegis::server::auth::{AdminUser, AuthState, ConfigCredentialStore, SessionValidator};
use aegis::server::events::EventBus;
use aegis::server::handlers::{
    check_handler, health_handler, refresh_handler, token_pair_handler, AppState, CheckRequest,
    RefreshRequest, TokenPairRequest,
};
use aegis::server::service::LicenseService;
use aegis::server::store::Database;
use aegis::server::tokens::TokenCodec;

async fn setup() -> AppState {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite should connect");

    let db = Arc::new(Database::SQLite(pool));
    db.migrate().await.expect("migration should succeed");

    let codec = TokenCodec::new("api-test-secret", 24, 365, 30);
    let bus = Arc::new(EventBus::new(16));
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::from_system());

    let service = Arc::new(LicenseService::new(
        db.clone(),
        codec,
        bus.clone(),
        clock.clone(),
    ));

    let auth_config = AuthConfig {
        admin_secret: String::new(),
        admin_username: "admin".to_string(),
        admin_password: "hunter2".to_string(),
        session_ttl_secs: 3600,
    };
    let auth = AuthState {
        credentials: Arc::new(ConfigCredentialStore::new(&auth_config)),
        sessions: Arc::new(SessionValidator::new("api-admin-secret", 3600)),
    };

    AppState {
        db,
        service,
        bus,
        clock,
        auth,
        gateway: GatewayConfig::default(),
        shutdown: CancellationToken::new(),
    }
}

fn admin() -> AdminUser {
    AdminUser {
        subject: "admin".to_string(),
    }
}

fn create_request(client_id: &str) -> CreateLicenseRequest {
    CreateLicenseRequest {
        plan: Some("premium".to_string()),
        client_id: Some(client_id.to_string()),
        company: None,
        email: None,
        ttl_days: Some(30),
    }
}

// ============================================================================
// create
// ============================================================================

#[tokio::test]
async fn create_requires_a_known_plan() {
    let state = setup().await;

    let err = create_license_handler(
        State(state.clone()),
        admin(),
        Json(CreateLicenseRequest {
            plan: None,
            client_id: None,
            company: None,
            email: None,
            ttl_days: Some(30),
        }),
    )
    .await
    .expect_err("missing plan must fail");
    assert_eq!(err.error.code, ErrorCode::MissingPlan);

    let err = create_license_handler(
        State(state),
        admin(),
        Json(CreateLicenseRequest {
            plan: Some("platinum".to_string()),
            client_id: None,
            company: None,
            email: None,
            ttl_days: Some(30),
        }),
    )
    .await
    .expect_err("unknown plan must fail");
    assert_eq!(err.error.code, ErrorCode::InvalidPlan);
}

#[tokio::test]
async fn create_validates_email_and_rejects_duplicates() {
    let state = setup().await;

    let mut bad_email = create_request("api-create");
    bad_email.email = Some("not-an-email".to_string());
    let err = create_license_handler(State(state.clone()), admin(), Json(bad_email))
        .await
        .expect_err("bad email must fail");
    assert_eq!(err.error.code, ErrorCode::InvalidField);

    let mut blank_company = create_request("api-create");
    blank_company.company = Some("   ".to_string());
    let err = create_license_handler(State(state.clone()), admin(), Json(blank_company))
        .await
        .expect_err("blank company must fail");
    assert_eq!(err.error.code, ErrorCode::InvalidField);

    let mut long_company = create_request("api-create");
    long_company.company = Some("x".repeat(500));
    let err = create_license_handler(State(state.clone()), admin(), Json(long_company))
        .await
        .expect_err("oversized company must fail");
    assert_eq!(err.error.code, ErrorCode::InvalidField);

    let (status, Json(response)) =
        create_license_handler(State(state.clone()), admin(), Json(create_request("api-create")))
            .await
            .expect("create should succeed");
    assert_eq!(status, axum::http::StatusCode::CREATED);
    assert_eq!(response.license.plan, "premium");
    assert!(response.token.is_some());

    let err = create_license_handler(State(state), admin(), Json(create_request("api-create")))
        .await
        .expect_err("duplicate must fail");
    assert_eq!(err.error.code, ErrorCode::LicenseExists);
}

// ============================================================================
// check
// ============================================================================

#[tokio::test]
async fn check_round_trip_and_error_codes() {
    let state = setup().await;

    let (_, Json(created)) =
        create_license_handler(State(state.clone()), admin(), Json(create_request("api-chk")))
            .await
            .expect("create should succeed");
    let token = created.token.expect("token issued");

    // Missing parameters.
    let err = check_handler(
        State(state.clone()),
        None,
        Json(CheckRequest {
            client_id: None,
            token: None,
        }),
    )
    .await
    .expect_err("missing fields must fail");
    assert_eq!(err.error.code, ErrorCode::MissingParameters);

    // Unknown client.
    let err = check_handler(
        State(state.clone()),
        None,
        Json(CheckRequest {
            client_id: Some("api-ghost".to_string()),
            token: Some(token.clone()),
        }),
    )
    .await
    .expect_err("unknown client must fail");
    assert_eq!(err.error.code, ErrorCode::LicenseNotFound);

    // Garbage token.
    let err = check_handler(
        State(state.clone()),
        None,
        Json(CheckRequest {
            client_id: Some("api-chk".to_string()),
            token: Some("garbage".to_string()),
        }),
    )
    .await
    .expect_err("garbage token must fail");
    assert_eq!(err.error.code, ErrorCode::InvalidToken);

    // The happy path carries the debug context.
    let Json(response) = check_handler(
        State(state),
        None,
        Json(CheckRequest {
            client_id: Some("api-chk".to_string()),
            token: Some(token),
        }),
    )
    .await
    .expect("check should succeed");
    assert!(response.valid);
    assert_eq!(response.license.days_remaining, 30);
    assert_eq!(response.license.max_users, Some(50));
    assert_eq!(response.license.modules.len(), 5);
}

// ============================================================================
// token-pair / refresh
// ============================================================================

#[tokio::test]
async fn token_endpoints_shapes_and_errors() {
    let state = setup().await;

    create_license_handler(State(state.clone()), admin(), Json(create_request("api-tok")))
        .await
        .expect("create should succeed");

    let err = token_pair_handler(
        State(state.clone()),
        Json(TokenPairRequest { client_id: None }),
    )
    .await
    .expect_err("missing client_id must fail");
    assert_eq!(err.error.code, ErrorCode::MissingClientId);

    let Json(pair) = token_pair_handler(
        State(state.clone()),
        Json(TokenPairRequest {
            client_id: Some("api-tok".to_string()),
        }),
    )
    .await
    .expect("token pair should issue");
    assert_eq!(pair.expires_in, 24 * 3600);
    assert_ne!(pair.access, pair.refresh);

    let Json(refreshed) = refresh_handler(
        State(state.clone()),
        Json(RefreshRequest {
            refresh: Some(pair.refresh),
        }),
    )
    .await
    .expect("refresh exchange should succeed");
    assert!(!refreshed.access.is_empty());

    let err = refresh_handler(
        State(state),
        Json(RefreshRequest {
            refresh: Some("garbage".to_string()),
        }),
    )
    .await
    .expect_err("garbage refresh must fail");
    assert_eq!(err.error.code, ErrorCode::InvalidRefresh);
}

// ============================================================================
// lifecycle endpoints
// ============================================================================

#[tokio::test]
async fn extend_and_revoke_error_codes() {
    let state = setup().await;

    create_license_handler(State(state.clone()), admin(), Json(create_request("api-life")))
        .await
        .expect("create should succeed");

    let err = extend_handler(
        State(state.clone()),
        admin(),
        axum::extract::Path("api-life".to_string()),
        Json(ExtendRequest { days: Some(0) }),
    )
    .await
    .expect_err("zero days must fail");
    assert_eq!(err.error.code, ErrorCode::InvalidDays);

    let err = extend_handler(
        State(state.clone()),
        admin(),
        axum::extract::Path("api-missing".to_string()),
        Json(ExtendRequest { days: Some(10) }),
    )
    .await
    .expect_err("unknown client must fail");
    assert_eq!(err.error.code, ErrorCode::LicenseNotFound);

    let err = revoke_handler(
        State(state.clone()),
        admin(),
        axum::extract::Path("api-life".to_string()),
        Json(RevokeRequest {
            reason: Some("   ".to_string()),
            description: None,
        }),
    )
    .await
    .expect_err("blank reason must fail");
    assert_eq!(err.error.code, ErrorCode::InvalidField);

    let Json(revoked) = revoke_handler(
        State(state.clone()),
        admin(),
        axum::extract::Path("api-life".to_string()),
        Json(RevokeRequest {
            reason: Some("policy".to_string()),
            description: None,
        }),
    )
    .await
    .expect("revoke should succeed");
    assert!(revoked.revoked_at.ends_with('Z'));

    // A revoked license cannot be toggled back.
    let err = toggle_handler(
        State(state),
        admin(),
        axum::extract::Path("api-life".to_string()),
    )
    .await
    .expect_err("toggle after revoke must fail");
    assert_eq!(err.error.code, ErrorCode::IllegalTransition);
}

#[tokio::test]
async fn update_modules_rejects_unknown_tags() {
    let state = setup().await;

    create_license_handler(State(state.clone()), admin(), Json(create_request("api-mod")))
        .await
        .expect("create should succeed");

    let err = update_modules_handler(
        State(state.clone()),
        admin(),
        axum::extract::Path("api-mod".to_string()),
        Json(UpdateModulesRequest {
            module: Some("teleport".to_string()),
            enabled: Some(true),
        }),
    )
    .await
    .expect_err("unknown module must fail");
    assert_eq!(err.error.code, ErrorCode::UnknownModule);

    let Json(response) = update_modules_handler(
        State(state),
        admin(),
        axum::extract::Path("api-mod".to_string()),
        Json(UpdateModulesRequest {
            module: Some("analytics".to_string()),
            enabled: Some(false),
        }),
    )
    .await
    .expect("override should succeed");
    assert!(!response
        .active_modules
        .iter()
        .any(|m| m.as_str() == "analytics"));
}

// ============================================================================
// admin login, list, stats, health
// ============================================================================

#[tokio::test]
async fn login_issues_valid_session_tokens() {
    let state = setup().await;
    let auth = state.auth.clone();

    let err = login_handler(
        State(state.clone()),
        Extension(auth.clone()),
        Json(LoginRequest {
            username: Some("admin".to_string()),
            password: Some("wrong".to_string()),
        }),
    )
    .await
    .expect_err("bad credentials must fail");
    assert_eq!(err.error.code, ErrorCode::Unauthorized);

    let Json(session) = login_handler(
        State(state),
        Extension(auth.clone()),
        Json(LoginRequest {
            username: Some("admin".to_string()),
            password: Some("hunter2".to_string()),
        }),
    )
    .await
    .expect("login should succeed");

    assert_eq!(session.expires_in, 3600);
    let claims = auth
        .sessions
        .validate_token(&session.token)
        .expect("issued session token must validate");
    assert_eq!(claims.sub, "admin");
}

#[tokio::test]
async fn list_and_stats_reflect_created_licenses() {
    let state = setup().await;

    for i in 0..3 {
        create_license_handler(
            State(state.clone()),
            admin(),
            Json(create_request(&format!("api-list-{i}"))),
        )
        .await
        .expect("create should succeed");
    }

    let Json(listed) = list_licenses_handler(
        State(state.clone()),
        admin(),
        Query(ListLicensesQuery {
            page: 1,
            limit: 2,
            status: Some("active".to_string()),
            plan: None,
        }),
    )
    .await
    .expect("list should succeed");
    assert_eq!(listed.items.len(), 2);
    assert_eq!(listed.pagination.total, 3);
    assert_eq!(listed.pagination.total_pages, 2);

    let Json(stats) = stats_handler(State(state.clone()), admin())
        .await
        .expect("stats should succeed");
    assert_eq!(stats.stats.total, 3);
    assert_eq!(stats.stats.by_plan.get("premium"), Some(&3));

    let Json(health) = health_handler(State(state)).await;
    assert_eq!(health.status, "healthy");
}
