//! Aegis server binary.
//!
//! Wires the store, codec, bus, service, gateway, scheduler, and request API
//! together from configuration and serves until interrupted.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use aegis::clock::{Clock, SystemClock};
use aegis::config::init_config;
use aegis::errors::{LicenseError, LicenseResult};
use aegis::server::auth::{AuthState, ConfigCredentialStore, SessionValidator};
use aegis::server::events::EventBus;
use aegis::server::routes::build_router;
use aegis::server::service::LicenseService;
use aegis::server::store::Database;
use aegis::server::tokens::TokenCodec;
use aegis::server::AppState;

#[tokio::main]
async fn main() -> LicenseResult<()> {
    let config = init_config()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let db = Database::new().await?;
    db.migrate().await?;
    info!("Database ready ({})", config.database.db_type);

    let codec = TokenCodec::from_config(config)?;
    let bus = Arc::new(EventBus::new(config.gateway.queue_capacity));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let service = Arc::new(LicenseService::new(
        db.clone(),
        codec,
        bus.clone(),
        clock.clone(),
    ));

    // A crash between commit and publish loses only notifications; replay
    // the recent audit tail so operator dashboards know to refresh.
    let replay_since = clock.now() - Duration::minutes(5);
    if let Err(e) = service.recover_publishes(replay_since).await {
        error!("Audit replay failed: {e}");
    }

    let auth = AuthState {
        credentials: Arc::new(ConfigCredentialStore::new(&config.auth)),
        sessions: Arc::new(SessionValidator::new(
            &config.resolve_admin_secret()?,
            config.auth.session_ttl_secs,
        )),
    };

    let shutdown = CancellationToken::new();

    let state = AppState {
        db: db.clone(),
        service: service.clone(),
        bus: bus.clone(),
        clock: clock.clone(),
        auth,
        gateway: config.gateway.clone(),
        shutdown: shutdown.clone(),
    };

    #[cfg(feature = "background-jobs")]
    let mut job_scheduler = {
        let scheduler = aegis::jobs::JobScheduler::new(
            db.clone(),
            service.clone(),
            bus.clone(),
            clock.clone(),
            config.scheduler.clone(),
        )
        .await
        .map_err(|e| LicenseError::ServerError(e.to_string()))?;
        scheduler
            .start()
            .await
            .map_err(|e| LicenseError::ServerError(e.to_string()))?;
        scheduler
    };

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| LicenseError::ConfigError(format!("invalid bind address: {e}")))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| LicenseError::ServerError(format!("failed to bind {addr}: {e}")))?;
    info!("Aegis server listening on http://{addr}");

    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            shutdown_signal.cancel();
        }
    });

    let serve_shutdown = shutdown.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
    .await
    .map_err(|e| LicenseError::ServerError(format!("server error: {e}")))?;

    #[cfg(feature = "background-jobs")]
    if let Err(e) = job_scheduler.shutdown().await {
        error!("Scheduler shutdown failed: {e}");
    }

    info!("Aegis server stopped");
    Ok(())
}
