//! Background sweeps for license management.
//!
//! Requires the `background-jobs` feature. Four periodic tasks run on cron
//! schedules (UTC, configurable via `[scheduler]`):
//!
//! - **Expire sweep** (hourly): transitions active licenses past their
//!   deadline to `expired`
//! - **Warn sweeps** (three daily times, one per 7/3/1-day window): emit
//!   `license_expiry_warning` events, at most once per (client, window)
//! - **Garbage collection** (weekly): deletes records expired for longer
//!   than the configured retention
//! - **Monthly report**: publishes aggregate counts to the `admin` topic
//!
//! Every sweep is idempotent under repeated firing: the expire sweep is
//! guarded by status preconditions, the warn sweeps by the warn-flag set,
//! and garbage collection by the status+age query itself. Failures are
//! logged and retried on the next cycle; they never propagate to client
//! connections.
//!
//! # Usage
//!
//! ```rust,ignore
//! use aegis::jobs::JobScheduler;
//!
//! let scheduler = JobScheduler::new(db, service, bus, clock, config).await?;
//! scheduler.start().await?;
//! ```

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler as TokioJobScheduler};
use tracing::{error, info};

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::server::events::EventBus;
use crate::server::service::LicenseService;
use crate::server::store::Database;

mod expiry;
mod gc;
mod report;
mod warnings;

pub use expiry::run_expire_sweep;
pub use gc::run_garbage_collection;
pub use report::run_monthly_report;
pub use warnings::{run_warn_sweep, WarnLevel};

/// Errors that can occur in the job scheduler.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("scheduler error: {0}")]
    SchedulerError(String),

    #[error("database error: {0}")]
    DatabaseError(String),
}

impl From<crate::errors::LicenseError> for JobError {
    fn from(err: crate::errors::LicenseError) -> Self {
        JobError::DatabaseError(err.to_string())
    }
}

impl From<crate::server::service::ServiceError> for JobError {
    fn from(err: crate::server::service::ServiceError) -> Self {
        JobError::DatabaseError(err.to_string())
    }
}

/// Background job scheduler.
pub struct JobScheduler {
    scheduler: TokioJobScheduler,
    db: Arc<Database>,
    service: Arc<LicenseService>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl JobScheduler {
    /// Create a new job scheduler.
    pub async fn new(
        db: Arc<Database>,
        service: Arc<LicenseService>,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Result<Self, JobError> {
        let scheduler = TokioJobScheduler::new()
            .await
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        Ok(Self {
            scheduler,
            db,
            service,
            bus,
            clock,
            config,
        })
    }

    /// Register all sweeps and start the scheduler.
    pub async fn start(&self) -> Result<(), JobError> {
        info!("Starting Aegis job scheduler");

        self.add_expire_job().await?;
        self.add_warn_job(WarnLevel::Seven, self.config.warn_7_cron.clone())
            .await?;
        self.add_warn_job(WarnLevel::Three, self.config.warn_3_cron.clone())
            .await?;
        self.add_warn_job(WarnLevel::One, self.config.warn_1_cron.clone())
            .await?;
        self.add_gc_job().await?;
        self.add_report_job().await?;

        self.scheduler
            .start()
            .await
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        info!("Aegis job scheduler started");
        Ok(())
    }

    /// Stop the job scheduler.
    pub async fn shutdown(&mut self) -> Result<(), JobError> {
        info!("Shutting down Aegis job scheduler");
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;
        Ok(())
    }

    async fn add_expire_job(&self) -> Result<(), JobError> {
        let service = Arc::clone(&self.service);
        let clock = Arc::clone(&self.clock);

        let job = Job::new_async(self.config.expire_cron.as_str(), move |_uuid, _l| {
            let service = Arc::clone(&service);
            let clock = Arc::clone(&clock);
            Box::pin(async move {
                match run_expire_sweep(&service, clock.now()).await {
                    Ok(count) if count > 0 => info!("Expire sweep: {count} licenses expired"),
                    Ok(_) => {}
                    Err(e) => error!("Expire sweep failed: {e}"),
                }
            })
        })
        .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        info!("Added expire sweep (schedule: {})", self.config.expire_cron);
        Ok(())
    }

    async fn add_warn_job(&self, level: WarnLevel, cron: String) -> Result<(), JobError> {
        let db = Arc::clone(&self.db);
        let bus = Arc::clone(&self.bus);
        let clock = Arc::clone(&self.clock);

        let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let db = Arc::clone(&db);
            let bus = Arc::clone(&bus);
            let clock = Arc::clone(&clock);
            Box::pin(async move {
                match run_warn_sweep(&db, &bus, clock.now(), level).await {
                    Ok(count) if count > 0 => {
                        info!("Warn sweep ({level}): {count} warnings published");
                    }
                    Ok(_) => {}
                    Err(e) => error!("Warn sweep ({level}) failed: {e}"),
                }
            })
        })
        .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        info!("Added warn sweep {level} (schedule: {cron})");
        Ok(())
    }

    async fn add_gc_job(&self) -> Result<(), JobError> {
        let service = Arc::clone(&self.service);
        let clock = Arc::clone(&self.clock);
        let after_days = self.config.gc_after_days;

        let job = Job::new_async(self.config.gc_cron.as_str(), move |_uuid, _l| {
            let service = Arc::clone(&service);
            let clock = Arc::clone(&clock);
            Box::pin(async move {
                match run_garbage_collection(&service, clock.now(), after_days).await {
                    Ok(count) if count > 0 => info!("Garbage collection: {count} records removed"),
                    Ok(_) => {}
                    Err(e) => error!("Garbage collection failed: {e}"),
                }
            })
        })
        .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        info!(
            "Added garbage collection (schedule: {}, retention: {} days)",
            self.config.gc_cron, self.config.gc_after_days
        );
        Ok(())
    }

    async fn add_report_job(&self) -> Result<(), JobError> {
        let db = Arc::clone(&self.db);
        let bus = Arc::clone(&self.bus);
        let clock = Arc::clone(&self.clock);

        let job = Job::new_async(self.config.report_cron.as_str(), move |_uuid, _l| {
            let db = Arc::clone(&db);
            let bus = Arc::clone(&bus);
            let clock = Arc::clone(&clock);
            Box::pin(async move {
                match run_monthly_report(&db, &bus, clock.now()).await {
                    Ok(stats) => info!("Monthly report published ({} licenses)", stats.total),
                    Err(e) => error!("Monthly report failed: {e}"),
                }
            })
        })
        .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        info!("Added monthly report (schedule: {})", self.config.report_cron);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::SchedulerConfig;

    #[test]
    fn default_schedules() {
        let config = SchedulerConfig::default();
        assert_eq!(config.expire_cron, "0 0 * * * *");
        assert_eq!(config.gc_after_days, 90);
        assert!(config.report_cron.starts_with("0 0 6 1"));
    }
}
