//! Pre-expiry warning sweeps.
//!
//! One sweep per warn window (7, 3, 1 days before expiry). For each active
//! license inside a window whose warn flag for that window is unset, the
//! sweep sets the flag and publishes one `license_expiry_warning`. The flag
//! set makes the sweep idempotent across re-runs and process restarts;
//! flags are cleared when the license is extended.

use chrono::NaiveDateTime;
use tracing::debug;

use crate::server::audit::{AuditEvent, AuditKind};
use crate::server::events::{BusMessage, EventBus, Topic};
use crate::server::store::Database;

use super::JobError;

/// A pre-expiry warning window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarnLevel {
    Seven,
    Three,
    One,
}

impl WarnLevel {
    /// Window length in days.
    pub fn days(&self) -> i64 {
        match self {
            WarnLevel::Seven => 7,
            WarnLevel::Three => 3,
            WarnLevel::One => 1,
        }
    }

    /// Flag key stored per (client, level).
    pub fn flag(&self) -> u8 {
        self.days() as u8
    }

    /// Urgency tag surfaced to clients.
    pub fn urgency(&self) -> &'static str {
        match self {
            WarnLevel::Seven => "notice",
            WarnLevel::Three => "warning",
            WarnLevel::One => "critical",
        }
    }
}

impl std::fmt::Display for WarnLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}d", self.days())
    }
}

/// Publish warnings for every license entering the window, at most once per
/// (client, window).
///
/// Returns the number of warnings published.
pub async fn run_warn_sweep(
    db: &Database,
    bus: &EventBus,
    now: NaiveDateTime,
    level: WarnLevel,
) -> Result<u32, JobError> {
    debug!("Warn sweep {level} at {now}");

    let expiring = db.find_expiring_within(now, level.days(), level.flag()).await?;

    let mut count = 0;
    for license in expiring {
        // The query already excludes flagged clients; the insert still
        // guards against a concurrent sweep setting the flag first.
        let newly_set = db.set_warn_flag(&license.client_id, level.flag(), now).await?;
        if !newly_set {
            continue;
        }

        let days_remaining = license.days_remaining(now);
        bus.publish(
            &[
                Topic::License(license.client_id.clone()),
                Topic::Plan(license.plan),
                Topic::Admin,
            ],
            BusMessage::ExpiryWarning {
                client_id: license.client_id.clone(),
                urgency: level.urgency().to_string(),
                days_remaining,
            },
        )
        .await;

        let event = AuditEvent::success(AuditKind::Scheduler, &license.client_id, "scheduler", now)
            .with_payload(serde_json::json!({
                "warning": level.days(),
                "days_remaining": days_remaining,
            }));
        db.append_audit(&event).await?;

        count += 1;
    }

    Ok(count)
}
