//! Monthly aggregate report.
//!
//! Publishes the same counters as the stats endpoint to the `admin` topic,
//! so operator dashboards receive a monthly snapshot without polling.

use chrono::NaiveDateTime;

use crate::server::audit::{AuditEvent, AuditKind, AuditStatus, Severity};
use crate::server::events::{BusMessage, EventBus, Topic};
use crate::server::store::{Database, LicenseStats};

use super::JobError;

/// Compute aggregate counts and publish them to the admin topic.
pub async fn run_monthly_report(
    db: &Database,
    bus: &EventBus,
    now: NaiveDateTime,
) -> Result<LicenseStats, JobError> {
    let stats = db.stats().await?;

    bus.publish(
        &[Topic::Admin],
        BusMessage::SystemNotification {
            message: "monthly_report".to_string(),
            payload: serde_json::json!({
                "total": stats.total,
                "by_status": stats.by_status,
                "by_plan": stats.by_plan,
            }),
        },
    )
    .await;

    let event = AuditEvent {
        ts: now,
        kind: AuditKind::Scheduler,
        client_id: None,
        actor: "scheduler".to_string(),
        ip: None,
        status: AuditStatus::Success,
        severity: Severity::Low,
        payload: Some(serde_json::json!({ "report": "monthly", "total": stats.total })),
    };
    db.append_audit(&event).await?;

    Ok(stats)
}
