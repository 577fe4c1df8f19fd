//! Append-only audit log.
//!
//! Every security-relevant event lands here: validation outcomes, lifecycle
//! mutations, scheduler transitions, admin logins, security violations. The
//! core only appends; retention and query shape are operator-defined.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{query, query_as, FromRow};
use tracing::error;

use crate::errors::{LicenseError, LicenseResult};
use crate::server::store::Database;

/// Audit event taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Validation,
    Creation,
    Toggle,
    Extension,
    Revocation,
    PlanChange,
    ModulesUpdate,
    TokenIssue,
    Deletion,
    Scheduler,
    AdminLogin,
    SecurityViolation,
    SystemError,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::Validation => "validation",
            AuditKind::Creation => "creation",
            AuditKind::Toggle => "toggle",
            AuditKind::Extension => "extension",
            AuditKind::Revocation => "revocation",
            AuditKind::PlanChange => "plan_change",
            AuditKind::ModulesUpdate => "modules_update",
            AuditKind::TokenIssue => "token_issue",
            AuditKind::Deletion => "deletion",
            AuditKind::Scheduler => "scheduler",
            AuditKind::AdminLogin => "admin_login",
            AuditKind::SecurityViolation => "security_violation",
            AuditKind::SystemError => "system_error",
        }
    }
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the audited operation succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failed,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Failed => "failed",
        }
    }
}

/// Event severity, drives operator alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// One audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub ts: NaiveDateTime,
    pub kind: AuditKind,
    pub client_id: Option<String>,
    pub actor: String,
    pub ip: Option<String>,
    pub status: AuditStatus,
    pub severity: Severity,
    pub payload: Option<serde_json::Value>,
}

impl AuditEvent {
    /// A successful low-severity event, the common case.
    pub fn success(kind: AuditKind, client_id: &str, actor: &str, ts: NaiveDateTime) -> Self {
        Self {
            ts,
            kind,
            client_id: Some(client_id.to_string()),
            actor: actor.to_string(),
            ip: None,
            status: AuditStatus::Success,
            severity: Severity::Low,
            payload: None,
        }
    }

    /// A failed event at the given severity.
    pub fn failure(
        kind: AuditKind,
        client_id: Option<&str>,
        actor: &str,
        severity: Severity,
        ts: NaiveDateTime,
    ) -> Self {
        Self {
            ts,
            kind,
            client_id: client_id.map(String::from),
            actor: actor.to_string(),
            ip: None,
            status: AuditStatus::Failed,
            severity,
            payload: None,
        }
    }

    pub fn with_ip(mut self, ip: Option<String>) -> Self {
        self.ip = ip;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Raw audit row for reads.
#[derive(Debug, FromRow)]
pub struct AuditRow {
    pub id: i64,
    pub ts: NaiveDateTime,
    pub kind: String,
    pub client_id: Option<String>,
    pub actor: String,
    pub ip: Option<String>,
    pub status: String,
    pub severity: String,
    pub payload: Option<String>,
}

impl Database {
    /// Append one audit event. Never updates or deletes.
    pub async fn append_audit(&self, event: &AuditEvent) -> LicenseResult<()> {
        let payload = event
            .payload
            .as_ref()
            .map(|p| p.to_string());

        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query(
                    "INSERT INTO audit_events \
                         (ts, kind, client_id, actor, ip, status, severity, payload) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(event.ts)
                .bind(event.kind.as_str())
                .bind(&event.client_id)
                .bind(&event.actor)
                .bind(&event.ip)
                .bind(event.status.as_str())
                .bind(event.severity.as_str())
                .bind(payload)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("SQLite append_audit failed: {e}");
                    LicenseError::ServerError(format!("database error: {e}"))
                })?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query(
                    "INSERT INTO audit_events \
                         (ts, kind, client_id, actor, ip, status, severity, payload) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                )
                .bind(event.ts)
                .bind(event.kind.as_str())
                .bind(&event.client_id)
                .bind(&event.actor)
                .bind(&event.ip)
                .bind(event.status.as_str())
                .bind(event.severity.as_str())
                .bind(payload)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("Postgres append_audit failed: {e}");
                    LicenseError::ServerError(format!("database error: {e}"))
                })?;
            }
        }

        Ok(())
    }

    /// Audit events recorded at or after `since`, oldest first.
    ///
    /// Used by startup recovery to re-announce mutations that may have
    /// committed without their bus publish.
    pub async fn audit_since(&self, since: NaiveDateTime) -> LicenseResult<Vec<AuditRow>> {
        let rows = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query_as::<_, AuditRow>(
                "SELECT * FROM audit_events WHERE ts >= ? ORDER BY id ASC",
            )
            .bind(since)
            .fetch_all(pool)
            .await
            .map_err(|e| {
                error!("SQLite audit_since failed: {e}");
                LicenseError::ServerError(format!("database error: {e}"))
            })?,
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => query_as::<_, AuditRow>(
                "SELECT * FROM audit_events WHERE ts >= $1 ORDER BY id ASC",
            )
            .bind(since)
            .fetch_all(pool)
            .await
            .map_err(|e| {
                error!("Postgres audit_since failed: {e}");
                LicenseError::ServerError(format!("database error: {e}"))
            })?,
        };

        Ok(rows)
    }

    /// Count audit events for a client with a given kind. Test/diagnostic
    /// helper for the one-event-per-mutation invariant.
    pub async fn count_audit(&self, client_id: &str, kind: AuditKind) -> LicenseResult<i64> {
        let count: (i64,) = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query_as(
                "SELECT COUNT(*) FROM audit_events WHERE client_id = ? AND kind = ?",
            )
            .bind(client_id)
            .bind(kind.as_str())
            .fetch_one(pool)
            .await
            .map_err(|e| LicenseError::ServerError(format!("database error: {e}")))?,
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => query_as(
                "SELECT COUNT(*) FROM audit_events WHERE client_id = $1 AND kind = $2",
            )
            .bind(client_id)
            .bind(kind.as_str())
            .fetch_one(pool)
            .await
            .map_err(|e| LicenseError::ServerError(format!("database error: {e}")))?,
        };

        Ok(count.0)
    }
}
