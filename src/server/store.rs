//! License store: the authoritative record per client.
//!
//! One row per installation, keyed by `client_id`. The `Database` enum
//! abstracts over SQLite and Postgres; available variants depend on enabled
//! features (`sqlite`, `postgres`).
//!
//! Writers are serialized per client by `LicenseService`; the store itself
//! only guarantees that each individual query sees a consistent snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::{query, query_as, FromRow};
use tracing::error;

#[cfg(feature = "sqlite")]
use sqlx::SqlitePool;

#[cfg(feature = "postgres")]
use sqlx::PgPool;

use crate::config::get_config;
use crate::errors::{LicenseError, LicenseResult};
use crate::plans::{expired_modules, modules_for_plan, Module, Plan};

/// Bound on the per-license activity ring.
pub const ACTIVITY_LOG_CAP: usize = 200;

/// License lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseStatus {
    Active,
    Inactive,
    Expired,
    Revoked,
}

impl LicenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseStatus::Active => "active",
            LicenseStatus::Inactive => "inactive",
            LicenseStatus::Expired => "expired",
            LicenseStatus::Revoked => "revoked",
        }
    }

    fn parse(s: &str) -> LicenseResult<Self> {
        match s {
            "active" => Ok(LicenseStatus::Active),
            "inactive" => Ok(LicenseStatus::Inactive),
            "expired" => Ok(LicenseStatus::Expired),
            "revoked" => Ok(LicenseStatus::Revoked),
            other => Err(LicenseError::ServerError(format!(
                "corrupt license record: unknown status '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the bounded activity ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub ts: NaiveDateTime,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// The authoritative license record for one installation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub client_id: String,
    pub plan: Plan,
    pub status: LicenseStatus,
    pub active_modules: BTreeSet<Module>,
    pub expires_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub last_check: Option<NaiveDateTime>,
    pub last_activity: Option<NaiveDateTime>,
    pub company_name: Option<String>,
    pub contact_email: Option<String>,
    /// Id of the latest issued access token. Rotated on every status, plan,
    /// or expiry mutation.
    pub current_token_id: String,
    pub activity_log: Vec<ActivityEntry>,
}

impl License {
    /// Maximum concurrent users, derived from the plan. `None` = unlimited.
    pub fn max_users(&self) -> Option<u32> {
        self.plan.max_users()
    }

    /// Whether the expiry deadline has passed at `now`.
    pub fn is_expired(&self, now: NaiveDateTime) -> bool {
        self.expires_at <= now
    }

    /// Whole days until expiry, clamped at zero.
    pub fn days_remaining(&self, now: NaiveDateTime) -> i64 {
        (self.expires_at - now).num_days().max(0)
    }

    /// Whether `active_modules` matches what the status demands.
    pub fn modules_consistent(&self) -> bool {
        match self.status {
            LicenseStatus::Active => self.active_modules == modules_for_plan(self.plan),
            LicenseStatus::Inactive | LicenseStatus::Revoked => self.active_modules.is_empty(),
            LicenseStatus::Expired => self.active_modules == expired_modules(),
        }
    }

    /// Append to the activity ring, evicting the oldest entries past the cap.
    pub fn record_activity(&mut self, entry: ActivityEntry) {
        self.last_activity = Some(entry.ts);
        self.activity_log.push(entry);
        if self.activity_log.len() > ACTIVITY_LOG_CAP {
            let excess = self.activity_log.len() - ACTIVITY_LOG_CAP;
            self.activity_log.drain(..excess);
        }
    }
}

/// Counts by status and plan, for the stats endpoint and the monthly report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LicenseStats {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_plan: BTreeMap<String, i64>,
}

/// Raw row shape; enums and JSON columns are stored as TEXT.
#[derive(Debug, FromRow)]
struct LicenseRow {
    client_id: String,
    plan: String,
    status: String,
    active_modules: String,
    expires_at: NaiveDateTime,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
    last_check: Option<NaiveDateTime>,
    last_activity: Option<NaiveDateTime>,
    company_name: Option<String>,
    contact_email: Option<String>,
    current_token_id: String,
    activity_log: String,
}

impl TryFrom<LicenseRow> for License {
    type Error = LicenseError;

    fn try_from(row: LicenseRow) -> LicenseResult<Self> {
        let plan: Plan = row
            .plan
            .parse()
            .map_err(|e| LicenseError::ServerError(format!("corrupt license record: {e}")))?;
        let status = LicenseStatus::parse(&row.status)?;

        let modules: Vec<Module> = serde_json::from_str(&row.active_modules).map_err(|e| {
            LicenseError::ServerError(format!("corrupt active_modules column: {e}"))
        })?;
        let activity_log: Vec<ActivityEntry> = serde_json::from_str(&row.activity_log)
            .map_err(|e| LicenseError::ServerError(format!("corrupt activity_log column: {e}")))?;

        Ok(License {
            client_id: row.client_id,
            plan,
            status,
            active_modules: modules.into_iter().collect(),
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_check: row.last_check,
            last_activity: row.last_activity,
            company_name: row.company_name,
            contact_email: row.contact_email,
            current_token_id: row.current_token_id,
            activity_log,
        })
    }
}

fn rows_to_licenses(rows: Vec<LicenseRow>) -> LicenseResult<Vec<License>> {
    rows.into_iter().map(License::try_from).collect()
}

/// Unified database abstraction over SQLite and Postgres.
///
/// Available variants depend on enabled features:
/// - `sqlite` feature enables `Database::SQLite`
/// - `postgres` feature enables `Database::Postgres`
#[derive(Debug, Clone)]
pub enum Database {
    #[cfg(feature = "sqlite")]
    SQLite(SqlitePool),
    #[cfg(feature = "postgres")]
    Postgres(PgPool),
}

#[cfg(feature = "sqlite")]
const SCHEMA_SQLITE: &str = r#"
CREATE TABLE IF NOT EXISTS licenses (
    client_id        TEXT PRIMARY KEY,
    plan             TEXT NOT NULL,
    status           TEXT NOT NULL,
    active_modules   TEXT NOT NULL,
    expires_at       TEXT NOT NULL,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL,
    last_check       TEXT,
    last_activity    TEXT,
    company_name     TEXT,
    contact_email    TEXT,
    current_token_id TEXT NOT NULL,
    activity_log     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_licenses_status ON licenses(status);
CREATE INDEX IF NOT EXISTS idx_licenses_expires_at ON licenses(expires_at);

CREATE TABLE IF NOT EXISTS revocations (
    token_id    TEXT PRIMARY KEY,
    client_id   TEXT NOT NULL,
    revoked_at  TEXT NOT NULL,
    reason      TEXT NOT NULL,
    description TEXT
);

CREATE TABLE IF NOT EXISTS refresh_tokens (
    token_hash TEXT PRIMARY KEY,
    token_id   TEXT NOT NULL,
    client_id  TEXT NOT NULL,
    issued_at  TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    revoked_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_refresh_tokens_client ON refresh_tokens(client_id);

CREATE TABLE IF NOT EXISTS warn_flags (
    client_id TEXT NOT NULL,
    level     INTEGER NOT NULL,
    set_at    TEXT NOT NULL,
    PRIMARY KEY (client_id, level)
);

CREATE TABLE IF NOT EXISTS audit_events (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    ts        TEXT NOT NULL,
    kind      TEXT NOT NULL,
    client_id TEXT,
    actor     TEXT NOT NULL,
    ip        TEXT,
    status    TEXT NOT NULL,
    severity  TEXT NOT NULL,
    payload   TEXT
);
CREATE INDEX IF NOT EXISTS idx_audit_events_ts ON audit_events(ts);
"#;

#[cfg(feature = "postgres")]
const SCHEMA_POSTGRES: &str = r#"
CREATE TABLE IF NOT EXISTS licenses (
    client_id        TEXT PRIMARY KEY,
    plan             TEXT NOT NULL,
    status           TEXT NOT NULL,
    active_modules   TEXT NOT NULL,
    expires_at       TIMESTAMP NOT NULL,
    created_at       TIMESTAMP NOT NULL,
    updated_at       TIMESTAMP NOT NULL,
    last_check       TIMESTAMP,
    last_activity    TIMESTAMP,
    company_name     TEXT,
    contact_email    TEXT,
    current_token_id TEXT NOT NULL,
    activity_log     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_licenses_status ON licenses(status);
CREATE INDEX IF NOT EXISTS idx_licenses_expires_at ON licenses(expires_at);

CREATE TABLE IF NOT EXISTS revocations (
    token_id    TEXT PRIMARY KEY,
    client_id   TEXT NOT NULL,
    revoked_at  TIMESTAMP NOT NULL,
    reason      TEXT NOT NULL,
    description TEXT
);

CREATE TABLE IF NOT EXISTS refresh_tokens (
    token_hash TEXT PRIMARY KEY,
    token_id   TEXT NOT NULL,
    client_id  TEXT NOT NULL,
    issued_at  TIMESTAMP NOT NULL,
    expires_at TIMESTAMP NOT NULL,
    revoked_at TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_refresh_tokens_client ON refresh_tokens(client_id);

CREATE TABLE IF NOT EXISTS warn_flags (
    client_id TEXT NOT NULL,
    level     INTEGER NOT NULL,
    set_at    TIMESTAMP NOT NULL,
    PRIMARY KEY (client_id, level)
);

CREATE TABLE IF NOT EXISTS audit_events (
    id        BIGSERIAL PRIMARY KEY,
    ts        TIMESTAMP NOT NULL,
    kind      TEXT NOT NULL,
    client_id TEXT,
    actor     TEXT NOT NULL,
    ip        TEXT,
    status    TEXT NOT NULL,
    severity  TEXT NOT NULL,
    payload   TEXT
);
CREATE INDEX IF NOT EXISTS idx_audit_events_ts ON audit_events(ts);
"#;

impl Database {
    /// Initialize the database connection based on configuration.
    ///
    /// Uses the global configuration from `config.toml` and environment
    /// variables. See `crate::config` for configuration options.
    pub async fn new() -> LicenseResult<Arc<Self>> {
        let config = get_config()?;
        let db_config = &config.database;

        match db_config.db_type.as_str() {
            #[cfg(feature = "sqlite")]
            "sqlite" => {
                let pool = SqlitePool::connect(&db_config.sqlite_url)
                    .await
                    .map_err(|e| {
                        error!("Failed to connect to SQLite: {e}");
                        LicenseError::ServerError(format!("failed to connect to SQLite: {e}"))
                    })?;

                Ok(Arc::new(Database::SQLite(pool)))
            }
            #[cfg(not(feature = "sqlite"))]
            "sqlite" => Err(LicenseError::ConfigError(
                "SQLite support not compiled in. Enable the 'sqlite' feature.".to_string(),
            )),
            #[cfg(feature = "postgres")]
            "postgres" => {
                let pool = PgPool::connect(&db_config.postgres_url)
                    .await
                    .map_err(|e| {
                        error!("Failed to connect to PostgreSQL: {e}");
                        LicenseError::ServerError(format!("failed to connect to PostgreSQL: {e}"))
                    })?;

                Ok(Arc::new(Database::Postgres(pool)))
            }
            #[cfg(not(feature = "postgres"))]
            "postgres" => Err(LicenseError::ConfigError(
                "PostgreSQL support not compiled in. Enable the 'postgres' feature.".to_string(),
            )),
            other => Err(LicenseError::ConfigError(format!(
                "unsupported database type: {other}"
            ))),
        }
    }

    /// Create all tables and indexes if they do not exist yet.
    pub async fn migrate(&self) -> LicenseResult<()> {
        let schema = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(_) => SCHEMA_SQLITE,
            #[cfg(feature = "postgres")]
            Database::Postgres(_) => SCHEMA_POSTGRES,
        };

        for statement in schema.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            match self {
                #[cfg(feature = "sqlite")]
                Database::SQLite(pool) => {
                    query(statement).execute(pool).await.map_err(|e| {
                        error!("SQLite migration failed: {e}");
                        LicenseError::ServerError(format!("migration failed: {e}"))
                    })?;
                }
                #[cfg(feature = "postgres")]
                Database::Postgres(pool) => {
                    query(statement).execute(pool).await.map_err(|e| {
                        error!("Postgres migration failed: {e}");
                        LicenseError::ServerError(format!("migration failed: {e}"))
                    })?;
                }
            }
        }

        Ok(())
    }

    /// Insert a new license or update an existing one.
    ///
    /// Acts like an "upsert" keyed on `client_id`. The module/status
    /// invariant is re-checked here even though `LicenseService` already
    /// enforces it.
    pub async fn put(&self, license: &License) -> LicenseResult<()> {
        if !license.modules_consistent() {
            return Err(LicenseError::InvalidLicense(format!(
                "module set does not match status '{}' for plan '{}'",
                license.status, license.plan
            )));
        }
        if license.expires_at < license.created_at {
            return Err(LicenseError::InvalidLicense(
                "expires_at precedes created_at".to_string(),
            ));
        }

        let modules: Vec<Module> = license.active_modules.iter().copied().collect();
        let modules_json = serde_json::to_string(&modules)
            .map_err(|e| LicenseError::ServerError(format!("serialize modules: {e}")))?;

        let mut ring = license.activity_log.clone();
        if ring.len() > ACTIVITY_LOG_CAP {
            let excess = ring.len() - ACTIVITY_LOG_CAP;
            ring.drain(..excess);
        }
        let activity_json = serde_json::to_string(&ring)
            .map_err(|e| LicenseError::ServerError(format!("serialize activity log: {e}")))?;

        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query(
                    r#"
                    INSERT INTO licenses (
                        client_id, plan, status, active_modules, expires_at,
                        created_at, updated_at, last_check, last_activity,
                        company_name, contact_email, current_token_id, activity_log
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(client_id) DO UPDATE SET
                        plan             = excluded.plan,
                        status           = excluded.status,
                        active_modules   = excluded.active_modules,
                        expires_at       = excluded.expires_at,
                        updated_at       = excluded.updated_at,
                        last_check       = excluded.last_check,
                        last_activity    = excluded.last_activity,
                        company_name     = excluded.company_name,
                        contact_email    = excluded.contact_email,
                        current_token_id = excluded.current_token_id,
                        activity_log     = excluded.activity_log
                    "#,
                )
                .bind(&license.client_id)
                .bind(license.plan.as_str())
                .bind(license.status.as_str())
                .bind(&modules_json)
                .bind(license.expires_at)
                .bind(license.created_at)
                .bind(license.updated_at)
                .bind(license.last_check)
                .bind(license.last_activity)
                .bind(&license.company_name)
                .bind(&license.contact_email)
                .bind(&license.current_token_id)
                .bind(&activity_json)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("SQLite put license failed: {e}");
                    LicenseError::ServerError(format!("database error: {e}"))
                })?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query(
                    r#"
                    INSERT INTO licenses (
                        client_id, plan, status, active_modules, expires_at,
                        created_at, updated_at, last_check, last_activity,
                        company_name, contact_email, current_token_id, activity_log
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                    ON CONFLICT (client_id) DO UPDATE SET
                        plan             = EXCLUDED.plan,
                        status           = EXCLUDED.status,
                        active_modules   = EXCLUDED.active_modules,
                        expires_at       = EXCLUDED.expires_at,
                        updated_at       = EXCLUDED.updated_at,
                        last_check       = EXCLUDED.last_check,
                        last_activity    = EXCLUDED.last_activity,
                        company_name     = EXCLUDED.company_name,
                        contact_email    = EXCLUDED.contact_email,
                        current_token_id = EXCLUDED.current_token_id,
                        activity_log     = EXCLUDED.activity_log
                    "#,
                )
                .bind(&license.client_id)
                .bind(license.plan.as_str())
                .bind(license.status.as_str())
                .bind(&modules_json)
                .bind(license.expires_at)
                .bind(license.created_at)
                .bind(license.updated_at)
                .bind(license.last_check)
                .bind(license.last_activity)
                .bind(&license.company_name)
                .bind(&license.contact_email)
                .bind(&license.current_token_id)
                .bind(&activity_json)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("Postgres put license failed: {e}");
                    LicenseError::ServerError(format!("database error: {e}"))
                })?;
            }
        }

        Ok(())
    }

    /// Fetch a license by client id.
    ///
    /// Returns:
    /// - `Ok(Some(License))` if found
    /// - `Ok(None)` if not found
    /// - `Err(LicenseError::ServerError)` on DB failure
    pub async fn get(&self, client_id: &str) -> LicenseResult<Option<License>> {
        let row = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query_as::<_, LicenseRow>("SELECT * FROM licenses WHERE client_id = ?")
                    .bind(client_id)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        error!("SQLite get license failed: {e}");
                        LicenseError::ServerError(format!("database error: {e}"))
                    })?
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query_as::<_, LicenseRow>("SELECT * FROM licenses WHERE client_id = $1")
                    .bind(client_id)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        error!("Postgres get license failed: {e}");
                        LicenseError::ServerError(format!("database error: {e}"))
                    })?
            }
        };

        row.map(License::try_from).transpose()
    }

    /// Remove a license record. Returns whether a row was deleted.
    pub async fn delete(&self, client_id: &str) -> LicenseResult<bool> {
        let rows_affected = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query("DELETE FROM licenses WHERE client_id = ?")
                .bind(client_id)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("SQLite delete license failed: {e}");
                    LicenseError::ServerError(format!("database error: {e}"))
                })?
                .rows_affected(),
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => query("DELETE FROM licenses WHERE client_id = $1")
                .bind(client_id)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("Postgres delete license failed: {e}");
                    LicenseError::ServerError(format!("database error: {e}"))
                })?
                .rows_affected(),
        };

        Ok(rows_affected > 0)
    }

    /// All records with `status = 'active'` whose deadline lies strictly
    /// before `now`.
    ///
    /// The sweep boundary is strict: a license expiring at exactly `now` is
    /// not yet a sweep candidate. The validator's own deadline check
    /// (`License::is_expired`) is inclusive and fires first on the read
    /// path.
    pub async fn find_expired_active(&self, now: NaiveDateTime) -> LicenseResult<Vec<License>> {
        let rows = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query_as::<_, LicenseRow>(
                "SELECT * FROM licenses WHERE status = 'active' AND expires_at < ?",
            )
            .bind(now)
            .fetch_all(pool)
            .await
            .map_err(|e| {
                error!("SQLite find_expired_active failed: {e}");
                LicenseError::ServerError(format!("database error: {e}"))
            })?,
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => query_as::<_, LicenseRow>(
                "SELECT * FROM licenses WHERE status = 'active' AND expires_at < $1",
            )
            .bind(now)
            .fetch_all(pool)
            .await
            .map_err(|e| {
                error!("Postgres find_expired_active failed: {e}");
                LicenseError::ServerError(format!("database error: {e}"))
            })?,
        };

        rows_to_licenses(rows)
    }

    /// Active records expiring within `days`, excluding clients whose
    /// warn flag for `level` is already set.
    pub async fn find_expiring_within(
        &self,
        now: NaiveDateTime,
        days: i64,
        level: u8,
    ) -> LicenseResult<Vec<License>> {
        let horizon = now + Duration::days(days);

        let rows = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query_as::<_, LicenseRow>(
                "SELECT l.* FROM licenses l \
                 WHERE l.status = 'active' \
                   AND l.expires_at > ? \
                   AND l.expires_at <= ? \
                   AND NOT EXISTS (\
                       SELECT 1 FROM warn_flags w \
                       WHERE w.client_id = l.client_id AND w.level = ?)",
            )
            .bind(now)
            .bind(horizon)
            .bind(i64::from(level))
            .fetch_all(pool)
            .await
            .map_err(|e| {
                error!("SQLite find_expiring_within failed: {e}");
                LicenseError::ServerError(format!("database error: {e}"))
            })?,
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => query_as::<_, LicenseRow>(
                "SELECT l.* FROM licenses l \
                 WHERE l.status = 'active' \
                   AND l.expires_at > $1 \
                   AND l.expires_at <= $2 \
                   AND NOT EXISTS (\
                       SELECT 1 FROM warn_flags w \
                       WHERE w.client_id = l.client_id AND w.level = $3)",
            )
            .bind(now)
            .bind(horizon)
            .bind(i64::from(level))
            .fetch_all(pool)
            .await
            .map_err(|e| {
                error!("Postgres find_expiring_within failed: {e}");
                LicenseError::ServerError(format!("database error: {e}"))
            })?,
        };

        rows_to_licenses(rows)
    }

    /// Records in `expired` whose deadline passed before `cutoff`.
    /// Garbage-collection candidates.
    pub async fn find_expired_older_than(
        &self,
        cutoff: NaiveDateTime,
    ) -> LicenseResult<Vec<License>> {
        let rows = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query_as::<_, LicenseRow>(
                "SELECT * FROM licenses WHERE status = 'expired' AND expires_at < ?",
            )
            .bind(cutoff)
            .fetch_all(pool)
            .await
            .map_err(|e| {
                error!("SQLite find_expired_older_than failed: {e}");
                LicenseError::ServerError(format!("database error: {e}"))
            })?,
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => query_as::<_, LicenseRow>(
                "SELECT * FROM licenses WHERE status = 'expired' AND expires_at < $1",
            )
            .bind(cutoff)
            .fetch_all(pool)
            .await
            .map_err(|e| {
                error!("Postgres find_expired_older_than failed: {e}");
                LicenseError::ServerError(format!("database error: {e}"))
            })?,
        };

        rows_to_licenses(rows)
    }

    /// List licenses with pagination, optionally filtered by status and plan.
    pub async fn list(
        &self,
        status: Option<&str>,
        plan: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> LicenseResult<Vec<License>> {
        // Filters are interpolated as bound values; the clause skeleton is
        // assembled from fixed fragments only.
        let rows = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                let sql = "SELECT * FROM licenses \
                           WHERE (? IS NULL OR status = ?) \
                             AND (? IS NULL OR plan = ?) \
                           ORDER BY created_at DESC LIMIT ? OFFSET ?";
                query_as::<_, LicenseRow>(sql)
                    .bind(status)
                    .bind(status)
                    .bind(plan)
                    .bind(plan)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(pool)
                    .await
                    .map_err(|e| {
                        error!("SQLite list licenses failed: {e}");
                        LicenseError::ServerError(format!("database error: {e}"))
                    })?
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                let sql = "SELECT * FROM licenses \
                           WHERE ($1::text IS NULL OR status = $1) \
                             AND ($2::text IS NULL OR plan = $2) \
                           ORDER BY created_at DESC LIMIT $3 OFFSET $4";
                query_as::<_, LicenseRow>(sql)
                    .bind(status)
                    .bind(plan)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(pool)
                    .await
                    .map_err(|e| {
                        error!("Postgres list licenses failed: {e}");
                        LicenseError::ServerError(format!("database error: {e}"))
                    })?
            }
        };

        rows_to_licenses(rows)
    }

    /// Count licenses matching the same filters as `list`.
    pub async fn count(&self, status: Option<&str>, plan: Option<&str>) -> LicenseResult<i64> {
        let count: (i64,) = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query_as(
                "SELECT COUNT(*) FROM licenses \
                 WHERE (? IS NULL OR status = ?) AND (? IS NULL OR plan = ?)",
            )
            .bind(status)
            .bind(status)
            .bind(plan)
            .bind(plan)
            .fetch_one(pool)
            .await
            .map_err(|e| LicenseError::ServerError(format!("database error: {e}")))?,
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => query_as(
                "SELECT COUNT(*) FROM licenses \
                 WHERE ($1::text IS NULL OR status = $1) AND ($2::text IS NULL OR plan = $2)",
            )
            .bind(status)
            .bind(plan)
            .fetch_one(pool)
            .await
            .map_err(|e| LicenseError::ServerError(format!("database error: {e}")))?,
        };

        Ok(count.0)
    }

    /// Counts by status and by plan.
    pub async fn stats(&self) -> LicenseResult<LicenseStats> {
        let (by_status, by_plan): (Vec<(String, i64)>, Vec<(String, i64)>) = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                let by_status =
                    query_as("SELECT status, COUNT(*) FROM licenses GROUP BY status")
                        .fetch_all(pool)
                        .await
                        .map_err(|e| {
                            LicenseError::ServerError(format!("database error: {e}"))
                        })?;
                let by_plan = query_as("SELECT plan, COUNT(*) FROM licenses GROUP BY plan")
                    .fetch_all(pool)
                    .await
                    .map_err(|e| LicenseError::ServerError(format!("database error: {e}")))?;
                (by_status, by_plan)
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                let by_status =
                    query_as("SELECT status, COUNT(*) FROM licenses GROUP BY status")
                        .fetch_all(pool)
                        .await
                        .map_err(|e| {
                            LicenseError::ServerError(format!("database error: {e}"))
                        })?;
                let by_plan = query_as("SELECT plan, COUNT(*) FROM licenses GROUP BY plan")
                    .fetch_all(pool)
                    .await
                    .map_err(|e| LicenseError::ServerError(format!("database error: {e}")))?;
                (by_status, by_plan)
            }
        };

        let mut stats = LicenseStats::default();
        for (status, count) in by_status {
            stats.total += count;
            stats.by_status.insert(status, count);
        }
        for (plan, count) in by_plan {
            stats.by_plan.insert(plan, count);
        }

        Ok(stats)
    }

    /// Overwrite the stored module set directly.
    ///
    /// Used only by the administrative module override, which is allowed to
    /// diverge from the plan table until the next validation repairs it;
    /// `put` would reject the divergent set.
    pub async fn update_modules(
        &self,
        client_id: &str,
        modules: &BTreeSet<Module>,
        updated_at: NaiveDateTime,
    ) -> LicenseResult<bool> {
        let list: Vec<Module> = modules.iter().copied().collect();
        let modules_json = serde_json::to_string(&list)
            .map_err(|e| LicenseError::ServerError(format!("serialize modules: {e}")))?;

        let rows_affected = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query(
                "UPDATE licenses SET active_modules = ?, updated_at = ? WHERE client_id = ?",
            )
            .bind(&modules_json)
            .bind(updated_at)
            .bind(client_id)
            .execute(pool)
            .await
            .map_err(|e| {
                error!("SQLite update_modules failed: {e}");
                LicenseError::ServerError(format!("database error: {e}"))
            })?
            .rows_affected(),
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => query(
                "UPDATE licenses SET active_modules = $1, updated_at = $2 WHERE client_id = $3",
            )
            .bind(&modules_json)
            .bind(updated_at)
            .bind(client_id)
            .execute(pool)
            .await
            .map_err(|e| {
                error!("Postgres update_modules failed: {e}");
                LicenseError::ServerError(format!("database error: {e}"))
            })?
            .rows_affected(),
        };

        Ok(rows_affected > 0)
    }

    /// Record a successful validation instant.
    pub async fn touch_last_check(
        &self,
        client_id: &str,
        now: NaiveDateTime,
    ) -> LicenseResult<bool> {
        let rows_affected = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query("UPDATE licenses SET last_check = ? WHERE client_id = ?")
                    .bind(now)
                    .bind(client_id)
                    .execute(pool)
                    .await
                    .map_err(|e| {
                        error!("SQLite touch_last_check failed: {e}");
                        LicenseError::ServerError(format!("database error: {e}"))
                    })?
                    .rows_affected()
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query("UPDATE licenses SET last_check = $1 WHERE client_id = $2")
                    .bind(now)
                    .bind(client_id)
                    .execute(pool)
                    .await
                    .map_err(|e| {
                        error!("Postgres touch_last_check failed: {e}");
                        LicenseError::ServerError(format!("database error: {e}"))
                    })?
                    .rows_affected()
            }
        };

        Ok(rows_affected > 0)
    }

    // === Warn flags ===

    /// Mark the warning for `(client_id, level)` as emitted.
    ///
    /// Returns `true` if the flag was newly set, `false` if it already
    /// existed. Setting is idempotent across repeated sweeps.
    pub async fn set_warn_flag(
        &self,
        client_id: &str,
        level: u8,
        now: NaiveDateTime,
    ) -> LicenseResult<bool> {
        let rows_affected = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query("INSERT OR IGNORE INTO warn_flags (client_id, level, set_at) VALUES (?, ?, ?)")
                    .bind(client_id)
                    .bind(i64::from(level))
                    .bind(now)
                    .execute(pool)
                    .await
                    .map_err(|e| {
                        error!("SQLite set_warn_flag failed: {e}");
                        LicenseError::ServerError(format!("database error: {e}"))
                    })?
                    .rows_affected()
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => query(
                "INSERT INTO warn_flags (client_id, level, set_at) VALUES ($1, $2, $3) \
                 ON CONFLICT (client_id, level) DO NOTHING",
            )
            .bind(client_id)
            .bind(i64::from(level))
            .bind(now)
            .execute(pool)
            .await
            .map_err(|e| {
                error!("Postgres set_warn_flag failed: {e}");
                LicenseError::ServerError(format!("database error: {e}"))
            })?
            .rows_affected(),
        };

        Ok(rows_affected > 0)
    }

    /// Whether the warning for `(client_id, level)` was already emitted.
    pub async fn warn_flag_set(&self, client_id: &str, level: u8) -> LicenseResult<bool> {
        let count: (i64,) = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query_as("SELECT COUNT(*) FROM warn_flags WHERE client_id = ? AND level = ?")
                    .bind(client_id)
                    .bind(i64::from(level))
                    .fetch_one(pool)
                    .await
                    .map_err(|e| LicenseError::ServerError(format!("database error: {e}")))?
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query_as("SELECT COUNT(*) FROM warn_flags WHERE client_id = $1 AND level = $2")
                    .bind(client_id)
                    .bind(i64::from(level))
                    .fetch_one(pool)
                    .await
                    .map_err(|e| LicenseError::ServerError(format!("database error: {e}")))?
            }
        };

        Ok(count.0 > 0)
    }

    /// Clear all warn flags for a client. Called on extend, so the new
    /// expiry window can warn again.
    pub async fn clear_warn_flags(&self, client_id: &str) -> LicenseResult<()> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query("DELETE FROM warn_flags WHERE client_id = ?")
                    .bind(client_id)
                    .execute(pool)
                    .await
                    .map_err(|e| {
                        error!("SQLite clear_warn_flags failed: {e}");
                        LicenseError::ServerError(format!("database error: {e}"))
                    })?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query("DELETE FROM warn_flags WHERE client_id = $1")
                    .bind(client_id)
                    .execute(pool)
                    .await
                    .map_err(|e| {
                        error!("Postgres clear_warn_flags failed: {e}");
                        LicenseError::ServerError(format!("database error: {e}"))
                    })?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_license(status: LicenseStatus, plan: Plan) -> License {
        let now = Utc::now().naive_utc();
        let active_modules = match status {
            LicenseStatus::Active => modules_for_plan(plan),
            LicenseStatus::Expired => expired_modules(),
            _ => BTreeSet::new(),
        };
        License {
            client_id: "c-1".to_string(),
            plan,
            status,
            active_modules,
            expires_at: now + Duration::days(30),
            created_at: now,
            updated_at: now,
            last_check: None,
            last_activity: None,
            company_name: None,
            contact_email: None,
            current_token_id: "tok-1".to_string(),
            activity_log: Vec::new(),
        }
    }

    #[test]
    fn modules_consistent_per_status() {
        assert!(sample_license(LicenseStatus::Active, Plan::Premium).modules_consistent());
        assert!(sample_license(LicenseStatus::Inactive, Plan::Premium).modules_consistent());
        assert!(sample_license(LicenseStatus::Expired, Plan::Premium).modules_consistent());

        let mut broken = sample_license(LicenseStatus::Active, Plan::Premium);
        broken.active_modules.remove(&Module::Analytics);
        assert!(!broken.modules_consistent());

        let mut broken = sample_license(LicenseStatus::Inactive, Plan::Basic);
        broken.active_modules.insert(Module::BasicFeatures);
        assert!(!broken.modules_consistent());
    }

    #[test]
    fn activity_ring_evicts_oldest() {
        let mut license = sample_license(LicenseStatus::Active, Plan::Basic);
        let now = Utc::now().naive_utc();

        for i in 0..(ACTIVITY_LOG_CAP + 25) {
            license.record_activity(ActivityEntry {
                ts: now + Duration::seconds(i as i64),
                kind: format!("check_{i}"),
                ip: None,
                meta: None,
            });
        }

        assert_eq!(license.activity_log.len(), ACTIVITY_LOG_CAP);
        // Oldest entries were evicted, newest kept.
        assert_eq!(license.activity_log[0].kind, "check_25");
        assert_eq!(
            license.activity_log.last().unwrap().kind,
            format!("check_{}", ACTIVITY_LOG_CAP + 24)
        );
    }

    #[test]
    fn days_remaining_clamps_at_zero() {
        let mut license = sample_license(LicenseStatus::Active, Plan::Demo);
        let now = Utc::now().naive_utc();
        license.expires_at = now - Duration::days(5);
        assert_eq!(license.days_remaining(now), 0);
        assert!(license.is_expired(now));
    }

    #[test]
    fn status_parse_round_trip() {
        for status in [
            LicenseStatus::Active,
            LicenseStatus::Inactive,
            LicenseStatus::Expired,
            LicenseStatus::Revoked,
        ] {
            assert_eq!(LicenseStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(LicenseStatus::parse("suspended").is_err());
    }
}
