//! License lifecycle service: the single writer for license and revocation
//! state.
//!
//! Every mutation goes through here. Operations on the same `client_id` are
//! serialized by a per-key async lock; the audit event and the bus publish
//! happen after the store commit, in that order. The validator stays pure —
//! this module interprets its outcome and performs the only reactive
//! mutations the system allows on the read path (expire-on-first-observation,
//! revocation reconcile, module-drift repair).

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{Duration, NaiveDateTime};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::errors::LicenseError;
use crate::plans::{expired_modules, modules_for_plan, Module, Plan};
use crate::server::audit::{AuditEvent, AuditKind, Severity};
use crate::server::events::{BusMessage, EventBus, Topic, UpdateAction};
use crate::server::store::{ActivityEntry, Database, License, LicenseStatus};
use crate::server::tokens::{IssuedToken, TokenCodec, TokenKind, TokenPair};
use crate::server::validator::{self, Outcome};

/// Structured failures of service operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("license not found")]
    NotFound,
    #[error("license already exists")]
    AlreadyExists,
    #[error("unknown module: {0}")]
    UnknownModule(String),
    #[error("days must be positive")]
    NonPositiveDays,
    #[error("license is not active")]
    Inactive,
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition {
        from: LicenseStatus,
        to: LicenseStatus,
    },
    #[error("invalid refresh token")]
    InvalidRefresh,
    #[error(transparent)]
    Storage(#[from] LicenseError),
}

/// Inputs for creating a license.
#[derive(Debug, Clone)]
pub struct CreateLicense {
    /// Explicit client id; generated when absent.
    pub client_id: Option<String>,
    pub plan: Plan,
    pub company_name: Option<String>,
    pub contact_email: Option<String>,
    pub ttl_days: i64,
}

/// A committed mutation plus the token it reissued, if any.
#[derive(Debug, Clone)]
pub struct Mutated {
    pub license: License,
    pub token: Option<IssuedToken>,
}

/// A positive validation answer.
#[derive(Debug, Clone)]
pub struct CheckSuccess {
    pub license: License,
}

/// Why a check was denied, with the context the API surfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckDenial {
    NotFound,
    InvalidToken,
    Revoked {
        revoked_at: Option<NaiveDateTime>,
        reason: Option<String>,
    },
    Expired {
        expires_at: NaiveDateTime,
    },
    Inactive,
}

/// Failure of a check call: a structured denial or a storage fault.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("license check denied")]
    Denied(CheckDenial),
    #[error(transparent)]
    Storage(#[from] LicenseError),
}

/// The single writer for license state.
pub struct LicenseService {
    db: Arc<Database>,
    codec: TokenCodec,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LicenseService {
    pub fn new(
        db: Arc<Database>,
        codec: TokenCodec,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            codec,
            bus,
            clock,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    /// Serialize all mutations for one client.
    async fn lock_for(&self, client_id: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().expect("lock map poisoned");
            locks
                .entry(client_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        mutex.lock_owned().await
    }

    fn topics_for(license: &License) -> Vec<Topic> {
        vec![
            Topic::License(license.client_id.clone()),
            Topic::Plan(license.plan),
            Topic::Admin,
        ]
    }

    async fn publish_update(&self, license: &License, action: UpdateAction) {
        let message = BusMessage::LicenseUpdate {
            client_id: license.client_id.clone(),
            action,
            plan: license.plan,
            status: license.status,
            modules: license.active_modules.iter().copied().collect(),
            expires_at: license.expires_at,
        };
        self.bus.publish(&Self::topics_for(license), message).await;
    }

    async fn audit(&self, event: AuditEvent) {
        // Audit failures must not fail the operation that already committed;
        // they are logged and surfaced as system errors.
        if let Err(e) = self.db.append_audit(&event).await {
            warn!("Failed to append audit event: {e}");
        }
    }

    // === Lifecycle operations ===

    /// Create a new license. Issues a fresh token pair.
    pub async fn create(&self, req: CreateLicense, actor: &str) -> Result<Mutated, ServiceError> {
        if req.ttl_days <= 0 {
            return Err(ServiceError::NonPositiveDays);
        }

        let client_id = req
            .client_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let _guard = self.lock_for(&client_id).await;

        if self.db.get(&client_id).await?.is_some() {
            return Err(ServiceError::AlreadyExists);
        }

        let now = self.clock.now();
        let modules = modules_for_plan(req.plan);
        let pair = self.codec.issue_pair(&client_id, req.plan, &modules, now)?;

        let mut license = License {
            client_id: client_id.clone(),
            plan: req.plan,
            status: LicenseStatus::Active,
            active_modules: modules,
            expires_at: now + Duration::days(req.ttl_days),
            created_at: now,
            updated_at: now,
            last_check: None,
            last_activity: None,
            company_name: req.company_name,
            contact_email: req.contact_email,
            current_token_id: pair.access.token_id.clone(),
            activity_log: Vec::new(),
        };
        license.record_activity(ActivityEntry {
            ts: now,
            kind: "created".to_string(),
            ip: None,
            meta: Some(serde_json::json!({ "plan": req.plan })),
        });

        self.db.put(&license).await?;
        self.db
            .insert_refresh_token(
                &pair.refresh.token,
                &pair.refresh.token_id,
                &client_id,
                now,
                pair.refresh.expires_at,
            )
            .await?;

        info!("License created for client {} (plan {})", client_id, req.plan);
        self.audit(
            AuditEvent::success(AuditKind::Creation, &client_id, actor, now).with_payload(
                serde_json::json!({ "plan": req.plan, "ttl_days": req.ttl_days }),
            ),
        )
        .await;
        self.publish_update(&license, UpdateAction::Created).await;

        Ok(Mutated {
            license,
            token: Some(pair.access),
        })
    }

    /// Flip active ↔ inactive.
    ///
    /// Deactivation revokes the current token; reactivation restores the
    /// plan's modules and reissues.
    pub async fn toggle(&self, client_id: &str, actor: &str) -> Result<Mutated, ServiceError> {
        let _guard = self.lock_for(client_id).await;
        let mut license = self.db.get(client_id).await?.ok_or(ServiceError::NotFound)?;
        let now = self.clock.now();

        let token = match license.status {
            LicenseStatus::Active => {
                license.status = LicenseStatus::Inactive;
                license.active_modules.clear();
                self.db
                    .add_revocation(
                        &license.current_token_id,
                        client_id,
                        now,
                        "toggled_inactive",
                        None,
                    )
                    .await?;
                None
            }
            LicenseStatus::Inactive => {
                license.status = LicenseStatus::Active;
                license.active_modules = modules_for_plan(license.plan);
                let issued =
                    self.codec
                        .issue_access(client_id, license.plan, &license.active_modules, now)?;
                license.current_token_id = issued.token_id.clone();
                Some(issued)
            }
            from @ (LicenseStatus::Expired | LicenseStatus::Revoked) => {
                return Err(ServiceError::IllegalTransition {
                    from,
                    to: LicenseStatus::Active,
                });
            }
        };

        license.updated_at = now;
        license.record_activity(ActivityEntry {
            ts: now,
            kind: "toggled".to_string(),
            ip: None,
            meta: Some(serde_json::json!({ "status": license.status })),
        });

        self.db.put(&license).await?;
        self.audit(
            AuditEvent::success(AuditKind::Toggle, client_id, actor, now)
                .with_payload(serde_json::json!({ "status": license.status })),
        )
        .await;
        self.publish_update(&license, UpdateAction::Toggled).await;

        Ok(Mutated { license, token })
    }

    /// Push the expiry deadline out by `days`. Resurrects expired licenses.
    pub async fn extend(
        &self,
        client_id: &str,
        days: i64,
        actor: &str,
    ) -> Result<Mutated, ServiceError> {
        if days <= 0 {
            return Err(ServiceError::NonPositiveDays);
        }

        let _guard = self.lock_for(client_id).await;
        let mut license = self.db.get(client_id).await?.ok_or(ServiceError::NotFound)?;
        let now = self.clock.now();

        if license.status == LicenseStatus::Revoked {
            return Err(ServiceError::IllegalTransition {
                from: LicenseStatus::Revoked,
                to: LicenseStatus::Active,
            });
        }

        license.expires_at += Duration::days(days);
        if license.status == LicenseStatus::Expired {
            license.status = LicenseStatus::Active;
        }

        let token = if license.status == LicenseStatus::Active {
            license.active_modules = modules_for_plan(license.plan);
            let issued =
                self.codec
                    .issue_access(client_id, license.plan, &license.active_modules, now)?;
            license.current_token_id = issued.token_id.clone();
            Some(issued)
        } else {
            None
        };

        license.updated_at = now;
        license.record_activity(ActivityEntry {
            ts: now,
            kind: "extended".to_string(),
            ip: None,
            meta: Some(serde_json::json!({ "days": days })),
        });

        self.db.put(&license).await?;
        // The old warn windows no longer apply to the new deadline.
        self.db.clear_warn_flags(client_id).await?;

        self.audit(
            AuditEvent::success(AuditKind::Extension, client_id, actor, now)
                .with_payload(serde_json::json!({ "days": days, "expires_at": license.expires_at })),
        )
        .await;
        self.publish_update(&license, UpdateAction::Extended).await;

        Ok(Mutated { license, token })
    }

    /// Change the plan, resetting modules to the new plan's table.
    pub async fn update_plan(
        &self,
        client_id: &str,
        plan: Plan,
        actor: &str,
    ) -> Result<Mutated, ServiceError> {
        let _guard = self.lock_for(client_id).await;
        let mut license = self.db.get(client_id).await?.ok_or(ServiceError::NotFound)?;
        let now = self.clock.now();

        let old_plan = license.plan;
        license.plan = plan;

        let token = if license.status == LicenseStatus::Active {
            license.active_modules = modules_for_plan(plan);
            let issued = self
                .codec
                .issue_access(client_id, plan, &license.active_modules, now)?;
            license.current_token_id = issued.token_id.clone();
            Some(issued)
        } else {
            // Inactive/revoked keep their empty set, expired keeps the
            // reduced set; no token is honored in those states anyway.
            None
        };

        license.updated_at = now;
        license.record_activity(ActivityEntry {
            ts: now,
            kind: "plan_changed".to_string(),
            ip: None,
            meta: Some(serde_json::json!({ "from": old_plan, "to": plan })),
        });

        self.db.put(&license).await?;
        self.audit(
            AuditEvent::success(AuditKind::PlanChange, client_id, actor, now)
                .with_payload(serde_json::json!({ "from": old_plan, "to": plan })),
        )
        .await;
        self.publish_update(&license, UpdateAction::PlanChanged).await;

        Ok(Mutated { license, token })
    }

    /// Administrative single-module override. Does not change the plan; the
    /// override lasts until the next validation repairs the set back to the
    /// plan table.
    pub async fn set_module(
        &self,
        client_id: &str,
        module: Module,
        enabled: bool,
        actor: &str,
    ) -> Result<License, ServiceError> {
        let _guard = self.lock_for(client_id).await;
        let mut license = self.db.get(client_id).await?.ok_or(ServiceError::NotFound)?;
        let now = self.clock.now();

        if enabled {
            license.active_modules.insert(module);
        } else {
            license.active_modules.remove(&module);
        }
        license.updated_at = now;

        self.db
            .update_modules(client_id, &license.active_modules, now)
            .await?;

        self.audit(
            AuditEvent::success(AuditKind::ModulesUpdate, client_id, actor, now).with_payload(
                serde_json::json!({ "module": module, "enabled": enabled }),
            ),
        )
        .await;
        self.publish_update(&license, UpdateAction::ModulesUpdated)
            .await;

        Ok(license)
    }

    /// Revoke the license and its current token. Irreversible.
    pub async fn revoke(
        &self,
        client_id: &str,
        reason: &str,
        description: Option<&str>,
        actor: &str,
    ) -> Result<NaiveDateTime, ServiceError> {
        let _guard = self.lock_for(client_id).await;
        let mut license = self.db.get(client_id).await?.ok_or(ServiceError::NotFound)?;
        let now = self.clock.now();

        self.db
            .add_revocation(&license.current_token_id, client_id, now, reason, description)
            .await?;

        license.status = LicenseStatus::Revoked;
        license.active_modules.clear();
        license.updated_at = now;
        license.record_activity(ActivityEntry {
            ts: now,
            kind: "revoked".to_string(),
            ip: None,
            meta: Some(serde_json::json!({ "reason": reason })),
        });

        self.db.put(&license).await?;
        self.audit(
            AuditEvent {
                severity: Severity::Medium,
                ..AuditEvent::success(AuditKind::Revocation, client_id, actor, now)
            }
            .with_payload(serde_json::json!({ "reason": reason, "description": description })),
        )
        .await;
        self.publish_update(&license, UpdateAction::Revoked).await;

        Ok(now)
    }

    /// Remove the record entirely, along with its warn flags and refresh
    /// tokens. Revocation entries are kept — the list is append-only.
    pub async fn delete(&self, client_id: &str, actor: &str) -> Result<(), ServiceError> {
        let _guard = self.lock_for(client_id).await;
        let license = self.db.get(client_id).await?.ok_or(ServiceError::NotFound)?;
        let now = self.clock.now();

        self.db.delete(client_id).await?;
        self.db.clear_warn_flags(client_id).await?;
        self.db.delete_refresh_tokens_for(client_id).await?;

        self.audit(AuditEvent::success(AuditKind::Deletion, client_id, actor, now))
            .await;
        self.publish_update(&license, UpdateAction::Deleted).await;

        Ok(())
    }

    /// Forced transition to `expired`, used by the sweep and by the
    /// validator's first observation. Token reissue is suppressed.
    ///
    /// Returns `false` when the license was not active (already handled).
    pub async fn expire(&self, client_id: &str, actor: &str) -> Result<bool, ServiceError> {
        let _guard = self.lock_for(client_id).await;
        let license = self.db.get(client_id).await?.ok_or(ServiceError::NotFound)?;
        self.apply_expire(license, actor).await
    }

    /// Expire without taking the per-client lock; callers must hold it.
    async fn apply_expire(&self, mut license: License, actor: &str) -> Result<bool, ServiceError> {
        if license.status != LicenseStatus::Active {
            return Ok(false);
        }
        let now = self.clock.now();

        license.status = LicenseStatus::Expired;
        license.active_modules = expired_modules();
        license.updated_at = now;
        license.record_activity(ActivityEntry {
            ts: now,
            kind: "expired".to_string(),
            ip: None,
            meta: None,
        });

        self.db.put(&license).await?;
        self.audit(
            AuditEvent::success(AuditKind::Scheduler, &license.client_id, actor, now)
                .with_payload(serde_json::json!({ "transition": "expired" })),
        )
        .await;
        self.publish_update(&license, UpdateAction::Expired).await;

        Ok(true)
    }

    // === Token operations ===

    /// Issue a fresh access/refresh pair for an active license.
    pub async fn issue_pair(&self, client_id: &str, actor: &str) -> Result<TokenPair, ServiceError> {
        let _guard = self.lock_for(client_id).await;
        let mut license = self.db.get(client_id).await?.ok_or(ServiceError::NotFound)?;
        let now = self.clock.now();

        if license.status != LicenseStatus::Active || license.is_expired(now) {
            return Err(ServiceError::Inactive);
        }

        let pair = self
            .codec
            .issue_pair(client_id, license.plan, &license.active_modules, now)?;
        license.current_token_id = pair.access.token_id.clone();
        license.updated_at = now;

        self.db.put(&license).await?;
        self.db
            .insert_refresh_token(
                &pair.refresh.token,
                &pair.refresh.token_id,
                client_id,
                now,
                pair.refresh.expires_at,
            )
            .await?;

        self.audit(
            AuditEvent::success(AuditKind::TokenIssue, client_id, actor, now)
                .with_payload(serde_json::json!({ "kind": "pair" })),
        )
        .await;

        Ok(pair)
    }

    /// Exchange a live refresh token for a new access token.
    pub async fn refresh_access(&self, refresh_token: &str) -> Result<IssuedToken, ServiceError> {
        let claims = self
            .codec
            .verify_kind(refresh_token, TokenKind::Refresh)
            .map_err(|_| ServiceError::InvalidRefresh)?;

        let record = self
            .db
            .get_refresh_token(refresh_token)
            .await?
            .ok_or(ServiceError::InvalidRefresh)?;
        let now = self.clock.now();
        if !record.is_live(now) || record.client_id != claims.sub {
            return Err(ServiceError::InvalidRefresh);
        }

        let _guard = self.lock_for(&record.client_id).await;
        let mut license = self
            .db
            .get(&record.client_id)
            .await?
            .ok_or(ServiceError::InvalidRefresh)?;
        if license.status != LicenseStatus::Active || license.is_expired(now) {
            return Err(ServiceError::InvalidRefresh);
        }

        let issued =
            self.codec
                .issue_access(&record.client_id, license.plan, &license.active_modules, now)?;
        license.current_token_id = issued.token_id.clone();
        license.updated_at = now;
        self.db.put(&license).await?;

        self.audit(
            AuditEvent::success(AuditKind::TokenIssue, &record.client_id, "client", now)
                .with_payload(serde_json::json!({ "kind": "refresh_exchange" })),
        )
        .await;

        Ok(issued)
    }

    /// Kill a single refresh token.
    pub async fn revoke_refresh(&self, refresh_token: &str) -> Result<(), ServiceError> {
        let now = self.clock.now();
        let hit = self.db.revoke_refresh_token(refresh_token, now).await?;
        if !hit {
            return Err(ServiceError::InvalidRefresh);
        }

        let client_id = self
            .db
            .get_refresh_token(refresh_token)
            .await?
            .map(|r| r.client_id);
        self.audit(
            AuditEvent::success(
                AuditKind::Revocation,
                client_id.as_deref().unwrap_or("unknown"),
                "client",
                now,
            )
            .with_payload(serde_json::json!({ "target": "refresh_token" })),
        )
        .await;

        Ok(())
    }

    // === Validation (read path) ===

    /// Validate a presented token for a client.
    ///
    /// This is the one place where reading may mutate: an active license
    /// observed past its deadline transitions to `expired`; a record that
    /// missed its revocation is reconciled; a drifted module set is
    /// repaired. All other outcomes leave state untouched.
    pub async fn check(
        &self,
        client_id: &str,
        token: &str,
        ip: Option<&str>,
    ) -> Result<CheckSuccess, CheckError> {
        let _guard = self.lock_for(client_id).await;
        let now = self.clock.now();

        let license = self.db.get(client_id).await?;
        let claims = self.codec.verify(token).ok();

        // A well-signed token naming a different client is probing, not a
        // typo.
        let mismatch = claims
            .as_ref()
            .map(|c| c.sub != client_id)
            .unwrap_or(false);

        let revocation = match &claims {
            Some(c) => self.db.get_revocation(&c.jti).await?,
            None => None,
        };

        let outcome = validator::validate(
            license.as_ref(),
            claims.as_ref(),
            revocation.as_ref(),
            client_id,
            now,
        );

        match outcome {
            Outcome::LicenseNotFound => {
                self.audit(self.check_failure(client_id, ip, "LICENSE_NOT_FOUND", Severity::Low, now))
                    .await;
                Err(CheckError::Denied(CheckDenial::NotFound))
            }
            Outcome::InvalidToken => {
                let (kind, severity) = if mismatch {
                    (AuditKind::SecurityViolation, Severity::High)
                } else {
                    (AuditKind::Validation, Severity::Medium)
                };
                self.audit(
                    AuditEvent::failure(kind, Some(client_id), "client", severity, now)
                        .with_ip(ip.map(String::from))
                        .with_payload(serde_json::json!({ "code": "INVALID_TOKEN" })),
                )
                .await;
                Err(CheckError::Denied(CheckDenial::InvalidToken))
            }
            Outcome::Revoked { revoked_at, reason } => {
                // Reconcile a record that missed its revocation transition.
                if let Some(mut license) = license {
                    if license.status != LicenseStatus::Revoked {
                        license.status = LicenseStatus::Revoked;
                        license.active_modules.clear();
                        license.updated_at = now;
                        self.db.put(&license).await?;
                        self.audit(
                            AuditEvent {
                                severity: Severity::Medium,
                                ..AuditEvent::success(
                                    AuditKind::Revocation,
                                    client_id,
                                    "validator",
                                    now,
                                )
                            }
                            .with_payload(serde_json::json!({ "reconciled": true })),
                        )
                        .await;
                        self.publish_update(&license, UpdateAction::Revoked).await;
                    }
                }
                self.audit(self.check_failure(client_id, ip, "LICENSE_REVOKED", Severity::Medium, now))
                    .await;
                Err(CheckError::Denied(CheckDenial::Revoked { revoked_at, reason }))
            }
            Outcome::Expired { expires_at } => {
                if let Some(license) = license {
                    if license.status == LicenseStatus::Active {
                        self.apply_expire(license, "validator")
                            .await
                            .map_err(|e| match e {
                                ServiceError::Storage(err) => CheckError::Storage(err),
                                other => CheckError::Storage(LicenseError::ServerError(
                                    other.to_string(),
                                )),
                            })?;
                    }
                }
                self.audit(self.check_failure(client_id, ip, "LICENSE_EXPIRED", Severity::Low, now))
                    .await;
                Err(CheckError::Denied(CheckDenial::Expired { expires_at }))
            }
            Outcome::Inactive => {
                self.audit(self.check_failure(client_id, ip, "LICENSE_INACTIVE", Severity::Low, now))
                    .await;
                Err(CheckError::Denied(CheckDenial::Inactive))
            }
            Outcome::ModulesDrift { expected } => {
                let mut license = license.expect("drift outcome implies a license");
                license.active_modules = expected;
                license.updated_at = now;
                self.db.put(&license).await?;
                self.audit(
                    AuditEvent::success(AuditKind::ModulesUpdate, client_id, "validator", now)
                        .with_payload(serde_json::json!({ "repaired": true })),
                )
                .await;
                self.publish_update(&license, UpdateAction::ModulesUpdated)
                    .await;

                self.finish_valid_check(&license, ip, now).await?;
                license.last_check = Some(now);
                Ok(CheckSuccess { license })
            }
            Outcome::Valid => {
                let mut license = license.expect("valid outcome implies a license");
                self.finish_valid_check(&license, ip, now).await?;
                license.last_check = Some(now);
                Ok(CheckSuccess { license })
            }
        }
    }

    async fn finish_valid_check(
        &self,
        license: &License,
        ip: Option<&str>,
        now: NaiveDateTime,
    ) -> Result<(), CheckError> {
        self.db.touch_last_check(&license.client_id, now).await?;
        self.audit(
            AuditEvent::success(AuditKind::Validation, &license.client_id, "client", now)
                .with_ip(ip.map(String::from)),
        )
        .await;
        Ok(())
    }

    fn check_failure(
        &self,
        client_id: &str,
        ip: Option<&str>,
        code: &str,
        severity: Severity,
        now: NaiveDateTime,
    ) -> AuditEvent {
        AuditEvent::failure(AuditKind::Validation, Some(client_id), "client", severity, now)
            .with_ip(ip.map(String::from))
            .with_payload(serde_json::json!({ "code": code }))
    }

    // === Recovery ===

    /// Re-announce mutations from the audit tail after a restart.
    ///
    /// A crash between commit and publish loses only the notification; the
    /// store is the truth and clients re-sync with `check`. Operators get a
    /// replay marker on the admin topic so dashboards know to refresh.
    pub async fn recover_publishes(&self, since: NaiveDateTime) -> Result<usize, ServiceError> {
        let rows = self.db.audit_since(since).await?;
        let mut replayed = 0;

        for row in rows {
            let is_mutation = matches!(
                row.kind.as_str(),
                "creation"
                    | "toggle"
                    | "extension"
                    | "revocation"
                    | "plan_change"
                    | "modules_update"
                    | "deletion"
                    | "scheduler"
            );
            if !is_mutation {
                continue;
            }

            self.bus
                .publish(
                    &[Topic::Admin],
                    BusMessage::SystemNotification {
                        message: "recovered_event".to_string(),
                        payload: serde_json::json!({
                            "kind": row.kind,
                            "client_id": row.client_id,
                            "ts": row.ts.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                        }),
                    },
                )
                .await;
            replayed += 1;
        }

        if replayed > 0 {
            info!("Replayed {replayed} audit events to the admin topic after restart");
        }
        Ok(replayed)
    }
}
