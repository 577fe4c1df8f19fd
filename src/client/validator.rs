//! Offline validation rules for installed clients.
//!
//! When disconnected, a client may keep operating on its cached license for
//! a bounded grace period after the last successful online check (default
//! 24 h). The rules mirror the server's validator so the system degrades
//! consistently:
//!
//! 1. The cache must belong to the requesting client (enforced at load).
//! 2. A cached `revoked` or `inactive` status denies immediately — grace
//!    never overrides an administrative stop.
//! 3. A cached deadline in the past denies with `Expired`.
//! 4. Beyond the grace horizon the cache is stale and an online `check` is
//!    required.
//! 5. Otherwise the client unlocks exactly `modules_for_plan(plan)` — the
//!    same table the server derives entitlement from.

use std::collections::BTreeSet;

use chrono::{Duration, NaiveDateTime};

use crate::client::cache::{CachedLicense, CachedStatus};
use crate::plans::{modules_for_plan, Module};

/// Default grace horizon.
pub const DEFAULT_GRACE_HOURS: i64 = 24;

/// Result of an offline validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfflineOutcome {
    /// Operate with exactly these modules.
    Usable { modules: BTreeSet<Module> },
    /// The cached deadline has passed.
    Expired,
    /// The server last reported the license as switched off.
    Inactive,
    /// The server last reported the license as revoked.
    Revoked,
    /// Too long since the last successful check; go online.
    StaleCache { offline_for: Duration },
}

impl OfflineOutcome {
    pub fn is_usable(&self) -> bool {
        matches!(self, OfflineOutcome::Usable { .. })
    }
}

/// Applies the offline rules to a loaded cache.
#[derive(Debug, Clone)]
pub struct OfflineValidator {
    grace: Duration,
}

impl OfflineValidator {
    pub fn new(grace_hours: i64) -> Self {
        Self {
            grace: Duration::hours(grace_hours),
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Validate the cached license at `now`.
    pub fn validate(&self, cache: &CachedLicense, now: NaiveDateTime) -> OfflineOutcome {
        match cache.status {
            CachedStatus::Revoked => return OfflineOutcome::Revoked,
            CachedStatus::Inactive => return OfflineOutcome::Inactive,
            CachedStatus::Expired => return OfflineOutcome::Expired,
            CachedStatus::Active => {}
        }

        if cache.is_expired(now) {
            return OfflineOutcome::Expired;
        }

        let offline_for = cache.offline_for(now);
        if offline_for > self.grace {
            return OfflineOutcome::StaleCache { offline_for };
        }

        OfflineOutcome::Usable {
            modules: modules_for_plan(cache.plan),
        }
    }

    /// Convenience gate for a single feature module.
    pub fn has_module(&self, cache: &CachedLicense, module: Module, now: NaiveDateTime) -> bool {
        match self.validate(cache, now) {
            OfflineOutcome::Usable { modules } => modules.contains(&module),
            _ => false,
        }
    }
}

impl Default for OfflineValidator {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_HOURS)
    }
}
