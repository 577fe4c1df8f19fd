//! Pure license validation.
//!
//! `validate` is a function over already-fetched state: for a fixed
//! (license, claims, revocation entry, now) it always returns the same
//! [`Outcome`]. It never touches storage. Reactive mutations implied by an
//! outcome (expire-on-read, revocation reconcile, module-drift repair) are
//! performed by `LicenseService::check`, which interprets the outcome — that
//! keeps the validation path referentially transparent and the mutation
//! policy in one place.
//!
//! Outcomes are checked in a fixed order; the first match wins.

use std::collections::BTreeSet;

use chrono::NaiveDateTime;

use crate::plans::{modules_for_plan, Module};
use crate::server::revocation::RevocationEntry;
use crate::server::store::{License, LicenseStatus};
use crate::server::tokens::{TokenClaims, TokenKind};

/// Result of validating a presented token against the authoritative record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// No record for the requested client id.
    LicenseNotFound,
    /// The token failed verification, names a different client, is not an
    /// access token, or is stale (superseded by a reissue).
    InvalidToken,
    /// The token id is on the revocation list, or the record itself is
    /// revoked.
    Revoked {
        revoked_at: Option<NaiveDateTime>,
        reason: Option<String>,
    },
    /// The license deadline has passed (or the record already transitioned).
    Expired { expires_at: NaiveDateTime },
    /// The license is administratively switched off.
    Inactive,
    /// The stored module set disagrees with the plan table. Repaired by the
    /// service and then treated as valid.
    ModulesDrift { expected: BTreeSet<Module> },
    /// Token and license line up; the caller may unlock.
    Valid,
}

impl Outcome {
    /// Whether the service should answer the check positively (after any
    /// repair).
    pub fn is_usable(&self) -> bool {
        matches!(self, Outcome::Valid | Outcome::ModulesDrift { .. })
    }
}

/// Validate a presented token against the license record.
///
/// `claims` is `None` when the codec already rejected the token; the
/// revocation entry, if any, must belong to `claims.jti`.
pub fn validate(
    license: Option<&License>,
    claims: Option<&TokenClaims>,
    revocation: Option<&RevocationEntry>,
    client_id: &str,
    now: NaiveDateTime,
) -> Outcome {
    // 1. No record.
    let Some(license) = license else {
        return Outcome::LicenseNotFound;
    };

    // 2. Token rejected by the codec, wrong subject, or wrong flavor.
    let Some(claims) = claims else {
        return Outcome::InvalidToken;
    };
    if claims.sub != client_id || claims.kind != TokenKind::Access {
        return Outcome::InvalidToken;
    }

    // 3. Revoked token id wins over everything below.
    if let Some(entry) = revocation {
        return Outcome::Revoked {
            revoked_at: Some(entry.revoked_at),
            reason: Some(entry.reason.clone()),
        };
    }
    if license.status == LicenseStatus::Revoked {
        return Outcome::Revoked {
            revoked_at: None,
            reason: None,
        };
    }

    // A token superseded by a reissue is no longer honored, even if its own
    // signature and expiry are fine.
    if claims.jti != license.current_token_id {
        return Outcome::InvalidToken;
    }

    // 4. License deadline.
    if license.status == LicenseStatus::Expired || license.is_expired(now) {
        return Outcome::Expired {
            expires_at: license.expires_at,
        };
    }

    // 5. Switched off.
    if license.status == LicenseStatus::Inactive {
        return Outcome::Inactive;
    }

    // 6. Stored modules must match the plan table exactly.
    let expected = modules_for_plan(license.plan);
    if license.active_modules != expected {
        return Outcome::ModulesDrift { expected };
    }

    // 7. All checks passed.
    Outcome::Valid
}
