//! Expire sweep.
//!
//! Finds licenses in `active` status whose `expires_at` has passed and
//! forces them to `expired` through the service (module reduction, token
//! reissue suppressed, one audit event and one `expired` publish per
//! transition).

use chrono::NaiveDateTime;
use tracing::debug;

use crate::server::service::LicenseService;

use super::JobError;

/// Transition every overdue active license to `expired`.
///
/// Returns the number of licenses transitioned. Idempotent: a license
/// already expired (by an earlier sweep or by the validator's reactive
/// path) is skipped by the service's status precondition.
pub async fn run_expire_sweep(
    service: &LicenseService,
    now: NaiveDateTime,
) -> Result<u32, JobError> {
    debug!("Checking for expired licenses at {now}");

    let overdue = service.db().find_expired_active(now).await?;

    let mut count = 0;
    for license in overdue {
        if service.expire(&license.client_id, "scheduler").await? {
            count += 1;
        }
    }

    Ok(count)
}
