//! Garbage collection of long-expired records.
//!
//! Deletes licenses that have sat in `expired` beyond the retention period
//! (default 90 days past their deadline), along with their warn flags and
//! refresh tokens. Revocation entries and audit events are never collected.

use chrono::{Duration, NaiveDateTime};
use tracing::debug;

use crate::server::service::LicenseService;

use super::JobError;

/// Delete every record expired for more than `after_days`.
///
/// Only records with `status = expired` are candidates; the query cannot
/// touch active, inactive, or revoked licenses regardless of their
/// deadline.
pub async fn run_garbage_collection(
    service: &LicenseService,
    now: NaiveDateTime,
    after_days: u32,
) -> Result<u32, JobError> {
    let cutoff = now - Duration::days(i64::from(after_days));
    debug!("Garbage collection of records expired before {cutoff}");

    let stale = service.db().find_expired_older_than(cutoff).await?;

    let mut count = 0;
    for license in stale {
        service.delete(&license.client_id, "scheduler").await?;
        count += 1;
    }

    Ok(count)
}
