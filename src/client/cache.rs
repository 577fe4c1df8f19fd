//! Encrypted last-known-good license cache.
//!
//! Installed clients persist the result of their last successful `check` so
//! they can keep operating through a connectivity gap. The cache is sealed
//! with AES-256-GCM under a key derived from the deployment secret and the
//! client id; the GCM tag doubles as tamper detection, and a cache copied
//! between installations fails to open.
//!
//! The cached state is advisory only for the bounded grace horizon (see
//! `client::validator`); it never extends entitlement beyond what the
//! server last confirmed.

use std::path::Path;

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::encryption::{derive_cache_key, open_from_base64, seal_to_base64};
use crate::errors::{LicenseError, LicenseResult};
use crate::plans::Plan;

/// License status as mirrored on the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachedStatus {
    Active,
    Inactive,
    Expired,
    Revoked,
}

impl CachedStatus {
    /// Parse the status string from a server response.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(CachedStatus::Active),
            "inactive" => Some(CachedStatus::Inactive),
            "expired" => Some(CachedStatus::Expired),
            "revoked" => Some(CachedStatus::Revoked),
            _ => None,
        }
    }
}

/// The last server-confirmed license view.
///
/// All fields are server-provided; the client never writes anything here it
/// did not receive from a successful `check`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedLicense {
    /// The client id this cache belongs to
    pub client_id: String,
    pub plan: Plan,
    pub status: CachedStatus,
    /// Expiry deadline as confirmed by the server
    pub expires_at: NaiveDateTime,
    /// Instant of the last successful online check
    pub last_check: NaiveDateTime,
}

impl CachedLicense {
    pub fn new(
        client_id: String,
        plan: Plan,
        status: CachedStatus,
        expires_at: NaiveDateTime,
    ) -> Self {
        Self {
            client_id,
            plan,
            status,
            expires_at,
            last_check: Utc::now().naive_utc(),
        }
    }

    /// Whether the cached deadline has passed at `now`.
    pub fn is_expired(&self, now: NaiveDateTime) -> bool {
        self.expires_at <= now
    }

    /// Time since the last successful online check.
    pub fn offline_for(&self, now: NaiveDateTime) -> chrono::Duration {
        now - self.last_check
    }
}

/// Seal and write the cache to `path`.
pub async fn save_cache(cache: &CachedLicense, path: &Path, secret: &str) -> LicenseResult<()> {
    let key = derive_cache_key(secret, &cache.client_id);

    let json_bytes = serde_json::to_vec(cache)
        .map_err(|e| LicenseError::EncryptionError(format!("failed to serialize cache: {e}")))?;

    let sealed = seal_to_base64(&json_bytes, &key)?;

    fs::write(path, sealed).await?;
    Ok(())
}

/// Read and open the cache at `path`.
///
/// Fails when the file is missing, tampered with, sealed for a different
/// client id, or sealed under a different secret.
pub async fn load_cache(path: &Path, secret: &str, client_id: &str) -> LicenseResult<CachedLicense> {
    let sealed = match fs::read_to_string(path).await {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(LicenseError::InvalidLicense(
                "no cached license found".to_string(),
            ));
        }
        Err(e) => return Err(LicenseError::StorageError(e)),
    };

    let key = derive_cache_key(secret, client_id);
    let opened = open_from_base64(sealed.trim(), &key)?;

    let cache: CachedLicense = serde_json::from_slice(&opened)
        .map_err(|e| LicenseError::DecryptionError(format!("failed to deserialize cache: {e}")))?;

    if cache.client_id != client_id {
        return Err(LicenseError::InvalidLicense(
            "cached license belongs to a different client".to_string(),
        ));
    }

    Ok(cache)
}

/// Delete the cache file. Missing files are fine.
pub async fn clear_cache(path: &Path) -> LicenseResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LicenseError::StorageError(e)),
    }
}
