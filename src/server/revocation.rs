//! Revocation list and server-side refresh-token set.
//!
//! The revocation list is append-only: once a token id lands here it stays
//! revoked for the rest of its natural lifetime. Refresh tokens are tracked
//! individually so a single stolen refresh token can be killed without
//! touching the license; only the SHA-256 hash of the presented token is
//! stored.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{query, query_as, FromRow};
use tracing::{error, warn};

use crate::errors::{LicenseError, LicenseResult};
use crate::server::store::Database;

/// One entry of the revocation list.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RevocationEntry {
    pub token_id: String,
    pub client_id: String,
    pub revoked_at: NaiveDateTime,
    pub reason: String,
    pub description: Option<String>,
}

/// Server-side record of an issued refresh token.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshTokenRecord {
    pub token_hash: String,
    pub token_id: String,
    pub client_id: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
}

impl RefreshTokenRecord {
    /// Usable for minting new access tokens.
    pub fn is_live(&self, now: NaiveDateTime) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

/// Hash a presented token string for storage/lookup.
pub fn hash_token(raw_token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_token.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl Database {
    /// Add a token id to the revocation list.
    ///
    /// Idempotent: revoking an already-revoked token id succeeds silently
    /// and keeps the original entry.
    pub async fn add_revocation(
        &self,
        token_id: &str,
        client_id: &str,
        revoked_at: NaiveDateTime,
        reason: &str,
        description: Option<&str>,
    ) -> LicenseResult<()> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query(
                    "INSERT OR IGNORE INTO revocations \
                         (token_id, client_id, revoked_at, reason, description) \
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(token_id)
                .bind(client_id)
                .bind(revoked_at)
                .bind(reason)
                .bind(description)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("SQLite add_revocation failed: {e}");
                    LicenseError::ServerError(format!("database error: {e}"))
                })?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query(
                    "INSERT INTO revocations \
                         (token_id, client_id, revoked_at, reason, description) \
                     VALUES ($1, $2, $3, $4, $5) \
                     ON CONFLICT (token_id) DO NOTHING",
                )
                .bind(token_id)
                .bind(client_id)
                .bind(revoked_at)
                .bind(reason)
                .bind(description)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("Postgres add_revocation failed: {e}");
                    LicenseError::ServerError(format!("database error: {e}"))
                })?;
            }
        }

        warn!("Token {} revoked for client {} ({})", token_id, client_id, reason);
        Ok(())
    }

    /// Look up a token id in the revocation list.
    pub async fn get_revocation(&self, token_id: &str) -> LicenseResult<Option<RevocationEntry>> {
        let entry = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query_as::<_, RevocationEntry>(
                "SELECT * FROM revocations WHERE token_id = ?",
            )
            .bind(token_id)
            .fetch_optional(pool)
            .await
            .map_err(|e| {
                error!("SQLite get_revocation failed: {e}");
                LicenseError::ServerError(format!("database error: {e}"))
            })?,
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => query_as::<_, RevocationEntry>(
                "SELECT * FROM revocations WHERE token_id = $1",
            )
            .bind(token_id)
            .fetch_optional(pool)
            .await
            .map_err(|e| {
                error!("Postgres get_revocation failed: {e}");
                LicenseError::ServerError(format!("database error: {e}"))
            })?,
        };

        Ok(entry)
    }

    /// Whether a token id is revoked.
    pub async fn is_revoked(&self, token_id: &str) -> LicenseResult<bool> {
        Ok(self.get_revocation(token_id).await?.is_some())
    }

    // === Refresh tokens ===

    /// Record a newly issued refresh token. Only the hash of the raw token
    /// is stored.
    pub async fn insert_refresh_token(
        &self,
        raw_token: &str,
        token_id: &str,
        client_id: &str,
        issued_at: NaiveDateTime,
        expires_at: NaiveDateTime,
    ) -> LicenseResult<()> {
        let token_hash = hash_token(raw_token);

        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query(
                    "INSERT OR REPLACE INTO refresh_tokens \
                         (token_hash, token_id, client_id, issued_at, expires_at, revoked_at) \
                     VALUES (?, ?, ?, ?, ?, NULL)",
                )
                .bind(&token_hash)
                .bind(token_id)
                .bind(client_id)
                .bind(issued_at)
                .bind(expires_at)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("SQLite insert_refresh_token failed: {e}");
                    LicenseError::ServerError(format!("database error: {e}"))
                })?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query(
                    "INSERT INTO refresh_tokens \
                         (token_hash, token_id, client_id, issued_at, expires_at, revoked_at) \
                     VALUES ($1, $2, $3, $4, $5, NULL) \
                     ON CONFLICT (token_hash) DO UPDATE SET \
                         token_id = EXCLUDED.token_id, \
                         issued_at = EXCLUDED.issued_at, \
                         expires_at = EXCLUDED.expires_at, \
                         revoked_at = NULL",
                )
                .bind(&token_hash)
                .bind(token_id)
                .bind(client_id)
                .bind(issued_at)
                .bind(expires_at)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("Postgres insert_refresh_token failed: {e}");
                    LicenseError::ServerError(format!("database error: {e}"))
                })?;
            }
        }

        Ok(())
    }

    /// Look up a presented refresh token by its hash.
    pub async fn get_refresh_token(
        &self,
        raw_token: &str,
    ) -> LicenseResult<Option<RefreshTokenRecord>> {
        let token_hash = hash_token(raw_token);

        let record = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query_as::<_, RefreshTokenRecord>(
                "SELECT * FROM refresh_tokens WHERE token_hash = ?",
            )
            .bind(&token_hash)
            .fetch_optional(pool)
            .await
            .map_err(|e| {
                error!("SQLite get_refresh_token failed: {e}");
                LicenseError::ServerError(format!("database error: {e}"))
            })?,
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => query_as::<_, RefreshTokenRecord>(
                "SELECT * FROM refresh_tokens WHERE token_hash = $1",
            )
            .bind(&token_hash)
            .fetch_optional(pool)
            .await
            .map_err(|e| {
                error!("Postgres get_refresh_token failed: {e}");
                LicenseError::ServerError(format!("database error: {e}"))
            })?,
        };

        Ok(record)
    }

    /// Revoke a single refresh token. Returns whether a live token was hit.
    pub async fn revoke_refresh_token(
        &self,
        raw_token: &str,
        now: NaiveDateTime,
    ) -> LicenseResult<bool> {
        let token_hash = hash_token(raw_token);

        let rows_affected = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query(
                "UPDATE refresh_tokens SET revoked_at = ? \
                 WHERE token_hash = ? AND revoked_at IS NULL",
            )
            .bind(now)
            .bind(&token_hash)
            .execute(pool)
            .await
            .map_err(|e| {
                error!("SQLite revoke_refresh_token failed: {e}");
                LicenseError::ServerError(format!("database error: {e}"))
            })?
            .rows_affected(),
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => query(
                "UPDATE refresh_tokens SET revoked_at = $1 \
                 WHERE token_hash = $2 AND revoked_at IS NULL",
            )
            .bind(now)
            .bind(&token_hash)
            .execute(pool)
            .await
            .map_err(|e| {
                error!("Postgres revoke_refresh_token failed: {e}");
                LicenseError::ServerError(format!("database error: {e}"))
            })?
            .rows_affected(),
        };

        Ok(rows_affected > 0)
    }

    /// Drop all refresh tokens for a client. Used when the license record
    /// itself is deleted or garbage-collected.
    pub async fn delete_refresh_tokens_for(&self, client_id: &str) -> LicenseResult<()> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query("DELETE FROM refresh_tokens WHERE client_id = ?")
                    .bind(client_id)
                    .execute(pool)
                    .await
                    .map_err(|e| {
                        error!("SQLite delete_refresh_tokens_for failed: {e}");
                        LicenseError::ServerError(format!("database error: {e}"))
                    })?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query("DELETE FROM refresh_tokens WHERE client_id = $1")
                    .bind(client_id)
                    .execute(pool)
                    .await
                    .map_err(|e| {
                        error!("Postgres delete_refresh_tokens_for failed: {e}");
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
    use chrono::{Duration, Utc};

    #[test]
    fn hash_token_produces_sha256() {
        let raw = "aegis_refresh_abc123";
        let hash = hash_token(raw);
        // SHA-256 produces 64 hex characters
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_token(raw));
        assert_ne!(hash, hash_token("aegis_refresh_xyz789"));
    }

    #[test]
    fn refresh_record_liveness() {
        let now = Utc::now().naive_utc();
        let record = RefreshTokenRecord {
            token_hash: "h".to_string(),
            token_id: "t".to_string(),
            client_id: "c".to_string(),
            issued_at: now,
            expires_at: now + Duration::days(365),
            revoked_at: None,
        };
        assert!(record.is_live(now));

        let revoked = RefreshTokenRecord {
            revoked_at: Some(now),
            ..record.clone()
        };
        assert!(!revoked.is_live(now));

        let expired = RefreshTokenRecord {
            expires_at: now - Duration::hours(1),
            ..record
        };
        assert!(!expired.is_live(now));
    }
}
