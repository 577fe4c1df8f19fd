//! Signed license tokens.
//!
//! Access tokens are short-lived and carry the plan and module set at
//! issuance; refresh tokens are long-lived and carry no modules. Both are
//! HS256 JWTs under a single server secret. The payload is self-describing,
//! but the server record stays authoritative: every mutation rotates
//! `current_token_id`, and the validator rejects tokens whose id is stale.
//!
//! Verification tolerates 30 seconds of clock skew (configurable);
//! issuance does not.

use std::collections::BTreeSet;

use chrono::{Duration, NaiveDateTime};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AegisConfig;
use crate::errors::{LicenseError, LicenseResult};
use crate::plans::{Module, Plan};

/// Token flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims carried by every license token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: the client id this token was issued to
    pub sub: String,
    /// Unique token id
    pub jti: String,
    /// Plan at issuance
    pub plan: Plan,
    /// Module set at issuance. Absent on refresh tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modules: Option<Vec<Module>>,
    pub kind: TokenKind,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// Verification failures, in decreasing order of suspicion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token is malformed: {0}")]
    Malformed(String),
    #[error("token has expired")]
    Expired,
}

/// A freshly signed token plus its identity.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub token_id: String,
    pub expires_at: NaiveDateTime,
}

/// An access/refresh pair issued together.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

/// Signs and verifies license tokens.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenCodec {
    pub fn new(secret: &str, access_ttl_hours: u64, refresh_ttl_days: u64, leeway_secs: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = leeway_secs;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            access_ttl: Duration::hours(access_ttl_hours as i64),
            refresh_ttl: Duration::days(refresh_ttl_days as i64),
        }
    }

    /// Build a codec from configuration, resolving the signing secret.
    pub fn from_config(config: &AegisConfig) -> LicenseResult<Self> {
        let secret = config.resolve_signing_secret()?;
        Ok(Self::new(
            &secret,
            config.tokens.access_ttl_hours,
            config.tokens.refresh_ttl_days,
            config.tokens.skew_leeway_secs,
        ))
    }

    /// Access-token lifetime in seconds, for `expires_in` response fields.
    pub fn access_ttl_secs(&self) -> u64 {
        self.access_ttl.num_seconds() as u64
    }

    fn sign(&self, claims: &TokenClaims) -> LicenseResult<String> {
        encode(&Header::default(), claims, &self.encoding_key)
            .map_err(|e| LicenseError::ServerError(format!("failed to sign token: {e}")))
    }

    /// Issue a new access token for the given license view.
    pub fn issue_access(
        &self,
        client_id: &str,
        plan: Plan,
        modules: &BTreeSet<Module>,
        now: NaiveDateTime,
    ) -> LicenseResult<IssuedToken> {
        let token_id = Uuid::new_v4().to_string();
        let expires_at = now + self.access_ttl;

        let claims = TokenClaims {
            sub: client_id.to_string(),
            jti: token_id.clone(),
            plan,
            modules: Some(modules.iter().copied().collect()),
            kind: TokenKind::Access,
            iat: now.and_utc().timestamp() as u64,
            exp: expires_at.and_utc().timestamp() as u64,
        };

        Ok(IssuedToken {
            token: self.sign(&claims)?,
            token_id,
            expires_at,
        })
    }

    /// Issue a new refresh token. Carries no modules.
    pub fn issue_refresh(
        &self,
        client_id: &str,
        plan: Plan,
        now: NaiveDateTime,
    ) -> LicenseResult<IssuedToken> {
        let token_id = Uuid::new_v4().to_string();
        let expires_at = now + self.refresh_ttl;

        let claims = TokenClaims {
            sub: client_id.to_string(),
            jti: token_id.clone(),
            plan,
            modules: None,
            kind: TokenKind::Refresh,
            iat: now.and_utc().timestamp() as u64,
            exp: expires_at.and_utc().timestamp() as u64,
        };

        Ok(IssuedToken {
            token: self.sign(&claims)?,
            token_id,
            expires_at,
        })
    }

    /// Issue an access/refresh pair in one step.
    pub fn issue_pair(
        &self,
        client_id: &str,
        plan: Plan,
        modules: &BTreeSet<Module>,
        now: NaiveDateTime,
    ) -> LicenseResult<TokenPair> {
        Ok(TokenPair {
            access: self.issue_access(client_id, plan, modules, now)?,
            refresh: self.issue_refresh(client_id, plan, now)?,
        })
    }

    /// Verify signature, shape, and expiry of a presented token.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                _ => TokenError::Malformed(e.to_string()),
            })
    }

    /// Verify and additionally require a specific token kind.
    pub fn verify_kind(&self, token: &str, kind: TokenKind) -> Result<TokenClaims, TokenError> {
        let claims = self.verify(token)?;
        if claims.kind != kind {
            return Err(TokenError::Malformed(format!(
                "expected {kind:?} token, got {:?}",
                claims.kind
            )));
        }
        Ok(claims)
    }
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plans::modules_for_plan;
    use chrono::Utc;

    fn codec() -> TokenCodec {
        TokenCodec::new("unit-test-secret", 24, 365, 30)
    }

    #[test]
    fn access_token_round_trip() {
        let codec = codec();
        let now = Utc::now().naive_utc();
        let modules = modules_for_plan(Plan::Premium);

        let issued = codec
            .issue_access("client-1", Plan::Premium, &modules, now)
            .unwrap();
        let claims = codec.verify(&issued.token).unwrap();

        assert_eq!(claims.sub, "client-1");
        assert_eq!(claims.jti, issued.token_id);
        assert_eq!(claims.plan, Plan::Premium);
        assert_eq!(claims.kind, TokenKind::Access);
        assert_eq!(
            claims.modules.unwrap().into_iter().collect::<BTreeSet<_>>(),
            modules
        );
    }

    #[test]
    fn refresh_token_has_no_modules_and_longer_exp() {
        let codec = codec();
        let now = Utc::now().naive_utc();
        let pair = codec
            .issue_pair("client-1", Plan::Basic, &modules_for_plan(Plan::Basic), now)
            .unwrap();

        let refresh = codec.verify(&pair.refresh.token).unwrap();
        assert_eq!(refresh.kind, TokenKind::Refresh);
        assert!(refresh.modules.is_none());
        assert!(pair.refresh.expires_at > pair.access.expires_at);
        assert_ne!(pair.access.token_id, pair.refresh.token_id);
    }

    #[test]
    fn tampered_token_fails_signature() {
        let codec = codec();
        let now = Utc::now().naive_utc();
        let issued = codec
            .issue_access("client-1", Plan::Demo, &modules_for_plan(Plan::Demo), now)
            .unwrap();

        let other = TokenCodec::new("different-secret", 24, 365, 30);
        assert!(matches!(
            other.verify(&issued.token),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        let codec = codec();
        assert!(matches!(
            codec.verify("not.a.token"),
            Err(TokenError::Malformed(_))
        ));
    }

    #[test]
    fn expired_token_rejected_beyond_leeway() {
        // Zero leeway so an exp in the past is rejected immediately.
        let codec = TokenCodec::new("unit-test-secret", 24, 365, 0);
        let past = Utc::now().naive_utc() - Duration::hours(25);

        let issued = codec
            .issue_access("client-1", Plan::Demo, &modules_for_plan(Plan::Demo), past)
            .unwrap();
        assert!(matches!(codec.verify(&issued.token), Err(TokenError::Expired)));
    }

    #[test]
    fn skew_leeway_accepts_recently_expired() {
        // exp lands 10 s in the past; a 30 s leeway must still accept it.
        let codec = TokenCodec::new("unit-test-secret", 24, 365, 30);
        let issue_instant = Utc::now().naive_utc() - Duration::hours(24) - Duration::seconds(10);

        let issued = codec
            .issue_access(
                "client-1",
                Plan::Demo,
                &modules_for_plan(Plan::Demo),
                issue_instant,
            )
            .unwrap();
        assert!(codec.verify(&issued.token).is_ok());
    }

    #[test]
    fn verify_kind_enforces_flavor() {
        let codec = codec();
        let now = Utc::now().naive_utc();
        let pair = codec
            .issue_pair("c", Plan::Basic, &modules_for_plan(Plan::Basic), now)
            .unwrap();

        assert!(codec.verify_kind(&pair.access.token, TokenKind::Access).is_ok());
        assert!(codec.verify_kind(&pair.access.token, TokenKind::Refresh).is_err());
        assert!(codec.verify_kind(&pair.refresh.token, TokenKind::Refresh).is_ok());
    }
}
