//! Operator authentication for the admin API.
//!
//! Administrators authenticate against a [`CredentialStore`] (the bundled
//! implementation reads a username/password pair from configuration; real
//! deployments plug in their own) and receive a short-lived HS256 session
//! token. Admin endpoints require the [`AdminUser`] extractor, which
//! validates the `Authorization: Bearer` header against that token.
//!
//! Session tokens are distinct from license tokens: different secret by
//! default, different claim shape, and never accepted by the license
//! validator.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::errors::{LicenseError, LicenseResult};
use crate::server::api_error::{ApiError, ErrorCode};

const SESSION_ISSUER: &str = "aegis";
const SESSION_AUDIENCE: &str = "aegis-admin";

/// Verifies operator credentials. Swappable collaborator.
pub trait CredentialStore: Send + Sync {
    fn verify(&self, username: &str, password: &str) -> bool;
}

/// Credential store backed by the `[auth]` configuration section.
///
/// Refuses all logins when no password is configured, so a default
/// deployment cannot be entered with guessable credentials.
pub struct ConfigCredentialStore {
    username: String,
    password: String,
}

impl ConfigCredentialStore {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            username: config.admin_username.clone(),
            password: config.admin_password.clone(),
        }
    }
}

impl CredentialStore for ConfigCredentialStore {
    fn verify(&self, username: &str, password: &str) -> bool {
        !self.password.is_empty() && username == self.username && password == self.password
    }
}

/// Admin session claims.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SessionClaims {
    /// Operator name
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
    pub iss: String,
    pub aud: String,
}

/// Signs and validates admin session tokens.
#[derive(Clone)]
pub struct SessionValidator {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
    validation: Validation,
    session_ttl_secs: u64,
}

impl SessionValidator {
    pub fn new(secret: &str, session_ttl_secs: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[SESSION_ISSUER]);
        validation.set_audience(&[SESSION_AUDIENCE]);
        validation.validate_exp = true;

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            validation,
            session_ttl_secs,
        }
    }

    /// Validate a session token and extract its claims.
    pub fn validate_token(&self, token: &str) -> Result<SessionClaims, AuthError> {
        decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken,
            })
    }

    /// Session lifetime in seconds, for `expires_in` response fields.
    pub fn session_ttl_secs(&self) -> u64 {
        self.session_ttl_secs
    }

    /// Mint a session token for an authenticated operator.
    pub fn create_token(&self, subject: &str, now_secs: u64) -> LicenseResult<String> {
        let claims = SessionClaims {
            sub: subject.to_string(),
            iat: now_secs,
            exp: now_secs + self.session_ttl_secs,
            iss: SESSION_ISSUER.to_string(),
            aud: SESSION_AUDIENCE.to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| LicenseError::ServerError(format!("failed to create session token: {e}")))
    }
}

impl std::fmt::Debug for SessionValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionValidator")
            .field("session_ttl_secs", &self.session_ttl_secs)
            .finish()
    }
}

/// Authentication failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    MissingToken,
    InvalidHeader,
    InvalidToken,
    TokenExpired,
    BadCredentials,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let api_error = match self {
            AuthError::MissingToken => {
                ApiError::with_message(ErrorCode::Unauthorized, "missing authorization token")
            }
            AuthError::InvalidHeader => {
                ApiError::with_message(ErrorCode::Unauthorized, "malformed authorization header")
            }
            AuthError::InvalidToken => {
                ApiError::with_message(ErrorCode::Unauthorized, "invalid session token")
            }
            AuthError::TokenExpired => {
                ApiError::with_message(ErrorCode::Unauthorized, "session token has expired")
            }
            AuthError::BadCredentials => {
                ApiError::with_message(ErrorCode::Unauthorized, "invalid credentials")
            }
        };
        api_error.into_response()
    }
}

/// Shared authentication state, inserted into the router as an extension.
#[derive(Clone)]
pub struct AuthState {
    pub credentials: Arc<dyn CredentialStore>,
    pub sessions: Arc<SessionValidator>,
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState").finish()
    }
}

/// An authenticated operator, extracted from the `Authorization` header.
///
/// Use in a handler signature to require admin authentication:
///
/// ```rust,ignore
/// async fn stats_handler(admin: AdminUser) -> impl IntoResponse { ... }
/// ```
#[derive(Debug, Clone)]
pub struct AdminUser {
    pub subject: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_state = parts
            .extensions
            .get::<AuthState>()
            .cloned()
            .ok_or(AuthError::InvalidToken)?;

        let auth_header = parts
            .headers
            .get("Authorization")
            .ok_or(AuthError::MissingToken)?
            .to_str()
            .map_err(|_| AuthError::InvalidHeader)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::InvalidHeader)?;

        let claims = auth_state.sessions.validate_token(token)?;

        Ok(AdminUser {
            subject: claims.sub,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> SessionValidator {
        SessionValidator::new("admin-test-secret", 3600)
    }

    fn now_secs() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    #[test]
    fn create_and_validate_session_token() {
        let validator = validator();
        let token = validator.create_token("ops", now_secs()).unwrap();

        let claims = validator.validate_token(&token).unwrap();
        assert_eq!(claims.sub, "ops");
        assert_eq!(claims.iss, SESSION_ISSUER);
        assert_eq!(claims.aud, SESSION_AUDIENCE);
    }

    #[test]
    fn reject_garbage_token() {
        assert_eq!(
            validator().validate_token("not-a-token"),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn reject_wrong_secret() {
        let token = validator().create_token("ops", now_secs()).unwrap();
        let other = SessionValidator::new("a-different-secret", 3600);
        assert!(other.validate_token(&token).is_err());
    }

    #[test]
    fn reject_expired_session() {
        let validator = validator();
        // Issued far enough in the past that exp + leeway has passed.
        let token = validator.create_token("ops", now_secs() - 7300).unwrap();
        assert_eq!(
            validator.validate_token(&token),
            Err(AuthError::TokenExpired)
        );
    }

    #[test]
    fn config_credentials_refuse_empty_password() {
        let store = ConfigCredentialStore::new(&AuthConfig {
            admin_secret: String::new(),
            admin_username: "admin".to_string(),
            admin_password: String::new(),
            session_ttl_secs: 3600,
        });
        assert!(!store.verify("admin", ""));
        assert!(!store.verify("admin", "anything"));
    }

    #[test]
    fn config_credentials_verify_pair() {
        let store = ConfigCredentialStore::new(&AuthConfig {
            admin_secret: String::new(),
            admin_username: "admin".to_string(),
            admin_password: "hunter2".to_string(),
            session_ttl_secs: 3600,
        });
        assert!(store.verify("admin", "hunter2"));
        assert!(!store.verify("admin", "wrong"));
        assert!(!store.verify("root", "hunter2"));
    }
}
