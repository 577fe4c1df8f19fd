//! HTTP client for installed applications.
//!
//! A thin typed wrapper over the server's client-facing endpoints: `check`,
//! `token-pair`, and `refresh`. Applications call `check` on startup and
//! after every gateway reconnect, then persist the result via
//! `client::cache` for offline operation.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::errors::{LicenseError, LicenseResult};

/// Default per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The license view returned by a successful check.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteLicense {
    pub client_id: String,
    pub plan: String,
    pub status: String,
    pub modules: Vec<String>,
    pub expires_at: String,
    pub days_remaining: i64,
    pub max_users: Option<u32>,
}

/// Outcome of an online check.
#[derive(Debug, Clone)]
pub enum CheckOutcome {
    Valid(RemoteLicense),
    /// Denied with a stable machine-readable code (e.g. LICENSE_EXPIRED).
    Denied { code: String, message: String },
}

#[derive(Debug, Serialize)]
struct CheckBody<'a> {
    client_id: &'a str,
    token: &'a str,
}

#[derive(Debug, Deserialize)]
struct CheckResponseBody {
    license: RemoteLicense,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// A fresh access/refresh pair.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenPairResponse {
    pub access: String,
    pub refresh: String,
    pub expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct RefreshResponseBody {
    access: String,
}

/// Typed client for the Aegis request API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: Client::new(),
        }
    }

    /// Validate a token. Denials with stable codes come back as
    /// `CheckOutcome::Denied`; transport failures are errors.
    pub async fn check(&self, client_id: &str, token: &str) -> LicenseResult<CheckOutcome> {
        let resp = self
            .http
            .post(format!("{}/api/v1/check", self.base_url))
            .json(&CheckBody { client_id, token })
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if resp.status().is_success() {
            let body: CheckResponseBody = resp.json().await.map_err(|e| {
                LicenseError::ServerError(format!("failed to parse check response: {e}"))
            })?;
            return Ok(CheckOutcome::Valid(body.license));
        }

        let envelope: ErrorEnvelope = resp.json().await.map_err(|e| {
            LicenseError::ServerError(format!("failed to parse error response: {e}"))
        })?;
        Ok(CheckOutcome::Denied {
            code: envelope.error.code,
            message: envelope.error.message,
        })
    }

    /// Request a fresh access/refresh pair.
    pub async fn token_pair(&self, client_id: &str) -> LicenseResult<TokenPairResponse> {
        let resp = self
            .http
            .post(format!("{}/api/v1/token-pair", self.base_url))
            .json(&serde_json::json!({ "client_id": client_id }))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(LicenseError::ServerError(format!(
                "token-pair rejected: {}",
                resp.status()
            )));
        }

        resp.json().await.map_err(|e| {
            LicenseError::ServerError(format!("failed to parse token-pair response: {e}"))
        })
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &str) -> LicenseResult<String> {
        let resp = self
            .http
            .post(format!("{}/api/v1/refresh", self.base_url))
            .json(&serde_json::json!({ "refresh": refresh_token }))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(LicenseError::InvalidLicense(
                "refresh token rejected".to_string(),
            ));
        }

        let body: RefreshResponseBody = resp.json().await.map_err(|e| {
            LicenseError::ServerError(format!("failed to parse refresh response: {e}"))
        })?;
        Ok(body.access)
    }
}
