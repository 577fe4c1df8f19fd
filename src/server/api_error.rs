//! Standardized API error responses.
//!
//! All endpoints return errors in one JSON shape:
//!
//! ```json
//! {
//!   "error": {
//!     "code": "LICENSE_NOT_FOUND",
//!     "message": "No license exists for this client",
//!     "details": null
//!   }
//! }
//! ```
//!
//! Codes are stable and machine-readable; clients branch on `code`, never on
//! `message`. Internal faults carry a correlation id in `details` and no
//! internals.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::LicenseError;
use crate::server::service::{CheckDenial, CheckError, ServiceError};

/// Machine-readable error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // === License state errors ===
    /// No license record exists for the requested client
    LicenseNotFound,
    /// A license already exists for the requested client
    LicenseExists,
    /// The license deadline has passed
    LicenseExpired,
    /// The license has been revoked
    LicenseRevoked,
    /// The license is administratively switched off
    LicenseInactive,
    /// The presented token is invalid, stale, or names another client
    InvalidToken,
    /// The presented refresh token is unknown, revoked, or expired
    InvalidRefresh,
    /// The requested transition is not allowed from the current status
    IllegalTransition,

    // === Input errors ===
    /// A required plan field is missing
    MissingPlan,
    /// The plan name is not recognized
    InvalidPlan,
    /// A required client_id field is missing
    MissingClientId,
    /// Required parameters are missing
    MissingParameters,
    /// The day count must be a positive integer
    InvalidDays,
    /// The module tag is not recognized
    UnknownModule,
    /// A field value is malformed
    InvalidField,

    // === Authorization errors ===
    /// No operator credentials presented
    Unauthorized,
    /// Operator credentials lack the required permission
    Forbidden,

    // === Transient errors ===
    /// The store is temporarily unreachable; safe to retry
    StorageUnavailable,
    /// The request exceeded its deadline; safe to retry
    Timeout,

    // === Internal errors ===
    /// Invariant violation or unexpected fault
    InternalError,
}

impl ErrorCode {
    /// Returns the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::MissingPlan
            | ErrorCode::InvalidPlan
            | ErrorCode::MissingClientId
            | ErrorCode::MissingParameters
            | ErrorCode::InvalidDays
            | ErrorCode::UnknownModule
            | ErrorCode::InvalidField => StatusCode::BAD_REQUEST,

            ErrorCode::Unauthorized | ErrorCode::InvalidToken | ErrorCode::InvalidRefresh => {
                StatusCode::UNAUTHORIZED
            }

            ErrorCode::Forbidden
            | ErrorCode::LicenseExpired
            | ErrorCode::LicenseRevoked
            | ErrorCode::LicenseInactive => StatusCode::FORBIDDEN,

            ErrorCode::LicenseNotFound => StatusCode::NOT_FOUND,

            ErrorCode::LicenseExists | ErrorCode::IllegalTransition => StatusCode::CONFLICT,

            ErrorCode::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,

            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a default human-readable message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::LicenseNotFound => "No license exists for this client",
            ErrorCode::LicenseExists => "A license already exists for this client",
            ErrorCode::LicenseExpired => "License has expired",
            ErrorCode::LicenseRevoked => "License has been revoked",
            ErrorCode::LicenseInactive => "License is not active",
            ErrorCode::InvalidToken => "License token is invalid",
            ErrorCode::InvalidRefresh => "Refresh token is invalid",
            ErrorCode::IllegalTransition => "Operation not allowed in the current license status",
            ErrorCode::MissingPlan => "A plan is required",
            ErrorCode::InvalidPlan => "Unrecognized plan",
            ErrorCode::MissingClientId => "A client_id is required",
            ErrorCode::MissingParameters => "Required parameters are missing",
            ErrorCode::InvalidDays => "days must be a positive integer",
            ErrorCode::UnknownModule => "Unrecognized module",
            ErrorCode::InvalidField => "A field value is invalid",
            ErrorCode::Unauthorized => "Operator authentication required",
            ErrorCode::Forbidden => "Insufficient permissions for this operation",
            ErrorCode::StorageUnavailable => "Storage is temporarily unavailable",
            ErrorCode::Timeout => "The request exceeded its deadline",
            ErrorCode::InternalError => "An unexpected error occurred",
        }
    }
}

/// The inner error object containing code, message, and optional details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional additional context (field name, revocation reason, etc.)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Standardized API error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// The error details
    pub error: ErrorBody,
}

impl ApiError {
    /// Creates a new API error with the default message for the code.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            error: ErrorBody {
                code,
                message: code.default_message().to_string(),
                details: None,
            },
        }
    }

    /// Creates a new API error with a custom message.
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code,
                message: message.into(),
                details: None,
            },
        }
    }

    /// Adds details to an existing error.
    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.error.details = Some(details);
        self
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.error.code.status_code()
    }

    /// Internal fault with a fresh correlation id and no internals.
    pub fn internal() -> Self {
        let correlation_id = Uuid::new_v4().to_string();
        Self::new(ErrorCode::InternalError)
            .details(serde_json::json!({ "correlation_id": correlation_id }))
    }

    /// Malformed field error with the field name in the details.
    pub fn invalid_field(field: &str, reason: &str) -> Self {
        Self::with_message(
            ErrorCode::InvalidField,
            format!("Invalid value for '{field}': {reason}"),
        )
        .details(serde_json::json!({ "field": field }))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.error.code, self.error.message)
    }
}

impl std::error::Error for ApiError {}

// === Conversions from internal error types ===

impl From<LicenseError> for ApiError {
    fn from(err: LicenseError) -> Self {
        match err {
            LicenseError::InvalidLicense(msg) => {
                ApiError::with_message(ErrorCode::InvalidField, msg)
            }
            LicenseError::ConfigError(_) | LicenseError::ServerError(_) => ApiError::internal(),
            LicenseError::NetworkError(_) | LicenseError::StorageError(_) => {
                ApiError::new(ErrorCode::StorageUnavailable)
            }
            LicenseError::EncryptionError(_) | LicenseError::DecryptionError(_) => {
                ApiError::internal()
            }
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound => ApiError::new(ErrorCode::LicenseNotFound),
            ServiceError::AlreadyExists => ApiError::new(ErrorCode::LicenseExists),
            ServiceError::UnknownModule(name) => {
                ApiError::with_message(ErrorCode::UnknownModule, format!("unknown module: {name}"))
            }
            ServiceError::NonPositiveDays => ApiError::new(ErrorCode::InvalidDays),
            ServiceError::Inactive => ApiError::new(ErrorCode::LicenseInactive),
            ServiceError::IllegalTransition { from, to } => ApiError::with_message(
                ErrorCode::IllegalTransition,
                format!("cannot transition from {from} to {to}"),
            ),
            ServiceError::InvalidRefresh => ApiError::new(ErrorCode::InvalidRefresh),
            ServiceError::Storage(inner) => inner.into(),
        }
    }
}

impl From<CheckError> for ApiError {
    fn from(err: CheckError) -> Self {
        match err {
            CheckError::Denied(denial) => denial.into(),
            CheckError::Storage(inner) => inner.into(),
        }
    }
}

impl From<CheckDenial> for ApiError {
    fn from(denial: CheckDenial) -> Self {
        match denial {
            CheckDenial::NotFound => ApiError::new(ErrorCode::LicenseNotFound),
            CheckDenial::InvalidToken => ApiError::new(ErrorCode::InvalidToken),
            CheckDenial::Revoked { revoked_at, reason } => ApiError::new(ErrorCode::LicenseRevoked)
                .details(serde_json::json!({
                    "revoked_at": revoked_at.map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
                    "reason": reason,
                })),
            CheckDenial::Expired { expires_at } => ApiError::new(ErrorCode::LicenseExpired)
                .details(serde_json::json!({
                    "expires_at": expires_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                })),
            CheckDenial::Inactive => ApiError::new(ErrorCode::LicenseInactive),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn error_code_status_mapping() {
        assert_eq!(
            ErrorCode::LicenseNotFound.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ErrorCode::InvalidPlan.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ErrorCode::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ErrorCode::LicenseExpired.status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ErrorCode::LicenseExists.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ErrorCode::StorageUnavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn api_error_serialization_uses_screaming_snake_case() {
        let err = ApiError::new(ErrorCode::LicenseNotFound);
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("LICENSE_NOT_FOUND"));
        assert!(json.contains("message"));
    }

    #[test]
    fn internal_error_hides_details_but_carries_correlation_id() {
        let err = ApiError::internal();
        let json = serde_json::to_value(&err).unwrap();
        assert!(json["error"]["details"]["correlation_id"].is_string());
        assert_eq!(json["error"]["code"], "INTERNAL_ERROR");
    }

    #[test]
    fn check_denials_map_to_spec_codes() {
        let now = Utc::now().naive_utc();

        let expired: ApiError = CheckDenial::Expired { expires_at: now }.into();
        assert_eq!(expired.error.code, ErrorCode::LicenseExpired);
        assert!(expired.error.details.unwrap()["expires_at"].is_string());

        let revoked: ApiError = CheckDenial::Revoked {
            revoked_at: Some(now),
            reason: Some("policy".to_string()),
        }
        .into();
        assert_eq!(revoked.error.code, ErrorCode::LicenseRevoked);
        assert_eq!(revoked.error.details.unwrap()["reason"], "policy");
    }

    #[test]
    fn service_errors_map_to_spec_codes() {
        let err: ApiError = ServiceError::AlreadyExists.into();
        assert_eq!(err.error.code, ErrorCode::LicenseExists);

        let err: ApiError = ServiceError::NonPositiveDays.into();
        assert_eq!(err.error.code, ErrorCode::InvalidDays);

        let err: ApiError = ServiceError::InvalidRefresh.into();
        assert_eq!(err.error.code, ErrorCode::InvalidRefresh);
    }
}
