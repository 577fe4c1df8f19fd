//! Request validation utilities for the Aegis API.
//!
//! This module provides validation functions for common input types
//! used across the API endpoints.

use std::fmt;

/// Validation error type.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate a client id.
///
/// Client ids are UUIDs by default, but deployments may supply their own
/// opaque ids: alphanumeric with hyphens/underscores, 1-128 characters.
pub fn validate_client_id(value: &str, field_name: &str) -> ValidationResult<()> {
    let id_regex = regex::Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_-]{0,127}$").unwrap();

    if id_regex.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError {
            field: field_name.to_string(),
            message: "invalid client id (alphanumeric with hyphens/underscores, 1-128 chars)"
                .to_string(),
        })
    }
}

/// Validate a contact email address.
///
/// Deliberately loose: one `@`, something on both sides, a dot in the
/// domain. Deliverability is the mail system's problem.
pub fn validate_email(value: &str, field_name: &str) -> ValidationResult<()> {
    let email_regex = regex::Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();

    if email_regex.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError {
            field: field_name.to_string(),
            message: "invalid email address".to_string(),
        })
    }
}

/// Reject strings that are empty or whitespace only.
///
/// Used for required free-text fields such as the revocation reason, which
/// end up in the audit log and in messages pushed to clients.
pub fn validate_not_empty(value: &str, field_name: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError {
            field: field_name.to_string(),
            message: "must not be blank".to_string(),
        });
    }
    Ok(())
}

/// Bound the byte length of a free-text field.
///
/// Keeps operator-supplied strings (company names, revocation reasons)
/// from bloating license rows and audit payloads.
pub fn validate_length(
    value: &str,
    min: usize,
    max: usize,
    field_name: &str,
) -> ValidationResult<()> {
    let len = value.len();
    if len < min || len > max {
        return Err(ValidationError {
            field: field_name.to_string(),
            message: format!("expected between {min} and {max} characters, got {len}"),
        });
    }
    Ok(())
}

/// Apply `validate_not_empty` to a field that may be absent entirely.
///
/// Absent is fine; present-but-blank is not.
pub fn validate_optional_not_empty(value: Option<&str>, field_name: &str) -> ValidationResult<()> {
    value.map_or(Ok(()), |v| validate_not_empty(v, field_name))
}
