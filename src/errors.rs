//! Internal error type shared across the crate.
//!
//! API-facing error codes live in `server::api_error`; this enum is the
//! internal propagation currency. Handlers map it at the boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LicenseError {
    /// A request or record failed semantic validation.
    #[error("invalid license data: {0}")]
    InvalidLicense(String),

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Transport failure talking to the licensing server.
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// Local file I/O failure (client cache).
    #[error("storage error: {0}")]
    StorageError(#[from] std::io::Error),

    /// Sealing the client cache failed.
    #[error("encryption error: {0}")]
    EncryptionError(String),

    /// Opening the client cache failed (wrong key, tampered data).
    #[error("decryption error: {0}")]
    DecryptionError(String),

    /// Database or other server-side failure.
    #[error("server error: {0}")]
    ServerError(String),
}

/// Result alias used throughout the crate.
pub type LicenseResult<T> = Result<T, LicenseError>;
