//! Configuration system for Aegis.
//!
//! Configuration is loaded from multiple sources with the following precedence:
//! 1. Environment variables (highest priority)
//! 2. `config.toml` file
//! 3. Default values (lowest priority)
//!
//! # Environment Variables
//!
//! All configuration options can be overridden via environment variables:
//! - `AEGIS_SERVER_HOST` - Server bind address
//! - `AEGIS_SERVER_PORT` - Server port
//! - `AEGIS_DATABASE_TYPE` - "sqlite" or "postgres"
//! - `AEGIS_DATABASE_URL` - Database connection URL
//! - `AEGIS_LOG_LEVEL` - Log level (trace, debug, info, warn, error)
//! - `AEGIS_SIGNING_SECRET` - HMAC secret for license tokens
//! - `AEGIS_ACCESS_TTL_HOURS` - Access-token lifetime (default: 24)
//! - `AEGIS_REFRESH_TTL_DAYS` - Refresh-token lifetime (default: 365)
//! - `AEGIS_ADMIN_SECRET` - HMAC secret for operator session tokens
//! - `AEGIS_ADMIN_USERNAME` / `AEGIS_ADMIN_PASSWORD` - Operator credentials
//! - `AEGIS_GRACE_HOURS` - Offline grace horizon for installed clients
//! - `AEGIS_RATE_LIMIT_MAX` / `AEGIS_RATE_LIMIT_WINDOW_SECS` - Rate limiting

use config::Config;
use serde::Deserialize;
use std::env;
use std::sync::OnceLock;

use crate::errors::{LicenseError, LicenseResult};

/// Global configuration singleton.
static CONFIG: OnceLock<AegisConfig> = OnceLock::new();

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AegisConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// License-token signing and lifetimes
    pub tokens: TokenConfig,
    /// Operator authentication
    pub auth: AuthConfig,
    /// Rate limiting (requires "rate-limiting" feature)
    pub rate_limit: RateLimitConfig,
    /// Real-time gateway tunables
    pub gateway: GatewayConfig,
    /// Background sweep schedules (requires "background-jobs" feature)
    pub scheduler: SchedulerConfig,
    /// Client-side offline validation
    pub client: ClientConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database type: "sqlite" or "postgres"
    pub db_type: String,
    /// SQLite connection URL
    pub sqlite_url: String,
    /// PostgreSQL connection URL
    pub postgres_url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: "sqlite".to_string(),
            sqlite_url: "sqlite://aegis.db".to_string(),
            postgres_url: "postgres://localhost/aegis".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// License-token signing configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// HMAC secret for signing license tokens (use `env:VAR` to read from environment)
    pub signing_secret: String,
    /// Access-token lifetime in hours
    pub access_ttl_hours: u64,
    /// Refresh-token lifetime in days
    pub refresh_ttl_days: u64,
    /// Clock-skew tolerance applied on verification, in seconds
    pub skew_leeway_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            signing_secret: String::new(),
            access_ttl_hours: 24,
            refresh_ttl_days: 365,
            skew_leeway_secs: 30,
        }
    }
}

/// Operator authentication configuration.
///
/// The bundled credential store is a single username/password pair; larger
/// deployments plug their own `CredentialStore` into `server::auth`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret for operator session tokens. Falls back to the signing
    /// secret when empty.
    pub admin_secret: String,
    /// Operator username accepted by the bundled credential store
    pub admin_username: String,
    /// Operator password accepted by the bundled credential store
    pub admin_password: String,
    /// Operator session lifetime in seconds
    pub session_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_secret: String::new(),
            admin_username: "admin".to_string(),
            admin_password: String::new(),
            session_ttl_secs: 3600,
        }
    }
}

/// Rate limiting configuration.
///
/// Used when the `rate-limiting` feature is enabled.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,
    /// Sliding window length in seconds
    pub window_secs: u32,
    /// Requests allowed per source identity per window
    pub max_requests: u32,
    /// Requests per minute for /check (validation is exempt from the window)
    pub check_rpm: u32,
    /// Burst size (allows short bursts above the limit)
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 900,
            max_requests: 100,
            check_rpm: 300,
            burst_size: 10,
        }
    }
}

/// Real-time gateway tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Seconds a connection may stay unidentified before being closed
    pub identify_timeout_secs: u64,
    /// Expected interval between client pings, in seconds. Two missed
    /// intervals close the connection.
    pub ping_interval_secs: u64,
    /// Per-subscriber outbound queue capacity
    pub queue_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            identify_timeout_secs: 20,
            ping_interval_secs: 60,
            queue_capacity: 256,
        }
    }
}

/// Background sweep schedules.
///
/// Cron expressions use the six-field form (sec min hour dom mon dow) and
/// are evaluated in UTC.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Expire sweep (default: hourly)
    pub expire_cron: String,
    /// 7-day warning sweep (default: daily at 08:00)
    pub warn_7_cron: String,
    /// 3-day warning sweep (default: daily at 09:00)
    pub warn_3_cron: String,
    /// 1-day warning sweep (default: daily at 10:00)
    pub warn_1_cron: String,
    /// Garbage collection of long-expired records (default: weekly)
    pub gc_cron: String,
    /// Monthly aggregate report (default: 1st of the month, 06:00)
    pub report_cron: String,
    /// Days a record must sit in `expired` before garbage collection
    pub gc_after_days: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            expire_cron: "0 0 * * * *".to_string(),
            warn_7_cron: "0 0 8 * * *".to_string(),
            warn_3_cron: "0 0 9 * * *".to_string(),
            warn_1_cron: "0 0 10 * * *".to_string(),
            gc_cron: "0 30 4 * * Mon".to_string(),
            report_cron: "0 0 6 1 * *".to_string(),
            gc_after_days: 90,
        }
    }
}

/// Client-side offline validation configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Hours an installation may operate on its cached license after the
    /// last successful online check
    pub grace_hours: u64,
    /// Path of the encrypted license cache file
    pub cache_path: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            grace_hours: 24,
            cache_path: "aegis_license.cache".to_string(),
        }
    }
}

impl AegisConfig {
    /// Load configuration from file and environment.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. `config.toml` file (optional)
    /// 3. Environment variables
    fn load() -> LicenseResult<Self> {
        let builder = Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .set_override_option("server.host", env::var("AEGIS_SERVER_HOST").ok())
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option(
                "server.port",
                env::var("AEGIS_SERVER_PORT")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok()),
            )
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option("database.db_type", env::var("AEGIS_DATABASE_TYPE").ok())
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option(
                "database.sqlite_url",
                env::var("AEGIS_DATABASE_URL")
                    .ok()
                    .filter(|url| url.starts_with("sqlite")),
            )
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option(
                "database.postgres_url",
                env::var("AEGIS_DATABASE_URL")
                    .ok()
                    .filter(|url| url.starts_with("postgres")),
            )
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option("logging.level", env::var("AEGIS_LOG_LEVEL").ok())
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option("tokens.signing_secret", env::var("AEGIS_SIGNING_SECRET").ok())
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option(
                "tokens.access_ttl_hours",
                env::var("AEGIS_ACCESS_TTL_HOURS")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok()),
            )
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option(
                "tokens.refresh_ttl_days",
                env::var("AEGIS_REFRESH_TTL_DAYS")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok()),
            )
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option("auth.admin_secret", env::var("AEGIS_ADMIN_SECRET").ok())
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option("auth.admin_username", env::var("AEGIS_ADMIN_USERNAME").ok())
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option("auth.admin_password", env::var("AEGIS_ADMIN_PASSWORD").ok())
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option(
                "rate_limit.max_requests",
                env::var("AEGIS_RATE_LIMIT_MAX")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok()),
            )
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option(
                "rate_limit.window_secs",
                env::var("AEGIS_RATE_LIMIT_WINDOW_SECS")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok()),
            )
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option(
                "client.grace_hours",
                env::var("AEGIS_GRACE_HOURS")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok()),
            )
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?;

        let settings = builder
            .build()
            .map_err(|e| LicenseError::ConfigError(format!("failed to build config: {e}")))?;

        settings
            .try_deserialize()
            .map_err(|e| LicenseError::ConfigError(format!("failed to deserialize config: {e}")))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> LicenseResult<()> {
        if self.server.port == 0 {
            return Err(LicenseError::ConfigError(
                "server.port must be greater than 0".to_string(),
            ));
        }

        match self.database.db_type.as_str() {
            "sqlite" | "postgres" => {}
            other => {
                return Err(LicenseError::ConfigError(format!(
                    "database.db_type must be 'sqlite' or 'postgres', got '{other}'"
                )));
            }
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(LicenseError::ConfigError(format!(
                    "logging.level must be one of: trace, debug, info, warn, error. Got '{other}'"
                )));
            }
        }

        if self.tokens.access_ttl_hours == 0 {
            return Err(LicenseError::ConfigError(
                "tokens.access_ttl_hours must be greater than 0".to_string(),
            ));
        }
        if self.tokens.refresh_ttl_days == 0 {
            return Err(LicenseError::ConfigError(
                "tokens.refresh_ttl_days must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit.enabled {
            if self.rate_limit.max_requests == 0 {
                return Err(LicenseError::ConfigError(
                    "rate_limit.max_requests must be greater than 0".to_string(),
                ));
            }
            if self.rate_limit.window_secs == 0 {
                return Err(LicenseError::ConfigError(
                    "rate_limit.window_secs must be greater than 0".to_string(),
                ));
            }
        }

        if self.gateway.queue_capacity == 0 {
            return Err(LicenseError::ConfigError(
                "gateway.queue_capacity must be greater than 0".to_string(),
            ));
        }

        if self.scheduler.gc_after_days == 0 {
            return Err(LicenseError::ConfigError(
                "scheduler.gc_after_days must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolve the license-token signing secret.
    ///
    /// Supports the `env:VAR_NAME` indirection so the raw secret never has
    /// to live in `config.toml`.
    pub fn resolve_signing_secret(&self) -> LicenseResult<String> {
        resolve_secret(&self.tokens.signing_secret, "tokens.signing_secret")
    }

    /// Resolve the operator-session secret, falling back to the signing
    /// secret when unset.
    pub fn resolve_admin_secret(&self) -> LicenseResult<String> {
        if self.auth.admin_secret.is_empty() {
            self.resolve_signing_secret()
        } else {
            resolve_secret(&self.auth.admin_secret, "auth.admin_secret")
        }
    }
}

fn resolve_secret(raw: &str, field: &str) -> LicenseResult<String> {
    if raw.is_empty() {
        return Err(LicenseError::ConfigError(format!(
            "{field} is required (set it in config.toml or via environment)"
        )));
    }
    if let Some(env_var) = raw.strip_prefix("env:") {
        std::env::var(env_var).map_err(|_| {
            LicenseError::ConfigError(format!(
                "environment variable '{env_var}' not found for {field}"
            ))
        })
    } else {
        Ok(raw.to_string())
    }
}

/// Get the global configuration.
///
/// This loads the configuration on first access and caches it.
/// Returns an error if configuration loading or validation fails.
pub fn get_config() -> LicenseResult<&'static AegisConfig> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }

    let config = AegisConfig::load()?;
    config.validate()?;

    // Another thread may have beaten us to the set; either value is the same.
    let _ = CONFIG.set(config.clone());

    Ok(CONFIG.get().expect("config was just set"))
}

/// Initialize configuration explicitly.
///
/// Call this early in your application to catch configuration errors.
pub fn init_config() -> LicenseResult<&'static AegisConfig> {
    get_config()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn default_config() -> AegisConfig {
        AegisConfig::default()
    }

    #[test]
    fn default_config_is_valid() {
        let config = default_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validates_port_not_zero() {
        let mut config = default_config();
        config.server.port = 0;
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("port"));
    }

    #[test]
    fn validates_database_type() {
        let mut config = default_config();
        config.database.db_type = "oracle".to_string();
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("db_type"));
    }

    #[test]
    fn validates_log_level() {
        let mut config = default_config();
        config.logging.level = "loud".to_string();
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("logging.level"));
    }

    #[test]
    fn validates_token_ttls_not_zero() {
        let mut config = default_config();
        config.tokens.access_ttl_hours = 0;
        assert!(config.validate().is_err());

        let mut config = default_config();
        config.tokens.refresh_ttl_days = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn signing_secret_required() {
        let config = default_config();
        assert!(config.resolve_signing_secret().is_err());
    }

    #[test]
    #[serial]
    fn signing_secret_env_indirection() {
        let mut config = default_config();
        config.tokens.signing_secret = "env:AEGIS_TEST_SECRET_INDIRECT".to_string();

        std::env::remove_var("AEGIS_TEST_SECRET_INDIRECT");
        assert!(config.resolve_signing_secret().is_err());

        std::env::set_var("AEGIS_TEST_SECRET_INDIRECT", "s3cret");
        assert_eq!(config.resolve_signing_secret().unwrap(), "s3cret");
        std::env::remove_var("AEGIS_TEST_SECRET_INDIRECT");
    }

    #[test]
    fn admin_secret_falls_back_to_signing_secret() {
        let mut config = default_config();
        config.tokens.signing_secret = "shared".to_string();
        assert_eq!(config.resolve_admin_secret().unwrap(), "shared");

        config.auth.admin_secret = "separate".to_string();
        assert_eq!(config.resolve_admin_secret().unwrap(), "separate");
    }

    #[test]
    fn default_grace_is_twenty_four_hours() {
        assert_eq!(default_config().client.grace_hours, 24);
    }

    #[test]
    fn default_warn_crons_are_distinct() {
        let s = default_config().scheduler;
        assert_ne!(s.warn_7_cron, s.warn_3_cron);
        assert_ne!(s.warn_3_cron, s.warn_1_cron);
    }
}
