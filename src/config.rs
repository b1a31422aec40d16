//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub access: AccessConfig,
    pub ledger: LedgerConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "watch.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the service
    ///
    /// # Returns
    /// Full URL like "https://watch.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Session token configuration
///
/// Identity is issued elsewhere; this service only verifies
/// HMAC-signed session tokens.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Session secret key (32+ bytes)
    pub session_secret: String,
    /// Session max age in seconds (default: 604800 = 7 days)
    pub session_max_age: i64,
}

/// Entitlement evaluation settings
#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    /// A device counts against the cap if it was active within this window
    /// (default: 2592000 = 30 days)
    pub device_session_window_seconds: i64,
}

impl AccessConfig {
    pub fn device_session_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.device_session_window_seconds)
    }
}

/// Wallet ledger settings
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Currency wallet balances are held in (default: "USD")
    pub default_currency: String,
    /// Interval of the read-only reconciliation audit; 0 disables it
    pub audit_interval_seconds: u64,
    /// Upper bound for a single ledger operation, in currency units
    pub max_transaction_amount: rust_decimal::Decimal,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (REELPASS__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.domain", "localhost")?
            .set_default("server.protocol", "http")?
            .set_default("database.path", "data/reelpass.db")?
            .set_default("auth.session_max_age", 604800)?
            .set_default("access.device_session_window_seconds", 2_592_000)?
            .set_default("ledger.default_currency", "USD")?
            .set_default("ledger.audit_interval_seconds", 0)?
            .set_default("ledger.max_transaction_amount", "100000")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("REELPASS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub(crate) fn validate(&self) -> Result<(), crate::error::AppError> {
        const MIN_SESSION_SECRET_BYTES: usize = 32;

        if self.auth.session_secret.as_bytes().len() < MIN_SESSION_SECRET_BYTES {
            return Err(crate::error::AppError::Config(format!(
                "auth.session_secret must be at least {} bytes",
                MIN_SESSION_SECRET_BYTES
            )));
        }

        if self.auth.session_max_age <= 0 {
            return Err(crate::error::AppError::Config(
                "auth.session_max_age must be greater than 0".to_string(),
            ));
        }

        if self.access.device_session_window_seconds <= 0 {
            return Err(crate::error::AppError::Config(
                "access.device_session_window_seconds must be greater than 0".to_string(),
            ));
        }

        let currency = self.ledger.default_currency.as_str();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(crate::error::AppError::Config(
                "ledger.default_currency must be a 3-letter uppercase code".to_string(),
            ));
        }

        if self.ledger.max_transaction_amount <= rust_decimal::Decimal::ZERO {
            return Err(crate::error::AppError::Config(
                "ledger.max_transaction_amount must be greater than 0".to_string(),
            ));
        }

        if !self.server.protocol.eq_ignore_ascii_case("https") {
            tracing::warn!(
                domain = %self.server.domain,
                protocol = %self.server.protocol,
                "Serving over plain http; session tokens are sent in clear text"
            );
        }

        Ok(())
    }
}
