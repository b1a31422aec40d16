//! Error types for Reelpass
//!
//! All errors in the application are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.
//! Every variant carries a stable machine-readable `code` so clients
//! can tell a paywall from a broken link.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// Application-wide error type
///
/// Ledger and entitlement errors are terminal for the call that raised
/// them: nothing has been applied and nothing is retried.
#[derive(Debug, Error)]
pub enum AppError {
    /// Authentication required (401)
    #[error("Authentication required")]
    Unauthorized,

    /// Signature verification failed (401)
    #[error("Invalid signature")]
    InvalidSignature,

    /// Access denied (403)
    #[error("Access denied")]
    Forbidden,

    /// Content, episode, plan or other resource missing (404)
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Balance does not cover the debit (402)
    #[error("Insufficient balance: {balance} available, {required} required")]
    InsufficientFunds { balance: Decimal, required: Decimal },

    /// Device cap reached for this entitlement (409)
    #[error("Device limit reached: at most {max_devices} devices may stream this content")]
    DeviceLimitReached { max_devices: i64 },

    /// Purchase or membership lapsed (410)
    #[error("Entitlement expired")]
    Expired,

    /// Duplicate purchase while a non-expired one exists (409)
    #[error("Purchase already active until {expires_at}")]
    AlreadyActive { expires_at: DateTime<Utc> },

    /// Malformed amount, identifier or request (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session signing error (500)
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable error code exposed to clients
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized | AppError::InvalidSignature => "UNAUTHENTICATED",
            AppError::Forbidden => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            AppError::DeviceLimitReached { .. } => "DEVICE_LIMIT_REACHED",
            AppError::Expired => "EXPIRED",
            AppError::AlreadyActive { .. } => "ALREADY_ACTIVE",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Database(_) => "DATABASE",
            AppError::Config(_) => "CONFIG",
            AppError::Encryption(_) => "ENCRYPTION",
            AppError::Internal(_) => "INTERNAL",
        }
    }

    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized | AppError::InvalidSignature => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
            AppError::DeviceLimitReached { .. } | AppError::AlreadyActive { .. } => {
                StatusCode::CONFLICT
            }
            AppError::Expired => StatusCode::GONE,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Database(_)
            | AppError::Config(_)
            | AppError::Encryption(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Server-side failures are logged and replaced with a generic
    /// message so database details never reach the client.
    fn into_response(self) -> Response {
        use axum::Json;

        let status = self.status();
        let code = self.code();
        let message = match &self {
            AppError::Database(error) => {
                tracing::error!(%error, "database error while handling request");
                "Database error".to_string()
            }
            AppError::Internal(error) => {
                tracing::error!(%error, "internal error while handling request");
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        crate::metrics::ERRORS_TOTAL.with_label_values(&[code]).inc();

        let body = Json(serde_json::json!({
            "error": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
