use sqlx::migrate::MigrateError;
use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for the ledger and scheduler
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrateError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid settlement config: {0}")]
    InvalidConfig(String),

    #[error("Insufficient pending funds for {merchant_id}/{currency}: requested {requested}")]
    InsufficientPendingFunds {
        merchant_id: Uuid,
        currency: String,
        requested: i64,
    },

    #[error("Insufficient available funds for {merchant_id}/{currency}: requested {requested}")]
    InsufficientAvailableFunds {
        merchant_id: Uuid,
        currency: String,
        requested: i64,
    },

    #[error("Balance overflow for {merchant_id}/{currency}")]
    BalanceOverflow { merchant_id: Uuid, currency: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse classification the driver branches on when deciding to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input or malformed policy. Never retried.
    Validation,
    /// Expected business outcome: not enough pending/available funds.
    InsufficientFunds,
    /// Store unreachable, timed out or asked us to retry. Safe to retry the whole call.
    Transient,
    Fatal,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InvalidInput(_)
            | AppError::InvalidConfig(_)
            | AppError::BalanceOverflow { .. } => ErrorKind::Validation,
            AppError::InsufficientPendingFunds { .. }
            | AppError::InsufficientAvailableFunds { .. } => ErrorKind::InsufficientFunds,
            AppError::Database(e) if is_transient_sqlx(e) => ErrorKind::Transient,
            _ => ErrorKind::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn is_insufficient_funds(&self) -> bool {
        self.kind() == ErrorKind::InsufficientFunds
    }
}

// serialization_failure / deadlock_detected
const RETRYABLE_SQLSTATES: [&str; 2] = ["40001", "40P01"];

fn is_transient_sqlx(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| RETRYABLE_SQLSTATES.iter().any(|retryable| *retryable == code))
            .unwrap_or(false),
        _ => false,
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .into_iter()
            .map(|(field, errors)| {
                let codes: Vec<String> = errors
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .collect();
                format!("{}: {}", field, codes.join(", "))
            })
            .collect::<Vec<String>>()
            .join("; ");

        AppError::InvalidInput(format!("Validation failed: {}", message))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
