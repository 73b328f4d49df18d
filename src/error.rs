use sqlx::migrate::MigrateError;
use thiserror::Error;

/// Top-level error type for persistence, configuration and wiring
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

/// Errors raised while talking to the benefits-administration platform
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("{operation} rejected with HTTP {status}")]
    Rejected { operation: &'static str, status: u16 },

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("Wallet {0} has no employee id at the benefits platform")]
    MissingEmployeeId(i64),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(error: reqwest::Error) -> Self {
        GatewayError::Transport(format!("HTTP request error: {:?}", error))
    }
}

/// Errors raised by the eligibility service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EligibilityError {
    #[error("Eligibility lookup timed out")]
    Timeout,

    #[error("Eligibility service returned HTTP {0}")]
    Unavailable(u16),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for EligibilityError {
    fn from(error: reqwest::Error) -> Self {
        EligibilityError::Transport(format!("HTTP request error: {:?}", error))
    }
}

/// Errors produced by the reconciliation engine.
///
/// `Precondition` and `Data` need a human; the others are expected to clear on the next
/// scheduled pass. Unreconcilable wallet states are escalated, not returned as errors.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Persistence failure: {0}")]
    Persistence(#[from] AppError),

    #[error("Benefits gateway failure: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Eligibility failure: {0}")]
    Eligibility(#[from] EligibilityError),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Inconsistent wallet data: {0}")]
    Data(String),
}

impl ReconcileError {
    /// Stable label used as the `error_kind` log field
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::Persistence(_) => "persistence",
            ReconcileError::Gateway(_) => "gateway",
            ReconcileError::Eligibility(_) => "eligibility",
            ReconcileError::Precondition(_) => "precondition",
            ReconcileError::Data(_) => "data",
        }
    }

    /// Whether the next scheduled pass is expected to succeed without human action
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReconcileError::Persistence(_)
                | ReconcileError::Gateway(_)
                | ReconcileError::Eligibility(_)
        )
    }
}

impl From<sqlx::Error> for ReconcileError {
    fn from(error: sqlx::Error) -> Self {
        ReconcileError::Persistence(AppError::Database(error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for the reconciliation engine
pub type ReconcileResult<T> = Result<T, ReconcileError>;
