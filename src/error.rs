use crate::database::DatabaseError;
use crate::ledger::LedgerError;
use crate::oracle::OracleError;
use crate::services::payout::PayoutError;
use crate::solana_client::GatewayError;
use serde::{Deserialize, Serialize};
use sqlx::Error as SqlxError;
use std::fmt;
use thiserror::Error;

/// Stable machine-readable rejection codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    ValidationError,
    PoolNotFound,
    BetNotFound,
    PoolNotJoining,
    DepositClosed,
    BetExists,
    TxAlreadyUsed,
    TxSignerMismatch,
    TxNotFound,
    TxFailed,
    NoTransferFound,
    PoolNotClaimable,
    NotWinner,
    AlreadyClaimed,
    ClaimInProgress,
    ZeroPayout,
    ConfigError,
    OracleUnavailable,
    LedgerUnavailable,
    InternalError,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::ValidationError => "VALIDATION_ERROR",
            ReasonCode::PoolNotFound => "POOL_NOT_FOUND",
            ReasonCode::BetNotFound => "BET_NOT_FOUND",
            ReasonCode::PoolNotJoining => "POOL_NOT_JOINING",
            ReasonCode::DepositClosed => "DEPOSIT_CLOSED",
            ReasonCode::BetExists => "BET_EXISTS",
            ReasonCode::TxAlreadyUsed => "TX_ALREADY_USED",
            ReasonCode::TxSignerMismatch => "TX_SIGNER_MISMATCH",
            ReasonCode::TxNotFound => "TX_NOT_FOUND",
            ReasonCode::TxFailed => "TX_FAILED",
            ReasonCode::NoTransferFound => "NO_TRANSFER_FOUND",
            ReasonCode::PoolNotClaimable => "POOL_NOT_CLAIMABLE",
            ReasonCode::NotWinner => "NOT_WINNER",
            ReasonCode::AlreadyClaimed => "ALREADY_CLAIMED",
            ReasonCode::ClaimInProgress => "CLAIM_IN_PROGRESS",
            ReasonCode::ZeroPayout => "ZERO_PAYOUT",
            ReasonCode::ConfigError => "CONFIG_ERROR",
            ReasonCode::OracleUnavailable => "ORACLE_UNAVAILABLE",
            ReasonCode::LedgerUnavailable => "LEDGER_UNAVAILABLE",
            ReasonCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReasonCode::TxNotFound
                | ReasonCode::LedgerUnavailable
                | ReasonCode::OracleUnavailable
                | ReasonCode::ClaimInProgress
        )
    }

    /// HTTP status the surrounding service should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            ReasonCode::ValidationError => 400,
            ReasonCode::PoolNotFound | ReasonCode::BetNotFound | ReasonCode::TxNotFound => 404,
            ReasonCode::PoolNotJoining
            | ReasonCode::DepositClosed
            | ReasonCode::BetExists
            | ReasonCode::TxAlreadyUsed
            | ReasonCode::PoolNotClaimable
            | ReasonCode::NotWinner
            | ReasonCode::AlreadyClaimed
            | ReasonCode::ClaimInProgress => 409,
            ReasonCode::TxSignerMismatch => 403,
            ReasonCode::TxFailed | ReasonCode::NoTransferFound | ReasonCode::ZeroPayout => 422,
            ReasonCode::OracleUnavailable | ReasonCode::LedgerUnavailable => 503,
            ReasonCode::ConfigError | ReasonCode::InternalError => 500,
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application-level error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Database setup errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Pool store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request rejected with a stable reason code
    #[error("{code}: {message}")]
    Rejected { code: ReasonCode, message: String },

    /// Price provider errors
    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    /// Ledger read errors
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// On-chain settlement errors
    #[error("Settlement gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Payout arithmetic out of range
    #[error("Payout error: {0}")]
    Payout(#[from] PayoutError),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Message(String),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn rejected(code: ReasonCode, message: impl Into<String>) -> Self {
        AppError::Rejected {
            code,
            message: message.into(),
        }
    }

    /// Reason code surfaced to callers; unexpected failures collapse to INTERNAL_ERROR
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            AppError::Rejected { code, .. } => *code,
            AppError::Config(_) => ReasonCode::ConfigError,
            AppError::Oracle(_) => ReasonCode::OracleUnavailable,
            AppError::Ledger(_) => ReasonCode::LedgerUnavailable,
            AppError::Gateway(GatewayError::MissingAuthority) => ReasonCode::ConfigError,
            _ => ReasonCode::InternalError,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.reason_code().is_retryable()
    }

    /// Check if error is a database connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            AppError::Database(DatabaseError::PoolCreation(_))
                | AppError::Database(DatabaseError::ConnectionTimeout)
        )
    }

    /// Get HTTP status code for the error
    pub fn status_code(&self) -> u16 {
        self.reason_code().status_code()
    }
}

/// Pool store error types
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database query error
    #[error("Query error: {0}")]
    Query(SqlxError),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Unique constraint hit
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// Constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Stored row could not be mapped back to a model
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate(_))
    }
}

impl From<SqlxError> for StoreError {
    fn from(err: SqlxError) -> Self {
        match &err {
            SqlxError::RowNotFound => StoreError::NotFound("Record not found".to_string()),
            SqlxError::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                match code.as_deref() {
                    // Unique violation
                    Some("23505") => StoreError::Duplicate(db_err.message().to_string()),
                    // Foreign key / check violation
                    Some("23503") | Some("23514") => {
                        StoreError::ConstraintViolation(db_err.message().to_string())
                    }
                    _ => StoreError::Query(err),
                }
            }
            _ => StoreError::Query(err),
        }
    }
}
