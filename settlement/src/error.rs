//! Error types for the settlement engine

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Caller input rejected
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transaction, wallet or asset missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// External provider failed before any funds moved
    #[error("Provider error: {0}")]
    Provider(String),

    /// Webhook did not match any actionable state
    #[error("Reconciliation error: {0}")]
    Reconciliation(String),

    /// Provider succeeded but the ledger could not be written
    #[error("Consistency failure: {0}")]
    ConsistencyFailure(String),

    /// Illegal state machine move
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// PIN did not verify; the transaction is unchanged
    #[error("Invalid transaction pin")]
    PinRejected,

    /// Risk decision refused the operation
    #[error("Operation blocked by risk policy")]
    RiskBlocked,

    /// Tracked balance below the required total
    #[error("Insufficient balance: need {needed}, have {available}")]
    InsufficientBalance {
        /// Amount required
        needed: Decimal,
        /// Amount tracked
        available: Decimal,
    },

    /// Unique index violation
    #[error("Duplicate: {0}")]
    Duplicate(String),

    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// Adapter error
    #[error("Adapter error: {0}")]
    Adapter(#[from] adapters::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Provider call failure
    pub fn provider(err: adapters::Error) -> Self {
        Error::Provider(err.to_string())
    }

    /// Outcomes webhook entry points log and drop instead of returning
    pub fn is_swallowed(&self) -> bool {
        matches!(self, Error::Reconciliation(_))
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Error::Validation(err.to_string())
    }
}
