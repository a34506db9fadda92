use crate::types::{Amount, BalanceKind, TransactionKind};
use thiserror::Error;

/// Settlement core errors.
#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("Invalid amount: {0} (must be positive)")]
    InvalidAmount(Amount),

    #[error("Insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: Amount, available: Amount },

    #[error("User not found: {0}")]
    UserNotFound(i64),

    #[error("Clock moved backward: last id at {last} ms, now {now} ms")]
    ClockMovedBackward { last: i64, now: i64 },

    #[error("Invalid worker id {0} (must be 0-1023)")]
    InvalidWorkerId(u16),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Ledger entry {entry} cannot be posted as {kind}")]
    MismatchedEntry { entry: TransactionKind, kind: BalanceKind },

    #[error("Invalid game type: {0:?}")]
    InvalidGameType(String),

    #[error("Settlement aborted: {0}")]
    SettlementAborted(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for SettlementError {
    fn from(e: rusqlite::Error) -> Self {
        SettlementError::Database(e.to_string())
    }
}

impl SettlementError {
    /// Collapse infrastructure failures raised mid-round into `SettlementAborted`.
    /// Domain errors pass through so callers can still match on them.
    pub fn into_aborted(self) -> Self {
        match self {
            SettlementError::Database(msg) => SettlementError::SettlementAborted(msg),
            SettlementError::Serialization(e) => SettlementError::SettlementAborted(e.to_string()),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, SettlementError>;
