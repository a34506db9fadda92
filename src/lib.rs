//! spinledger - Slot round settlement over an append-only balance ledger

pub mod config;
pub mod error;
pub mod services;
pub mod types;

// Re-export commonly used types
pub use error::{Result, SettlementError};
pub use services::{
    BalanceLedger, BoardGenerator, BoardSource, IdGenerator, PaylineEvaluator, SettlementService,
    SqliteStore,
};
pub use types::*;
