//! Balance Ledger
//!
//! Every change to an account's balance goes through here and leaves one
//! append-only `BalanceRecord` with before/after snapshots. Mutations take the
//! caller's open transaction so a settlement can chain several postings and
//! commit or roll them back together.

use crate::error::{Result, SettlementError};
use crate::services::clock::{Clock, SystemClock};
use crate::services::id_generator::IdGenerator;
use crate::services::SqliteStore;
use crate::types::{
    Account, Amount, BalanceKind, BalancePage, BalanceRecord, LedgerSummary, TransactionKind,
};
use rusqlite::Transaction;
use std::sync::Arc;
use tracing::{debug, info};

/// Largest page the ledger will return.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Append-only balance ledger over the SQLite store.
pub struct BalanceLedger {
    store: Arc<SqliteStore>,
    ids: Arc<IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl BalanceLedger {
    pub fn new(store: Arc<SqliteStore>, ids: Arc<IdGenerator>) -> Self {
        Self::with_clock(store, ids, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<SqliteStore>, ids: Arc<IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self { store, ids, clock }
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    // ==========================================================================
    // Postings (inside a transaction)
    // ==========================================================================

    /// Credit `amount` to the user. `entry` must be a crediting kind (`Win`, `Deposit`).
    pub fn add_balance(
        &self,
        tx: &Transaction<'_>,
        user_id: i64,
        amount: Amount,
        entry: TransactionKind,
    ) -> Result<BalanceRecord> {
        self.post(tx, user_id, amount, entry, BalanceKind::Add)
    }

    /// Debit `amount` from the user. `entry` must be a debiting kind (`Bet`, `Withdraw`).
    /// Fails with `InsufficientBalance`, leaving the account untouched, if the
    /// balance does not cover it.
    pub fn deduct_balance(
        &self,
        tx: &Transaction<'_>,
        user_id: i64,
        amount: Amount,
        entry: TransactionKind,
    ) -> Result<BalanceRecord> {
        self.post(tx, user_id, amount, entry, BalanceKind::Deduct)
    }

    fn post(
        &self,
        tx: &Transaction<'_>,
        user_id: i64,
        amount: Amount,
        entry: TransactionKind,
        kind: BalanceKind,
    ) -> Result<BalanceRecord> {
        if !amount.is_positive() {
            return Err(SettlementError::InvalidAmount(amount));
        }
        if entry.direction() != kind {
            return Err(SettlementError::MismatchedEntry { entry, kind });
        }

        let account = SqliteStore::lock_account(tx, user_id)?
            .ok_or(SettlementError::UserNotFound(user_id))?;

        let before = account.balance;
        let after = match kind {
            BalanceKind::Add => before
                .checked_add(amount)
                .ok_or(SettlementError::InvalidAmount(amount))?,
            BalanceKind::Deduct => {
                if before < amount {
                    return Err(SettlementError::InsufficientBalance {
                        needed: amount,
                        available: before,
                    });
                }
                before - amount
            }
        };

        let now = self.clock.now_millis();
        let reference_id = format!("{}_{}_{}", kind, user_id, self.ids.next_id()?);

        SqliteStore::update_account_balance(tx, user_id, after, now)?;

        let mut record = BalanceRecord {
            id: 0,
            user_id,
            kind,
            category: entry,
            amount,
            before_balance: before,
            after_balance: after,
            before_frozen: account.frozen_balance,
            after_frozen: account.frozen_balance,
            description: entry.to_string(),
            reference_id,
            created_at: now,
        };
        record.id = SqliteStore::insert_balance_record(tx, &record)?;

        debug!(
            "Ledger {} {} {} for user {}: {} -> {} ({})",
            record.id, kind, amount, user_id, before, after, record.reference_id
        );
        Ok(record)
    }

    // ==========================================================================
    // Account operations (own transaction)
    // ==========================================================================

    /// Open an account. A positive `initial_balance` is posted as a deposit in
    /// the same transaction so the ledger explains every unit of the balance.
    pub fn open_account(&self, initial_balance: Amount) -> Result<Account> {
        if initial_balance < Amount::ZERO {
            return Err(SettlementError::InvalidAmount(initial_balance));
        }

        let account = self.store.with_transaction(|tx| {
            let now = self.clock.now_millis();
            let mut account = SqliteStore::insert_account(tx, Amount::ZERO, now)?;
            if initial_balance.is_positive() {
                let record =
                    self.add_balance(tx, account.user_id, initial_balance, TransactionKind::Deposit)?;
                account.balance = record.after_balance;
                account.updated_at = record.created_at;
            }
            Ok(account)
        })?;

        info!("Opened account {} with balance {}", account.user_id, account.balance);
        Ok(account)
    }

    pub fn deposit(&self, user_id: i64, amount: Amount) -> Result<BalanceRecord> {
        self.store
            .with_transaction(|tx| self.add_balance(tx, user_id, amount, TransactionKind::Deposit))
    }

    pub fn withdraw(&self, user_id: i64, amount: Amount) -> Result<BalanceRecord> {
        self.store
            .with_transaction(|tx| self.deduct_balance(tx, user_id, amount, TransactionKind::Withdraw))
    }

    // ==========================================================================
    // Queries
    // ==========================================================================

    /// Current balance as of the last commit. File-backed stores answer this
    /// from the read connection without waiting for an in-flight round.
    pub fn get_user_balance(&self, user_id: i64) -> Result<Amount> {
        self.store
            .get_account(user_id)?
            .map(|a| a.balance)
            .ok_or(SettlementError::UserNotFound(user_id))
    }

    pub fn get_account(&self, user_id: i64) -> Result<Account> {
        self.store
            .get_account(user_id)?
            .ok_or(SettlementError::UserNotFound(user_id))
    }

    /// One page of the user's ledger, newest first. `page` is 1-based.
    pub fn get_balance_records(&self, user_id: i64, page: u32, page_size: u32) -> Result<BalancePage> {
        let (page, page_size) = normalize_page(page, page_size);
        let offset = u64::from(page - 1) * u64::from(page_size);

        let total = self.store.count_balance_records(user_id)?;
        let records = self.store.get_balance_records(user_id, page_size, offset)?;

        Ok(BalancePage {
            records,
            total,
            page,
            page_size,
        })
    }

    /// Totals per transaction kind.
    pub fn get_summary(&self, user_id: i64) -> Result<LedgerSummary> {
        let mut summary = LedgerSummary::default();
        for (category, amount, count) in self.store.ledger_totals(user_id)? {
            summary.record(category, amount, count);
        }
        Ok(summary)
    }
}

/// Clamp paging input: page 0 means 1, size is held to `1..=MAX_PAGE_SIZE`.
pub fn normalize_page(page: u32, page_size: u32) -> (u32, u32) {
    (page.max(1), page_size.clamp(1, MAX_PAGE_SIZE))
}
