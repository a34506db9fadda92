//! SQLite persistence for accounts, the balance ledger and settled orders.
//!
//! All writes go through [`SqliteStore::with_transaction`], which holds the
//! writer connection for the whole unit of work and opens the transaction with
//! `BEGIN IMMEDIATE`. SQLite has no row locks; the immediate transaction takes
//! the database write lock up front, so a read-then-update of a balance inside
//! it cannot interleave with another writer.
//!
//! File-backed stores run in WAL mode and serve reads from a second, read-only
//! connection, so queries see the last committed state without waiting for an
//! in-flight round. An in-memory database cannot be shared between
//! connections; there reads go through the writer.
//!
//! The helpers that take a `&Connection` are meant to be called with the
//! transaction handed to the closure (`Transaction` derefs to `Connection`).

use crate::error::{Result, SettlementError};
use crate::types::{
    Account, Amount, BalanceKind, BalanceRecord, Order, OrderStatus, TransactionKind,
};
use rusqlite::types::Type;
use rusqlite::{
    params, Connection, OpenFlags, OptionalExtension, Row, Transaction, TransactionBehavior,
};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

const RECORD_COLUMNS: &str = "id, user_id, kind, category, amount, before_balance, after_balance,
     before_frozen, after_frozen, description, reference_id, created_at";

const ORDER_COLUMNS: &str = "order_id, user_id, game_type, status, bet_amount, win_amount,
     game_result, balance_record_ids, created_at, completed_at";

/// SQLite store for the settlement core.
pub struct SqliteStore {
    writer: Mutex<Connection>,
    /// Read-only WAL connection (file-backed stores only)
    reader: Option<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub fn new<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        let writer = Connection::open(path)?;
        writer.busy_timeout(busy_timeout)?;
        let mode: String =
            writer.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("SQLite journal mode: {}", mode);

        let mut store = Self {
            writer: Mutex::new(writer),
            reader: None,
        };
        store.init_schema()?;

        // Opened after the schema exists; read-only connections cannot create it
        let reader = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        reader.busy_timeout(busy_timeout)?;
        store.reader = Some(Mutex::new(reader));

        info!("SQLite store initialized at {}", path.display());
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            writer: Mutex::new(conn),
            reader: None,
        };
        store.init_schema()?;
        debug!("In-memory SQLite store initialized");
        Ok(store)
    }

    /// Whether reads are served from their own connection.
    pub fn has_reader(&self) -> bool {
        self.reader.is_some()
    }

    // A panic inside a transaction closure drops the `Transaction`, which rolls
    // it back; the connection behind a poisoned lock is still consistent.
    fn writer(&self) -> MutexGuard<'_, Connection> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reader(&self) -> MutexGuard<'_, Connection> {
        match &self.reader {
            Some(reader) => reader.lock().unwrap_or_else(PoisonError::into_inner),
            None => self.writer(),
        }
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<()> {
        let conn = self.writer();

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS accounts (
                user_id INTEGER PRIMARY KEY AUTOINCREMENT,
                balance INTEGER NOT NULL CHECK (balance >= 0),
                frozen_balance INTEGER NOT NULL DEFAULT 0 CHECK (frozen_balance >= 0),
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS balance_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES accounts(user_id),
                kind TEXT NOT NULL,
                category TEXT NOT NULL,
                amount INTEGER NOT NULL CHECK (amount > 0),
                before_balance INTEGER NOT NULL,
                after_balance INTEGER NOT NULL CHECK (after_balance >= 0),
                before_frozen INTEGER NOT NULL,
                after_frozen INTEGER NOT NULL,
                description TEXT NOT NULL,
                reference_id TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_balance_records_user_created
                ON balance_records(user_id, created_at DESC, id DESC);

            CREATE TRIGGER IF NOT EXISTS balance_records_no_update
                BEFORE UPDATE ON balance_records
                BEGIN SELECT RAISE(ABORT, 'balance records are append-only'); END;

            CREATE TRIGGER IF NOT EXISTS balance_records_no_delete
                BEFORE DELETE ON balance_records
                BEGIN SELECT RAISE(ABORT, 'balance records are append-only'); END;

            CREATE TABLE IF NOT EXISTS orders (
                order_id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES accounts(user_id),
                game_type TEXT NOT NULL,
                status TEXT NOT NULL,
                bet_amount INTEGER NOT NULL,
                win_amount INTEGER NOT NULL,
                game_result TEXT NOT NULL,
                balance_record_ids TEXT NOT NULL DEFAULT '[]',
                created_at INTEGER NOT NULL,
                completed_at INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_orders_user_created
                ON orders(user_id, created_at DESC);",
        )?;

        debug!("SQLite schema initialized");
        Ok(())
    }

    // ========== Transactions ==========

    /// Run `f` inside one immediate transaction.
    ///
    /// Commits when `f` returns `Ok`; any `Err` (or a failed commit) rolls the
    /// whole unit back and is returned unchanged.
    pub fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.writer();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                // Dropping the transaction rolls it back
                drop(tx);
                debug!("Transaction rolled back: {}", e);
                Err(e)
            }
        }
    }

    // ========== Account Methods (inside a transaction) ==========

    /// Insert a new account with the given balance.
    pub fn insert_account(conn: &Connection, balance: Amount, now: i64) -> Result<Account> {
        conn.execute(
            "INSERT INTO accounts (balance, frozen_balance, created_at, updated_at)
             VALUES (?1, 0, ?2, ?2)",
            params![balance.minor(), now],
        )?;

        Ok(Account {
            user_id: conn.last_insert_rowid(),
            balance,
            frozen_balance: Amount::ZERO,
            created_at: now,
            updated_at: now,
        })
    }

    /// Read an account for update. Call with the open transaction.
    pub fn lock_account(conn: &Connection, user_id: i64) -> Result<Option<Account>> {
        Ok(conn
            .query_row(
                "SELECT user_id, balance, frozen_balance, created_at, updated_at
                 FROM accounts WHERE user_id = ?1",
                params![user_id],
                map_account,
            )
            .optional()?)
    }

    pub fn update_account_balance(
        conn: &Connection,
        user_id: i64,
        balance: Amount,
        now: i64,
    ) -> Result<()> {
        let updated = conn.execute(
            "UPDATE accounts SET balance = ?1, updated_at = ?2 WHERE user_id = ?3",
            params![balance.minor(), now, user_id],
        )?;
        if updated == 0 {
            return Err(SettlementError::UserNotFound(user_id));
        }
        Ok(())
    }

    /// Append a ledger row, returning its id.
    pub fn insert_balance_record(conn: &Connection, record: &BalanceRecord) -> Result<i64> {
        conn.execute(
            "INSERT INTO balance_records
             (user_id, kind, category, amount, before_balance, after_balance,
              before_frozen, after_frozen, description, reference_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.user_id,
                record.kind.as_str(),
                record.category.as_str(),
                record.amount.minor(),
                record.before_balance.minor(),
                record.after_balance.minor(),
                record.before_frozen.minor(),
                record.after_frozen.minor(),
                record.description,
                record.reference_id,
                record.created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    // ========== Order Methods (inside a transaction) ==========

    pub fn insert_order(conn: &Connection, order: &Order) -> Result<()> {
        conn.execute(
            "INSERT INTO orders
             (order_id, user_id, game_type, status, bet_amount, win_amount,
              game_result, balance_record_ids, created_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                order.external_id(),
                order.user_id,
                order.game_type,
                order.status.as_str(),
                order.bet_amount.minor(),
                order.win_amount.minor(),
                serde_json::to_string(&order.game_result)?,
                serde_json::to_string(&order.balance_record_ids)?,
                order.created_at,
                order.completed_at,
            ],
        )?;
        Ok(())
    }

    pub fn update_order(conn: &Connection, order: &Order) -> Result<()> {
        let updated = conn.execute(
            "UPDATE orders SET status = ?1, win_amount = ?2, balance_record_ids = ?3,
                completed_at = ?4
             WHERE order_id = ?5",
            params![
                order.status.as_str(),
                order.win_amount.minor(),
                serde_json::to_string(&order.balance_record_ids)?,
                order.completed_at,
                order.external_id(),
            ],
        )?;
        if updated == 0 {
            return Err(SettlementError::NotFound(format!("order {}", order.order_id)));
        }
        Ok(())
    }

    // ========== Read Methods ==========

    /// Get an account outside any transaction, from the last committed state.
    pub fn get_account(&self, user_id: i64) -> Result<Option<Account>> {
        let conn = self.reader();
        Self::lock_account(&conn, user_id)
    }

    /// Ledger rows for a user, newest first.
    pub fn get_balance_records(
        &self,
        user_id: i64,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<BalanceRecord>> {
        let conn = self.reader();
        let sql = format!(
            "SELECT {} FROM balance_records
             WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2 OFFSET ?3",
            RECORD_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![user_id, limit, offset as i64], map_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn count_balance_records(&self, user_id: i64) -> Result<u64> {
        let conn = self.reader();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM balance_records WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Ledger rows by id, in the order the ids were given. Missing ids are skipped.
    pub fn get_balance_records_by_ids(&self, ids: &[i64]) -> Result<Vec<BalanceRecord>> {
        let conn = self.reader();
        let sql = format!("SELECT {} FROM balance_records WHERE id = ?1", RECORD_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = stmt.query_row(params![*id], map_record).optional()? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// `(category, summed amount, row count)` for a user's ledger.
    pub fn ledger_totals(&self, user_id: i64) -> Result<Vec<(TransactionKind, Amount, u64)>> {
        let conn = self.reader();
        let mut stmt = conn.prepare(
            "SELECT category, COALESCE(SUM(amount), 0), COUNT(*)
             FROM balance_records
             WHERE user_id = ?1
             GROUP BY category",
        )?;
        let totals = stmt
            .query_map(params![user_id], |row| {
                let category: String = row.get(0)?;
                Ok((
                    parse_column(0, &category, TransactionKind::parse)?,
                    Amount::from_minor(row.get(1)?),
                    row.get::<_, i64>(2)? as u64,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(totals)
    }

    /// Get an order by its external id.
    pub fn get_order(&self, order_id: &str) -> Result<Option<Order>> {
        let conn = self.reader();
        let sql = format!("SELECT {} FROM orders WHERE order_id = ?1", ORDER_COLUMNS);
        Ok(conn.query_row(&sql, params![order_id], map_order).optional()?)
    }

    /// Orders for a user, newest first.
    pub fn get_user_orders(&self, user_id: i64, limit: u32, offset: u64) -> Result<Vec<Order>> {
        let conn = self.reader();
        let sql = format!(
            "SELECT {} FROM orders
             WHERE user_id = ?1
             ORDER BY created_at DESC, order_id DESC
             LIMIT ?2 OFFSET ?3",
            ORDER_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let orders = stmt
            .query_map(params![user_id, limit, offset as i64], map_order)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(orders)
    }

    pub fn count_user_orders(&self, user_id: i64) -> Result<u64> {
        let conn = self.reader();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM orders WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

// ========== Row Mapping ==========

fn map_account(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        user_id: row.get(0)?,
        balance: Amount::from_minor(row.get(1)?),
        frozen_balance: Amount::from_minor(row.get(2)?),
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn map_record(row: &Row<'_>) -> rusqlite::Result<BalanceRecord> {
    let kind: String = row.get(2)?;
    let category: String = row.get(3)?;
    Ok(BalanceRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: parse_column(2, &kind, BalanceKind::parse)?,
        category: parse_column(3, &category, TransactionKind::parse)?,
        amount: Amount::from_minor(row.get(4)?),
        before_balance: Amount::from_minor(row.get(5)?),
        after_balance: Amount::from_minor(row.get(6)?),
        before_frozen: Amount::from_minor(row.get(7)?),
        after_frozen: Amount::from_minor(row.get(8)?),
        description: row.get(9)?,
        reference_id: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn map_order(row: &Row<'_>) -> rusqlite::Result<Order> {
    let order_id: String = row.get(0)?;
    let status: String = row.get(3)?;
    let game_result: String = row.get(6)?;
    let record_ids: String = row.get(7)?;
    Ok(Order {
        order_id: parse_column(0, &order_id, |s| s.parse().ok())?,
        user_id: row.get(1)?,
        game_type: row.get(2)?,
        status: parse_column(3, &status, OrderStatus::parse)?,
        bet_amount: Amount::from_minor(row.get(4)?),
        win_amount: Amount::from_minor(row.get(5)?),
        game_result: parse_column(6, &game_result, |s| serde_json::from_str(s).ok())?,
        balance_record_ids: parse_column(7, &record_ids, |s| serde_json::from_str(s).ok())?,
        created_at: row.get(8)?,
        completed_at: row.get(9)?,
    })
}

fn parse_column<T>(idx: usize, value: &str, parse: impl Fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    parse(value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unexpected value {:?}", value).into(),
        )
    })
}
