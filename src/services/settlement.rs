//! Settlement Service
//!
//! Runs one round end to end: stake the bet, draw a board, score it, record
//! the order and credit any winnings. All of it happens in one IMMEDIATE
//! transaction, so a round either lands completely or leaves no trace.
//!
//! Settled orders are cached in a DashMap keyed by their external id. The cache
//! holds at most `order_cache_capacity` orders and drops the oldest insert first.

use crate::error::{Result, SettlementError};
use crate::services::board_generator::BoardSource;
use crate::services::clock::{Clock, SystemClock};
use crate::services::id_generator::{parse_id, IdGenerator};
use crate::services::ledger::{normalize_page, BalanceLedger};
use crate::services::payline::PaylineEvaluator;
use crate::services::SqliteStore;
use crate::types::{
    Amount, BalancePage, BalanceRecord, LedgerSummary, Order, OrderAudit, OrderPage,
    TransactionKind,
};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Settlement tuning.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Wall time one round may take before it is abandoned
    pub deadline: Duration,
    /// Most orders kept in memory; 0 disables the cache
    pub order_cache_capacity: usize,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(5),
            order_cache_capacity: 10_000,
        }
    }
}

/// Round settlement coordinator.
pub struct SettlementService {
    store: Arc<SqliteStore>,
    ledger: BalanceLedger,
    ids: Arc<IdGenerator>,
    boards: Arc<dyn BoardSource>,
    evaluator: PaylineEvaluator,
    clock: Arc<dyn Clock>,
    config: SettlementConfig,
    /// Settled orders (order_id -> Order)
    orders: DashMap<String, Order>,
    /// Cache keys in insertion order, for eviction
    cache_keys: Mutex<VecDeque<String>>,
}

impl SettlementService {
    pub fn new(
        store: Arc<SqliteStore>,
        ids: Arc<IdGenerator>,
        boards: Arc<dyn BoardSource>,
        evaluator: PaylineEvaluator,
    ) -> Self {
        Self::with_config(store, ids, boards, evaluator, SettlementConfig::default())
    }

    pub fn with_config(
        store: Arc<SqliteStore>,
        ids: Arc<IdGenerator>,
        boards: Arc<dyn BoardSource>,
        evaluator: PaylineEvaluator,
        config: SettlementConfig,
    ) -> Self {
        Self::with_clock(store, ids, boards, evaluator, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<SqliteStore>,
        ids: Arc<IdGenerator>,
        boards: Arc<dyn BoardSource>,
        evaluator: PaylineEvaluator,
        config: SettlementConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ledger = BalanceLedger::with_clock(store.clone(), ids.clone(), clock.clone());
        Self {
            store,
            ledger,
            ids,
            boards,
            evaluator,
            clock,
            config,
            orders: DashMap::new(),
            cache_keys: Mutex::new(VecDeque::new()),
        }
    }

    pub fn ledger(&self) -> &BalanceLedger {
        &self.ledger
    }

    // ==========================================================================
    // Rounds
    // ==========================================================================

    /// Settle one round for `user_id`.
    ///
    /// Returns the completed order and the ledger rows it produced: the bet
    /// deduction, then the win credit if the board paid. On any error nothing
    /// is persisted.
    pub fn create_order_with_balance(
        &self,
        user_id: i64,
        bet_amount: Amount,
        game_type: &str,
    ) -> Result<(Order, Vec<BalanceRecord>)> {
        if game_type.trim().is_empty() {
            return Err(SettlementError::InvalidGameType(game_type.to_string()));
        }

        let started = Instant::now();
        let outcome = self.store.with_transaction(|tx| {
            let bet = self
                .ledger
                .deduct_balance(tx, user_id, bet_amount, TransactionKind::Bet)?;
            self.check_deadline(started)?;

            let order_id = self.ids.next_id()?;
            let board = self.boards.next_board();
            let result = self.evaluator.check_win(&board);
            let win_amount = result.total_win(bet_amount);
            self.check_deadline(started)?;

            let mut order = Order::pending(
                order_id,
                user_id,
                game_type,
                bet_amount,
                win_amount,
                serde_json::to_value(&result)?,
                self.clock.now_millis(),
            );
            order.balance_record_ids.push(bet.id);
            SqliteStore::insert_order(tx, &order)?;

            let mut records = vec![bet];
            if win_amount.is_positive() {
                let win = self
                    .ledger
                    .add_balance(tx, user_id, win_amount, TransactionKind::Win)?;
                order.balance_record_ids.push(win.id);
                records.push(win);
            }
            self.check_deadline(started)?;

            order.complete(self.clock.now_millis());
            SqliteStore::update_order(tx, &order)?;
            Ok((order, records))
        });

        match outcome {
            Ok((order, records)) => {
                info!(
                    "Settled order {} for user {}: bet {}, won {}",
                    order.order_id, user_id, order.bet_amount, order.win_amount
                );
                self.cache(&order);
                Ok((order, records))
            }
            Err(e) => {
                let e = e.into_aborted();
                warn!("Round for user {} rolled back: {}", user_id, e);
                Err(e)
            }
        }
    }

    fn check_deadline(&self, started: Instant) -> Result<()> {
        let elapsed = started.elapsed();
        if elapsed > self.config.deadline {
            return Err(SettlementError::SettlementAborted(format!(
                "deadline of {} ms exceeded after {} ms",
                self.config.deadline.as_millis(),
                elapsed.as_millis()
            )));
        }
        Ok(())
    }

    // ==========================================================================
    // Orders
    // ==========================================================================

    pub fn get_order(&self, order_id: &str) -> Result<Order> {
        if let Some(order) = self.orders.get(order_id) {
            return Ok(order.clone());
        }

        let order = self
            .store
            .get_order(order_id)?
            .ok_or_else(|| SettlementError::NotFound(format!("order {}", order_id)))?;
        self.cache(&order);
        Ok(order)
    }

    /// Number of orders currently held in memory.
    pub fn cached_orders(&self) -> usize {
        self.orders.len()
    }

    fn cache(&self, order: &Order) {
        let capacity = self.config.order_cache_capacity;
        if capacity == 0 {
            return;
        }

        let key = order.external_id();
        if self.orders.insert(key.clone(), order.clone()).is_some() {
            return;
        }

        let mut keys = self.cache_keys.lock().unwrap_or_else(PoisonError::into_inner);
        keys.push_back(key);
        while keys.len() > capacity {
            if let Some(oldest) = keys.pop_front() {
                self.orders.remove(&oldest);
            }
        }
    }

    /// One page of the user's orders, newest first.
    pub fn get_user_orders(&self, user_id: i64, page: u32, page_size: u32) -> Result<OrderPage> {
        let (page, page_size) = normalize_page(page, page_size);
        let offset = u64::from(page - 1) * u64::from(page_size);

        Ok(OrderPage {
            total: self.store.count_user_orders(user_id)?,
            orders: self.store.get_user_orders(user_id, page_size, offset)?,
            page,
            page_size,
        })
    }

    /// Re-read the ledger rows an order points at and compare them with the
    /// order's own bet and win amounts.
    pub fn audit_order(&self, order_id: &str) -> Result<OrderAudit> {
        let order = self.get_order(order_id)?;
        let records = self.store.get_balance_records_by_ids(&order.balance_record_ids)?;

        let missing_record_ids = order
            .balance_record_ids
            .iter()
            .copied()
            .filter(|id| !records.iter().any(|r| r.id == *id))
            .collect();
        let recorded_net = records.iter().map(BalanceRecord::signed_amount).sum();
        let parts = parse_id(order.order_id);

        Ok(OrderAudit {
            order_id: order.order_id,
            status: order.status,
            expected_net: order.net_amount(),
            recorded_net,
            records,
            missing_record_ids,
            worker_id: parts.worker_id,
            allocated_at: parts.timestamp_millis,
        })
    }

    // ==========================================================================
    // Balance pass-throughs
    // ==========================================================================

    pub fn get_user_balance(&self, user_id: i64) -> Result<Amount> {
        self.ledger.get_user_balance(user_id)
    }

    pub fn get_balance_records(&self, user_id: i64, page: u32, page_size: u32) -> Result<BalancePage> {
        self.ledger.get_balance_records(user_id, page, page_size)
    }

    pub fn get_summary(&self, user_id: i64) -> Result<LedgerSummary> {
        self.ledger.get_summary(user_id)
    }
}
