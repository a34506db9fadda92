//! Round settlement tests
//!
//! Tests cover:
//! - Losing and winning rounds against forced boards
//! - Rollback when the stake cannot be covered, and after the order and win are written
//! - Concurrent rounds for one user and across users
//! - Order DTO shape

use spinledger::services::{
    BoardGenerator, BoardSource, IdGenerator, ManualClock, PaylineEvaluator, SettlementConfig,
    SettlementService, SqliteStore,
};
use spinledger::services::id_generator::EPOCH_MILLIS;
use spinledger::types::*;
use spinledger::SettlementError;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use spinledger::types::Symbol::*;

struct FixedBoard(Board);

impl BoardSource for FixedBoard {
    fn next_board(&self) -> Board {
        self.0
    }
}

fn no_win_board() -> Board {
    Board::new([
        [Cherry, Lemon, Orange],
        [Orange, Cherry, Lemon],
        [Lemon, Orange, Plum],
    ])
}

/// Top row of Orange (2.5x), nothing else lines up.
fn single_orange_line() -> Board {
    Board::new([
        [Orange, Orange, Orange],
        [Cherry, Lemon, Cherry],
        [Lemon, Cherry, Lemon],
    ])
}

fn service_with(boards: Arc<dyn BoardSource>) -> SettlementService {
    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    let ids = Arc::new(IdGenerator::new(1).unwrap());
    let evaluator = PaylineEvaluator::new(Arc::new(SymbolTable::default()));
    SettlementService::new(store, ids, boards, evaluator)
}

// =============================================================================
// Scenarios
// =============================================================================

mod scenario_tests {
    use super::*;

    #[test]
    fn test_losing_round() {
        let service = service_with(Arc::new(FixedBoard(no_win_board())));
        let account = service.ledger().open_account(Amount::from_major(100)).unwrap();

        let (order, records) = service
            .create_order_with_balance(account.user_id, Amount::from_major(10), "classic_3x3")
            .unwrap();

        assert_eq!(order.status, OrderStatus::Completed);
        assert_eq!(order.win_amount, Amount::ZERO);
        assert!(order.completed_at.is_some());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, BalanceKind::Deduct);
        assert_eq!(records[0].category, TransactionKind::Bet);
        assert_eq!(records[0].before_balance, Amount::from_major(100));
        assert_eq!(records[0].after_balance, Amount::from_major(90));
        assert_eq!(order.balance_record_ids, vec![records[0].id]);

        assert_eq!(
            service.get_user_balance(account.user_id).unwrap(),
            Amount::from_major(90)
        );
    }

    #[test]
    fn test_winning_round() {
        let service = service_with(Arc::new(FixedBoard(single_orange_line())));
        let account = service.ledger().open_account(Amount::from_major(100)).unwrap();

        let (order, records) = service
            .create_order_with_balance(account.user_id, Amount::from_major(10), "classic_3x3")
            .unwrap();

        assert_eq!(order.win_amount, Amount::from_major(25));
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].kind, BalanceKind::Deduct);
        assert_eq!(records[0].amount, Amount::from_major(10));
        assert_eq!(records[0].after_balance, Amount::from_major(90));

        assert_eq!(records[1].kind, BalanceKind::Add);
        assert_eq!(records[1].category, TransactionKind::Win);
        assert_eq!(records[1].amount, Amount::from_major(25));
        assert_eq!(records[1].before_balance, Amount::from_major(90));
        assert_eq!(records[1].after_balance, Amount::from_major(115));

        assert_eq!(
            service.get_user_balance(account.user_id).unwrap(),
            Amount::from_major(115)
        );

        let result: RoundResult = serde_json::from_value(order.game_result.clone()).unwrap();
        assert_eq!(result.lines.len(), 1);
        assert_eq!(result.lines[0].symbol, Orange);
        assert_eq!(result.lines[0].kind, LineKind::Horizontal);
        assert_eq!(result.total_payout_multiplier, 2.5);
    }

    #[test]
    fn test_fractional_payout_rounds_to_cents() {
        let service = service_with(Arc::new(FixedBoard(single_orange_line())));
        let account = service.ledger().open_account(Amount::from_major(10)).unwrap();

        // 0.05 x 2.5 = 0.125, rounds half away from zero to 0.13
        let (order, _) = service
            .create_order_with_balance(account.user_id, Amount::from_minor(5), "classic_3x3")
            .unwrap();
        assert_eq!(order.win_amount, Amount::from_minor(13));
        assert_eq!(
            service.get_user_balance(account.user_id).unwrap(),
            Amount::from_minor(1008)
        );
    }

    #[test]
    fn test_insufficient_funds_leaves_no_trace() {
        let service = service_with(Arc::new(FixedBoard(no_win_board())));
        let account = service.ledger().open_account(Amount::from_major(5)).unwrap();

        let result =
            service.create_order_with_balance(account.user_id, Amount::from_major(10), "classic_3x3");
        assert!(matches!(
            result,
            Err(SettlementError::InsufficientBalance { .. })
        ));

        assert_eq!(
            service.get_user_balance(account.user_id).unwrap(),
            Amount::from_major(5)
        );
        assert_eq!(service.get_user_orders(account.user_id, 1, 10).unwrap().total, 0);
        // Only the opening deposit
        assert_eq!(
            service.get_balance_records(account.user_id, 1, 10).unwrap().total,
            1
        );
    }

    #[test]
    fn test_invalid_bet_and_unknown_user() {
        let service = service_with(Arc::new(FixedBoard(no_win_board())));
        let account = service.ledger().open_account(Amount::from_major(5)).unwrap();

        assert!(matches!(
            service.create_order_with_balance(account.user_id, Amount::ZERO, "classic_3x3"),
            Err(SettlementError::InvalidAmount(_))
        ));
        assert!(matches!(
            service.create_order_with_balance(999, Amount::from_major(1), "classic_3x3"),
            Err(SettlementError::UserNotFound(999))
        ));
    }

    #[test]
    fn test_audit_matches_balance_change() {
        let service = service_with(Arc::new(FixedBoard(single_orange_line())));
        let account = service.ledger().open_account(Amount::from_major(100)).unwrap();

        let (order, _) = service
            .create_order_with_balance(account.user_id, Amount::from_major(10), "classic_3x3")
            .unwrap();
        let audit = service.audit_order(&order.external_id()).unwrap();

        assert!(audit.is_consistent());
        assert_eq!(audit.expected_net, Amount::from_major(15));
        assert!(audit.missing_record_ids.is_empty());
        assert_eq!(audit.records.len(), 2);
        assert_eq!(audit.worker_id, 1);
    }
}

// =============================================================================
// Rollback Tests
// =============================================================================

mod rollback_tests {
    use super::*;

    /// Serves a winning board, then steps the shared clock back so the id
    /// for the win credit cannot be allocated.
    struct RewindingBoard {
        clock: Arc<ManualClock>,
    }

    impl BoardSource for RewindingBoard {
        fn next_board(&self) -> Board {
            self.clock.advance(-10);
            single_orange_line()
        }
    }

    #[test]
    fn test_failure_after_order_and_win_rolls_back_everything() {
        let clock = Arc::new(ManualClock::new(EPOCH_MILLIS + 1_000_000));
        let store = Arc::new(SqliteStore::new_in_memory().unwrap());
        let ids = Arc::new(IdGenerator::with_clock(1, clock.clone()).unwrap());
        let service = SettlementService::with_clock(
            store,
            ids,
            Arc::new(RewindingBoard {
                clock: clock.clone(),
            }),
            PaylineEvaluator::new(Arc::new(SymbolTable::default())),
            SettlementConfig::default(),
            clock.clone(),
        );
        let account = service.ledger().open_account(Amount::from_major(100)).unwrap();

        let result =
            service.create_order_with_balance(account.user_id, Amount::from_major(10), "classic_3x3");
        match result {
            Err(SettlementError::ClockMovedBackward { last, now }) => {
                assert_eq!(last, EPOCH_MILLIS + 1_000_000);
                assert_eq!(now, EPOCH_MILLIS + 1_000_000 - 10);
            }
            other => panic!("expected ClockMovedBackward, got {:?}", other),
        }

        // The bet deduction, the pending order row and the win credit are all gone
        assert_eq!(
            service.get_user_balance(account.user_id).unwrap(),
            Amount::from_major(100)
        );
        assert_eq!(service.get_user_orders(account.user_id, 1, 10).unwrap().total, 0);
        let records = service.get_balance_records(account.user_id, 1, 10).unwrap();
        assert_eq!(records.total, 1);
        assert_eq!(records.records[0].category, TransactionKind::Deposit);
        assert_eq!(service.cached_orders(), 0);
    }
}

// =============================================================================
// Concurrency Tests
// =============================================================================

mod concurrency_tests {
    use super::*;

    #[test]
    fn test_same_user_rounds_serialize() {
        let service = Arc::new(service_with(Arc::new(FixedBoard(no_win_board()))));
        let account = service.ledger().open_account(Amount::from_major(100)).unwrap();
        let user_id = account.user_id;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                thread::spawn(move || {
                    for _ in 0..10 {
                        service
                            .create_order_with_balance(user_id, Amount::from_major(1), "classic_3x3")
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(service.get_user_balance(user_id).unwrap(), Amount::from_major(20));

        // Every posting starts where the previous one ended
        let mut records = service.get_balance_records(user_id, 1, 100).unwrap().records;
        assert_eq!(records.len(), 81);
        records.sort_by_key(|r| r.id);
        for pair in records.windows(2) {
            assert_eq!(pair[0].after_balance, pair[1].before_balance);
        }
    }

    #[test]
    fn test_overdraw_race_never_goes_negative() {
        let service = Arc::new(service_with(Arc::new(FixedBoard(no_win_board()))));
        let account = service.ledger().open_account(Amount::from_major(5)).unwrap();
        let user_id = account.user_id;

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let service = service.clone();
                thread::spawn(move || {
                    service
                        .create_order_with_balance(user_id, Amount::from_major(1), "classic_3x3")
                        .is_ok()
                })
            })
            .collect();
        let settled = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(settled, 5);
        assert_eq!(service.get_user_balance(user_id).unwrap(), Amount::ZERO);
        assert_eq!(service.get_user_orders(user_id, 1, 100).unwrap().total, 5);
    }

    #[test]
    fn test_many_users_with_random_boards() {
        let table = Arc::new(SymbolTable::default());
        let store = Arc::new(SqliteStore::new_in_memory().unwrap());
        let ids = Arc::new(IdGenerator::new(2).unwrap());
        let boards = Arc::new(BoardGenerator::seeded(table.clone(), 2024));
        let service = Arc::new(SettlementService::new(
            store,
            ids,
            boards,
            PaylineEvaluator::new(table),
        ));

        let users: Vec<i64> = (0..4)
            .map(|_| {
                service
                    .ledger()
                    .open_account(Amount::from_major(1_000))
                    .unwrap()
                    .user_id
            })
            .collect();

        let handles: Vec<_> = users
            .iter()
            .copied()
            .map(|user_id| {
                let service = service.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        service
                            .create_order_with_balance(user_id, Amount::from_major(1), "classic_3x3")
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for user_id in users {
            let summary = service.get_summary(user_id).unwrap();
            assert_eq!(summary.rounds, 50);
            assert_eq!(
                summary.implied_balance(),
                service.get_user_balance(user_id).unwrap()
            );

            let orders = service.get_user_orders(user_id, 1, 100).unwrap();
            assert_eq!(orders.total, 50);
            for order in &orders.orders {
                assert!(service.audit_order(&order.external_id()).unwrap().is_consistent());
            }
        }
    }
}

// =============================================================================
// Read Tests
// =============================================================================

mod read_tests {
    use super::*;

    struct SlowBoard(Duration);

    impl BoardSource for SlowBoard {
        fn next_board(&self) -> Board {
            thread::sleep(self.0);
            no_win_board()
        }
    }

    /// Database file in the temp dir, removed with its WAL files on drop.
    struct TempDb(std::path::PathBuf);

    impl TempDb {
        fn new(name: &str) -> Self {
            let path = std::env::temp_dir()
                .join(format!("spinledger-it-{}-{}.db", std::process::id(), name));
            let db = TempDb(path);
            db.cleanup();
            db
        }

        fn cleanup(&self) {
            for suffix in ["", "-wal", "-shm"] {
                let mut file = self.0.clone().into_os_string();
                file.push(suffix);
                std::fs::remove_file(file).ok();
            }
        }
    }

    impl Drop for TempDb {
        fn drop(&mut self) {
            self.cleanup();
        }
    }

    #[test]
    fn test_reads_do_not_wait_for_inflight_round() {
        let db = TempDb::new("inflight");
        let store = Arc::new(SqliteStore::new(&db.0, Duration::from_secs(5)).unwrap());
        let service = Arc::new(SettlementService::new(
            store,
            Arc::new(IdGenerator::new(3).unwrap()),
            Arc::new(SlowBoard(Duration::from_millis(800))),
            PaylineEvaluator::new(Arc::new(SymbolTable::default())),
        ));

        let player = service.ledger().open_account(Amount::from_major(100)).unwrap().user_id;
        let other = service.ledger().open_account(Amount::from_major(100)).unwrap().user_id;

        let round = {
            let service = service.clone();
            thread::spawn(move || {
                service.create_order_with_balance(player, Amount::from_major(10), "classic_3x3")
            })
        };
        thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        let other_balance = service.get_user_balance(other).unwrap();
        // The player's stake is not committed yet
        let player_balance = service.get_user_balance(player).unwrap();
        let records = service.get_balance_records(player, 1, 10).unwrap();
        let waited = started.elapsed();

        assert_eq!(other_balance, Amount::from_major(100));
        assert_eq!(player_balance, Amount::from_major(100));
        assert_eq!(records.total, 1);
        assert!(waited < Duration::from_millis(400), "reads waited {:?}", waited);

        round.join().unwrap().unwrap();
        assert_eq!(
            service.get_user_balance(player).unwrap(),
            Amount::from_major(90)
        );
    }
}

// =============================================================================
// DTO Tests
// =============================================================================

mod dto_tests {
    use super::*;

    #[test]
    fn test_order_dto_json() {
        let service = service_with(Arc::new(FixedBoard(single_orange_line())));
        let account = service.ledger().open_account(Amount::from_major(100)).unwrap();
        let (order, _) = service
            .create_order_with_balance(account.user_id, Amount::from_major(10), "classic_3x3")
            .unwrap();

        let json = serde_json::to_value(order.to_dto()).unwrap();
        assert_eq!(json["order_id"], serde_json::json!(order.order_id.to_string()));
        assert_eq!(json["type"], "classic_3x3");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["bet_amount"], 10.0);
        assert_eq!(json["win_amount"], 25.0);
        assert_eq!(json["game_result"]["lines"][0]["type"], "horizontal");
        assert!(json["completed_at"].is_i64());
    }

    #[test]
    fn test_balance_page_json() {
        let service = service_with(Arc::new(FixedBoard(no_win_board())));
        let account = service.ledger().open_account(Amount::from_major(100)).unwrap();
        service
            .create_order_with_balance(account.user_id, Amount::from_major(10), "classic_3x3")
            .unwrap();

        let page = service.get_balance_records(account.user_id, 1, 20).unwrap();
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["total"], 2);
        assert_eq!(json["page"], 1);
        assert_eq!(json["page_size"], 20);
        assert_eq!(json["records"].as_array().unwrap().len(), 2);
    }
}
