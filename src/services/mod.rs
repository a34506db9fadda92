pub mod board_generator;
pub mod clock;
pub mod id_generator;
pub mod ledger;
pub mod payline;
pub mod settlement;
pub mod sqlite_store;

pub use board_generator::{BoardGenerator, BoardSource};
pub use clock::{Clock, ManualClock, SystemClock};
pub use id_generator::{parse_id, IdGenerator, IdParts};
pub use ledger::BalanceLedger;
pub use payline::PaylineEvaluator;
pub use settlement::{SettlementConfig, SettlementService};
pub use sqlite_store::SqliteStore;
