pub mod board;
pub mod ledger;
pub mod money;
pub mod order;
pub mod symbol;

pub use board::*;
pub use ledger::*;
pub use money::*;
pub use order::*;
pub use symbol::*;
