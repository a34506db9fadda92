//! Weighted board generation.

use crate::types::{BiasedBoard, Board, Payline, Symbol, SymbolTable, BOARD_SIZE};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::sync::{Arc, Mutex, PoisonError};

/// Where the settlement service gets its boards from.
pub trait BoardSource: Send + Sync {
    fn next_board(&self) -> Board;
}

/// Draws boards from a symbol table using its own RNG stream.
pub struct BoardGenerator<R = StdRng> {
    table: Arc<SymbolTable>,
    rng: Mutex<R>,
}

impl BoardGenerator<StdRng> {
    /// Generator seeded from OS entropy.
    pub fn new(table: Arc<SymbolTable>) -> Self {
        Self::with_rng(table, StdRng::from_entropy())
    }

    /// Reproducible generator.
    pub fn seeded(table: Arc<SymbolTable>, seed: u64) -> Self {
        Self::with_rng(table, StdRng::seed_from_u64(seed))
    }
}

impl<R: RngCore> BoardGenerator<R> {
    pub fn with_rng(table: Arc<SymbolTable>, rng: R) -> Self {
        Self {
            table,
            rng: Mutex::new(rng),
        }
    }

    pub fn table(&self) -> &SymbolTable {
        &self.table
    }

    /// Nine independent weighted draws.
    pub fn generate_board(&self) -> Board {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let mut board = Board::filled(Symbol::Cherry);
        for row in 0..BOARD_SIZE {
            for col in 0..BOARD_SIZE {
                board.set(row, col, draw(&self.table, &mut *rng));
            }
        }
        board
    }

    /// A board with one uniformly chosen payline forced to one uniformly chosen symbol.
    /// Remaining cells use the normal weighted draw.
    pub fn generate_board_with_bias(&self) -> BiasedBoard {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);

        let line = Payline::ALL[rng.gen_range(0..Payline::ALL.len())];
        let entries = self.table.entries();
        let symbol = entries[rng.gen_range(0..entries.len())].symbol;
        let forced = line.cells();

        let mut board = Board::filled(symbol);
        for row in 0..BOARD_SIZE {
            for col in 0..BOARD_SIZE {
                if !forced.contains(&(row, col)) {
                    board.set(row, col, draw(&self.table, &mut *rng));
                }
            }
        }

        BiasedBoard { board, line, symbol }
    }
}

impl<R: RngCore + Send> BoardSource for BoardGenerator<R> {
    fn next_board(&self) -> Board {
        self.generate_board()
    }
}

fn draw<R: RngCore>(table: &SymbolTable, rng: &mut R) -> Symbol {
    let r = rng.gen_range(0..table.total_weight());
    table.symbol_for_draw(r)
}
