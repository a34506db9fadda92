use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Reel symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Symbol {
    Cherry,
    Lemon,
    Orange,
    Plum,
    Bell,
    Bar,
    Seven,
}

impl Symbol {
    pub const ALL: [Symbol; 7] = [
        Symbol::Cherry,
        Symbol::Lemon,
        Symbol::Orange,
        Symbol::Plum,
        Symbol::Bell,
        Symbol::Bar,
        Symbol::Seven,
    ];
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Symbol::Cherry => write!(f, "cherry"),
            Symbol::Lemon => write!(f, "lemon"),
            Symbol::Orange => write!(f, "orange"),
            Symbol::Plum => write!(f, "plum"),
            Symbol::Bell => write!(f, "bell"),
            Symbol::Bar => write!(f, "bar"),
            Symbol::Seven => write!(f, "seven"),
        }
    }
}

/// One row of the symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymbolSpec {
    pub symbol: Symbol,
    /// Relative draw frequency
    pub weight: u32,
    /// Multiplier applied to the bet when this symbol completes a line
    pub payout_multiplier: f64,
}

/// Symbol table validation errors.
#[derive(Debug, Error)]
pub enum SymbolTableError {
    #[error("symbol table is empty")]
    Empty,

    #[error("symbol {0} has zero weight")]
    ZeroWeight(Symbol),

    #[error("symbol {0} has invalid payout multiplier {1}")]
    InvalidMultiplier(Symbol, f64),

    #[error("symbol {0} listed more than once")]
    Duplicate(Symbol),

    #[error("failed to read symbol table: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse symbol table: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Immutable weights and multipliers, with cumulative weights precomputed for sampling.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    entries: Vec<SymbolSpec>,
    cumulative: Vec<u64>,
    total_weight: u64,
}

impl SymbolTable {
    /// Build a table, validating every entry.
    pub fn new(entries: Vec<SymbolSpec>) -> Result<Self, SymbolTableError> {
        if entries.is_empty() {
            return Err(SymbolTableError::Empty);
        }

        let mut cumulative = Vec::with_capacity(entries.len());
        let mut running = 0u64;
        for (i, spec) in entries.iter().enumerate() {
            if spec.weight == 0 {
                return Err(SymbolTableError::ZeroWeight(spec.symbol));
            }
            if !spec.payout_multiplier.is_finite() || spec.payout_multiplier < 0.0 {
                return Err(SymbolTableError::InvalidMultiplier(spec.symbol, spec.payout_multiplier));
            }
            if entries[..i].iter().any(|e| e.symbol == spec.symbol) {
                return Err(SymbolTableError::Duplicate(spec.symbol));
            }
            running += u64::from(spec.weight);
            cumulative.push(running);
        }

        Ok(Self {
            entries,
            cumulative,
            total_weight: running,
        })
    }

    /// Load a table from a JSON array of `{symbol, weight, payout_multiplier}`.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, SymbolTableError> {
        let raw = std::fs::read_to_string(path)?;
        let entries: Vec<SymbolSpec> = serde_json::from_str(&raw)?;
        Self::new(entries)
    }

    pub fn entries(&self) -> &[SymbolSpec] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    pub fn weight(&self, symbol: Symbol) -> Option<u32> {
        self.spec(symbol).map(|s| s.weight)
    }

    pub fn payout_multiplier(&self, symbol: Symbol) -> Option<f64> {
        self.spec(symbol).map(|s| s.payout_multiplier)
    }

    fn spec(&self, symbol: Symbol) -> Option<&SymbolSpec> {
        self.entries.iter().find(|s| s.symbol == symbol)
    }

    /// Map a draw `r ∈ [0, total_weight)` to the symbol whose range `[prev, cum)` contains it.
    pub fn symbol_for_draw(&self, r: u64) -> Symbol {
        let idx = self.cumulative.partition_point(|&cum| cum <= r);
        // r >= total_weight is a caller bug; clamp to the last symbol.
        self.entries[idx.min(self.entries.len() - 1)].symbol
    }
}

impl Default for SymbolTable {
    /// Classic fruit table: weights sum to 100.
    fn default() -> Self {
        let entries = vec![
            SymbolSpec { symbol: Symbol::Cherry, weight: 30, payout_multiplier: 1.5 },
            SymbolSpec { symbol: Symbol::Lemon, weight: 25, payout_multiplier: 2.0 },
            SymbolSpec { symbol: Symbol::Orange, weight: 20, payout_multiplier: 2.5 },
            SymbolSpec { symbol: Symbol::Plum, weight: 12, payout_multiplier: 4.0 },
            SymbolSpec { symbol: Symbol::Bell, weight: 8, payout_multiplier: 8.0 },
            SymbolSpec { symbol: Symbol::Bar, weight: 4, payout_multiplier: 20.0 },
            SymbolSpec { symbol: Symbol::Seven, weight: 1, payout_multiplier: 100.0 },
        ];
        let cumulative = entries
            .iter()
            .scan(0u64, |acc, s| {
                *acc += u64::from(s.weight);
                Some(*acc)
            })
            .collect::<Vec<_>>();
        let total_weight = cumulative.last().copied().unwrap_or(0);
        Self {
            entries,
            cumulative,
            total_weight,
        }
    }
}
