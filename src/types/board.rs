use super::{Amount, Symbol};
use serde::{Deserialize, Serialize};

/// Board edge length.
pub const BOARD_SIZE: usize = 3;

/// A 3x3 grid of symbols, row-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Board {
    cells: [[Symbol; BOARD_SIZE]; BOARD_SIZE],
}

impl Board {
    pub fn new(cells: [[Symbol; BOARD_SIZE]; BOARD_SIZE]) -> Self {
        Self { cells }
    }

    /// Board with every cell set to `symbol`.
    pub fn filled(symbol: Symbol) -> Self {
        Self {
            cells: [[symbol; BOARD_SIZE]; BOARD_SIZE],
        }
    }

    pub fn get(&self, row: usize, col: usize) -> Symbol {
        self.cells[row][col]
    }

    pub fn set(&mut self, row: usize, col: usize, symbol: Symbol) {
        self.cells[row][col] = symbol;
    }

    pub fn rows(&self) -> &[[Symbol; BOARD_SIZE]; BOARD_SIZE] {
        &self.cells
    }

    /// The three symbols along a payline.
    pub fn line(&self, payline: Payline) -> [Symbol; 3] {
        payline.cells().map(|(r, c)| self.cells[r][c])
    }
}

/// Payline orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    Horizontal,
    Vertical,
    /// Position 0 runs top-left to bottom-right, position 1 top-right to bottom-left
    Diagonal,
}

impl std::fmt::Display for LineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineKind::Horizontal => write!(f, "horizontal"),
            LineKind::Vertical => write!(f, "vertical"),
            LineKind::Diagonal => write!(f, "diagonal"),
        }
    }
}

/// One of the eight fixed lines on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Payline {
    pub kind: LineKind,
    pub position: u8,
}

impl Payline {
    /// Rows, then columns, then the two diagonals.
    pub const ALL: [Payline; 8] = [
        Payline::new(LineKind::Horizontal, 0),
        Payline::new(LineKind::Horizontal, 1),
        Payline::new(LineKind::Horizontal, 2),
        Payline::new(LineKind::Vertical, 0),
        Payline::new(LineKind::Vertical, 1),
        Payline::new(LineKind::Vertical, 2),
        Payline::new(LineKind::Diagonal, 0),
        Payline::new(LineKind::Diagonal, 1),
    ];

    pub const fn new(kind: LineKind, position: u8) -> Self {
        Self { kind, position }
    }

    /// `(row, col)` coordinates covered by this line.
    pub fn cells(&self) -> [(usize, usize); 3] {
        let p = self.position as usize;
        match self.kind {
            LineKind::Horizontal => [(p, 0), (p, 1), (p, 2)],
            LineKind::Vertical => [(0, p), (1, p), (2, p)],
            LineKind::Diagonal if p == 0 => [(0, 0), (1, 1), (2, 2)],
            LineKind::Diagonal => [(0, 2), (1, 1), (2, 0)],
        }
    }
}

/// A payline that completed on a board.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WinLine {
    #[serde(rename = "type")]
    pub kind: LineKind,
    pub position: u8,
    pub symbol: Symbol,
    pub payout_multiplier: f64,
}

impl WinLine {
    pub fn payline(&self) -> Payline {
        Payline::new(self.kind, self.position)
    }

    /// Payout for this line alone.
    pub fn win_amount(&self, bet: Amount) -> Amount {
        bet.scale(self.payout_multiplier)
    }
}

/// Evaluated outcome of one board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundResult {
    pub board: Board,
    pub lines: Vec<WinLine>,
    pub total_payout_multiplier: f64,
}

impl RoundResult {
    pub fn is_win(&self) -> bool {
        !self.lines.is_empty()
    }

    /// Total payout for the round.
    pub fn total_win(&self, bet: Amount) -> Amount {
        bet.scale(self.total_payout_multiplier)
    }
}

/// A board produced with one line forced to a single symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BiasedBoard {
    pub board: Board,
    pub line: Payline,
    pub symbol: Symbol,
}
