use crate::types::{Board, Payline, RoundResult, SymbolTable, WinLine};
use std::sync::Arc;

/// Scores boards against the eight fixed paylines.
#[derive(Debug, Clone)]
pub struct PaylineEvaluator {
    table: Arc<SymbolTable>,
}

impl PaylineEvaluator {
    pub fn new(table: Arc<SymbolTable>) -> Self {
        Self { table }
    }

    /// Every payline whose three symbols match, and the summed multiplier.
    /// Lines are independent: one board can win several at once.
    pub fn check_win(&self, board: &Board) -> RoundResult {
        let lines: Vec<WinLine> = Payline::ALL
            .iter()
            .filter_map(|&payline| {
                let [a, b, c] = board.line(payline);
                (a == b && b == c).then(|| WinLine {
                    kind: payline.kind,
                    position: payline.position,
                    symbol: a,
                    payout_multiplier: self.table.payout_multiplier(a).unwrap_or(0.0),
                })
            })
            .collect();

        let total_payout_multiplier = lines.iter().map(|l| l.payout_multiplier).sum();

        RoundResult {
            board: *board,
            lines,
            total_payout_multiplier,
        }
    }
}
