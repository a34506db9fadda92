use super::Amount;
use serde::{Deserialize, Serialize};

/// Direction of a balance mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceKind {
    Add,
    Deduct,
}

impl BalanceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceKind::Add => "add",
            BalanceKind::Deduct => "deduct",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "add" => Some(BalanceKind::Add),
            "deduct" => Some(BalanceKind::Deduct),
            _ => None,
        }
    }
}

impl std::fmt::Display for BalanceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a ledger row was written. Each kind has exactly one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Stake taken at the start of a round
    Bet,
    /// Payout credited at the end of a round
    Win,
    /// External funds credited to the account
    Deposit,
    /// Funds paid out of the account
    Withdraw,
}

impl TransactionKind {
    pub fn direction(&self) -> BalanceKind {
        match self {
            TransactionKind::Win | TransactionKind::Deposit => BalanceKind::Add,
            TransactionKind::Bet | TransactionKind::Withdraw => BalanceKind::Deduct,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Bet => "bet",
            TransactionKind::Win => "win",
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdraw => "withdraw",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bet" => Some(TransactionKind::Bet),
            "win" => Some(TransactionKind::Win),
            "deposit" => Some(TransactionKind::Deposit),
            "withdraw" => Some(TransactionKind::Withdraw),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's balance row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: i64,
    pub balance: Amount,
    pub frozen_balance: Amount,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One immutable ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub id: i64,
    pub user_id: i64,
    pub kind: BalanceKind,
    pub category: TransactionKind,
    pub amount: Amount,
    pub before_balance: Amount,
    pub after_balance: Amount,
    pub before_frozen: Amount,
    pub after_frozen: Amount,
    pub description: String,
    pub reference_id: String,
    /// Unix ms
    pub created_at: i64,
}

impl BalanceRecord {
    /// `+amount` for credits, `-amount` for debits.
    pub fn signed_amount(&self) -> Amount {
        match self.kind {
            BalanceKind::Add => self.amount,
            BalanceKind::Deduct => -self.amount,
        }
    }

    /// Whether the before/after snapshot agrees with the kind and amount.
    pub fn is_consistent(&self) -> bool {
        self.before_balance + self.signed_amount() == self.after_balance
            && self.after_balance >= Amount::ZERO
    }
}

/// A page of ledger rows, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancePage {
    pub records: Vec<BalanceRecord>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Per-category totals for one user's ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub total_bet: Amount,
    pub total_win: Amount,
    pub total_deposit: Amount,
    pub total_withdraw: Amount,
    pub rounds: u64,
}

impl LedgerSummary {
    /// Accumulate `amount` (and `count` rows) under `category`.
    pub fn record(&mut self, category: TransactionKind, amount: Amount, count: u64) {
        match category {
            TransactionKind::Bet => {
                self.total_bet += amount;
                self.rounds += count;
            }
            TransactionKind::Win => self.total_win += amount,
            TransactionKind::Deposit => self.total_deposit += amount,
            TransactionKind::Withdraw => self.total_withdraw += amount,
        }
    }

    /// Winnings minus stakes.
    pub fn net_game_result(&self) -> Amount {
        self.total_win - self.total_bet
    }

    /// Balance implied by the ledger alone.
    pub fn implied_balance(&self) -> Amount {
        self.total_deposit - self.total_withdraw + self.net_game_result()
    }

    /// Share of stakes returned as winnings, if anything was staked.
    pub fn return_to_player(&self) -> Option<f64> {
        if self.total_bet.is_positive() {
            Some(self.total_win.minor() as f64 / self.total_bet.minor() as f64)
        } else {
            None
        }
    }
}
