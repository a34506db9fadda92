use super::{Amount, BalanceRecord};
use serde::{Deserialize, Serialize};

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Round opened, ledger mutations in flight
    Pending,
    /// Round settled and committed
    Completed,
    /// Round failed (never persisted by settlement; rolled-back rounds leave no row)
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "completed" => Some(OrderStatus::Completed),
            "failed" => Some(OrderStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One settled (or settling) round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Snowflake id
    pub order_id: i64,
    pub user_id: i64,
    pub game_type: String,
    pub status: OrderStatus,
    pub bet_amount: Amount,
    pub win_amount: Amount,
    /// Serialized `RoundResult`
    pub game_result: serde_json::Value,
    pub balance_record_ids: Vec<i64>,
    /// Unix ms
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

impl Order {
    /// A fresh order in the `Pending` state.
    pub fn pending(
        order_id: i64,
        user_id: i64,
        game_type: &str,
        bet_amount: Amount,
        win_amount: Amount,
        game_result: serde_json::Value,
        created_at: i64,
    ) -> Self {
        Self {
            order_id,
            user_id,
            game_type: game_type.to_string(),
            status: OrderStatus::Pending,
            bet_amount,
            win_amount,
            game_result,
            balance_record_ids: Vec::new(),
            created_at,
            completed_at: None,
        }
    }

    /// External string form of the id.
    pub fn external_id(&self) -> String {
        self.order_id.to_string()
    }

    pub fn complete(&mut self, at: i64) {
        self.status = OrderStatus::Completed;
        self.completed_at = Some(at);
    }

    /// Change to the user's balance this order accounts for.
    pub fn net_amount(&self) -> Amount {
        self.win_amount - self.bet_amount
    }

    pub fn to_dto(&self) -> OrderDto {
        OrderDto::from(self)
    }
}

/// Wire form of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDto {
    pub order_id: String,
    #[serde(rename = "type")]
    pub game_type: String,
    pub status: OrderStatus,
    pub bet_amount: f64,
    pub win_amount: f64,
    pub game_result: serde_json::Value,
    pub balance_record_ids: Vec<i64>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
}

impl From<&Order> for OrderDto {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.external_id(),
            game_type: order.game_type.clone(),
            status: order.status,
            bet_amount: order.bet_amount.to_f64(),
            win_amount: order.win_amount.to_f64(),
            game_result: order.game_result.clone(),
            balance_record_ids: order.balance_record_ids.clone(),
            created_at: order.created_at,
            completed_at: order.completed_at,
        }
    }
}

/// A page of orders, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Result of re-checking a completed order against the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAudit {
    pub order_id: i64,
    pub status: OrderStatus,
    pub expected_net: Amount,
    pub recorded_net: Amount,
    pub records: Vec<BalanceRecord>,
    pub missing_record_ids: Vec<i64>,
    /// Worker that allocated the order id
    pub worker_id: u16,
    /// Millisecond the order id was allocated in
    pub allocated_at: i64,
}

impl OrderAudit {
    pub fn is_consistent(&self) -> bool {
        self.status == OrderStatus::Completed
            && self.missing_record_ids.is_empty()
            && self.expected_net == self.recorded_net
            && self.records.iter().all(BalanceRecord::is_consistent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_lifecycle() {
        let mut order = Order::pending(
            42,
            7,
            "classic_3x3",
            Amount::from_major(10),
            Amount::from_major(25),
            serde_json::json!({}),
            1_000,
        );
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.completed_at.is_none());

        order.complete(2_000);
        assert_eq!(order.status, OrderStatus::Completed);
        assert_eq!(order.completed_at, Some(2_000));
        assert_eq!(order.net_amount(), Amount::from_major(15));
    }

    #[test]
    fn test_dto_shape() {
        let order = Order::pending(
            1234567890123,
            7,
            "classic_3x3",
            Amount::from_minor(1050),
            Amount::ZERO,
            serde_json::json!({"lines": []}),
            1_000,
        );
        let json = serde_json::to_value(order.to_dto()).unwrap();
        assert_eq!(json["order_id"], "1234567890123");
        assert_eq!(json["type"], "classic_3x3");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["bet_amount"], 10.5);
        assert!(json.get("completed_at").is_none());
    }
}
