//! Order, Execution and the order state machine (spec §3, §4.3, §9).
//!
//! The wire form stays the flat JSON of spec §6 for API compatibility, but
//! internally an order's type-specific fields are validated into a
//! discriminated [`OrderKind`] the moment the intent is accepted — the
//! "dynamic schema with variant payloads -> tagged unions" redesign flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for buy, -1 for sell; used by slippage/P&L sign math.
    pub fn sign(self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
    Gtd,
}

impl Default for TimeInForce {
    fn default() -> Self {
        TimeInForce::Gtc
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Twap,
    Iceberg,
    StopLoss,
    TakeProfit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Submitted,
    Partial,
    Filled,
    Canceled,
    Rejected,
    Expired,
    Failed,
}

impl OrderStatus {
    /// Final states are terminal; any further venue event against them is a no-op.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Expired
                | OrderStatus::Failed
        )
    }
}

/// Type-specific fields, validated out of the flat intent at Create time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderKind {
    Market,
    Limit { price: f64 },
    Twap { slices: u32, interval_secs: u64 },
    Iceberg { visible_ratio: f64, price: Option<f64> },
    StopLoss { stop_price: f64 },
    TakeProfit { stop_price: f64 },
}

impl OrderKind {
    pub fn order_type(&self) -> OrderType {
        match self {
            OrderKind::Market => OrderType::Market,
            OrderKind::Limit { .. } => OrderType::Limit,
            OrderKind::Twap { .. } => OrderType::Twap,
            OrderKind::Iceberg { .. } => OrderType::Iceberg,
            OrderKind::StopLoss { .. } => OrderType::StopLoss,
            OrderKind::TakeProfit { .. } => OrderType::TakeProfit,
        }
    }
}

/// A single fill-fact. Append-only for the life of the parent order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub quantity: f64,
    pub fee_amount: f64,
    pub fee_currency: String,
    pub venue_trade_id: Option<String>,
}

/// Canonical order record returned by every submit/cancel/fetch call (spec §4.1a).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub client_order_id: Option<String>,
    pub venue_order_id: Option<String>,
    pub parent_id: Option<Uuid>,

    pub strategy: String,
    pub venue: String,
    pub symbol: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub requested_quantity: f64,
    pub time_in_force: TimeInForce,
    pub priority: u8,

    pub status: OrderStatus,
    pub filled_quantity: f64,
    pub avg_fill_price: Option<f64>,
    pub executions: Vec<Execution>,
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(
        strategy: String,
        venue: String,
        symbol: String,
        side: OrderSide,
        kind: OrderKind,
        requested_quantity: f64,
        time_in_force: TimeInForce,
        priority: u8,
        client_order_id: Option<String>,
        parent_id: Option<Uuid>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            client_order_id,
            venue_order_id: None,
            parent_id,
            strategy,
            venue,
            symbol,
            side,
            kind,
            requested_quantity,
            time_in_force,
            priority,
            status: OrderStatus::Pending,
            filled_quantity: 0.0,
            avg_fill_price: None,
            executions: Vec::new(),
            error_message: None,
            created_at: now,
            updated_at: now,
            submitted_at: None,
            filled_at: None,
        }
    }

    pub fn notional(&self, reference_price: f64) -> f64 {
        let px = self.avg_fill_price.unwrap_or(reference_price);
        self.requested_quantity * px
    }

    pub fn transition(&mut self, status: OrderStatus) {
        if self.status.is_terminal() {
            tracing::warn!(order_id = %self.id, status = ?status, "ignoring transition on terminal order");
            return;
        }
        if self.status == OrderStatus::Pending && status != OrderStatus::Pending {
            self.submitted_at.get_or_insert(Utc::now());
        }
        if status == OrderStatus::Filled {
            self.filled_at = Some(Utc::now());
        }
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Append an execution and recompute cumulative fill / VWAP. Invariant:
    /// filled_quantity never exceeds requested_quantity.
    pub fn apply_execution(&mut self, exec: Execution) {
        let prior_notional = self.avg_fill_price.unwrap_or(0.0) * self.filled_quantity;
        self.filled_quantity = (self.filled_quantity + exec.quantity).min(self.requested_quantity);
        let total_notional = prior_notional + exec.price * exec.quantity;
        if self.filled_quantity > 0.0 {
            self.avg_fill_price = Some(total_notional / self.filled_quantity);
        }
        self.executions.push(exec);
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_transition_is_ignored() {
        let mut o = Order::new(
            "s1".into(),
            "mock".into(),
            "BTC/USDT".into(),
            OrderSide::Buy,
            OrderKind::Market,
            0.1,
            TimeInForce::Gtc,
            0,
            None,
            None,
        );
        o.transition(OrderStatus::Filled);
        o.transition(OrderStatus::Canceled);
        assert_eq!(o.status, OrderStatus::Filled);
    }

    #[test]
    fn apply_execution_caps_filled_quantity() {
        let mut o = Order::new(
            "s1".into(),
            "mock".into(),
            "BTC/USDT".into(),
            OrderSide::Buy,
            OrderKind::Market,
            1.0,
            TimeInForce::Gtc,
            0,
            None,
            None,
        );
        o.apply_execution(Execution {
            timestamp: Utc::now(),
            price: 100.0,
            quantity: 0.6,
            fee_amount: 0.0,
            fee_currency: "USDT".into(),
            venue_trade_id: None,
        });
        o.apply_execution(Execution {
            timestamp: Utc::now(),
            price: 110.0,
            quantity: 0.6,
            fee_amount: 0.0,
            fee_currency: "USDT".into(),
            venue_trade_id: None,
        });
        assert!(o.filled_quantity <= o.requested_quantity);
        assert_eq!(o.filled_quantity, 1.0);
    }
}
