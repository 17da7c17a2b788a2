//! Position rows and the fill-merge algebra (spec §3, §4.7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::order::OrderSide;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    Long,
    Short,
}

impl From<OrderSide> for PositionSide {
    fn from(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => PositionSide::Long,
            OrderSide::Sell => PositionSide::Short,
        }
    }
}

/// Keyed by (strategy, venue, instrument). Created on first fill against an
/// empty key, destroyed when quantity reaches zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub strategy: String,
    pub venue: String,
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: f64,
    pub avg_entry_price: f64,
    pub mark_price: f64,
    pub realized_pnl: f64,
    pub margin: Option<f64>,
    pub leverage: Option<f64>,
    pub liquidation_price: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn key(strategy: &str, venue: &str, symbol: &str) -> String {
        format!("{strategy}:{venue}:{symbol}")
    }

    pub fn new(strategy: String, venue: String, symbol: String, side: PositionSide, qty: f64, entry: f64) -> Self {
        Self {
            strategy,
            venue,
            symbol,
            side,
            quantity: qty,
            avg_entry_price: entry,
            mark_price: entry,
            realized_pnl: 0.0,
            margin: None,
            leverage: None,
            liquidation_price: None,
            updated_at: Utc::now(),
        }
    }

    pub fn unrealized_pnl(&self, mark: f64) -> f64 {
        let sign = match self.side {
            PositionSide::Long => 1.0,
            PositionSide::Short => -1.0,
        };
        sign * (mark - self.avg_entry_price) * self.quantity
    }

    pub fn unrealized_pnl_pct(&self, mark: f64) -> f64 {
        if self.avg_entry_price == 0.0 {
            return 0.0;
        }
        self.unrealized_pnl(mark) / (self.avg_entry_price * self.quantity)
    }

    pub fn notional(&self, mark: f64) -> f64 {
        self.quantity * mark
    }
}

/// Outcome of `Order/Position service`'s `UpdateFromFill` algebra (spec §4.7).
/// Either the row survives (mutated) or it is closed/replaced.
pub enum FillOutcome {
    Opened(Position),
    Adjusted(Position),
    Closed { realized_pnl: f64 },
    ClosedAndReversed { position: Position, realized_pnl: f64 },
}

/// Applies a single fill to an existing (optional) position row, following the
/// merge algebra of spec §4.7 verbatim.
pub fn update_from_fill(
    existing: Option<Position>,
    strategy: &str,
    venue: &str,
    symbol: &str,
    fill_side: OrderSide,
    qty: f64,
    px: f64,
) -> FillOutcome {
    let fill_position_side = PositionSide::from(fill_side);

    let Some(mut pos) = existing else {
        return FillOutcome::Opened(Position::new(
            strategy.to_string(),
            venue.to_string(),
            symbol.to_string(),
            fill_position_side,
            qty,
            px,
        ));
    };

    if pos.side == fill_position_side {
        // Adding in the same direction.
        let new_qty = pos.quantity + qty;
        pos.avg_entry_price = (pos.avg_entry_price * pos.quantity + px * qty) / new_qty;
        pos.quantity = new_qty;
        pos.updated_at = Utc::now();
        return FillOutcome::Adjusted(pos);
    }

    // Opposing fill.
    let pnl_sign = match pos.side {
        PositionSide::Long => 1.0,
        PositionSide::Short => -1.0,
    };

    if qty < pos.quantity {
        let realized = pnl_sign * (px - pos.avg_entry_price) * qty;
        pos.quantity -= qty;
        pos.realized_pnl += realized;
        pos.updated_at = Utc::now();
        FillOutcome::Adjusted(pos)
    } else if (qty - pos.quantity).abs() < f64::EPSILON {
        let realized = pnl_sign * (px - pos.avg_entry_price) * pos.quantity;
        FillOutcome::Closed {
            realized_pnl: pos.realized_pnl + realized,
        }
    } else {
        let excess = qty - pos.quantity;
        let realized = pnl_sign * (px - pos.avg_entry_price) * pos.quantity;
        let mut new_pos = Position::new(
            strategy.to_string(),
            venue.to_string(),
            symbol.to_string(),
            fill_position_side,
            excess,
            px,
        );
        new_pos.realized_pnl = pos.realized_pnl + realized;
        FillOutcome::ClosedAndReversed {
            position: new_pos,
            realized_pnl: pos.realized_pnl + realized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_buy_then_sell_realizes_pnl() {
        let opened = update_from_fill(None, "s1", "mock", "BTC/USDT", OrderSide::Buy, 1.0, 100.0);
        let pos = match opened {
            FillOutcome::Opened(p) => p,
            _ => panic!("expected open"),
        };
        let closed = update_from_fill(Some(pos), "s1", "mock", "BTC/USDT", OrderSide::Sell, 1.0, 110.0);
        match closed {
            FillOutcome::Closed { realized_pnl } => assert!((realized_pnl - 10.0).abs() < 1e-9),
            _ => panic!("expected close"),
        }
    }

    #[test]
    fn round_trip_sell_then_buy_realizes_pnl_short() {
        let opened = update_from_fill(None, "s1", "mock", "BTC/USDT", OrderSide::Sell, 1.0, 110.0);
        let pos = match opened {
            FillOutcome::Opened(p) => p,
            _ => panic!("expected open"),
        };
        let closed = update_from_fill(Some(pos), "s1", "mock", "BTC/USDT", OrderSide::Buy, 1.0, 100.0);
        match closed {
            FillOutcome::Closed { realized_pnl } => assert!((realized_pnl - 10.0).abs() < 1e-9),
            _ => panic!("expected close"),
        }
    }

    #[test]
    fn close_and_reverse_realizes_the_closed_legs_pnl() {
        let opened = update_from_fill(None, "s1", "mock", "BTC/USDT", OrderSide::Buy, 1.0, 100.0);
        let pos = match opened {
            FillOutcome::Opened(p) => p,
            _ => panic!("expected open"),
        };
        // Sell 1.5 against a 1.0-long: closes the long (realizing 10.0) and
        // opens a fresh 0.5 short at the fill price.
        let reversed = update_from_fill(Some(pos), "s1", "mock", "BTC/USDT", OrderSide::Sell, 1.5, 110.0);
        match reversed {
            FillOutcome::ClosedAndReversed { position, realized_pnl } => {
                assert!((realized_pnl - 10.0).abs() < 1e-9);
                assert!((position.realized_pnl - 10.0).abs() < 1e-9);
                assert_eq!(position.side, PositionSide::Short);
                assert!((position.quantity - 0.5).abs() < 1e-9);
                assert!((position.avg_entry_price - 110.0).abs() < 1e-9);
            }
            _ => panic!("expected close-and-reverse"),
        }
    }
}
