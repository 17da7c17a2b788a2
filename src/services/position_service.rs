//! Position service (spec §4.7): in-memory + durable mirror of position rows,
//! behind a method API only — "direct field mutation is forbidden" (spec §5).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::AppResult;
use crate::models::order::OrderSide;
use crate::models::position::{update_from_fill, FillOutcome, Position};
use crate::venue::VenueAdapter;

pub struct PositionService {
    positions: RwLock<HashMap<String, Position>>,
    db: Arc<AsyncMutex<rusqlite::Connection>>,
}

impl PositionService {
    pub fn new(db: Arc<AsyncMutex<rusqlite::Connection>>) -> Self {
        Self {
            positions: RwLock::new(HashMap::new()),
            db,
        }
    }

    pub async fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.db.lock().await;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS positions (
                key TEXT PRIMARY KEY,
                strategy TEXT NOT NULL,
                venue TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity REAL NOT NULL,
                avg_entry_price REAL NOT NULL,
                mark_price REAL NOT NULL,
                realized_pnl REAL NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn persist(&self, pos: &Position) {
        let db = self.db.clone();
        let key = Position::key(&pos.strategy, &pos.venue, &pos.symbol);
        let pos = pos.clone();
        tokio::spawn(async move {
            let conn = db.lock().await;
            let _ = conn.execute(
                "INSERT INTO positions (key, strategy, venue, symbol, side, quantity, avg_entry_price, mark_price, realized_pnl, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(key) DO UPDATE SET quantity=excluded.quantity, avg_entry_price=excluded.avg_entry_price,
                    mark_price=excluded.mark_price, realized_pnl=excluded.realized_pnl, updated_at=excluded.updated_at",
                rusqlite::params![
                    key,
                    pos.strategy,
                    pos.venue,
                    pos.symbol,
                    format!("{:?}", pos.side),
                    pos.quantity,
                    pos.avg_entry_price,
                    pos.mark_price,
                    pos.realized_pnl,
                    pos.updated_at.to_rfc3339(),
                ],
            );
        });
    }

    fn remove_persisted(&self, key: &str) {
        let db = self.db.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            let conn = db.lock().await;
            let _ = conn.execute("DELETE FROM positions WHERE key = ?1", [key]);
        });
    }

    pub fn get(&self, strategy: &str, venue: &str, symbol: &str) -> Option<Position> {
        self.positions.read().get(&Position::key(strategy, venue, symbol)).cloned()
    }

    pub fn query(&self, strategy: Option<&str>, venue: Option<&str>, symbol: Option<&str>) -> Vec<Position> {
        self.positions
            .read()
            .values()
            .filter(|p| strategy.map(|s| s == p.strategy).unwrap_or(true))
            .filter(|p| venue.map(|v| v == p.venue).unwrap_or(true))
            .filter(|p| symbol.map(|s| s == p.symbol).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// Mutates the position row via the fill-merge algebra of spec §4.7.
    /// Returns the realized P&L produced by this fill, if any.
    pub fn update_from_fill(&self, strategy: &str, venue: &str, symbol: &str, side: OrderSide, qty: f64, px: f64) -> f64 {
        let key = Position::key(strategy, venue, symbol);
        let existing = self.positions.read().get(&key).cloned();
        let prior_realized = existing.as_ref().map(|p| p.realized_pnl).unwrap_or(0.0);

        let outcome = update_from_fill(existing, strategy, venue, symbol, side, qty, px);
        match outcome {
            FillOutcome::Opened(pos) | FillOutcome::Adjusted(pos) => {
                let delta = pos.realized_pnl - prior_realized;
                self.positions.write().insert(key, pos.clone());
                self.persist(&pos);
                delta
            }
            FillOutcome::Closed { realized_pnl } => {
                self.positions.write().remove(&key);
                self.remove_persisted(&key);
                realized_pnl - prior_realized
            }
            FillOutcome::ClosedAndReversed { position, realized_pnl } => {
                self.positions.write().insert(key, position.clone());
                self.persist(&position);
                realized_pnl - prior_realized
            }
        }
    }

    /// Pulls balances and venue-native open positions, materializing rows
    /// keyed by (default-strategy, venue, instrument).
    pub async fn sync(&self, venue_name: &str, venue: &Arc<dyn VenueAdapter>, default_strategy: &str) -> AppResult<usize> {
        let venue_positions = venue.get_open_positions().await?;
        let mut count = 0;
        for vp in venue_positions {
            let pos = Position::new(
                default_strategy.to_string(),
                venue_name.to_string(),
                vp.symbol.clone(),
                vp.side.into(),
                vp.quantity,
                vp.entry_price,
            );
            let key = Position::key(default_strategy, venue_name, &vp.symbol);
            self.positions.write().insert(key, pos.clone());
            self.persist(&pos);
            count += 1;
        }
        Ok(count)
    }

    /// Sum of position notionals for a user's strategy, and the largest single
    /// instrument's share — used by the pre-trade gate and the monitor.
    pub fn exposure(&self, strategy: &str) -> (f64, f64) {
        let positions = self.query(Some(strategy), None, None);
        let total: f64 = positions.iter().map(|p| p.notional(p.mark_price)).sum();
        let largest = positions.iter().map(|p| p.notional(p.mark_price)).fold(0.0, f64::max);
        (total, largest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service() -> PositionService {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let svc = PositionService::new(Arc::new(AsyncMutex::new(conn)));
        svc.init_schema().await.unwrap();
        svc
    }

    #[tokio::test]
    async fn close_and_reverse_returns_the_closed_legs_realized_delta() {
        let svc = service().await;
        let delta = svc.update_from_fill("s1", "mock", "BTC/USDT", OrderSide::Buy, 1.0, 100.0);
        assert_eq!(delta, 0.0);

        let delta = svc.update_from_fill("s1", "mock", "BTC/USDT", OrderSide::Sell, 1.5, 110.0);
        assert!((delta - 10.0).abs() < 1e-9);

        let pos = svc.get("s1", "mock", "BTC/USDT").expect("reversed position should remain open");
        assert_eq!(pos.side, crate::models::position::PositionSide::Short);
        assert!((pos.quantity - 0.5).abs() < 1e-9);
    }
}
