//! Time-series store (spec §6): tickers/trades/candles, partitioned by day on
//! `timestamp`. Grounded on
//! `original_source/data-pipeline/market-data-collector`'s TimescaleDB schema,
//! translated to `rusqlite`'s day-partitioned tables via `table_for_day()`
//! since this crate carries no Timescale dependency.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex as AsyncMutex;

use crate::models::market_data::{Candle, Ticker, Trade};

fn table_for_day(prefix: &str, day: &str) -> String {
    format!("{prefix}_{day}")
}

fn day_of(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%d").to_string()
}

fn group_by_day<T>(items: Vec<T>, ts: impl Fn(&T) -> DateTime<Utc>) -> HashMap<String, Vec<T>> {
    let mut grouped: HashMap<String, Vec<T>> = HashMap::new();
    for item in items {
        grouped.entry(day_of(ts(&item))).or_default().push(item);
    }
    grouped
}

pub struct TimeSeriesStore {
    db: Arc<AsyncMutex<rusqlite::Connection>>,
}

impl TimeSeriesStore {
    pub fn new(db: Arc<AsyncMutex<rusqlite::Connection>>) -> Self {
        Self { db }
    }

    fn ensure_ticker_table(conn: &rusqlite::Connection, day: &str) -> anyhow::Result<()> {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    venue TEXT NOT NULL, symbol TEXT NOT NULL, timestamp TEXT NOT NULL,
                    last REAL NOT NULL, bid REAL NOT NULL, ask REAL NOT NULL,
                    high_24h REAL NOT NULL, low_24h REAL NOT NULL,
                    base_volume_24h REAL NOT NULL, quote_volume_24h REAL NOT NULL,
                    change_24h REAL NOT NULL, change_pct_24h REAL NOT NULL
                )",
                table_for_day("tickers", day)
            ),
            [],
        )?;
        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{}_venue_symbol ON {} (venue, symbol, timestamp DESC)",
                table_for_day("tickers", day),
                table_for_day("tickers", day)
            ),
            [],
        )?;
        Ok(())
    }

    fn ensure_trade_table(conn: &rusqlite::Connection, day: &str) -> anyhow::Result<()> {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    venue TEXT NOT NULL, symbol TEXT NOT NULL, trade_id TEXT NOT NULL,
                    timestamp TEXT NOT NULL, price REAL NOT NULL, quantity REAL NOT NULL,
                    side TEXT NOT NULL, is_buyer_maker INTEGER NOT NULL
                )",
                table_for_day("trades", day)
            ),
            [],
        )?;
        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{}_venue_symbol ON {} (venue, symbol, timestamp DESC)",
                table_for_day("trades", day),
                table_for_day("trades", day)
            ),
            [],
        )?;
        Ok(())
    }

    fn ensure_candle_table(conn: &rusqlite::Connection, day: &str) -> anyhow::Result<()> {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    venue TEXT NOT NULL, symbol TEXT NOT NULL, interval TEXT NOT NULL,
                    timestamp TEXT NOT NULL, open REAL NOT NULL, high REAL NOT NULL,
                    low REAL NOT NULL, close REAL NOT NULL, volume REAL NOT NULL,
                    quote_volume REAL NOT NULL, trades_count INTEGER NOT NULL
                )",
                table_for_day("candles", day)
            ),
            [],
        )?;
        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{}_venue_symbol ON {} (venue, symbol, interval, timestamp DESC)",
                table_for_day("candles", day),
                table_for_day("candles", day)
            ),
            [],
        )?;
        Ok(())
    }

    pub async fn insert_tickers(&self, tickers: Vec<Ticker>) -> anyhow::Result<()> {
        let grouped = group_by_day(tickers, |t| t.timestamp);
        let conn = self.db.lock().await;
        for (day, rows) in grouped {
            Self::ensure_ticker_table(&conn, &day)?;
            let table = table_for_day("tickers", &day);
            for t in rows {
                conn.execute(
                    &format!(
                        "INSERT INTO {table} (venue, symbol, timestamp, last, bid, ask, high_24h, low_24h, base_volume_24h, quote_volume_24h, change_24h, change_pct_24h)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                    ),
                    rusqlite::params![
                        t.venue, t.symbol, t.timestamp.to_rfc3339(), t.last, t.bid, t.ask,
                        t.high_24h, t.low_24h, t.base_volume_24h, t.quote_volume_24h, t.change_24h, t.change_pct_24h,
                    ],
                )?;
            }
        }
        Ok(())
    }

    pub async fn insert_trades(&self, trades: Vec<Trade>) -> anyhow::Result<()> {
        let grouped = group_by_day(trades, |t| t.timestamp);
        let conn = self.db.lock().await;
        for (day, rows) in grouped {
            Self::ensure_trade_table(&conn, &day)?;
            let table = table_for_day("trades", &day);
            for t in rows {
                conn.execute(
                    &format!(
                        "INSERT INTO {table} (venue, symbol, trade_id, timestamp, price, quantity, side, is_buyer_maker)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                    ),
                    rusqlite::params![
                        t.venue, t.symbol, t.trade_id, t.timestamp.to_rfc3339(), t.price, t.quantity,
                        format!("{:?}", t.side), t.is_buyer_maker as i64,
                    ],
                )?;
            }
        }
        Ok(())
    }

    pub async fn insert_candles(&self, candles: Vec<Candle>) -> anyhow::Result<()> {
        let grouped = group_by_day(candles, |c| c.timestamp);
        let conn = self.db.lock().await;
        for (day, rows) in grouped {
            Self::ensure_candle_table(&conn, &day)?;
            let table = table_for_day("candles", &day);
            for c in rows {
                conn.execute(
                    &format!(
                        "INSERT INTO {table} (venue, symbol, interval, timestamp, open, high, low, close, volume, quote_volume, trades_count)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                    ),
                    rusqlite::params![
                        c.venue, c.symbol, c.interval, c.timestamp.to_rfc3339(), c.open, c.high,
                        c.low, c.close, c.volume, c.quote_volume, c.trades_count,
                    ],
                )?;
            }
        }
        Ok(())
    }

    /// Reads candle rows for a single day's table, newest first, for the
    /// signal-analyzer consumer described in spec §6.
    pub async fn query_candles(&self, venue: &str, symbol: &str, interval: &str, day: &str, limit: usize) -> anyhow::Result<Vec<Candle>> {
        let conn = self.db.lock().await;
        let table = table_for_day("candles", day);
        let table_exists = conn
            .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1")?
            .exists(rusqlite::params![table])?;
        if !table_exists {
            return Ok(Vec::new());
        }
        let mut stmt = conn.prepare(&format!(
            "SELECT venue, symbol, interval, timestamp, open, high, low, close, volume, quote_volume, trades_count
             FROM {table} WHERE venue = ?1 AND symbol = ?2 AND interval = ?3 ORDER BY timestamp DESC LIMIT ?4"
        ))?;
        let rows = stmt.query_map(rusqlite::params![venue, symbol, interval, limit as i64], |row| {
            Ok(Candle {
                venue: row.get(0)?,
                symbol: row.get(1)?,
                interval: row.get(2)?,
                timestamp: row.get::<_, String>(3)?.parse().unwrap_or_else(|_| Utc::now()),
                open: row.get(4)?,
                high: row.get(5)?,
                low: row.get(6)?,
                close: row.get(7)?,
                volume: row.get(8)?,
                quote_volume: row.get(9)?,
                trades_count: row.get::<_, i64>(10)? as u64,
            })
        })?;
        Ok(rows.filter_map(Result::ok).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::OrderSide;

    fn store() -> TimeSeriesStore {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        TimeSeriesStore::new(Arc::new(AsyncMutex::new(conn)))
    }

    #[tokio::test]
    async fn insert_and_query_candle_round_trips() {
        let store = store();
        let ts = Utc::now();
        let candle = Candle {
            venue: "mock".into(),
            symbol: "BTC/USDT".into(),
            interval: "1m".into(),
            timestamp: ts,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 10.0,
            quote_volume: 1000.0,
            trades_count: 42,
        };
        store.insert_candles(vec![candle]).await.unwrap();
        let day = day_of(ts);
        let rows = store.query_candles("mock", "BTC/USDT", "1m", &day, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].trades_count, 42);
    }

    #[tokio::test]
    async fn insert_trade_persists_side() {
        let store = store();
        let ts = Utc::now();
        let trade = Trade {
            venue: "mock".into(),
            symbol: "BTC/USDT".into(),
            trade_id: "t1".into(),
            timestamp: ts,
            price: 100.0,
            quantity: 1.0,
            side: OrderSide::Buy,
            is_buyer_maker: false,
        };
        store.insert_trades(vec![trade]).await.unwrap();
    }

    #[tokio::test]
    async fn querying_a_day_with_no_table_returns_empty() {
        let store = store();
        let rows = store.query_candles("mock", "BTC/USDT", "1m", "19990101", 10).await.unwrap();
        assert!(rows.is_empty());
    }
}
