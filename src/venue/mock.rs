//! Simulated venue for exercising every executor and the seed test scenarios
//! of spec §8 without real venue connectivity. Grounded on teacher's
//! `vault/execution.rs::PaperExecutionAdapter`: latency jitter, slippage,
//! partial fills and a configurable rejection probability driven by
//! `rand::rngs::StdRng`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::market_data::{MarketRecord, OrderBook, PriceLevel, Ticker};
use crate::models::order::OrderSide;
use crate::venue::{
    Balance, Capability, DataChannel, InstrumentMeta, SubmitOrderRequest, VenueAck, VenueAdapter, VenueOrderState,
    VenuePosition,
};

#[derive(Debug, Clone)]
pub struct MockVenueConfig {
    pub base_latency_ms: u64,
    pub latency_jitter_ms: u64,
    pub base_slippage_bps: f64,
    pub partial_fill_prob: f64,
    pub reject_prob: f64,
    pub min_order_quantity: f64,
}

impl MockVenueConfig {
    pub fn from_env() -> Self {
        Self {
            base_latency_ms: env_u64("MOCK_VENUE_BASE_LATENCY_MS", 20),
            latency_jitter_ms: env_u64("MOCK_VENUE_LATENCY_JITTER_MS", 15),
            base_slippage_bps: env_f64("MOCK_VENUE_BASE_SLIPPAGE_BPS", 2.0),
            partial_fill_prob: env_f64("MOCK_VENUE_PARTIAL_FILL_PROB", 0.1),
            reject_prob: env_f64("MOCK_VENUE_REJECT_PROB", 0.02),
            min_order_quantity: env_f64("MOCK_VENUE_MIN_ORDER_QTY", 0.0001),
        }
    }
}

impl Default for MockVenueConfig {
    fn default() -> Self {
        Self {
            base_latency_ms: 10,
            latency_jitter_ms: 5,
            base_slippage_bps: 2.0,
            partial_fill_prob: 0.0,
            reject_prob: 0.0,
            min_order_quantity: 0.0001,
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

struct OpenOrder {
    ack: VenueAck,
    client_order_id: String,
    symbol: String,
}

pub struct MockVenueAdapter {
    name: String,
    config: MockVenueConfig,
    orders: Mutex<HashMap<String, OpenOrder>>,
    reference_prices: Mutex<HashMap<String, f64>>,
}

impl MockVenueAdapter {
    pub fn new(name: impl Into<String>, config: MockVenueConfig) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            config,
            orders: Mutex::new(HashMap::new()),
            reference_prices: Mutex::new(HashMap::new()),
        })
    }

    fn reference_price(&self, symbol: &str) -> f64 {
        let mut prices = self.reference_prices.lock();
        *prices.entry(symbol.to_string()).or_insert(100.0)
    }

    async fn simulate_latency(&self) {
        let mut rng = StdRng::from_entropy();
        let jitter = if self.config.latency_jitter_ms > 0 {
            rng.gen_range(0..self.config.latency_jitter_ms)
        } else {
            0
        };
        tokio::time::sleep(Duration::from_millis(self.config.base_latency_ms + jitter)).await;
    }
}

#[async_trait]
impl VenueAdapter for MockVenueAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load_instruments(&self) -> AppResult<Vec<InstrumentMeta>> {
        Ok(vec![InstrumentMeta {
            symbol: "BTC/USDT".to_string(),
            min_quantity: self.config.min_order_quantity,
            price_tick: 0.01,
            quantity_step: 0.0001,
        }])
    }

    async fn get_ticker(&self, symbol: &str) -> AppResult<Ticker> {
        let last = self.reference_price(symbol);
        Ok(Ticker {
            venue: self.name.clone(),
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            last,
            bid: last * 0.9995,
            ask: last * 1.0005,
            high_24h: last * 1.02,
            low_24h: last * 0.98,
            base_volume_24h: 1000.0,
            quote_volume_24h: last * 1000.0,
            change_24h: 0.0,
            change_pct_24h: 0.0,
        })
    }

    async fn get_order_book(&self, symbol: &str, depth: usize) -> AppResult<OrderBook> {
        let last = self.reference_price(symbol);
        let n = depth.max(1);
        let bids = (0..n)
            .map(|i| PriceLevel {
                price: last * (1.0 - 0.0005 * (i + 1) as f64),
                quantity: 1.0,
            })
            .collect();
        let asks = (0..n)
            .map(|i| PriceLevel {
                price: last * (1.0 + 0.0005 * (i + 1) as f64),
                quantity: 1.0,
            })
            .collect();
        Ok(OrderBook {
            venue: self.name.clone(),
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            bids,
            asks,
        })
    }

    async fn get_trade_history(&self, _symbol: &str, _limit: usize) -> AppResult<Vec<crate::models::market_data::Trade>> {
        Ok(Vec::new())
    }

    async fn get_candle_history(&self, _symbol: &str, _interval: &str, _limit: usize) -> AppResult<Vec<crate::models::market_data::Candle>> {
        Ok(Vec::new())
    }

    async fn get_balances(&self) -> AppResult<Vec<Balance>> {
        Ok(vec![Balance {
            asset: "USDT".to_string(),
            free: 10_000.0,
            locked: 0.0,
        }])
    }

    async fn get_open_positions(&self) -> AppResult<Vec<VenuePosition>> {
        Ok(Vec::new())
    }

    async fn submit_market_order(&self, req: SubmitOrderRequest) -> AppResult<VenueAck> {
        self.simulate_latency().await;
        let mut rng = StdRng::from_entropy();

        if rng.gen::<f64>() < self.config.reject_prob {
            return Err(AppError::rejection("venue rejected: simulated insufficient liquidity"));
        }

        let reference = self.reference_price(&req.symbol);
        let slippage_sign = req.side.sign();
        let slippage = self.config.base_slippage_bps / 10_000.0;
        let fill_price = reference * (1.0 + slippage_sign * slippage);

        let fill_ratio = if rng.gen::<f64>() < self.config.partial_fill_prob {
            rng.gen_range(0.5..0.99)
        } else {
            1.0
        };
        let filled_quantity = req.quantity * fill_ratio;

        let venue_order_id = format!("mock-{}", Uuid::new_v4());
        let state = if fill_ratio >= 0.999 {
            VenueOrderState::Filled
        } else {
            VenueOrderState::PartiallyFilled
        };
        let ack = VenueAck {
            venue_order_id: venue_order_id.clone(),
            state,
            filled_quantity,
            average_price: Some(fill_price),
            reject_reason: None,
        };
        self.orders.lock().insert(
            venue_order_id,
            OpenOrder {
                ack: ack.clone(),
                client_order_id: req.client_order_id,
                symbol: req.symbol,
            },
        );
        Ok(ack)
    }

    async fn submit_limit_order(&self, req: SubmitOrderRequest) -> AppResult<VenueAck> {
        self.simulate_latency().await;
        let mut rng = StdRng::from_entropy();
        if rng.gen::<f64>() < self.config.reject_prob {
            return Err(AppError::rejection("venue rejected: simulated price outside band"));
        }

        let reference = self.reference_price(&req.symbol);
        let price = req.price.unwrap_or(reference);
        // A buy resting at/above ask or a sell resting at/below bid fills immediately.
        let marketable = match req.side {
            OrderSide::Buy => price >= reference,
            OrderSide::Sell => price <= reference,
        };

        let venue_order_id = format!("mock-{}", Uuid::new_v4());
        let ack = if marketable {
            VenueAck {
                venue_order_id: venue_order_id.clone(),
                state: VenueOrderState::Filled,
                filled_quantity: req.quantity,
                average_price: Some(price),
                reject_reason: None,
            }
        } else {
            VenueAck {
                venue_order_id: venue_order_id.clone(),
                state: VenueOrderState::Open,
                filled_quantity: 0.0,
                average_price: None,
                reject_reason: None,
            }
        };
        self.orders.lock().insert(
            venue_order_id,
            OpenOrder {
                ack: ack.clone(),
                client_order_id: req.client_order_id,
                symbol: req.symbol,
            },
        );
        Ok(ack)
    }

    async fn cancel_order(&self, _symbol: &str, venue_order_id: &str) -> AppResult<()> {
        let mut orders = self.orders.lock();
        match orders.get_mut(venue_order_id) {
            Some(open) if !matches!(open.ack.state, VenueOrderState::Filled | VenueOrderState::Canceled) => {
                open.ack.state = VenueOrderState::Canceled;
                Ok(())
            }
            Some(_) => Ok(()), // already terminal: cancel is a no-op, not a failure
            None => Err(AppError::Validation(format!("unknown venue order id {venue_order_id}"))),
        }
    }

    async fn fetch_order(&self, _symbol: &str, venue_order_id: &str) -> AppResult<VenueAck> {
        self.orders
            .lock()
            .get(venue_order_id)
            .map(|o| o.ack.clone())
            .ok_or_else(|| AppError::Validation(format!("unknown venue order id {venue_order_id}")))
    }

    async fn fetch_order_by_client_id(&self, symbol: &str, client_order_id: &str) -> AppResult<Option<VenueAck>> {
        Ok(self
            .orders
            .lock()
            .values()
            .find(|o| o.symbol == symbol && o.client_order_id == client_order_id)
            .map(|o| o.ack.clone()))
    }

    async fn fetch_open_orders(&self, symbol: Option<&str>) -> AppResult<Vec<VenueAck>> {
        Ok(self
            .orders
            .lock()
            .values()
            .filter(|o| symbol.map(|s| s == o.symbol).unwrap_or(true))
            .filter(|o| matches!(o.ack.state, VenueOrderState::Open | VenueOrderState::PartiallyFilled))
            .map(|o| o.ack.clone())
            .collect())
    }

    async fn subscribe_market_data(&self, channel: DataChannel, symbols: Vec<String>) -> AppResult<mpsc::Receiver<MarketRecord>> {
        let (tx, rx) = mpsc::channel(256);
        let reference_prices = self.reference_prices.lock().clone();
        let venue = self.name.clone();
        tokio::spawn(async move {
            let mut rng = StdRng::from_entropy();
            let mut prices: HashMap<String, f64> = symbols
                .iter()
                .map(|s| (s.clone(), *reference_prices.get(s).unwrap_or(&100.0)))
                .collect();
            loop {
                for symbol in &symbols {
                    let last = prices.get_mut(symbol).unwrap();
                    *last *= 1.0 + rng.gen_range(-0.0005..0.0005);
                    let record = match channel {
                        DataChannel::Ticker => MarketRecord::Ticker(Ticker {
                            venue: venue.clone(),
                            symbol: symbol.clone(),
                            timestamp: Utc::now(),
                            last: *last,
                            bid: *last * 0.9995,
                            ask: *last * 1.0005,
                            high_24h: *last * 1.02,
                            low_24h: *last * 0.98,
                            base_volume_24h: 1000.0,
                            quote_volume_24h: *last * 1000.0,
                            change_24h: 0.0,
                            change_pct_24h: 0.0,
                        }),
                        DataChannel::Book => MarketRecord::Book(OrderBook {
                            venue: venue.clone(),
                            symbol: symbol.clone(),
                            timestamp: Utc::now(),
                            bids: vec![PriceLevel { price: *last * 0.999, quantity: 1.0 }],
                            asks: vec![PriceLevel { price: *last * 1.001, quantity: 1.0 }],
                        }),
                        _ => continue,
                    };
                    if tx.send(record).await.is_err() {
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
                // Simulated disconnect: closing the channel lets the collector exercise reconnect.
                if rng.gen::<f64>() < 0.001 {
                    return;
                }
            }
        });
        Ok(rx)
    }

    fn supports(&self, _capability: Capability) -> bool {
        false
    }

    async fn set_leverage(&self, _symbol: &str, _leverage: f64) -> AppResult<()> {
        Err(AppError::Validation("capability not supported by this venue".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn market_order_fills_at_slippage_adjusted_price() {
        let venue = MockVenueAdapter::new("mock", MockVenueConfig::default());
        let ack = venue
            .submit_market_order(SubmitOrderRequest {
                symbol: "BTC/USDT".to_string(),
                side: OrderSide::Buy,
                quantity: 0.1,
                price: None,
                time_in_force: crate::models::order::TimeInForce::Ioc,
                client_order_id: "co-1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(ack.state, VenueOrderState::Filled);
        assert!(ack.average_price.unwrap() > 100.0);
    }

    #[tokio::test]
    async fn cancel_is_idempotent_on_terminal_order() {
        let venue = MockVenueAdapter::new("mock", MockVenueConfig::default());
        let ack = venue
            .submit_limit_order(SubmitOrderRequest {
                symbol: "BTC/USDT".to_string(),
                side: OrderSide::Buy,
                quantity: 0.1,
                price: Some(50.0),
                time_in_force: crate::models::order::TimeInForce::Gtc,
                client_order_id: "co-2".to_string(),
            })
            .await
            .unwrap();
        venue.cancel_order("BTC/USDT", &ack.venue_order_id).await.unwrap();
        venue.cancel_order("BTC/USDT", &ack.venue_order_id).await.unwrap();
        let fetched = venue.fetch_order("BTC/USDT", &ack.venue_order_id).await.unwrap();
        assert_eq!(fetched.state, VenueOrderState::Canceled);
    }
}
