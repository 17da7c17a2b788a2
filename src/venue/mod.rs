//! Venue Adapter (spec §4.1): uniform facade over a trading venue's public and
//! private API plus its websocket streams. Grounded on teacher's
//! `vault/execution.rs::ExecutionAdapter` trait (`async fn place_order(&self,
//! req) -> Result<OrderAck>`), generalized to the full capability set spec.md
//! names.

pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::AppResult;
use crate::models::order::{OrderSide, TimeInForce};
use crate::models::market_data::{Candle, MarketRecord, OrderBook, Ticker, Trade};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentMeta {
    pub symbol: String,
    pub min_quantity: f64,
    pub price_tick: f64,
    pub quantity_step: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: f64,
    pub locked: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenuePosition {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub entry_price: f64,
}

/// Parameters for a single submit call. `price` is `None` for market orders.
#[derive(Debug, Clone)]
pub struct SubmitOrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: Option<f64>,
    pub time_in_force: TimeInForce,
    pub client_order_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueOrderState {
    Open,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueAck {
    pub venue_order_id: String,
    pub state: VenueOrderState,
    pub filled_quantity: f64,
    pub average_price: Option<f64>,
    pub reject_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataChannel {
    Ticker,
    Book,
    Trade,
    Candle,
}

/// Capabilities a venue may or may not support. "Missing" is distinguished
/// from "failed" by querying `supports()` before calling the corresponding
/// method, per spec §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Leverage,
    MarginMode,
    HedgeMode,
    FundingRate,
    SubAccountTransfer,
}

#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn load_instruments(&self) -> AppResult<Vec<InstrumentMeta>>;
    async fn get_ticker(&self, symbol: &str) -> AppResult<Ticker>;
    async fn get_order_book(&self, symbol: &str, depth: usize) -> AppResult<OrderBook>;
    async fn get_trade_history(&self, symbol: &str, limit: usize) -> AppResult<Vec<Trade>>;
    async fn get_candle_history(&self, symbol: &str, interval: &str, limit: usize) -> AppResult<Vec<Candle>>;

    async fn get_balances(&self) -> AppResult<Vec<Balance>>;
    async fn get_open_positions(&self) -> AppResult<Vec<VenuePosition>>;

    async fn submit_market_order(&self, req: SubmitOrderRequest) -> AppResult<VenueAck>;
    async fn submit_limit_order(&self, req: SubmitOrderRequest) -> AppResult<VenueAck>;
    async fn cancel_order(&self, symbol: &str, venue_order_id: &str) -> AppResult<()>;
    async fn fetch_order(&self, symbol: &str, venue_order_id: &str) -> AppResult<VenueAck>;
    async fn fetch_order_by_client_id(&self, symbol: &str, client_order_id: &str) -> AppResult<Option<VenueAck>>;
    async fn fetch_open_orders(&self, symbol: Option<&str>) -> AppResult<Vec<VenueAck>>;

    /// Subscribe to a public data channel for the given symbols. Returns a
    /// channel of parsed records; the sender side closes on disconnect so the
    /// collector (which owns reconnect/backoff, per spec §4.10) can detect it.
    async fn subscribe_market_data(&self, channel: DataChannel, symbols: Vec<String>) -> AppResult<mpsc::Receiver<MarketRecord>>;

    fn supports(&self, capability: Capability) -> bool;
    async fn set_leverage(&self, symbol: &str, leverage: f64) -> AppResult<()>;
}
