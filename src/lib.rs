//! Order Executor / Risk Manager / Market-Data Pipeline core library.
//!
//! `main.rs` builds a [`Config`], constructs the [`AppState`] collaborators,
//! spawns the queue workers / risk monitor / market collectors, and serves
//! [`api::router`]. Everything here is reusable by integration tests without
//! going through a bound socket.

pub mod api;
pub mod config;
pub mod error;
pub mod execution;
pub mod kv;
pub mod market_data;
pub mod models;
pub mod queue;
pub mod risk;
pub mod services;
pub mod venue;

use std::sync::Arc;

pub use config::Config;
use kv::KvStore;
use market_data::{MarketDataCache, TimeSeriesStore};
use queue::PriorityOrderQueue;
use risk::{AlertService, PnlTracker, RiskGate, RiskMonitor};
use services::{OrderService, PositionService};

/// Shared application state, constructed once in `main` and cloned into
/// every axum handler — one owning struct, many `Arc<T>` collaborators,
/// the same shape as teacher's `AppState` (spec §9's "service instances
/// constructed in a lifecycle-managed container").
#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderService>,
    pub positions: Arc<PositionService>,
    pub risk_gate: Arc<RiskGate>,
    pub risk_monitor: Arc<RiskMonitor>,
    pub alerts: Arc<AlertService>,
    pub pnl: Arc<PnlTracker>,
    pub market_cache: Arc<MarketDataCache>,
    pub timeseries: Arc<TimeSeriesStore>,
    pub kv: Arc<dyn KvStore>,
    pub queue: Arc<PriorityOrderQueue>,
    pub config: Config,
}
