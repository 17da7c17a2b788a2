//! Order Executor / Risk Manager / Market-Data Pipeline service entrypoint.
//!
//! Wires the collaborators constructed throughout the library crate —
//! queue, order/position services, risk gate and monitor, market-data
//! cache/collectors — into one [`market_core_backend::AppState`] and serves
//! the HTTP surface. Grounded on teacher's own `main.rs`: `dotenv` + tracing
//! init, then a flat sequence of `Arc::new` constructions feeding one
//! `AppState`, then spawned background tasks before `axum::serve`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Mutex as AsyncMutex;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use market_core_backend::kv::memory::InMemoryKv;
use market_core_backend::kv::KvStore;
use market_core_backend::market_data::{Collector, MarketDataCache, TimeSeriesStore};
use market_core_backend::queue::PriorityOrderQueue;
use market_core_backend::risk::{AlertService, PnlTracker, RiskGate, RiskMonitor};
use market_core_backend::services::order_service::OrderFilters;
use market_core_backend::services::{OrderService, PositionService};
use market_core_backend::venue::mock::{MockVenueAdapter, MockVenueConfig};
use market_core_backend::venue::{DataChannel, VenueAdapter};
use market_core_backend::{api, AppState, Config};

const TRACKED_SYMBOLS: &[&str] = &["BTC/USDT", "ETH/USDT"];
const DEFAULT_INITIAL_EQUITY: f64 = 1_000_000.0;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env();
    info!(bind_addr = %config.bind_addr, db_path = %config.db_path, "starting order executor / risk manager / market-data pipeline");

    let orders_conn = rusqlite::Connection::open(&config.db_path).context("failed to open orders/positions database")?;
    let db = Arc::new(AsyncMutex::new(orders_conn));

    let ts_conn = rusqlite::Connection::open(&config.db_path).context("failed to open time-series database")?;
    let timeseries = Arc::new(TimeSeriesStore::new(Arc::new(AsyncMutex::new(ts_conn))));

    let kv: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());
    let market_cache = Arc::new(MarketDataCache::new(
        kv.clone(),
        config.collector.ticker_staleness,
        config.collector.book_staleness,
    ));

    let queue = Arc::new(PriorityOrderQueue::new(
        kv.clone(),
        config.queue_max_attempts,
        Duration::from_secs(config.queue_retry_base_secs),
        config.queue_workers,
    ));

    let positions = Arc::new(PositionService::new(db.clone()));
    positions.init_schema().await.context("failed to init positions schema")?;

    let mut venues: HashMap<String, Arc<dyn VenueAdapter>> = HashMap::new();
    venues.insert("mock".to_string(), MockVenueAdapter::new("mock", MockVenueConfig::default()));

    let pnl = Arc::new(PnlTracker::new(DEFAULT_INITIAL_EQUITY));
    let orders = Arc::new(OrderService::new(db.clone(), queue.clone(), positions.clone(), pnl.clone(), venues.clone()));
    orders.init_schema().await.context("failed to init orders schema")?;

    let alerts = Arc::new(AlertService::new(kv.clone(), config.risk.alert_dedup_window));
    let risk_gate = Arc::new(RiskGate::new(kv.clone(), positions.clone(), pnl.clone(), config.risk.clone()));
    let risk_monitor = Arc::new(RiskMonitor::new(kv.clone(), positions.clone(), pnl.clone(), alerts.clone(), config.risk.clone()));

    let state = AppState {
        orders: orders.clone(),
        positions: positions.clone(),
        risk_gate,
        risk_monitor: risk_monitor.clone(),
        alerts,
        pnl,
        market_cache: market_cache.clone(),
        timeseries: timeseries.clone(),
        kv: kv.clone(),
        queue: queue.clone(),
        config: config.clone(),
    };

    for worker_id in 0..config.queue_workers {
        let orders = orders.clone();
        tokio::spawn(async move { orders.run_worker(worker_id).await });
    }

    {
        let pnl = pnl.clone();
        tokio::spawn(async move { run_daily_reset(pnl).await });
    }

    {
        let orders = orders.clone();
        let positions = positions.clone();
        let active_users: Arc<dyn Fn() -> Vec<String> + Send + Sync> = Arc::new(move || {
            let mut users: HashSet<String> = orders.query(&OrderFilters::default()).into_iter().map(|o| o.strategy).collect();
            users.extend(positions.query(None, None, None).into_iter().map(|p| p.strategy));
            users.into_iter().collect()
        });
        tokio::spawn(async move { risk_monitor.run(active_users).await });
    }

    for (venue_name, venue) in venues.iter() {
        for channel in [DataChannel::Ticker, DataChannel::Book] {
            let collector = Arc::new(Collector::new(
                venue_name.clone(),
                venue.clone(),
                channel,
                TRACKED_SYMBOLS.iter().map(|s| s.to_string()).collect(),
                market_cache.clone(),
                timeseries.clone(),
                kv.clone(),
                config.collector.clone(),
            ));
            tokio::spawn(async move { collector.run().await });
        }
    }

    let app = api::router(state).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

/// Rolls every user's `realized_today` counter at each UTC midnight (spec
/// §4.9's daily-loss cap resets with the trading day, not with process
/// uptime).
async fn run_daily_reset(pnl: Arc<PnlTracker>) {
    loop {
        let now = chrono::Utc::now();
        let tomorrow = (now + chrono::Duration::days(1)).date_naive().and_hms_opt(0, 0, 0).unwrap();
        let until_midnight = (tomorrow.and_utc() - now).to_std().unwrap_or(Duration::from_secs(86_400));
        tokio::time::sleep(until_midnight).await;
        pnl.reset_daily();
        info!("rolled daily P&L counters at UTC day boundary");
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "market_core_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
