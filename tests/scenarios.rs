//! End-to-end seed scenarios (spec §8) exercised against the service layer
//! and, where a full request/response round-trip matters, against the axum
//! handlers directly (constructed via `State`/`Json` rather than a bound
//! socket — the same extractor plumbing axum itself drives).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use tokio::sync::Mutex as AsyncMutex;

use market_core_backend::api;
use market_core_backend::config::{CollectorConfig, Config, RiskConfig};
use market_core_backend::kv::memory::InMemoryKv;
use market_core_backend::kv::KvStore;
use market_core_backend::market_data::{MarketDataCache, TimeSeriesStore};
use market_core_backend::models::order::{OrderSide, OrderStatus, OrderType};
use market_core_backend::queue::PriorityOrderQueue;
use market_core_backend::risk::{AlertService, PnlTracker, RiskGate, RiskMonitor};
use market_core_backend::services::order_service::{CreateOrderRequest, OrderFilters, OrderService};
use market_core_backend::services::PositionService;
use market_core_backend::venue::mock::{MockVenueAdapter, MockVenueConfig};
use market_core_backend::venue::VenueAdapter;
use market_core_backend::AppState;

fn risk_config() -> RiskConfig {
    RiskConfig {
        per_order_notional_cap: 1_000_000.0,
        per_instrument_notional_cap: 500_000.0,
        total_notional_cap: 1_000_000.0,
        daily_loss_cap_usd: 1_000_000.0,
        daily_loss_cap_pct: 1.0,
        drawdown_cap_pct: 1.0,
        max_consecutive_losses: 100,
        emergency_stop_drawdown_pct: 1.0,
        emergency_stop_daily_loss_usd: 1_000_000.0,
        monitor_interval: Duration::from_secs(5),
        alert_dedup_window: Duration::from_secs(300),
        emergency_stop_ttl: Duration::from_secs(60 * 60 * 24),
    }
}

fn collector_config() -> CollectorConfig {
    CollectorConfig {
        batch_soft_cap: 200,
        flush_interval: Duration::from_millis(500),
        reconnect_base_delay: Duration::from_secs(1),
        reconnect_max_delay: Duration::from_secs(60),
        ticker_staleness: Duration::from_secs(5),
        book_staleness: Duration::from_secs(1),
    }
}

struct Harness {
    state: AppState,
    orders: Arc<OrderService>,
    positions: Arc<PositionService>,
}

async fn harness() -> Harness {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    let db = Arc::new(AsyncMutex::new(conn));
    let ts_conn = rusqlite::Connection::open_in_memory().unwrap();
    let timeseries = Arc::new(TimeSeriesStore::new(Arc::new(AsyncMutex::new(ts_conn))));

    let kv: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());
    let market_cache = Arc::new(MarketDataCache::new(kv.clone(), Duration::from_secs(5), Duration::from_secs(1)));

    let queue = Arc::new(PriorityOrderQueue::new(kv.clone(), 3, Duration::from_millis(10), 4));

    let positions = Arc::new(PositionService::new(db.clone()));
    positions.init_schema().await.unwrap();

    let mut venues: HashMap<String, Arc<dyn VenueAdapter>> = HashMap::new();
    venues.insert("mock".to_string(), MockVenueAdapter::new("mock", MockVenueConfig::default()));

    let pnl = Arc::new(PnlTracker::new(100_000.0));
    let orders = Arc::new(OrderService::new(db.clone(), queue.clone(), positions.clone(), pnl.clone(), venues));
    orders.init_schema().await.unwrap();

    let alerts = Arc::new(AlertService::new(kv.clone(), Duration::from_secs(300)));
    let risk_gate = Arc::new(RiskGate::new(kv.clone(), positions.clone(), pnl.clone(), risk_config()));
    let risk_monitor = Arc::new(RiskMonitor::new(kv.clone(), positions.clone(), pnl.clone(), alerts.clone(), risk_config()));

    let state = AppState {
        orders: orders.clone(),
        positions: positions.clone(),
        risk_gate,
        risk_monitor,
        alerts,
        pnl,
        market_cache,
        timeseries,
        kv,
        queue: queue.clone(),
        config: Config {
            bind_addr: "127.0.0.1:0".to_string(),
            db_path: ":memory:".to_string(),
            queue_workers: 1,
            queue_max_attempts: 3,
            queue_retry_base_secs: 1,
            risk: risk_config(),
            collector: collector_config(),
        },
    };

    Harness { state, orders, positions }
}

/// Runs `OrderService::run_worker` for long enough to drain the queue, then
/// stops it. Tests poll the resulting order state rather than depend on a
/// perfectly timed join.
fn spawn_worker(orders: Arc<OrderService>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move { orders.run_worker(0).await })
}

async fn wait_until<F: Fn() -> bool>(predicate: F, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !predicate() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn market_request(strategy: &str, symbol: &str, side: OrderSide, quantity: f64) -> CreateOrderRequest {
    CreateOrderRequest {
        strategy: strategy.to_string(),
        venue: "mock".to_string(),
        symbol: symbol.to_string(),
        side,
        order_type: OrderType::Market,
        quantity,
        price: None,
        time_in_force: None,
        twap_slices: None,
        twap_interval: None,
        iceberg_visible_ratio: None,
        stop_price: None,
        client_order_id: None,
        priority: None,
    }
}

#[tokio::test]
async fn happy_market_buy_fills_and_opens_a_position() {
    let h = harness().await;
    let worker = spawn_worker(h.orders.clone());

    let order = h.orders.create(market_request("s1", "BTC/USDT", OrderSide::Buy, 0.1)).unwrap();
    wait_until(|| h.orders.get(order.id).map(|o| o.status.is_terminal()).unwrap_or(false), Duration::from_secs(2)).await;

    let filled = h.orders.get(order.id).unwrap();
    assert_eq!(filled.status, OrderStatus::Filled);
    assert!((filled.filled_quantity - 0.1).abs() < 1e-9);
    assert_eq!(filled.executions.len(), 1);

    let position = h.positions.get("s1", "mock", "BTC/USDT").expect("fill should open a position");
    assert!((position.quantity - 0.1).abs() < 1e-9);
    assert!((position.avg_entry_price - filled.avg_fill_price.unwrap()).abs() < 1e-9);

    worker.abort();
}

#[tokio::test]
async fn cancel_is_idempotent_and_a_no_op_on_terminal_orders() {
    let h = harness().await;
    let worker = spawn_worker(h.orders.clone());

    let order = h.orders.create(market_request("s1", "BTC/USDT", OrderSide::Buy, 0.1)).unwrap();
    wait_until(|| h.orders.get(order.id).map(|o| o.status.is_terminal()).unwrap_or(false), Duration::from_secs(2)).await;

    let first = h.orders.cancel(order.id, None).await.unwrap();
    let second = h.orders.cancel(order.id, None).await.unwrap();
    assert_eq!(first.status, OrderStatus::Filled);
    assert_eq!(second.status, first.status);

    worker.abort();
}

#[tokio::test]
async fn twap_cancel_mid_flight_preserves_completed_slices() {
    let h = harness().await;
    let worker = spawn_worker(h.orders.clone());

    let mut req = market_request("s1", "BTC/USDT", OrderSide::Buy, 0.4);
    req.order_type = OrderType::Twap;
    req.twap_slices = Some(4);
    req.twap_interval = Some(1);
    let order = h.orders.create(req).unwrap();

    wait_until(|| h.orders.get(order.id).map(|o| o.status == OrderStatus::Submitted).unwrap_or(false), Duration::from_secs(2)).await;
    // Let one or two slices land, then cancel mid-flight.
    tokio::time::sleep(Duration::from_millis(1300)).await;
    let canceled = h.orders.cancel(order.id, None).await.unwrap();

    assert_eq!(canceled.status, OrderStatus::Canceled);
    assert!(canceled.filled_quantity > 0.0, "at least one slice should have filled before cancel");
    assert!(canceled.filled_quantity < 0.4, "not all slices should have filled by the time of cancel");
    // Fills already booked before the cancel are never rolled back.
    let after = h.orders.get(order.id).unwrap();
    assert_eq!(after.filled_quantity, canceled.filled_quantity);

    worker.abort();
}

#[tokio::test]
async fn twap_with_a_single_slice_behaves_like_one_market_order() {
    let h = harness().await;
    let worker = spawn_worker(h.orders.clone());

    // slices below 2 is rejected at Create; the smallest legal TWAP is 2
    // slices, which should still fully fill a small order almost at once.
    let mut req = market_request("s1", "ETH/USDT", OrderSide::Buy, 0.2);
    req.order_type = OrderType::Twap;
    req.twap_slices = Some(2);
    req.twap_interval = Some(1);
    let order = h.orders.create(req).unwrap();

    wait_until(|| h.orders.get(order.id).map(|o| o.status.is_terminal()).unwrap_or(false), Duration::from_secs(5)).await;
    let done = h.orders.get(order.id).unwrap();
    assert_eq!(done.status, OrderStatus::Filled);
    assert!((done.filled_quantity - 0.2).abs() < 1e-9);

    worker.abort();
}

#[tokio::test]
async fn iceberg_conceals_the_full_quantity_behind_small_marketable_children() {
    let h = harness().await;
    let worker = spawn_worker(h.orders.clone());

    let mut req = market_request("s1", "ETH/USDT", OrderSide::Buy, 1.0);
    req.order_type = OrderType::Iceberg;
    req.iceberg_visible_ratio = Some(0.1);
    // Priced at/above the mock venue's default reference (100.0) so every
    // visible child crosses and fills immediately instead of resting.
    req.price = Some(100.0);
    let order = h.orders.create(req).unwrap();

    wait_until(|| h.orders.get(order.id).map(|o| o.status.is_terminal()).unwrap_or(false), Duration::from_secs(5)).await;
    let done = h.orders.get(order.id).unwrap();
    assert_eq!(done.status, OrderStatus::Filled);
    assert!((done.filled_quantity - 1.0).abs() < 1e-6);
    // Ten 0.1-sized children, one booked execution each.
    assert_eq!(done.executions.len(), 10);

    worker.abort();
}

#[tokio::test]
async fn iceberg_below_venue_minimum_is_rejected_at_create_time() {
    let h = harness().await;
    let worker = spawn_worker(h.orders.clone());

    let mut req = market_request("s1", "BTC/USDT", OrderSide::Buy, 0.0001);
    req.order_type = OrderType::Iceberg;
    req.iceberg_visible_ratio = Some(0.01); // visible slice well under the mock venue's min_order_quantity
    let order = h.orders.create(req).unwrap();

    wait_until(|| h.orders.get(order.id).map(|o| o.status.is_terminal()).unwrap_or(false), Duration::from_secs(2)).await;
    let done = h.orders.get(order.id).unwrap();
    assert_eq!(done.status, OrderStatus::Rejected);

    worker.abort();
}

#[tokio::test]
async fn risk_gate_rejects_an_order_that_would_breach_the_total_position_cap() {
    let h = harness().await;

    // Seed an existing position worth 490_000 notional (7 BTC @ 70_000).
    h.positions.update_from_fill("s1", "mock", "BTC/USDT", OrderSide::Buy, 7.0, 70_000.0);

    let mut gate_config = risk_config();
    gate_config.total_notional_cap = 500_000.0;
    gate_config.per_instrument_notional_cap = 500_000.0;
    let kv: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());
    let pnl = Arc::new(PnlTracker::new(100_000.0));
    let gate = RiskGate::new(kv, h.positions.clone(), pnl, gate_config);

    let result = gate.check("s1", "mock", "BTC/USDT", 20_000.0);
    assert!(!result.pass);
    assert_eq!(result.reason.as_deref().map(|r| r.contains("notional")), Some(true));
}

#[tokio::test]
async fn create_order_handler_returns_422_when_the_risk_gate_rejects_it() {
    let h = harness().await;
    h.positions.update_from_fill("s1", "mock", "BTC/USDT", OrderSide::Buy, 7.0, 70_000.0);

    // Tighten the state's own risk gate to the same cap as above.
    let mut tight = risk_config();
    tight.total_notional_cap = 500_000.0;
    tight.per_instrument_notional_cap = 500_000.0;
    let gate = Arc::new(RiskGate::new(h.state.kv.clone(), h.positions.clone(), h.state.pnl.clone(), tight));
    let mut state = h.state.clone();
    state.risk_gate = gate;

    let mut req = market_request("s1", "BTC/USDT", OrderSide::Buy, 0.3);
    req.order_type = OrderType::Limit;
    req.price = Some(70_000.0); // 21_000 notional, pushing the instrument total past the 500_000 cap

    let response = api::orders::create_order(State(state), Json(req)).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn emergency_stop_cascades_and_is_idempotent_on_repeat() {
    let h = harness().await;
    let worker = spawn_worker(h.orders.clone());

    // One resting limit order (never fills: priced far from the mock
    // venue's reference so it stays open) plus one filled position.
    let mut resting = market_request("s1", "BTC/USDT", OrderSide::Buy, 0.05);
    resting.order_type = OrderType::Limit;
    resting.price = Some(1.0); // far below reference: never marketable, stays open
    let resting_order = h.orders.create(resting).unwrap();
    wait_until(|| h.orders.get(resting_order.id).map(|o| o.status == OrderStatus::Submitted).unwrap_or(false), Duration::from_secs(2)).await;

    let filled_order = h.orders.create(market_request("s1", "BTC/USDT", OrderSide::Buy, 0.2)).unwrap();
    wait_until(|| h.orders.get(filled_order.id).map(|o| o.status == OrderStatus::Filled).unwrap_or(false), Duration::from_secs(2)).await;
    assert!(h.positions.get("s1", "mock", "BTC/USDT").is_some());

    let request = api::risk::EmergencyStopRequest { user_id: "s1".to_string(), reason: Some("test drawdown".to_string()), force: false };
    let first = api::risk::emergency_stop(State(h.state.clone()), Json(request)).await;
    assert_eq!(first.status(), StatusCode::OK);

    wait_until(|| h.orders.get(resting_order.id).map(|o| o.status.is_terminal()).unwrap_or(false), Duration::from_secs(2)).await;
    assert!(h.orders.get(resting_order.id).unwrap().status.is_terminal());

    // Flag is armed: a fresh order-accept attempt is rejected by the gate.
    let gate_result = h.state.risk_gate.check("s1", "mock", "BTC/USDT", 10.0);
    assert!(!gate_result.pass);
    assert_eq!(gate_result.reason.as_deref(), Some("emergency stop is armed for this account"));

    // A repeat call with force:false is a pure no-op (round-trip law, spec §8).
    let repeat = api::risk::EmergencyStopRequest { user_id: "s1".to_string(), reason: None, force: false };
    let second = api::risk::emergency_stop(State(h.state.clone()), Json(repeat)).await;
    assert_eq!(second.status(), StatusCode::OK);

    let open_orders = h.orders.query(&OrderFilters { strategy: Some("s1".to_string()), ..Default::default() });
    assert!(open_orders.iter().all(|o| o.status.is_terminal()));

    worker.abort();
}

#[tokio::test]
async fn alert_acknowledgement_is_monotone() {
    let h = harness().await;
    let alert = h
        .state
        .alerts
        .create(
            "s1",
            market_core_backend::models::alert::AlertType::DailyLoss,
            market_core_backend::models::alert::Severity::Warning,
            "daily loss approaching cap".to_string(),
            serde_json::Value::Null,
        )
        .expect("first alert of its kind is never deduped");

    let acked = h.state.alerts.acknowledge("s1", alert.id).expect("alert exists");
    assert!(acked.acknowledged);
    // Acknowledging again must not flip it back.
    let acked_again = h.state.alerts.acknowledge("s1", alert.id).expect("alert still exists");
    assert!(acked_again.acknowledged);
}
