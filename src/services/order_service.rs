//! Order service (spec §4.7): thin stateful layer in front of the executors.
//! Owns the in-memory order map and its durable mirror; direct field
//! mutation by callers is forbidden, all access goes through this API.
//! The executor-dispatch methods (`execute_market`, `execute_limit`,
//! `spawn_twap`, `spawn_iceberg`, `run_worker`) live in sibling `impl
//! OrderService` blocks under `execution::*`, grounded on the same
//! architecture teacher's `AppState` uses: one big owning struct, many
//! `Arc<T>` collaborators.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::execution::iceberg::IcebergPlan;
use crate::execution::twap::TwapPlan;
use crate::models::order::{Order, OrderKind, OrderSide, OrderStatus, TimeInForce};
use crate::queue::PriorityOrderQueue;
use crate::risk::PnlTracker;
use crate::services::position_service::PositionService;
use crate::venue::VenueAdapter;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderRequest {
    pub strategy: String,
    pub venue: String,
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: crate::models::order::OrderType,
    pub quantity: f64,
    pub price: Option<f64>,
    pub time_in_force: Option<TimeInForce>,
    pub twap_slices: Option<u32>,
    pub twap_interval: Option<u64>,
    pub iceberg_visible_ratio: Option<f64>,
    pub stop_price: Option<f64>,
    pub client_order_id: Option<String>,
    pub priority: Option<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderStatistics {
    pub counts_by_state: HashMap<String, usize>,
    pub total_filled_quantity: f64,
    pub total_filled_value: f64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Default)]
pub struct OrderFilters {
    pub strategy: Option<String>,
    pub venue: Option<String>,
    pub symbol: Option<String>,
    pub status: Option<OrderStatus>,
    pub limit: usize,
    pub offset: usize,
}

pub struct OrderService {
    pub(crate) orders: RwLock<HashMap<Uuid, Order>>,
    pub(crate) db: Arc<AsyncMutex<rusqlite::Connection>>,
    pub(crate) queue: Arc<PriorityOrderQueue>,
    pub(crate) positions: Arc<PositionService>,
    pub(crate) pnl: Arc<PnlTracker>,
    pub(crate) venues: HashMap<String, Arc<dyn VenueAdapter>>,
    pub(crate) twap_plans: RwLock<HashMap<Uuid, Arc<TwapPlan>>>,
    pub(crate) iceberg_plans: RwLock<HashMap<Uuid, Arc<IcebergPlan>>>,
    pub(crate) default_twap_slices: u32,
    pub(crate) default_twap_interval_secs: u64,
    pub(crate) default_iceberg_ratio: f64,
}

impl OrderService {
    pub fn new(
        db: Arc<AsyncMutex<rusqlite::Connection>>,
        queue: Arc<PriorityOrderQueue>,
        positions: Arc<PositionService>,
        pnl: Arc<PnlTracker>,
        venues: HashMap<String, Arc<dyn VenueAdapter>>,
    ) -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
            db,
            queue,
            positions,
            pnl,
            venues,
            twap_plans: RwLock::new(HashMap::new()),
            iceberg_plans: RwLock::new(HashMap::new()),
            default_twap_slices: 10,
            default_twap_interval_secs: 60,
            default_iceberg_ratio: 0.1,
        }
    }

    pub async fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.db.lock().await;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn persist(&self, order: &Order) {
        let db = self.db.clone();
        let order = order.clone();
        tokio::spawn(async move {
            if let Ok(payload) = serde_json::to_string(&order) {
                let conn = db.lock().await;
                let _ = conn.execute(
                    "INSERT INTO orders (id, payload, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
                    rusqlite::params![order.id.to_string(), payload, order.updated_at.to_rfc3339()],
                );
            }
        });
    }

    fn validate(req: &CreateOrderRequest) -> AppResult<OrderKind> {
        use crate::models::order::OrderType::*;
        if req.quantity <= 0.0 {
            return Err(AppError::Validation("quantity must be positive".to_string()));
        }
        match req.order_type {
            Market => Ok(OrderKind::Market),
            Limit => {
                let price = req
                    .price
                    .ok_or_else(|| AppError::Validation("limit order requires a price".to_string()))?;
                Ok(OrderKind::Limit { price })
            }
            Twap => {
                let slices = req.twap_slices.unwrap_or(10);
                let interval = req.twap_interval.unwrap_or(60);
                if slices < 2 {
                    return Err(AppError::Validation("twap requires at least 2 slices".to_string()));
                }
                if interval < 1 {
                    return Err(AppError::Validation("twap interval must be at least 1 second".to_string()));
                }
                Ok(OrderKind::Twap {
                    slices,
                    interval_secs: interval,
                })
            }
            Iceberg => {
                let ratio = req.iceberg_visible_ratio.unwrap_or(0.1);
                if !(ratio > 0.0 && ratio <= 1.0) {
                    return Err(AppError::Validation("iceberg visible_ratio must be in (0, 1]".to_string()));
                }
                Ok(OrderKind::Iceberg {
                    visible_ratio: ratio,
                    price: req.price,
                })
            }
            StopLoss => {
                let stop = req
                    .stop_price
                    .ok_or_else(|| AppError::Validation("stop_loss requires a stop_price".to_string()))?;
                Ok(OrderKind::StopLoss { stop_price: stop })
            }
            TakeProfit => {
                let stop = req
                    .stop_price
                    .ok_or_else(|| AppError::Validation("take_profit requires a stop_price".to_string()))?;
                Ok(OrderKind::TakeProfit { stop_price: stop })
            }
        }
    }

    /// Runs intent-level validations, assigns an id, persists a pending order
    /// record, enqueues it. Callers are expected to have already run the
    /// pre-trade risk gate (spec §4.8) before calling this.
    pub fn create(&self, req: CreateOrderRequest) -> AppResult<Order> {
        let kind = Self::validate(&req)?;
        if !self.venues.contains_key(&req.venue) {
            return Err(AppError::Validation(format!("unknown venue {}", req.venue)));
        }

        let order = Order::new(
            req.strategy,
            req.venue,
            req.symbol,
            req.side,
            kind,
            req.quantity,
            req.time_in_force.unwrap_or_default(),
            req.priority.unwrap_or(0).min(10),
            req.client_order_id,
            None,
        );

        self.orders.write().insert(order.id, order.clone());
        self.persist(&order);
        self.queue
            .enqueue(order.id, order.priority)
            .map_err(|e| AppError::Transient(e.to_string()))?;
        Ok(order)
    }

    /// Looks up the order; a no-op on a terminal order, delegates to the
    /// parent-state machine for TWAP/iceberg, otherwise calls the venue
    /// cancel for the captured venue-id and transitions to canceled.
    pub async fn cancel(&self, id: Uuid, _reason: Option<String>) -> AppResult<Order> {
        let snapshot = self.get(id).ok_or_else(|| AppError::Validation(format!("unknown order {id}")))?;
        if snapshot.status.is_terminal() {
            return Ok(snapshot);
        }

        let venue = self.venues.get(&snapshot.venue).cloned();
        match snapshot.kind {
            OrderKind::Twap { .. } => {
                if let (Some(plan), Some(venue)) = (self.twap_plans.read().get(&id).cloned(), &venue) {
                    plan.cancel(venue).await;
                }
            }
            OrderKind::Iceberg { .. } => {
                if let (Some(plan), Some(venue)) = (self.iceberg_plans.read().get(&id).cloned(), &venue) {
                    plan.cancel(venue).await;
                }
            }
            _ => {
                if let (Some(venue), Some(venue_order_id)) = (&venue, &snapshot.venue_order_id) {
                    let _ = venue.cancel_order(&snapshot.symbol, venue_order_id).await;
                }
            }
        }

        self.update(id, |o| o.transition(OrderStatus::Canceled));
        Ok(self.get(id).unwrap())
    }

    pub fn get(&self, id: Uuid) -> Option<Order> {
        self.orders.read().get(&id).cloned()
    }

    pub fn query(&self, filters: &OrderFilters) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .read()
            .values()
            .filter(|o| filters.strategy.as_deref().map(|s| s == o.strategy).unwrap_or(true))
            .filter(|o| filters.venue.as_deref().map(|v| v == o.venue).unwrap_or(true))
            .filter(|o| filters.symbol.as_deref().map(|s| s == o.symbol).unwrap_or(true))
            .filter(|o| filters.status.map(|s| s == o.status).unwrap_or(true))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let limit = if filters.limit == 0 { orders.len() } else { filters.limit };
        orders.into_iter().skip(filters.offset).take(limit).collect()
    }

    pub fn statistics(&self, strategy: Option<&str>) -> OrderStatistics {
        let orders: Vec<Order> = self
            .orders
            .read()
            .values()
            .filter(|o| strategy.map(|s| s == o.strategy).unwrap_or(true))
            .cloned()
            .collect();

        let mut counts_by_state: HashMap<String, usize> = HashMap::new();
        let mut total_filled_quantity = 0.0;
        let mut total_filled_value = 0.0;
        for o in &orders {
            *counts_by_state.entry(format!("{:?}", o.status)).or_insert(0) += 1;
            total_filled_quantity += o.filled_quantity;
            total_filled_value += o.filled_quantity * o.avg_fill_price.unwrap_or(0.0);
        }
        let filled = counts_by_state.get("Filled").copied().unwrap_or(0);
        let canceled = counts_by_state.get("Canceled").copied().unwrap_or(0);
        let failed = counts_by_state.get("Failed").copied().unwrap_or(0);
        let denom = filled + canceled + failed;
        let success_rate = if denom == 0 { 0.0 } else { filled as f64 / denom as f64 };

        OrderStatistics {
            counts_by_state,
            total_filled_quantity,
            total_filled_value,
            success_rate,
        }
    }

    /// Mutates an order in place via the owning service, then persists and
    /// republishes. This is the only path any code (including the
    /// `execution::*` impl blocks) is allowed to use to change order state.
    pub fn update(&self, id: Uuid, f: impl FnOnce(&mut Order)) {
        let mut orders = self.orders.write();
        if let Some(order) = orders.get_mut(&id) {
            f(order);
            let snapshot = order.clone();
            drop(orders);
            self.persist(&snapshot);
        }
    }

    /// Records a fill against the order and mirrors it into the position
    /// service using the merge algebra of spec §4.7.
    pub fn record_fill(&self, id: Uuid, price: f64, quantity: f64, fee: f64) {
        let (strategy, venue, symbol, side) = {
            let orders = self.orders.read();
            let Some(order) = orders.get(&id) else { return };
            (order.strategy.clone(), order.venue.clone(), order.symbol.clone(), order.side)
        };
        self.update(id, |o| {
            o.apply_execution(crate::models::order::Execution {
                timestamp: Utc::now(),
                price,
                quantity,
                fee_amount: fee,
                fee_currency: "USDT".to_string(),
                venue_trade_id: None,
            });
        });
        let realized = self.positions.update_from_fill(&strategy, &venue, &symbol, side, quantity, price);
        if realized != 0.0 {
            self.pnl.record_realized(&strategy, realized);
        }
    }

    /// Builds and persists a market order that bypasses the priority queue,
    /// then executes it synchronously against the venue. Used only by the
    /// emergency-stop RPC (spec §4.9) to flatten a position without racing a
    /// queue worker over the same order id.
    pub async fn flatten_now(&self, strategy: String, venue: String, symbol: String, side: OrderSide, quantity: f64) -> AppResult<Order> {
        if !self.venues.contains_key(&venue) {
            return Err(AppError::Validation(format!("unknown venue {venue}")));
        }
        let order = Order::new(strategy, venue, symbol, side, OrderKind::Market, quantity, TimeInForce::default(), 10, None, None);
        self.orders.write().insert(order.id, order.clone());
        self.persist(&order);
        self.execute_market(order.id).await?;
        Ok(self.get(order.id).expect("just inserted"))
    }

    pub fn venue_for(&self, name: &str) -> Option<Arc<dyn VenueAdapter>> {
        self.venues.get(name).cloned()
    }

    pub fn retry_backoff_for(&self) -> Duration {
        Duration::from_secs(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::InMemoryKv;
    use crate::venue::mock::{MockVenueAdapter, MockVenueConfig};

    fn service() -> OrderService {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let db = Arc::new(AsyncMutex::new(conn));
        let kv = Arc::new(InMemoryKv::new());
        let queue = Arc::new(PriorityOrderQueue::new(kv, 3, Duration::from_millis(1), 4));
        let positions = Arc::new(PositionService::new(db.clone()));
        let pnl = Arc::new(PnlTracker::new(100_000.0));
        let mut venues: HashMap<String, Arc<dyn VenueAdapter>> = HashMap::new();
        venues.insert("mock".to_string(), MockVenueAdapter::new("mock", MockVenueConfig::default()));
        OrderService::new(db, queue, positions, pnl, venues)
    }

    #[test]
    fn create_rejects_unknown_venue() {
        let svc = service();
        let req = CreateOrderRequest {
            strategy: "s1".into(),
            venue: "nope".into(),
            symbol: "BTC/USDT".into(),
            side: OrderSide::Buy,
            order_type: crate::models::order::OrderType::Market,
            quantity: 1.0,
            price: None,
            time_in_force: None,
            twap_slices: None,
            twap_interval: None,
            iceberg_visible_ratio: None,
            stop_price: None,
            client_order_id: None,
            priority: None,
        };
        assert!(svc.create(req).is_err());
    }

    #[test]
    fn create_limit_without_price_is_rejected() {
        let svc = service();
        let req = CreateOrderRequest {
            strategy: "s1".into(),
            venue: "mock".into(),
            symbol: "BTC/USDT".into(),
            side: OrderSide::Buy,
            order_type: crate::models::order::OrderType::Limit,
            quantity: 1.0,
            price: None,
            time_in_force: None,
            twap_slices: None,
            twap_interval: None,
            iceberg_visible_ratio: None,
            stop_price: None,
            client_order_id: None,
            priority: None,
        };
        assert!(svc.create(req).is_err());
    }

    #[tokio::test]
    async fn cancel_on_unknown_order_errors() {
        let svc = service();
        assert!(svc.cancel(Uuid::new_v4(), None).await.is_err());
    }

    #[test]
    fn record_fill_feeds_realized_pnl_into_the_tracker_on_close() {
        let svc = service();

        let open_order = Order::new(
            "s1".into(),
            "mock".into(),
            "BTC/USDT".into(),
            OrderSide::Buy,
            OrderKind::Market,
            1.0,
            TimeInForce::default(),
            0,
            None,
            None,
        );
        svc.orders.write().insert(open_order.id, open_order.clone());
        svc.record_fill(open_order.id, 100.0, 1.0, 0.0);
        assert_eq!(svc.pnl.snapshot("s1").realized_today, 0.0);

        let close_order = Order::new(
            "s1".into(),
            "mock".into(),
            "BTC/USDT".into(),
            OrderSide::Sell,
            OrderKind::Market,
            1.0,
            TimeInForce::default(),
            0,
            None,
            None,
        );
        svc.orders.write().insert(close_order.id, close_order.clone());
        svc.record_fill(close_order.id, 110.0, 1.0, 0.0);
        assert!((svc.pnl.snapshot("s1").realized_today - 10.0).abs() < 1e-9);
    }
}
