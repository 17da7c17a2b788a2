//! Risk monitor (spec §4.9): periodic background loop evaluating every
//! tracked user's positions and P&L. Grounded on
//! `original_source/trading-engine/risk-manager/src/monitors/pnl_monitor.py`'s
//! `_monitor_loop`/`_check_user_pnl` threshold structure (daily-loss at
//! 80%/95% of cap, drawdown at 70%/90%, consecutive-losses at 80%/100%,
//! emergency-stop arming on drawdown or absolute daily-loss).

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::config::RiskConfig;
use crate::kv::{keys, KvStore};
use crate::models::alert::{AlertType, Severity};
use crate::risk::alerts::AlertService;
use crate::risk::pnl::PnlTracker;
use crate::services::position_service::PositionService;

pub struct RiskMonitor {
    kv: Arc<dyn KvStore>,
    positions: Arc<PositionService>,
    pnl: Arc<PnlTracker>,
    alerts: Arc<AlertService>,
    config: RiskConfig,
}

impl RiskMonitor {
    pub fn new(kv: Arc<dyn KvStore>, positions: Arc<PositionService>, pnl: Arc<PnlTracker>, alerts: Arc<AlertService>, config: RiskConfig) -> Self {
        Self { kv, positions, pnl, alerts, config }
    }

    /// Runs forever at `config.monitor_interval`, one pass over `users` per
    /// tick. The KV has no native key-scan in this crate's in-memory
    /// backend, so the caller supplies the active user set (every strategy
    /// with an order or position on record) rather than this task
    /// discovering it independently.
    pub async fn run(self: Arc<Self>, users: Arc<dyn Fn() -> Vec<String> + Send + Sync>) {
        let mut ticker = tokio::time::interval(self.config.monitor_interval);
        loop {
            ticker.tick().await;
            for user in users() {
                self.evaluate_user(&user);
            }
        }
    }

    fn evaluate_user(&self, user: &str) {
        let (total_notional, largest_notional) = self.positions.exposure(user);
        if total_notional > 0.0 {
            let concentration = largest_notional / total_notional;
            if concentration > 0.30 {
                self.emit(user, AlertType::PositionLimit, Severity::Warning, format!("position concentration {:.1}% exceeds 30%", concentration * 100.0), json!({"concentration": concentration}));
            }
        }

        let pnl = self.pnl.snapshot(user);

        let daily_loss_pct = pnl.daily_loss_pct();
        let loss_ratio = daily_loss_pct / self.config.daily_loss_cap_pct.max(f64::EPSILON);
        if loss_ratio >= 0.95 {
            self.emit(user, AlertType::DailyLoss, Severity::Critical, format!("daily loss {:.1}% at {:.0}% of cap", daily_loss_pct * 100.0, loss_ratio * 100.0), json!({"daily_loss_pct": daily_loss_pct, "ratio": loss_ratio}));
        } else if loss_ratio >= 0.80 {
            self.emit(user, AlertType::DailyLoss, Severity::Warning, format!("daily loss {:.1}% at {:.0}% of cap", daily_loss_pct * 100.0, loss_ratio * 100.0), json!({"daily_loss_pct": daily_loss_pct, "ratio": loss_ratio}));
        }

        let drawdown = pnl.drawdown_pct();
        let dd_ratio = drawdown / self.config.drawdown_cap_pct.max(f64::EPSILON);
        if dd_ratio >= 0.90 {
            self.emit(user, AlertType::Drawdown, Severity::Critical, format!("drawdown {:.1}% at {:.0}% of cap", drawdown * 100.0, dd_ratio * 100.0), json!({"drawdown_pct": drawdown, "ratio": dd_ratio}));
        } else if dd_ratio >= 0.70 {
            self.emit(user, AlertType::Drawdown, Severity::Warning, format!("drawdown {:.1}% at {:.0}% of cap", drawdown * 100.0, dd_ratio * 100.0), json!({"drawdown_pct": drawdown, "ratio": dd_ratio}));
        }

        let loss_streak_ratio = pnl.consecutive_losses as f64 / self.config.max_consecutive_losses.max(1) as f64;
        if loss_streak_ratio >= 1.0 {
            self.emit(user, AlertType::ConsecutiveLoss, Severity::Warning, format!("{} consecutive losses reaches cap {}", pnl.consecutive_losses, self.config.max_consecutive_losses), json!({"consecutive_losses": pnl.consecutive_losses}));
        } else if loss_streak_ratio >= 0.80 {
            self.emit(user, AlertType::ConsecutiveLoss, Severity::Warning, format!("{} consecutive losses approaching cap {}", pnl.consecutive_losses, self.config.max_consecutive_losses), json!({"consecutive_losses": pnl.consecutive_losses}));
        }

        let armed_by_drawdown = drawdown >= self.config.emergency_stop_drawdown_pct;
        let armed_by_loss = (-pnl.realized_today).max(0.0) >= self.config.emergency_stop_daily_loss_usd;
        if armed_by_drawdown || armed_by_loss {
            self.arm_emergency_stop(user, armed_by_drawdown, armed_by_loss, drawdown, pnl.realized_today);
        }
    }

    fn emit(&self, user: &str, alert_type: AlertType, severity: Severity, message: String, details: serde_json::Value) {
        if let Some(alert) = self.alerts.create(user, alert_type, severity, message, details) {
            tracing::warn!(user_id = %user, alert_id = %alert.id, ?alert_type, ?severity, "risk alert emitted");
        }
    }

    fn arm_emergency_stop(&self, user: &str, by_drawdown: bool, by_loss: bool, drawdown: f64, realized_today: f64) {
        let reason = match (by_drawdown, by_loss) {
            (true, true) => "drawdown and daily loss both exceeded emergency thresholds".to_string(),
            (true, false) => format!("drawdown {:.1}% exceeded emergency threshold", drawdown * 100.0),
            (false, true) => format!("daily loss {:.2} exceeded emergency threshold", -realized_today),
            (false, false) => unreachable!("arm_emergency_stop called without a triggering condition"),
        };
        let _ = self.kv.set_json(&keys::emergency_stop(user), &json!({"timestamp": chrono::Utc::now(), "reason": reason}), Some(self.config.emergency_stop_ttl));
        self.emit(user, AlertType::EmergencyStop, Severity::Critical, reason.clone(), json!({"reason": reason}));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::InMemoryKv;
    use tokio::sync::Mutex as AsyncMutex;

    fn monitor() -> RiskMonitor {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let positions = Arc::new(PositionService::new(Arc::new(AsyncMutex::new(conn))));
        let pnl = Arc::new(PnlTracker::new(10_000.0));
        let alerts = Arc::new(AlertService::new(kv.clone(), Duration::from_secs(300)));
        let config = RiskConfig {
            per_order_notional_cap: 1000.0,
            per_instrument_notional_cap: 5000.0,
            total_notional_cap: 10_000.0,
            daily_loss_cap_usd: 500.0,
            daily_loss_cap_pct: 0.05,
            drawdown_cap_pct: 0.15,
            max_consecutive_losses: 5,
            emergency_stop_drawdown_pct: 0.25,
            emergency_stop_daily_loss_usd: 2000.0,
            monitor_interval: Duration::from_secs(5),
            alert_dedup_window: Duration::from_secs(300),
            emergency_stop_ttl: Duration::from_secs(86_400),
        };
        RiskMonitor::new(kv, positions, pnl, alerts, config)
    }

    #[test]
    fn emergency_stop_arms_on_drawdown_threshold() {
        let monitor = monitor();
        monitor.pnl.record_realized("u1", 1000.0);
        monitor.pnl.record_realized("u1", -300.0);
        monitor.evaluate_user("u1");
        assert!(monitor.kv.exists(&keys::emergency_stop("u1")));
    }

    #[test]
    fn no_alerts_when_flat() {
        let monitor = monitor();
        monitor.evaluate_user("u1");
        assert!(!monitor.kv.exists(&keys::emergency_stop("u1")));
        assert_eq!(monitor.alerts.count("u1", None), 0);
    }
}
