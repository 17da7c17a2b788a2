//! Pre-trade risk gate (spec §4.8). Grounded on teacher's
//! `backtest_v2/pre_trade_risk.rs`: a `Vec<RuleCheck>` evaluated in order,
//! `RiskGateResult::from_checks`-style aggregation, data not a class
//! hierarchy (spec §9's "Rule chain → data" redesign flag).

use std::sync::Arc;

use serde::Serialize;

use crate::config::RiskConfig;
use crate::kv::{keys, KvStore};
use crate::risk::pnl::PnlTracker;
use crate::services::position_service::PositionService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleCheck {
    pub name: &'static str,
    pub passed: bool,
    pub level: RuleLevel,
    pub observed: f64,
    pub limit: f64,
    pub reason: Option<String>,
}

impl RuleCheck {
    fn pass(name: &'static str, level: RuleLevel, observed: f64, limit: f64) -> Self {
        Self { name, passed: true, level, observed, limit, reason: None }
    }

    fn fail(name: &'static str, level: RuleLevel, observed: f64, limit: f64, reason: impl Into<String>) -> Self {
        Self { name, passed: false, level, observed, limit, reason: Some(reason.into()) }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskGateResult {
    pub pass: bool,
    pub level: RuleLevel,
    pub reason: Option<String>,
    pub checks: Vec<RuleCheck>,
}

/// Bands a ratio-to-cap into a warning level without failing the check —
/// spec §4.8's "medium at ≥80%, high at ≥95%" language describes a level
/// attached to an otherwise-passing check, not a separate failure mode.
fn level_for_ratio(ratio: f64, medium_at: f64, high_at: f64) -> RuleLevel {
    if ratio >= 1.0 {
        RuleLevel::Critical
    } else if ratio >= high_at {
        RuleLevel::High
    } else if ratio >= medium_at {
        RuleLevel::Medium
    } else {
        RuleLevel::Low
    }
}

pub struct RiskGate {
    kv: Arc<dyn KvStore>,
    positions: Arc<PositionService>,
    pnl: Arc<PnlTracker>,
    config: RiskConfig,
}

impl RiskGate {
    pub fn new(kv: Arc<dyn KvStore>, positions: Arc<PositionService>, pnl: Arc<PnlTracker>, config: RiskConfig) -> Self {
        Self { kv, positions, pnl, config }
    }

    /// Runs the mandatory rule chain in spec.md §4.8's table order,
    /// short-circuiting on the first non-pass. Does not mutate any state.
    pub fn check(&self, strategy: &str, venue: &str, symbol: &str, notional: f64) -> RiskGateResult {
        let mut checks = Vec::with_capacity(7);

        if self.kv.exists(&keys::emergency_stop(strategy)) {
            checks.push(RuleCheck::fail("emergency_stop", RuleLevel::Critical, 1.0, 0.0, "emergency stop is armed for this account"));
            return Self::short_circuit(checks);
        }
        checks.push(RuleCheck::pass("emergency_stop", RuleLevel::Low, 0.0, 0.0));

        let order_cap = self.config.per_order_notional_cap;
        if notional > order_cap {
            checks.push(RuleCheck::fail("order_size", RuleLevel::Critical, notional, order_cap, format!("order notional {notional:.2} exceeds per-order cap {order_cap:.2}")));
            return Self::short_circuit(checks);
        }
        checks.push(RuleCheck::pass("order_size", level_for_ratio(notional / order_cap.max(f64::EPSILON), 0.8, 0.95), notional, order_cap));

        let (total_notional, _) = self.positions.exposure(strategy);
        let instrument_notional = self
            .positions
            .query(Some(strategy), Some(venue), Some(symbol))
            .iter()
            .map(|p| p.notional(p.mark_price))
            .sum::<f64>();

        let new_instrument_notional = instrument_notional + notional;
        let instrument_cap = self.config.per_instrument_notional_cap;
        if new_instrument_notional > instrument_cap {
            checks.push(RuleCheck::fail("single_instrument_position", RuleLevel::Critical, new_instrument_notional, instrument_cap, format!("instrument notional {new_instrument_notional:.2} exceeds cap {instrument_cap:.2}")));
            return Self::short_circuit(checks);
        }
        checks.push(RuleCheck::pass("single_instrument_position", level_for_ratio(new_instrument_notional / instrument_cap.max(f64::EPSILON), 0.8, 0.95), new_instrument_notional, instrument_cap));

        let new_total_notional = total_notional + notional;
        let total_cap = self.config.total_notional_cap;
        if new_total_notional > total_cap {
            checks.push(RuleCheck::fail("total_position", RuleLevel::Critical, new_total_notional, total_cap, format!("total notional {new_total_notional:.2} exceeds cap {total_cap:.2}")));
            return Self::short_circuit(checks);
        }
        checks.push(RuleCheck::pass("total_position", level_for_ratio(new_total_notional / total_cap.max(f64::EPSILON), 0.8, 0.95), new_total_notional, total_cap));

        let pnl = self.pnl.snapshot(strategy);

        let loss_cap_usd = self.config.daily_loss_cap_usd;
        let realized_loss = (-pnl.realized_today).max(0.0);
        if realized_loss > loss_cap_usd {
            checks.push(RuleCheck::fail("daily_loss_absolute", RuleLevel::Critical, realized_loss, loss_cap_usd, format!("daily loss {realized_loss:.2} exceeds cap {loss_cap_usd:.2}")));
            return Self::short_circuit(checks);
        }
        checks.push(RuleCheck::pass("daily_loss_absolute", level_for_ratio(realized_loss / loss_cap_usd.max(f64::EPSILON), 0.8, 0.95), realized_loss, loss_cap_usd));

        let loss_cap_pct = self.config.daily_loss_cap_pct;
        let daily_loss_pct = pnl.daily_loss_pct();
        if daily_loss_pct > loss_cap_pct {
            checks.push(RuleCheck::fail("daily_loss_percent", RuleLevel::Critical, daily_loss_pct, loss_cap_pct, format!("daily loss {:.2}% exceeds cap {:.2}%", daily_loss_pct * 100.0, loss_cap_pct * 100.0)));
            return Self::short_circuit(checks);
        }
        checks.push(RuleCheck::pass("daily_loss_percent", level_for_ratio(daily_loss_pct / loss_cap_pct.max(f64::EPSILON), 0.8, 0.95), daily_loss_pct, loss_cap_pct));

        let dd_cap = self.config.drawdown_cap_pct;
        let drawdown = pnl.drawdown_pct();
        if drawdown > dd_cap {
            checks.push(RuleCheck::fail("drawdown", RuleLevel::Critical, drawdown, dd_cap, format!("drawdown {:.2}% exceeds cap {:.2}%", drawdown * 100.0, dd_cap * 100.0)));
            return Self::short_circuit(checks);
        }
        checks.push(RuleCheck::pass("drawdown", level_for_ratio(drawdown / dd_cap.max(f64::EPSILON), 0.7, 0.9), drawdown, dd_cap));

        let level = checks.iter().map(|c| c.level).max().unwrap_or(RuleLevel::Low);
        RiskGateResult { pass: true, level, reason: None, checks }
    }

    fn short_circuit(checks: Vec<RuleCheck>) -> RiskGateResult {
        let failure = checks.last().expect("short_circuit always called with at least one check");
        RiskGateResult {
            pass: false,
            level: failure.level,
            reason: failure.reason.clone(),
            checks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::InMemoryKv;
    use std::sync::Arc;
    use tokio::sync::Mutex as AsyncMutex;

    fn gate(config: RiskConfig) -> RiskGate {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let positions = Arc::new(PositionService::new(Arc::new(AsyncMutex::new(conn))));
        let pnl = Arc::new(PnlTracker::new(100_000.0));
        RiskGate::new(kv, positions, pnl, config)
    }

    fn config() -> RiskConfig {
        RiskConfig {
            per_order_notional_cap: 1000.0,
            per_instrument_notional_cap: 5000.0,
            total_notional_cap: 10_000.0,
            daily_loss_cap_usd: 500.0,
            daily_loss_cap_pct: 0.05,
            drawdown_cap_pct: 0.15,
            max_consecutive_losses: 5,
            emergency_stop_drawdown_pct: 0.25,
            emergency_stop_daily_loss_usd: 2000.0,
            monitor_interval: std::time::Duration::from_secs(5),
            alert_dedup_window: std::time::Duration::from_secs(300),
            emergency_stop_ttl: std::time::Duration::from_secs(86_400),
        }
    }

    #[test]
    fn passes_when_within_all_caps() {
        let gate = gate(config());
        let result = gate.check("s1", "mock", "BTC/USDT", 100.0);
        assert!(result.pass);
    }

    #[test]
    fn rejects_when_order_exceeds_per_order_cap() {
        let gate = gate(config());
        let result = gate.check("s1", "mock", "BTC/USDT", 5000.0);
        assert!(!result.pass);
        assert_eq!(result.level, RuleLevel::Critical);
        assert_eq!(result.checks.last().unwrap().name, "order_size");
    }

    #[test]
    fn emergency_stop_short_circuits_before_other_checks() {
        let gate = gate(config());
        gate.kv.set_json(&keys::emergency_stop("s1"), &"armed", None).unwrap();
        let result = gate.check("s1", "mock", "BTC/USDT", 1.0);
        assert!(!result.pass);
        assert_eq!(result.checks.len(), 1);
        assert_eq!(result.checks[0].name, "emergency_stop");
    }
}
