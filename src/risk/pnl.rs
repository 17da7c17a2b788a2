//! Per-user P&L state shared by the pre-trade gate (§4.8) and the background
//! monitor (§4.9). Grounded on
//! `original_source/trading-engine/risk-manager/src/monitors/pnl_monitor.py`'s
//! `daily_pnl`/`drawdown_percentage` fields — this crate keeps the same
//! shape rather than recomputing equity curves from the fill log on every
//! read.

use std::collections::HashMap;

use parking_lot::RwLock;

#[derive(Debug, Clone)]
pub struct PnlState {
    pub initial_equity: f64,
    pub equity: f64,
    pub peak_equity: f64,
    pub realized_today: f64,
    pub consecutive_losses: u32,
}

impl PnlState {
    fn new(initial_equity: f64) -> Self {
        Self {
            initial_equity,
            equity: initial_equity,
            peak_equity: initial_equity,
            realized_today: 0.0,
            consecutive_losses: 0,
        }
    }

    pub fn drawdown_pct(&self) -> f64 {
        if self.peak_equity <= 0.0 {
            0.0
        } else {
            (self.peak_equity - self.equity) / self.peak_equity
        }
    }

    pub fn daily_loss_pct(&self) -> f64 {
        if self.initial_equity <= 0.0 {
            0.0
        } else {
            (-self.realized_today / self.initial_equity).max(0.0)
        }
    }
}

pub struct PnlTracker {
    states: RwLock<HashMap<String, PnlState>>,
    default_initial_equity: f64,
}

impl PnlTracker {
    pub fn new(default_initial_equity: f64) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            default_initial_equity,
        }
    }

    pub fn snapshot(&self, user: &str) -> PnlState {
        self.states
            .read()
            .get(user)
            .cloned()
            .unwrap_or_else(|| PnlState::new(self.default_initial_equity))
    }

    /// Applies a realized P&L delta from a fill (spec §4.7's `UpdateFromFill`
    /// realized-P&L output). Updates equity, the running peak, and the
    /// consecutive-loss counter.
    pub fn record_realized(&self, user: &str, delta: f64) {
        let mut states = self.states.write();
        let state = states.entry(user.to_string()).or_insert_with(|| PnlState::new(self.default_initial_equity));
        state.equity += delta;
        state.realized_today += delta;
        state.peak_equity = state.peak_equity.max(state.equity);
        if delta < 0.0 {
            state.consecutive_losses += 1;
        } else if delta > 0.0 {
            state.consecutive_losses = 0;
        }
    }

    /// Rolls the daily counters for every tracked user. Intended to be called
    /// once per UTC day boundary by a scheduler in `main.rs`.
    pub fn reset_daily(&self) {
        for state in self.states.write().values_mut() {
            state.realized_today = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drawdown_tracks_peak_not_initial() {
        let tracker = PnlTracker::new(1000.0);
        tracker.record_realized("s1", 500.0);
        tracker.record_realized("s1", -300.0);
        let snap = tracker.snapshot("s1");
        assert!((snap.peak_equity - 1500.0).abs() < 1e-9);
        assert!((snap.drawdown_pct() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn consecutive_losses_reset_on_win() {
        let tracker = PnlTracker::new(1000.0);
        tracker.record_realized("s1", -10.0);
        tracker.record_realized("s1", -10.0);
        assert_eq!(tracker.snapshot("s1").consecutive_losses, 2);
        tracker.record_realized("s1", 5.0);
        assert_eq!(tracker.snapshot("s1").consecutive_losses, 0);
    }
}
