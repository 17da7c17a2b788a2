//! Risk Manager (spec §4.8, §4.9): a synchronous pre-trade gate plus a
//! background monitor, sharing one definition of a user's P&L state.
//!
//! The order model's owning entity is a `strategy` (spec §3); this crate
//! treats `strategy` as the risk-accounting "user" spec §4.8/§4.9 talk
//! about — one account, one emergency-stop flag, one P&L series — rather
//! than inventing a second identity axis. Recorded in DESIGN.md.

pub mod alerts;
pub mod monitor;
pub mod pnl;
pub mod rules;

pub use alerts::AlertService;
pub use monitor::RiskMonitor;
pub use pnl::PnlTracker;
pub use rules::{RiskGate, RiskGateResult, RuleLevel};
