//! Process-wide configuration, loaded once in `main` and passed down explicitly
//! instead of read piecemeal from module-global statics.

use std::time::Duration;

/// Top-level configuration for the order executor / risk manager / market-data
/// pipeline service.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub db_path: String,
    pub queue_workers: usize,
    pub queue_max_attempts: u32,
    pub queue_retry_base_secs: u64,
    pub risk: RiskConfig,
    pub collector: CollectorConfig,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8090".to_string()),
            db_path: std::env::var("DATABASE_PATH").unwrap_or_else(|_| "market_core.db".to_string()),
            queue_workers: std::env::var("QUEUE_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4),
            queue_max_attempts: std::env::var("QUEUE_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            queue_retry_base_secs: std::env::var("QUEUE_RETRY_BASE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            risk: RiskConfig::from_env(),
            collector: CollectorConfig::from_env(),
        }
    }
}

/// Thresholds for the pre-trade gate (§4.8) and the background monitor (§4.9).
#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub per_order_notional_cap: f64,
    pub per_instrument_notional_cap: f64,
    pub total_notional_cap: f64,
    pub daily_loss_cap_usd: f64,
    pub daily_loss_cap_pct: f64,
    pub drawdown_cap_pct: f64,
    pub max_consecutive_losses: u32,
    pub emergency_stop_drawdown_pct: f64,
    pub emergency_stop_daily_loss_usd: f64,
    pub monitor_interval: Duration,
    pub alert_dedup_window: Duration,
    pub emergency_stop_ttl: Duration,
}

impl RiskConfig {
    fn from_env() -> Self {
        Self {
            per_order_notional_cap: env_f64("RISK_PER_ORDER_CAP", 50_000.0),
            per_instrument_notional_cap: env_f64("RISK_PER_INSTRUMENT_CAP", 500_000.0),
            total_notional_cap: env_f64("RISK_TOTAL_CAP", 1_000_000.0),
            daily_loss_cap_usd: env_f64("RISK_DAILY_LOSS_CAP_USD", 10_000.0),
            daily_loss_cap_pct: env_f64("RISK_DAILY_LOSS_CAP_PCT", 0.05),
            drawdown_cap_pct: env_f64("RISK_DRAWDOWN_CAP_PCT", 0.15),
            max_consecutive_losses: env_u32("RISK_MAX_CONSECUTIVE_LOSSES", 5),
            emergency_stop_drawdown_pct: env_f64("RISK_EMERGENCY_DRAWDOWN_PCT", 0.25),
            emergency_stop_daily_loss_usd: env_f64("RISK_EMERGENCY_DAILY_LOSS_USD", 25_000.0),
            monitor_interval: Duration::from_secs(env_u64("RISK_MONITOR_INTERVAL_SECS", 5)),
            alert_dedup_window: Duration::from_secs(300),
            emergency_stop_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Market collector batching/backoff/staleness knobs (§4.10).
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub batch_soft_cap: usize,
    pub flush_interval: Duration,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub ticker_staleness: Duration,
    pub book_staleness: Duration,
}

impl CollectorConfig {
    fn from_env() -> Self {
        Self {
            batch_soft_cap: env_usize("COLLECTOR_BATCH_SOFT_CAP", 200),
            flush_interval: Duration::from_millis(env_u64("COLLECTOR_FLUSH_INTERVAL_MS", 500)),
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(60),
            ticker_staleness: Duration::from_secs(env_u64("CACHE_TICKER_STALENESS_SECS", 5)),
            book_staleness: Duration::from_millis(env_u64("CACHE_BOOK_STALENESS_MS", 1000)),
        }
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
