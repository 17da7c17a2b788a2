//! Market-Data Pipeline (spec §4.10, §6): fan-in collectors, a day-partitioned
//! time-series store, and a freshest-value cache, grounded on teacher's
//! `scrapers/polymarket_book_store.rs`.

pub mod cache;
pub mod collector;
pub mod timeseries;

pub use cache::MarketDataCache;
pub use collector::{Collector, CollectorStats};
pub use timeseries::TimeSeriesStore;
