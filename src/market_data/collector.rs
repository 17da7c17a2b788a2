//! One long-running collector per (venue, data-channel) pair (spec §4.10).
//! Grounded on `scrapers/polymarket_book_store.rs`'s reconnect-with-backoff
//! and batch-then-flush design, adapted from its bespoke websocket plumbing
//! to this crate's `VenueAdapter::subscribe_market_data` abstraction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::CollectorConfig;
use crate::kv::KvStore;
use crate::market_data::cache::MarketDataCache;
use crate::market_data::timeseries::TimeSeriesStore;
use crate::models::market_data::MarketRecord;
use crate::venue::{DataChannel, VenueAdapter};

#[derive(Default)]
pub struct CollectorStats {
    pub reconnects: AtomicU64,
    pub records_ingested: AtomicU64,
    pub records_dropped: AtomicU64,
}

pub struct Collector {
    venue_name: String,
    venue: Arc<dyn VenueAdapter>,
    channel: DataChannel,
    symbols: Vec<String>,
    cache: Arc<MarketDataCache>,
    timeseries: Arc<TimeSeriesStore>,
    kv: Arc<dyn KvStore>,
    config: CollectorConfig,
    pub stats: Arc<CollectorStats>,
}

impl Collector {
    pub fn new(venue_name: String, venue: Arc<dyn VenueAdapter>, channel: DataChannel, symbols: Vec<String>, cache: Arc<MarketDataCache>, timeseries: Arc<TimeSeriesStore>, kv: Arc<dyn KvStore>, config: CollectorConfig) -> Self {
        Self {
            venue_name,
            venue,
            channel,
            symbols,
            cache,
            timeseries,
            kv,
            config,
            stats: Arc::new(CollectorStats::default()),
        }
    }

    fn topic(&self) -> String {
        format!("market:{}:{:?}", self.venue_name, self.channel)
    }

    /// Runs forever: connect, drain until the stream closes, back off, and
    /// reconnect re-subscribing the same symbol list — "subscriptions are
    /// tracked in memory; there is no external subscription store" (spec §4.10).
    pub async fn run(self: Arc<Self>) {
        let mut backoff = self.config.reconnect_base_delay;
        loop {
            match self.venue.subscribe_market_data(self.channel, self.symbols.clone()).await {
                Ok(rx) => {
                    backoff = self.config.reconnect_base_delay;
                    self.drain(rx).await;
                    self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(venue = %self.venue_name, channel = ?self.channel, "market data stream closed, reconnecting");
                }
                Err(e) => {
                    tracing::warn!(venue = %self.venue_name, channel = ?self.channel, error = %e, "subscribe failed, retrying");
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.config.reconnect_max_delay);
        }
    }

    /// Reads from the socket until it closes. The read path only appends to
    /// a bounded in-memory batch and updates the freshest-value cache; the
    /// batch write to the time-series store is fired off as a detached task
    /// on each flush so a slow disk write never blocks the next record.
    async fn drain(&self, mut rx: mpsc::Receiver<MarketRecord>) {
        let soft_cap = self.config.batch_soft_cap;
        let hard_cap = soft_cap * 2;
        let mut batch: Vec<MarketRecord> = Vec::with_capacity(soft_cap);
        let mut ticker = tokio::time::interval(self.config.flush_interval);
        loop {
            tokio::select! {
                record = rx.recv() => {
                    match record {
                        Some(record) => {
                            self.stats.records_ingested.fetch_add(1, Ordering::Relaxed);
                            self.publish_and_cache(&record);
                            batch.push(record);
                            if batch.len() > hard_cap {
                                batch.remove(0);
                                self.stats.records_dropped.fetch_add(1, Ordering::Relaxed);
                            }
                            if batch.len() >= soft_cap {
                                self.flush(std::mem::take(&mut batch));
                            }
                        }
                        None => {
                            self.flush(std::mem::take(&mut batch));
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        self.flush(std::mem::take(&mut batch));
                    }
                }
            }
        }
    }

    fn publish_and_cache(&self, record: &MarketRecord) {
        if let Ok(payload) = serde_json::to_string(record) {
            self.kv.publish(&self.topic(), payload);
        }
        match record {
            MarketRecord::Ticker(t) => self.cache.put_ticker(t.clone()),
            MarketRecord::Book(b) => self.cache.put_book(b.clone()),
            MarketRecord::Trade(_) | MarketRecord::Candle(_) => {}
        }
    }

    fn flush(&self, batch: Vec<MarketRecord>) {
        if batch.is_empty() {
            return;
        }
        let mut tickers = Vec::new();
        let mut trades = Vec::new();
        let mut candles = Vec::new();
        for record in batch {
            match record {
                MarketRecord::Ticker(t) => tickers.push(t),
                MarketRecord::Trade(t) => trades.push(t),
                MarketRecord::Candle(c) => candles.push(c),
                MarketRecord::Book(_) => {}
            }
        }
        let timeseries = self.timeseries.clone();
        let venue = self.venue_name.clone();
        tokio::spawn(async move {
            if !tickers.is_empty() {
                if let Err(e) = timeseries.insert_tickers(tickers).await {
                    tracing::error!(venue = %venue, error = %e, "ticker batch flush failed");
                }
            }
            if !trades.is_empty() {
                if let Err(e) = timeseries.insert_trades(trades).await {
                    tracing::error!(venue = %venue, error = %e, "trade batch flush failed");
                }
            }
            if !candles.is_empty() {
                if let Err(e) = timeseries.insert_candles(candles).await {
                    tracing::error!(venue = %venue, error = %e, "candle batch flush failed");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::InMemoryKv;
    use crate::market_data::timeseries::TimeSeriesStore;
    use crate::venue::mock::{MockVenueAdapter, MockVenueConfig};
    use tokio::sync::Mutex as AsyncMutex;

    #[tokio::test]
    async fn drain_caches_ticker_records() {
        let venue = MockVenueAdapter::new("mock".into(), MockVenueConfig::default());
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());
        let cache = Arc::new(MarketDataCache::new(kv.clone(), Duration::from_secs(5), Duration::from_secs(1)));
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let timeseries = Arc::new(TimeSeriesStore::new(Arc::new(AsyncMutex::new(conn))));
        let config = CollectorConfig {
            batch_soft_cap: 500,
            flush_interval: Duration::from_secs(2),
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(60),
            ticker_staleness: Duration::from_secs(5),
            book_staleness: Duration::from_secs(1),
        };
        let collector = Arc::new(Collector::new("mock".into(), venue.clone(), DataChannel::Ticker, vec!["BTC/USDT".into()], cache.clone(), timeseries, kv, config));

        let rx = venue.subscribe_market_data(DataChannel::Ticker, vec!["BTC/USDT".into()]).await.unwrap();
        let drain_task = {
            let collector = collector.clone();
            tokio::spawn(async move { collector.drain(rx).await })
        };
        tokio::time::sleep(Duration::from_millis(250)).await;
        drain_task.abort();

        assert!(cache.get_ticker("mock", "BTC/USDT").is_some());
        assert!(collector.stats.records_ingested.load(Ordering::Relaxed) > 0);
    }
}
