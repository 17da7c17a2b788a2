//! Freshest-value cache (spec §4.10, §6): the latest ticker/book per
//! instrument, held lock-free in-process via `arc_swap::ArcSwap` (grounded on
//! `scrapers/polymarket_book_store.rs`'s `BookSnapshot` cells) and mirrored
//! into the shared KV under `ticker:{venue}:{symbol}` / `book:{venue}:{symbol}`
//! so other components read the same contract spec §6 describes.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::Utc;
use dashmap::DashMap;

use crate::kv::keys;
use crate::kv::KvStore;
use crate::models::market_data::{OrderBook, Ticker};

pub struct MarketDataCache {
    kv: Arc<dyn KvStore>,
    tickers: DashMap<String, Arc<ArcSwap<Ticker>>>,
    books: DashMap<String, Arc<ArcSwap<OrderBook>>>,
    ticker_stale: Duration,
    book_stale: Duration,
}

impl MarketDataCache {
    /// `ticker_stale`/`book_stale` come from `CollectorConfig` (spec §4.10's
    /// "defaults 5s ticker / 1s book").
    pub fn new(kv: Arc<dyn KvStore>, ticker_stale: Duration, book_stale: Duration) -> Self {
        Self {
            kv,
            tickers: DashMap::new(),
            books: DashMap::new(),
            ticker_stale,
            book_stale,
        }
    }

    fn cache_key(venue: &str, symbol: &str) -> String {
        format!("{venue}:{symbol}")
    }

    pub fn put_ticker(&self, ticker: Ticker) {
        let key = Self::cache_key(&ticker.venue, &ticker.symbol);
        let cell = self.tickers.entry(key).or_insert_with(|| Arc::new(ArcSwap::from_pointee(ticker.clone())));
        cell.store(Arc::new(ticker.clone()));
        let _ = self.kv.set_json(&keys::ticker(&ticker.venue, &ticker.symbol), &ticker, Some(self.ticker_stale * 3));
    }

    pub fn put_book(&self, book: OrderBook) {
        let key = Self::cache_key(&book.venue, &book.symbol);
        let cell = self.books.entry(key).or_insert_with(|| Arc::new(ArcSwap::from_pointee(book.clone())));
        cell.store(Arc::new(book.clone()));
        let _ = self.kv.set_json(&keys::book(&book.venue, &book.symbol), &book, Some(self.book_stale * 3));
    }

    /// Returns `None` both when there is no data and when the cached value is
    /// older than the staleness budget — a missing key is "no data", per
    /// spec §4.10, not zero.
    pub fn get_ticker(&self, venue: &str, symbol: &str) -> Option<Ticker> {
        let cell = self.tickers.get(&Self::cache_key(venue, symbol))?;
        let ticker = cell.load_full();
        let age = (Utc::now() - ticker.timestamp).to_std().ok()?;
        (age <= self.ticker_stale).then(|| (*ticker).clone())
    }

    pub fn get_book(&self, venue: &str, symbol: &str) -> Option<OrderBook> {
        let cell = self.books.get(&Self::cache_key(venue, symbol))?;
        let book = cell.load_full();
        let age = (Utc::now() - book.timestamp).to_std().ok()?;
        (age <= self.book_stale).then(|| (*book).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::InMemoryKv;
    use crate::models::market_data::PriceLevel;

    fn cache() -> MarketDataCache {
        MarketDataCache::new(Arc::new(InMemoryKv::new()), Duration::from_secs(5), Duration::from_secs(1))
    }

    fn ticker(ts: chrono::DateTime<Utc>) -> Ticker {
        Ticker {
            venue: "mock".into(),
            symbol: "BTC/USDT".into(),
            timestamp: ts,
            last: 100.0,
            bid: 99.9,
            ask: 100.1,
            high_24h: 101.0,
            low_24h: 99.0,
            base_volume_24h: 10.0,
            quote_volume_24h: 1000.0,
            change_24h: 0.0,
            change_pct_24h: 0.0,
        }
    }

    #[test]
    fn missing_key_is_none_not_zero() {
        let cache = cache();
        assert!(cache.get_ticker("mock", "BTC/USDT").is_none());
    }

    #[test]
    fn fresh_value_is_returned() {
        let cache = cache();
        cache.put_ticker(ticker(Utc::now()));
        assert!(cache.get_ticker("mock", "BTC/USDT").is_some());
    }

    #[test]
    fn stale_value_is_hidden() {
        let cache = cache();
        cache.put_ticker(ticker(Utc::now() - chrono::Duration::seconds(30)));
        assert!(cache.get_ticker("mock", "BTC/USDT").is_none());
    }

    #[test]
    fn book_uses_tighter_staleness_budget() {
        let cache = cache();
        cache.put_book(OrderBook {
            venue: "mock".into(),
            symbol: "BTC/USDT".into(),
            timestamp: Utc::now() - chrono::Duration::milliseconds(1500),
            bids: vec![PriceLevel { price: 99.0, quantity: 1.0 }],
            asks: vec![PriceLevel { price: 101.0, quantity: 1.0 }],
        });
        assert!(cache.get_book("mock", "BTC/USDT").is_none());
    }
}
