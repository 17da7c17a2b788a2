//! Shared KV / pub-sub substrate (spec §5, §6).
//!
//! The spec's external-interfaces table describes a keyspace with list, sorted-set,
//! and set primitives plus TTL'd values, backing the priority queue, the
//! freshest-value cache, the credential vault, the alert list and the
//! emergency-stop flag. The original's `OrderQueue`/`PnLMonitor` talk to Redis
//! for this; this crate keeps everything in-process (single binary, no
//! external KV dependency in the teacher's stack) behind the same primitive
//! shape, so swapping in a real Redis client later only touches `memory.rs`.
//!
//! "No component modifies another component's key-space" (spec §5) is a
//! convention enforced by callers using the key-prefix constants below, not by
//! the store itself.

pub mod memory;

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub trait KvStore: Send + Sync {
    fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> anyhow::Result<()>;
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>>;
    fn delete(&self, key: &str);
    fn exists(&self, key: &str) -> bool;

    fn list_push_back(&self, key: &str, value: String);
    fn list_push_front(&self, key: &str, value: String);
    fn list_pop_front(&self, key: &str) -> Option<String>;
    fn list_len(&self, key: &str) -> usize;
    fn list_trim_last(&self, key: &str, keep: usize) -> usize;
    /// Non-destructive read of the whole list, oldest first. Used by callers
    /// (the alert index, the completed/failed queue views) that need to
    /// browse rather than drain.
    fn list_all(&self, key: &str) -> Vec<String>;

    fn zadd(&self, key: &str, member: String, score: f64);
    fn zpopmax(&self, key: &str) -> Option<(String, f64)>;
    fn zcard(&self, key: &str) -> usize;

    fn set_add(&self, key: &str, member: String);
    fn set_remove(&self, key: &str, member: &str);
    fn set_card(&self, key: &str) -> usize;

    /// Publish a JSON-encoded payload to a topic. Subscribers who are not
    /// currently listening simply miss it (broadcast semantics), matching
    /// spec §4.10's "independently published to the shared pub-sub" note,
    /// which never requires durable replay.
    fn publish(&self, topic: &str, payload: String);
    fn subscribe(&self, topic: &str) -> tokio::sync::broadcast::Receiver<String>;
}

pub mod keys {
    pub fn emergency_stop(user: &str) -> String {
        format!("risk:emergency_stop:{user}")
    }
    pub fn pnl(user: &str) -> String {
        format!("risk:pnl:{user}")
    }
    pub fn positions(user: &str) -> String {
        format!("risk:positions:{user}")
    }
    pub fn alerts_list(user: &str) -> String {
        format!("risk:alerts:list:{user}")
    }
    pub fn alert_data(user: &str, id: &str) -> String {
        format!("risk:alerts:data:{user}:{id}")
    }
    pub const ORDERQ_PENDING: &str = "orderq:pending";
    pub const ORDERQ_PRIORITY: &str = "orderq:priority";
    pub const ORDERQ_PROCESSING: &str = "orderq:processing";
    pub const ORDERQ_FAILED: &str = "orderq:failed";
    pub const ORDERQ_COMPLETED: &str = "orderq:completed";
    pub fn orderq_data(item_id: &str) -> String {
        format!("orderq:data:{item_id}")
    }
    pub fn credentials(venue: &str) -> String {
        format!("credentials:{venue}")
    }
    pub fn ticker(venue: &str, symbol: &str) -> String {
        format!("ticker:{venue}:{symbol}")
    }
    pub fn book(venue: &str, symbol: &str) -> String {
        format!("book:{venue}:{symbol}")
    }
}
