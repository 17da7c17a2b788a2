//! In-process implementation of [`KvStore`] backed by `dashmap`, grounded on
//! the concurrent-map usage in `examples/guribe94-bog`. TTL is evaluated
//! lazily on read/len, same trade-off Redis's own lazy-expiry makes.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;

use super::KvStore;

enum Value {
    Str(String),
    List(VecDeque<String>),
    ZSet(Vec<(String, f64)>),
    Set(HashSet<String>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.map(|t| Instant::now() >= t).unwrap_or(false)
    }
}

pub struct InMemoryKv {
    data: DashMap<String, Entry>,
    topics: DashMap<String, broadcast::Sender<String>>,
}

impl Default for InMemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            topics: DashMap::new(),
        }
    }

    fn get_live(&self, key: &str) -> Option<dashmap::mapref::one::Ref<'_, String, Entry>> {
        match self.data.get(key) {
            Some(e) if e.is_expired() => {
                drop(e);
                self.data.remove(key);
                None
            }
            other => other,
        }
    }
}

impl KvStore for InMemoryKv {
    fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> anyhow::Result<()> {
        let json = serde_json::to_string(value)?;
        self.data.insert(
            key.to_string(),
            Entry {
                value: Value::Str(json),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.get_live(key) {
            Some(entry) => match &entry.value {
                Value::Str(s) => Ok(Some(serde_json::from_str(s)?)),
                _ => Ok(None),
            },
            None => Ok(None),
        }
    }

    fn delete(&self, key: &str) {
        self.data.remove(key);
    }

    fn exists(&self, key: &str) -> bool {
        self.get_live(key).is_some()
    }

    fn list_push_back(&self, key: &str, value: String) {
        let mut entry = self.data.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::List(VecDeque::new()),
            expires_at: None,
        });
        if let Value::List(list) = &mut entry.value {
            list.push_back(value);
        }
    }

    fn list_push_front(&self, key: &str, value: String) {
        let mut entry = self.data.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::List(VecDeque::new()),
            expires_at: None,
        });
        if let Value::List(list) = &mut entry.value {
            list.push_front(value);
        }
    }

    fn list_pop_front(&self, key: &str) -> Option<String> {
        let mut entry = self.data.get_mut(key)?;
        match &mut entry.value {
            Value::List(list) => list.pop_front(),
            _ => None,
        }
    }

    fn list_len(&self, key: &str) -> usize {
        match self.get_live(key) {
            Some(e) => match &e.value {
                Value::List(list) => list.len(),
                _ => 0,
            },
            None => 0,
        }
    }

    fn list_trim_last(&self, key: &str, keep: usize) -> usize {
        let Some(mut entry) = self.data.get_mut(key) else {
            return 0;
        };
        match &mut entry.value {
            Value::List(list) => {
                let removed = list.len().saturating_sub(keep);
                while list.len() > keep {
                    list.pop_front();
                }
                removed
            }
            _ => 0,
        }
    }

    fn list_all(&self, key: &str) -> Vec<String> {
        match self.get_live(key) {
            Some(e) => match &e.value {
                Value::List(list) => list.iter().cloned().collect(),
                _ => Vec::new(),
            },
            None => Vec::new(),
        }
    }

    fn zadd(&self, key: &str, member: String, score: f64) {
        let mut entry = self.data.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::ZSet(Vec::new()),
            expires_at: None,
        });
        if let Value::ZSet(set) = &mut entry.value {
            set.retain(|(m, _)| m != &member);
            set.push((member, score));
        }
    }

    fn zpopmax(&self, key: &str) -> Option<(String, f64)> {
        let mut entry = self.data.get_mut(key)?;
        match &mut entry.value {
            Value::ZSet(set) => {
                if set.is_empty() {
                    return None;
                }
                let (idx, _) = set
                    .iter()
                    .enumerate()
                    .max_by(|(_, (_, a)), (_, (_, b))| a.partial_cmp(b).unwrap())?;
                Some(set.remove(idx))
            }
            _ => None,
        }
    }

    fn zcard(&self, key: &str) -> usize {
        match self.get_live(key) {
            Some(e) => match &e.value {
                Value::ZSet(set) => set.len(),
                _ => 0,
            },
            None => 0,
        }
    }

    fn set_add(&self, key: &str, member: String) {
        let mut entry = self.data.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Set(HashSet::new()),
            expires_at: None,
        });
        if let Value::Set(set) = &mut entry.value {
            set.insert(member);
        }
    }

    fn set_remove(&self, key: &str, member: &str) {
        if let Some(mut entry) = self.data.get_mut(key) {
            if let Value::Set(set) = &mut entry.value {
                set.remove(member);
            }
        }
    }

    fn set_card(&self, key: &str) -> usize {
        match self.get_live(key) {
            Some(e) => match &e.value {
                Value::Set(set) => set.len(),
                _ => 0,
            },
            None => 0,
        }
    }

    fn publish(&self, topic: &str, payload: String) {
        let sender = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(1024).0);
        // No subscribers is not an error; fan-out is best-effort.
        let _ = sender.send(payload);
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<String> {
        let sender = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(1024).0);
        sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zpopmax_returns_highest_priority_first() {
        let kv = InMemoryKv::new();
        kv.zadd("q", "low".into(), 1.0);
        kv.zadd("q", "high".into(), 10.0);
        let (member, score) = kv.zpopmax("q").unwrap();
        assert_eq!(member, "high");
        assert_eq!(score, 10.0);
    }

    #[test]
    fn ttl_expires_value() {
        let kv = InMemoryKv::new();
        kv.set_json("k", &"v".to_string(), Some(Duration::from_millis(1))).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(!kv.exists("k"));
    }

    #[test]
    fn list_fifo_order() {
        let kv = InMemoryKv::new();
        kv.list_push_back("l", "a".into());
        kv.list_push_back("l", "b".into());
        assert_eq!(kv.list_pop_front("l"), Some("a".into()));
        assert_eq!(kv.list_pop_front("l"), Some("b".into()));
        assert_eq!(kv.list_pop_front("l"), None);
    }
}
