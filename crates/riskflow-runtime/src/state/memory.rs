//! In-memory state store
//!
//! Backend for tests and single-process runs. TTLs are tracked per key and
//! enforced lazily on access.

use super::StateStore;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum Entry {
    Hash(HashMap<String, String>),
    Json(serde_json::Value),
    List(Vec<String>),
    Counter(i64),
}

struct Slot {
    entry: Entry,
    expires_at: Option<Instant>,
}

impl Slot {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory [`StateStore`] implementation
#[derive(Default)]
pub struct InMemoryStateStore {
    slots: RwLock<HashMap<String, Slot>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a hash entry without a TTL (test helper)
    pub fn seed_hash(&self, key: &str, fields: HashMap<String, String>) {
        self.slots.write().unwrap().insert(
            key.to_string(),
            Slot {
                entry: Entry::Hash(fields),
                expires_at: None,
            },
        );
    }

    /// Remaining TTL of a key, if one is set (test helper)
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        let slots = self.slots.read().unwrap();
        slots
            .get(key)
            .and_then(|slot| slot.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn len(&self) -> usize {
        self.slots.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_live(&self, key: &str) -> Option<Entry> {
        let slots = self.slots.read().unwrap();
        let slot = slots.get(key)?;
        if slot.expired() {
            return None;
        }
        Some(slot.entry.clone())
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get_hash(&self, key: &str) -> Result<HashMap<String, String>> {
        match self.read_live(key) {
            Some(Entry::Hash(map)) => Ok(map),
            _ => Ok(HashMap::new()),
        }
    }

    async fn set_hash(
        &self,
        key: &str,
        fields: HashMap<String, String>,
        ttl: Duration,
    ) -> Result<()> {
        let mut slots = self.slots.write().unwrap();
        let slot = slots.entry(key.to_string()).or_insert_with(|| Slot {
            entry: Entry::Hash(HashMap::new()),
            expires_at: None,
        });
        if slot.expired() || !matches!(slot.entry, Entry::Hash(_)) {
            slot.entry = Entry::Hash(HashMap::new());
        }
        if let Entry::Hash(map) = &mut slot.entry {
            map.extend(fields);
        }
        slot.expires_at = Some(Instant::now() + ttl);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        if let Some(slot) = self.slots.write().unwrap().get_mut(key) {
            slot.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn get_json(&self, key: &str) -> Result<Option<serde_json::Value>> {
        match self.read_live(key) {
            Some(Entry::Json(value)) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    async fn set_json(&self, key: &str, value: &serde_json::Value, ttl: Duration) -> Result<()> {
        self.slots.write().unwrap().insert(
            key.to_string(),
            Slot {
                entry: Entry::Json(value.clone()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn list_push_front(&self, key: &str, item: &str) -> Result<()> {
        let mut slots = self.slots.write().unwrap();
        let slot = slots.entry(key.to_string()).or_insert_with(|| Slot {
            entry: Entry::List(Vec::new()),
            expires_at: None,
        });
        if slot.expired() || !matches!(slot.entry, Entry::List(_)) {
            slot.entry = Entry::List(Vec::new());
            slot.expires_at = None;
        }
        if let Entry::List(items) = &mut slot.entry {
            items.insert(0, item.to_string());
        }
        Ok(())
    }

    async fn list_trim(&self, key: &str, stop: usize) -> Result<()> {
        if let Some(slot) = self.slots.write().unwrap().get_mut(key) {
            if let Entry::List(items) = &mut slot.entry {
                items.truncate(stop + 1);
            }
        }
        Ok(())
    }

    async fn list_range(&self, key: &str, limit: usize) -> Result<Vec<String>> {
        match self.read_live(key) {
            Some(Entry::List(items)) => Ok(items.into_iter().take(limit).collect()),
            _ => Ok(Vec::new()),
        }
    }

    async fn incr_counter(&self, key: &str, ttl_if_new: Duration) -> Result<i64> {
        let mut slots = self.slots.write().unwrap();
        let slot = slots.entry(key.to_string()).or_insert_with(|| Slot {
            entry: Entry::Counter(0),
            expires_at: None,
        });
        if slot.expired() || !matches!(slot.entry, Entry::Counter(_)) {
            slot.entry = Entry::Counter(0);
            slot.expires_at = None;
        }
        if let Entry::Counter(value) = &mut slot.entry {
            *value += 1;
            if *value == 1 {
                slot.expires_at = Some(Instant::now() + ttl_if_new);
            }
            Ok(*value)
        } else {
            Ok(0)
        }
    }

    async fn ping(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_round_trip() {
        let store = InMemoryStateStore::new();
        let mut fields = HashMap::new();
        fields.insert("count".to_string(), "3".to_string());
        fields.insert("amount".to_string(), "120.5".to_string());

        store
            .set_hash("velocity:u1:5min", fields, Duration::from_secs(300))
            .await
            .unwrap();

        let read = store.get_hash("velocity:u1:5min").await.unwrap();
        assert_eq!(read.get("count"), Some(&"3".to_string()));
        assert_eq!(read.get("amount"), Some(&"120.5".to_string()));
        assert!(store.ttl_of("velocity:u1:5min").is_some());
    }

    #[tokio::test]
    async fn test_missing_hash_is_empty() {
        let store = InMemoryStateStore::new();
        assert!(store.get_hash("user:nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_hash_is_empty() {
        let store = InMemoryStateStore::new();
        let mut fields = HashMap::new();
        fields.insert("a".to_string(), "1".to_string());
        store
            .set_hash("k", fields, Duration::from_millis(0))
            .await
            .unwrap();

        assert!(store.get_hash("k").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_round_trip() {
        let store = InMemoryStateStore::new();
        let value = serde_json::json!({"transaction_id": "tx-1", "amount": 5.0});

        store
            .set_json("transaction:tx-1", &value, Duration::from_secs(60))
            .await
            .unwrap();

        let read = store.get_json("transaction:tx-1").await.unwrap();
        assert_eq!(read, Some(value));
        assert_eq!(store.get_json("transaction:other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_push_trim_range() {
        let store = InMemoryStateStore::new();
        for i in 0..5 {
            store
                .list_push_front("user_transactions:u1", &format!("tx-{i}"))
                .await
                .unwrap();
        }

        // Newest first
        let items = store.list_range("user_transactions:u1", 10).await.unwrap();
        assert_eq!(items[0], "tx-4");
        assert_eq!(items.len(), 5);

        store.list_trim("user_transactions:u1", 2).await.unwrap();
        let items = store.list_range("user_transactions:u1", 10).await.unwrap();
        assert_eq!(items, vec!["tx-4", "tx-3", "tx-2"]);
    }

    #[tokio::test]
    async fn test_counter_sets_ttl_only_when_new() {
        let store = InMemoryStateStore::new();

        let first = store
            .incr_counter("alerts:shard-0", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(first, 1);
        let ttl_after_first = store.ttl_of("alerts:shard-0").unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = store
            .incr_counter("alerts:shard-0", Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(second, 2);
        // TTL must not have been reset to the larger value
        assert!(store.ttl_of("alerts:shard-0").unwrap() <= ttl_after_first);
    }

    #[tokio::test]
    async fn test_ping() {
        let store = InMemoryStateStore::new();
        assert!(store.ping().await);
    }
}
