//! State store abstraction
//!
//! The pipeline's only shared mutable resource. All access goes through the
//! [`StateStore`] trait; implementations must bound every call with a
//! deadline and degrade to empty values on failure rather than surfacing
//! faults into the record flow.

pub mod memory;
pub mod redis;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

pub use self::memory::InMemoryStateStore;
pub use self::redis::RedisStateStore;

/// Key namespaces
pub mod keys {
    pub const USER_PROFILE: &str = "user:";
    pub const MERCHANT_PROFILE: &str = "merchant:";
    pub const TRANSACTION: &str = "transaction:";
    pub const USER_TRANSACTIONS: &str = "user_transactions:";
    pub const MERCHANT_TRANSACTIONS: &str = "merchant_transactions:";
    pub const VELOCITY: &str = "velocity:";
    pub const FEATURES: &str = "features:";
    pub const AGGREGATIONS: &str = "agg:";
    pub const FEATURE_METADATA: &str = "feature_metadata:";
    pub const FEATURE_VALUES: &str = "feature_values:";
    pub const FEATURE_STATS: &str = "feature_stats:";

    pub fn user_profile(user_id: &str) -> String {
        format!("{USER_PROFILE}{user_id}")
    }

    pub fn merchant_profile(merchant_id: &str) -> String {
        format!("{MERCHANT_PROFILE}{merchant_id}")
    }

    pub fn transaction(transaction_id: &str) -> String {
        format!("{TRANSACTION}{transaction_id}")
    }

    pub fn user_transactions(user_id: &str) -> String {
        format!("{USER_TRANSACTIONS}{user_id}")
    }

    pub fn merchant_transactions(merchant_id: &str) -> String {
        format!("{MERCHANT_TRANSACTIONS}{merchant_id}")
    }

    pub fn velocity(user_id: &str, window: &str) -> String {
        format!("{VELOCITY}{user_id}:{window}")
    }

    pub fn features(transaction_id: &str) -> String {
        format!("{FEATURES}{transaction_id}")
    }

    pub fn aggregation(aggregation_key: &str) -> String {
        format!("{AGGREGATIONS}{aggregation_key}")
    }

    pub fn feature_metadata(feature_name: &str) -> String {
        format!("{FEATURE_METADATA}{feature_name}")
    }

    pub fn feature_values(entity_type: &str, entity_id: &str) -> String {
        format!("{FEATURE_VALUES}{entity_type}:{entity_id}")
    }

    pub fn feature_stats(feature_name: &str) -> String {
        format!("{FEATURE_STATS}{feature_name}")
    }
}

/// Entry TTLs
pub mod ttl {
    use std::time::Duration;

    pub const TRANSACTION: Duration = Duration::from_secs(86_400);
    pub const FEATURES: Duration = Duration::from_secs(7_200);
    pub const AGGREGATIONS: Duration = Duration::from_secs(1_800);
    pub const FEATURE_METADATA: Duration = Duration::from_secs(86_400);
    pub const FEATURE_VALUES: Duration = Duration::from_secs(7_200);
    pub const FEATURE_STATS: Duration = Duration::from_secs(3_600);
}

/// Namespaced typed accessors over an external key/hash store
///
/// Every call is bounded by the implementation's per-operation timeout.
/// Read failures return empty values; write failures are logged by the
/// implementation and reported through `Err` so callers can decide whether
/// to retry, but must never take the pipeline down.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read all fields of a hash; empty map when the key is missing
    async fn get_hash(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Write hash fields and set the key's TTL
    async fn set_hash(&self, key: &str, fields: HashMap<String, String>, ttl: Duration)
        -> Result<()>;

    /// Refresh a key's TTL
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Read a JSON value; `None` when the key is missing
    async fn get_json(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Write a JSON value with TTL
    async fn set_json(&self, key: &str, value: &serde_json::Value, ttl: Duration) -> Result<()>;

    /// Push an item onto the front of a list
    async fn list_push_front(&self, key: &str, item: &str) -> Result<()>;

    /// Trim a list to the index range `[0, stop]`
    async fn list_trim(&self, key: &str, stop: usize) -> Result<()>;

    /// Read up to `limit` items from the front of a list
    async fn list_range(&self, key: &str, limit: usize) -> Result<Vec<String>>;

    /// Atomically increment a counter, setting `ttl_if_new` only on the
    /// 0 -> 1 transition; returns the post-increment value
    async fn incr_counter(&self, key: &str, ttl_if_new: Duration) -> Result<i64>;

    /// Connectivity check
    async fn ping(&self) -> bool;
}
