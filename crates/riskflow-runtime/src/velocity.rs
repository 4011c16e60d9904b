//! Per-user velocity counters and the transaction cache
//!
//! Counters are rolling `{count, amount}` hashes per `(user, window)` with
//! TTL equal to the window length: entries expire naturally rather than
//! sliding, trading exactness for cheap short-horizon approximations.
//!
//! Updates are read-modify-write without a CAS guard. Correctness relies on
//! the pipeline partitioning records by `user_id`, so a single worker owns
//! each user's velocity keys.

use crate::error::Result;
use crate::state::{keys, ttl, StateStore};
use riskflow_core::{Transaction, TransactionCodec};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Rolling window sizes tracked per user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VelocityWindow {
    FiveMin,
    OneHour,
    Day,
}

impl VelocityWindow {
    pub const ALL: [VelocityWindow; 3] =
        [VelocityWindow::FiveMin, VelocityWindow::OneHour, VelocityWindow::Day];

    /// Key segment used in `velocity:{user}:{window}`
    pub fn label(&self) -> &'static str {
        match self {
            VelocityWindow::FiveMin => "5min",
            VelocityWindow::OneHour => "1hour",
            VelocityWindow::Day => "24hour",
        }
    }

    pub fn length(&self) -> Duration {
        match self {
            VelocityWindow::FiveMin => Duration::from_secs(300),
            VelocityWindow::OneHour => Duration::from_secs(3_600),
            VelocityWindow::Day => Duration::from_secs(86_400),
        }
    }
}

/// Point-in-time read of a velocity counter
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VelocitySnapshot {
    pub count: u64,
    pub amount: f64,
}

impl VelocitySnapshot {
    fn from_hash(hash: &HashMap<String, String>) -> Self {
        Self {
            count: hash.get("count").and_then(|v| v.parse().ok()).unwrap_or(0),
            amount: hash.get("amount").and_then(|v| v.parse().ok()).unwrap_or(0.0),
        }
    }
}

/// Maintains velocity counters and the recent-transaction cache
pub struct VelocityUpdater {
    store: Arc<dyn StateStore>,
}

/// Recent-transaction list capacities
const USER_RECENT_CAPACITY: usize = 100;
const MERCHANT_RECENT_CAPACITY: usize = 500;

impl VelocityUpdater {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Read the current counter for a user and window
    pub async fn snapshot(&self, user_id: &str, window: VelocityWindow) -> VelocitySnapshot {
        let key = keys::velocity(user_id, window.label());
        match self.store.get_hash(&key).await {
            Ok(hash) => VelocitySnapshot::from_hash(&hash),
            Err(e) => {
                warn!(user_id, window = window.label(), "velocity read failed: {}", e);
                VelocitySnapshot::default()
            }
        }
    }

    /// Fold a transaction into every window and refresh the transaction
    /// cache
    ///
    /// Failures are logged and swallowed; a missed velocity update degrades
    /// feature accuracy but must not fail the record.
    pub async fn record(&self, tx: &Transaction) {
        self.bump(tx).await;
        self.cache(tx).await;
    }

    /// Increment the window counters only
    ///
    /// Runs before feature extraction so the extracted counts include the
    /// event being processed.
    pub async fn bump(&self, tx: &Transaction) {
        for window in VelocityWindow::ALL {
            if let Err(e) = self.bump_window(tx, window).await {
                warn!(
                    user_id = %tx.user_id,
                    window = window.label(),
                    "velocity update failed: {}",
                    e
                );
            }
        }
    }

    /// Refresh the transaction cache entry and recent-transaction lists
    ///
    /// Runs after scoring so the cached record carries the final decision.
    pub async fn cache(&self, tx: &Transaction) {
        if let Err(e) = self.cache_transaction(tx).await {
            warn!(transaction_id = %tx.transaction_id, "transaction cache update failed: {}", e);
        }
    }

    async fn bump_window(&self, tx: &Transaction, window: VelocityWindow) -> Result<()> {
        let key = keys::velocity(&tx.user_id, window.label());
        let current = VelocitySnapshot::from_hash(&self.store.get_hash(&key).await?);

        let mut fields = HashMap::new();
        fields.insert("count".to_string(), (current.count + 1).to_string());
        fields.insert("amount".to_string(), (current.amount + tx.amount).to_string());
        fields.insert(
            "timestamp".to_string(),
            tx.event_time_ms().to_string(),
        );

        self.store.set_hash(&key, fields, window.length()).await
    }

    /// Cache the full record plus compact entries on the per-party lists
    async fn cache_transaction(&self, tx: &Transaction) -> Result<()> {
        let value = serde_json::from_slice(&TransactionCodec::encode(tx))?;
        self.store
            .set_json(&keys::transaction(&tx.transaction_id), &value, ttl::TRANSACTION)
            .await?;

        let entry = format!("{}:{}:{}", tx.transaction_id, tx.amount, tx.event_time_ms());

        let user_key = keys::user_transactions(&tx.user_id);
        self.store.list_push_front(&user_key, &entry).await?;
        self.store.list_trim(&user_key, USER_RECENT_CAPACITY - 1).await?;
        self.store.expire(&user_key, ttl::TRANSACTION).await?;

        let merchant_key = keys::merchant_transactions(&tx.merchant_id);
        self.store.list_push_front(&merchant_key, &entry).await?;
        self.store
            .list_trim(&merchant_key, MERCHANT_RECENT_CAPACITY - 1)
            .await?;
        self.store.expire(&merchant_key, ttl::TRANSACTION).await?;

        Ok(())
    }

    /// Most recent cached entries for a user, newest first
    pub async fn user_recent(&self, user_id: &str, limit: usize) -> Vec<String> {
        self.store
            .list_range(&keys::user_transactions(user_id), limit)
            .await
            .unwrap_or_default()
    }

    /// Most recent cached entries for a merchant, newest first
    pub async fn merchant_recent(&self, merchant_id: &str, limit: usize) -> Vec<String> {
        self.store
            .list_range(&keys::merchant_transactions(merchant_id), limit)
            .await
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InMemoryStateStore;
    use chrono::{TimeZone, Utc};
    use riskflow_core::FeatureVector;

    fn create_test_transaction(id: &str, amount: f64) -> Transaction {
        Transaction {
            transaction_id: id.to_string(),
            user_id: "u1".to_string(),
            merchant_id: "m1".to_string(),
            amount,
            currency: None,
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            payment_method: None,
            card_type: None,
            transaction_type: None,
            ip_address: None,
            user_agent: None,
            device_fingerprint: None,
            geolocation: None,
            merchant_location: None,
            hour_of_day: None,
            is_weekend: None,
            is_fraud: None,
            user_profile: None,
            merchant_profile: None,
            features: FeatureVector::new(),
            fraud_score: None,
            risk_level: None,
            decision: None,
            processing_time_ms: None,
        }
    }

    #[tokio::test]
    async fn test_record_increments_all_windows() {
        let store = Arc::new(InMemoryStateStore::new());
        let updater = VelocityUpdater::new(store.clone());

        updater.record(&create_test_transaction("tx-1", 42.5)).await;

        for window in VelocityWindow::ALL {
            let snap = updater.snapshot("u1", window).await;
            assert_eq!(snap.count, 1, "window {}", window.label());
            assert_eq!(snap.amount, 42.5);
        }
    }

    #[tokio::test]
    async fn test_record_accumulates() {
        let store = Arc::new(InMemoryStateStore::new());
        let updater = VelocityUpdater::new(store);

        for i in 0..6 {
            updater
                .record(&create_test_transaction(&format!("tx-{i}"), 1.0))
                .await;
        }

        let snap = updater.snapshot("u1", VelocityWindow::FiveMin).await;
        assert_eq!(snap.count, 6);
        assert_eq!(snap.amount, 6.0);
    }

    #[tokio::test]
    async fn test_snapshot_missing_user_is_zero() {
        let store = Arc::new(InMemoryStateStore::new());
        let updater = VelocityUpdater::new(store);

        let snap = updater.snapshot("nobody", VelocityWindow::OneHour).await;
        assert_eq!(snap, VelocitySnapshot::default());
    }

    #[tokio::test]
    async fn test_transaction_cache_lists() {
        let store = Arc::new(InMemoryStateStore::new());
        let updater = VelocityUpdater::new(store.clone());

        updater.record(&create_test_transaction("tx-1", 10.0)).await;
        updater.record(&create_test_transaction("tx-2", 20.0)).await;

        let recent = updater.user_recent("u1", 10).await;
        assert_eq!(recent.len(), 2);
        assert!(recent[0].starts_with("tx-2:20:"));
        assert!(recent[1].starts_with("tx-1:10:"));

        let merchant_recent = updater.merchant_recent("m1", 1).await;
        assert_eq!(merchant_recent.len(), 1);

        let cached = store.get_json("transaction:tx-1").await.unwrap();
        assert!(cached.is_some());
    }

    #[tokio::test]
    async fn test_user_list_trimmed_to_capacity() {
        let store = Arc::new(InMemoryStateStore::new());
        let updater = VelocityUpdater::new(store);

        for i in 0..120 {
            updater
                .record(&create_test_transaction(&format!("tx-{i}"), 1.0))
                .await;
        }

        let recent = updater.user_recent("u1", 200).await;
        assert_eq!(recent.len(), USER_RECENT_CAPACITY);
        assert!(recent[0].starts_with("tx-119:"));
    }

    #[test]
    fn test_window_labels_and_lengths() {
        assert_eq!(VelocityWindow::FiveMin.label(), "5min");
        assert_eq!(VelocityWindow::OneHour.label(), "1hour");
        assert_eq!(VelocityWindow::Day.label(), "24hour");
        assert_eq!(VelocityWindow::FiveMin.length(), Duration::from_secs(300));
    }
}
