//! Profile cache
//!
//! Retrieves party profiles from the state store, synthesizing defaults on
//! miss. Synthesized profiles are flagged and never written back.

use crate::state::{keys, StateStore};
use riskflow_core::{MerchantProfile, UserProfile};
use std::sync::Arc;
use tracing::debug;

/// Read-through cache over the `user:` and `merchant:` namespaces
pub struct ProfileCache {
    store: Arc<dyn StateStore>,
}

impl ProfileCache {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Fetch a user profile, synthesizing a default on miss
    pub async fn get_user(&self, user_id: &str) -> UserProfile {
        let hash = self
            .store
            .get_hash(&keys::user_profile(user_id))
            .await
            .unwrap_or_default();

        if hash.is_empty() {
            debug!(user_id, "user profile not cached, synthesizing default");
            UserProfile::unknown(user_id)
        } else {
            UserProfile::from_hash(user_id, &hash)
        }
    }

    /// Fetch a merchant profile, synthesizing a default on miss
    pub async fn get_merchant(&self, merchant_id: &str) -> MerchantProfile {
        let hash = self
            .store
            .get_hash(&keys::merchant_profile(merchant_id))
            .await
            .unwrap_or_default();

        if hash.is_empty() {
            debug!(merchant_id, "merchant profile not cached, synthesizing default");
            MerchantProfile::unknown(merchant_id)
        } else {
            MerchantProfile::from_hash(merchant_id, &hash)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InMemoryStateStore;
    use riskflow_core::MerchantRiskLevel;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_get_user_hit() {
        let store = Arc::new(InMemoryStateStore::new());
        let mut hash = HashMap::new();
        hash.insert("risk_score".to_string(), "0.1".to_string());
        hash.insert("verified".to_string(), "true".to_string());
        hash.insert("account_age_days".to_string(), "400".to_string());
        store.seed_hash("user:u1", hash);

        let cache = ProfileCache::new(store);
        let profile = cache.get_user("u1").await;

        assert!(!profile.synthesized);
        assert_eq!(profile.risk_score, 0.1);
        assert!(profile.verified);
        assert!(!profile.is_new_account());
    }

    #[tokio::test]
    async fn test_get_user_miss_synthesizes_default() {
        let store = Arc::new(InMemoryStateStore::new());
        let cache = ProfileCache::new(store.clone());

        let profile = cache.get_user("nobody").await;
        assert!(profile.synthesized);
        assert_eq!(profile.risk_score, 0.5);
        assert_eq!(profile.kyc_status, "pending");
        assert!(!profile.verified);

        // Miss-synthesized profiles are not written back
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_get_merchant_miss_synthesizes_default() {
        let store = Arc::new(InMemoryStateStore::new());
        let cache = ProfileCache::new(store.clone());

        let profile = cache.get_merchant("nobody").await;
        assert!(profile.synthesized);
        assert_eq!(profile.risk_level, MerchantRiskLevel::Medium);
        assert_eq!(profile.fraud_rate, 0.05);
        assert!(!profile.is_blacklisted);
        assert_eq!(profile.risk_multiplier, 2.0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_get_merchant_hit() {
        let store = Arc::new(InMemoryStateStore::new());
        let mut hash = HashMap::new();
        hash.insert("name".to_string(), "Quick Cash Casino".to_string());
        hash.insert("risk_level".to_string(), "high".to_string());
        hash.insert("is_blacklisted".to_string(), "true".to_string());
        store.seed_hash("merchant:m1", hash);

        let cache = ProfileCache::new(store);
        let profile = cache.get_merchant("m1").await;

        assert!(!profile.synthesized);
        assert_eq!(profile.risk_level, MerchantRiskLevel::High);
        assert!(profile.is_blacklisted);
        assert_eq!(profile.name.as_deref(), Some("Quick Cash Casino"));
    }
}
