//! Feature store facade
//!
//! Versioned registration, per-entity feature serving and online statistics,
//! layered over the shared state store. Numerical statistics use Welford's
//! online algorithm with the second central moment retained so variance can
//! be derived at read time.

use crate::error::Result;
use crate::state::{keys, ttl, StateStore};
use chrono::{DateTime, Utc};
use riskflow_core::{registered_features, FeatureKind, FeatureValue, FeatureVector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Schema version stamped on stored values and metadata
const FEATURE_VERSION: &str = "1.0";

/// Reserved keys attached to stored value maps
const META_KEYS: [&str; 4] = ["_entity_id", "_entity_type", "_timestamp", "_version"];

/// Registered feature metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureMetadata {
    pub name: String,
    pub kind: FeatureKind,
    pub description: String,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
}

/// Online statistics for one feature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureStats {
    pub feature_name: String,
    pub count: u64,
    pub mean: f64,
    /// Second central moment (Welford running M2)
    pub m2: f64,
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub categorical_counts: HashMap<String, u64>,
    #[serde(default)]
    pub null_rate: f64,
    pub last_updated: DateTime<Utc>,
}

impl FeatureStats {
    fn new(feature_name: &str) -> Self {
        Self {
            feature_name: feature_name.to_string(),
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: 0.0,
            max: 0.0,
            categorical_counts: HashMap::new(),
            null_rate: 0.0,
            last_updated: Utc::now(),
        }
    }

    /// Welford update for a numerical observation
    fn observe_number(&mut self, value: f64) {
        self.count += 1;
        if self.count == 1 {
            self.mean = value;
            self.min = value;
            self.max = value;
            self.m2 = 0.0;
        } else {
            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
    }

    fn observe_category(&mut self, value: &str) {
        self.count += 1;
        *self
            .categorical_counts
            .entry(value.to_string())
            .or_insert(0) += 1;
    }

    fn observe_null(&mut self) {
        self.count += 1;
        *self
            .categorical_counts
            .entry("null".to_string())
            .or_insert(0) += 1;
    }

    /// Population variance derived from the running M2
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// Facade over the `feature_metadata:` / `feature_values:` /
/// `feature_stats:` namespaces
pub struct FeatureStoreFacade {
    store: Arc<dyn StateStore>,
}

impl FeatureStoreFacade {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        info!("feature store facade initialized");
        Self { store }
    }

    /// Register a feature with metadata
    pub async fn register_feature(
        &self,
        name: &str,
        kind: FeatureKind,
        description: &str,
        properties: HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let now = Utc::now();
        let metadata = FeatureMetadata {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            version: FEATURE_VERSION.to_string(),
            created_at: now,
            updated_at: now,
            properties,
        };

        let value = serde_json::to_value(&metadata)?;
        self.store
            .set_json(&keys::feature_metadata(name), &value, ttl::FEATURE_METADATA)
            .await?;

        info!(feature = name, ?kind, version = FEATURE_VERSION, "registered feature");
        Ok(())
    }

    /// Register the full built-in feature set
    pub async fn register_builtin_features(&self) -> Result<()> {
        for (name, kind) in registered_features() {
            self.register_feature(name, *kind, "", HashMap::new()).await?;
        }
        Ok(())
    }

    /// Store a feature vector for an entity and fold it into the per-feature
    /// statistics
    pub async fn store_feature_values(
        &self,
        entity_id: &str,
        entity_type: &str,
        features: &FeatureVector,
    ) -> Result<()> {
        let mut map = serde_json::to_value(features)?;
        if let Some(object) = map.as_object_mut() {
            object.insert("_entity_id".to_string(), entity_id.into());
            object.insert("_entity_type".to_string(), entity_type.into());
            object.insert(
                "_timestamp".to_string(),
                Utc::now().timestamp_millis().into(),
            );
            object.insert("_version".to_string(), FEATURE_VERSION.into());
        }

        self.store
            .set_json(
                &keys::feature_values(entity_type, entity_id),
                &map,
                ttl::FEATURE_VALUES,
            )
            .await?;

        for (name, value) in features.iter() {
            if let Err(e) = self.update_stats(name, value).await {
                warn!(feature = %name, "statistics update failed: {}", e);
            }
        }

        debug!(
            entity_id,
            entity_type,
            count = features.len(),
            "stored feature values"
        );
        Ok(())
    }

    /// Feature vector for an entity, with internal metadata stripped
    pub async fn get_feature_values(&self, entity_id: &str, entity_type: &str) -> FeatureVector {
        let key = keys::feature_values(entity_type, entity_id);
        let Ok(Some(mut value)) = self.store.get_json(&key).await else {
            return FeatureVector::new();
        };

        if let Some(object) = value.as_object_mut() {
            for meta_key in META_KEYS {
                object.remove(meta_key);
            }
        }

        serde_json::from_value(value).unwrap_or_default()
    }

    /// Restrict a stored vector to the named features
    pub async fn get_selected_features(
        &self,
        entity_id: &str,
        entity_type: &str,
        names: &[&str],
    ) -> FeatureVector {
        let all = self.get_feature_values(entity_id, entity_type).await;
        all.iter()
            .filter(|(name, _)| names.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Batch retrieval keyed by entity id
    pub async fn get_batch_feature_values(
        &self,
        entity_ids: &[&str],
        entity_type: &str,
    ) -> HashMap<String, FeatureVector> {
        let mut results = HashMap::with_capacity(entity_ids.len());
        for entity_id in entity_ids {
            let features = self.get_feature_values(entity_id, entity_type).await;
            results.insert(entity_id.to_string(), features);
        }
        results
    }

    /// Statistics for a feature, with null rate derived from the counters
    pub async fn get_feature_statistics(&self, feature_name: &str) -> FeatureStats {
        let key = keys::feature_stats(feature_name);
        let mut stats = match self.store.get_json(&key).await {
            Ok(Some(value)) => serde_json::from_value(value)
                .unwrap_or_else(|_| FeatureStats::new(feature_name)),
            _ => FeatureStats::new(feature_name),
        };

        let null_count = stats.categorical_counts.get("null").copied().unwrap_or(0);
        stats.null_rate = if stats.count > 0 {
            null_count as f64 / stats.count as f64
        } else {
            0.0
        };
        stats
    }

    /// The exact registered feature name set
    pub fn get_registered_features(&self) -> Vec<&'static str> {
        registered_features().iter().map(|(name, _)| *name).collect()
    }

    pub async fn is_healthy(&self) -> bool {
        self.store.ping().await
    }

    /// Health and sizing metrics for the ops surface
    pub async fn get_health_metrics(&self) -> serde_json::Value {
        serde_json::json!({
            "is_healthy": self.is_healthy().await,
            "registered_features_count": registered_features().len(),
            "version": FEATURE_VERSION,
            "last_check": Utc::now(),
        })
    }

    async fn update_stats(&self, feature_name: &str, value: &FeatureValue) -> Result<()> {
        let key = keys::feature_stats(feature_name);
        let mut stats = match self.store.get_json(&key).await? {
            Some(raw) => serde_json::from_value(raw)
                .unwrap_or_else(|_| FeatureStats::new(feature_name)),
            None => FeatureStats::new(feature_name),
        };

        match value {
            FeatureValue::Number(n) => stats.observe_number(*n),
            FeatureValue::Flag(b) => stats.observe_category(if *b { "true" } else { "false" }),
            FeatureValue::Text(s) => stats.observe_category(s),
            FeatureValue::Null => stats.observe_null(),
        }
        stats.last_updated = Utc::now();

        let raw = serde_json::to_value(&stats)?;
        self.store.set_json(&key, &raw, ttl::FEATURE_STATS).await
    }
}
