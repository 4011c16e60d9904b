//! Feature registry and feature vector types
//!
//! The registry is a fixed table built into the binary: every feature the
//! extractor emits is listed here with its kind, and downstream consumers
//! (feature store, ML training topics) treat this set as the contract.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of a registered feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeatureKind {
    Numerical,
    Categorical,
    Boolean,
    Text,
    Timestamp,
}

/// A single feature value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Flag(bool),
    Number(f64),
    Text(String),
    Null,
}

impl From<bool> for FeatureValue {
    fn from(v: bool) -> Self {
        FeatureValue::Flag(v)
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        FeatureValue::Number(v)
    }
}

impl From<u32> for FeatureValue {
    fn from(v: u32) -> Self {
        FeatureValue::Number(v as f64)
    }
}

impl From<i64> for FeatureValue {
    fn from(v: i64) -> Self {
        FeatureValue::Number(v as f64)
    }
}

impl From<&str> for FeatureValue {
    fn from(v: &str) -> Self {
        FeatureValue::Text(v.to_string())
    }
}

impl From<String> for FeatureValue {
    fn from(v: String) -> Self {
        FeatureValue::Text(v)
    }
}

/// Named feature map attached to a transaction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector(HashMap<String, FeatureValue>);

impl FeatureVector {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<FeatureValue>) {
        self.0.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Boolean feature lookup, false when absent or not a flag
    pub fn flag(&self, name: &str) -> bool {
        matches!(self.0.get(name), Some(FeatureValue::Flag(true)))
    }

    /// Numeric feature lookup
    pub fn number(&self, name: &str) -> Option<f64> {
        match self.0.get(name) {
            Some(FeatureValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    /// Text feature lookup
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.0.get(name) {
            Some(FeatureValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FeatureValue)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Absorb all entries from another vector, overwriting duplicates
    pub fn merge(&mut self, other: FeatureVector) {
        self.0.extend(other.0);
    }
}

impl FromIterator<(String, FeatureValue)> for FeatureVector {
    fn from_iter<T: IntoIterator<Item = (String, FeatureValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Compact per-transaction feature record for the features output stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub entity_id: String,
    pub entity_type: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
    pub features: FeatureVector,
}

/// The full registry of feature names the extractor emits
///
/// Grouped: amount (12), temporal (8), geographic (6), user behavior (10),
/// merchant risk (8), device/network (5), velocity (8), contextual (5).
pub fn registered_features() -> &'static [(&'static str, FeatureKind)] {
    use FeatureKind::*;
    &[
        // Amount
        ("amount", Numerical),
        ("amount_log", Numerical),
        ("amount_sqrt", Numerical),
        ("is_round_amount", Boolean),
        ("is_round_10", Boolean),
        ("is_round_100", Boolean),
        ("amount_to_user_avg_ratio", Numerical),
        ("amount_deviation_zscore", Numerical),
        ("is_large_for_user", Boolean),
        ("amount_to_merchant_avg_ratio", Numerical),
        ("is_large_for_merchant", Boolean),
        ("amount_category", Categorical),
        // Temporal
        ("hour_of_day", Numerical),
        ("day_of_week", Numerical),
        ("day_of_month", Numerical),
        ("is_weekend", Boolean),
        ("time_period", Categorical),
        ("is_business_hours", Boolean),
        ("is_night_time", Boolean),
        ("in_user_preferred_time", Boolean),
        // Geographic
        ("has_geolocation", Boolean),
        ("has_merchant_location", Boolean),
        ("latitude", Numerical),
        ("longitude", Numerical),
        ("is_high_risk_country", Boolean),
        ("distance_to_merchant_km", Numerical),
        ("user_intl_preference", Numerical),
        ("unexpected_intl_transaction", Boolean),
        // User behavior
        ("account_age_days", Numerical),
        ("is_new_account", Boolean),
        ("is_very_new_account", Boolean),
        ("user_risk_score", Numerical),
        ("is_kyc_verified", Boolean),
        ("kyc_status", Categorical),
        ("weekend_activity_factor", Numerical),
        ("online_preference", Numerical),
        ("user_avg_amount", Numerical),
        ("user_transaction_frequency", Numerical),
        // Merchant risk
        ("merchant_risk_level", Categorical),
        ("merchant_fraud_rate", Numerical),
        ("is_blacklisted_merchant", Boolean),
        ("merchant_category", Categorical),
        ("is_high_risk_category", Boolean),
        ("within_merchant_hours", Boolean),
        ("merchant_risk_multiplier", Numerical),
        ("suspicious_merchant_name", Boolean),
        // Device/Network
        ("is_known_device", Boolean),
        ("is_new_device", Boolean),
        ("is_private_ip", Boolean),
        ("ip_risk_score", Numerical),
        ("suspicious_user_agent", Boolean),
        // Velocity
        ("velocity_5min_count", Numerical),
        ("velocity_5min_amount", Numerical),
        ("velocity_1hour_count", Numerical),
        ("velocity_1hour_amount", Numerical),
        ("velocity_24hour_count", Numerical),
        ("velocity_24hour_amount", Numerical),
        ("high_velocity_5min", Boolean),
        ("high_velocity_1hour", Boolean),
        // Contextual
        ("payment_method", Categorical),
        ("is_high_risk_payment", Boolean),
        ("transaction_type", Categorical),
        ("is_refund", Boolean),
        ("card_type", Categorical),
    ]
}

/// Look up the registered kind of a feature name
pub fn feature_kind(name: &str) -> Option<FeatureKind> {
    registered_features()
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, k)| *k)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_size() {
        assert_eq!(registered_features().len(), 62);
    }

    #[test]
    fn test_registry_has_no_duplicates() {
        let mut names: Vec<&str> = registered_features().iter().map(|(n, _)| *n).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), registered_features().len());
    }

    #[test]
    fn test_feature_kind_lookup() {
        assert_eq!(feature_kind("amount"), Some(FeatureKind::Numerical));
        assert_eq!(feature_kind("is_weekend"), Some(FeatureKind::Boolean));
        assert_eq!(feature_kind("amount_category"), Some(FeatureKind::Categorical));
        assert_eq!(feature_kind("not_a_feature"), None);
    }

    #[test]
    fn test_feature_vector_accessors() {
        let mut features = FeatureVector::new();
        features.insert("is_night_time", true);
        features.insert("amount", 125.0);
        features.insert("time_period", "night");

        assert!(features.flag("is_night_time"));
        assert!(!features.flag("is_weekend"));
        assert_eq!(features.number("amount"), Some(125.0));
        assert_eq!(features.text("time_period"), Some("night"));
        assert_eq!(features.number("time_period"), None);
        assert_eq!(features.len(), 3);
    }

    #[test]
    fn test_feature_vector_merge_overwrites() {
        let mut base = FeatureVector::new();
        base.insert("amount", 10.0);
        base.insert("is_refund", false);

        let mut extra = FeatureVector::new();
        extra.insert("amount", 20.0);

        base.merge(extra);
        assert_eq!(base.number("amount"), Some(20.0));
        assert_eq!(base.len(), 2);
    }

    #[test]
    fn test_feature_value_untagged_serialization() {
        let mut features = FeatureVector::new();
        features.insert("flag", true);
        features.insert("num", 1.5);
        features.insert("text", "abc");

        let json = serde_json::to_value(&features).unwrap();
        assert_eq!(json["flag"], serde_json::json!(true));
        assert_eq!(json["num"], serde_json::json!(1.5));
        assert_eq!(json["text"], serde_json::json!("abc"));

        let back: FeatureVector = serde_json::from_value(json).unwrap();
        assert!(back.flag("flag"));
        assert_eq!(back.number("num"), Some(1.5));
    }
}
