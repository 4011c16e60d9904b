//! Party profile snapshots
//!
//! Profiles are authored by upstream systems and read-only to the pipeline.
//! They are captured by value at enrichment time; a profile attached to a
//! transaction is a snapshot, not a live reference.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// User profile keyed by `user_id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default)]
    pub account_age_days: i64,
    #[serde(default = "default_user_risk")]
    pub risk_score: f64,
    #[serde(default = "default_kyc_status")]
    pub kyc_status: String,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub preferred_time_start: Option<u32>,
    #[serde(default)]
    pub preferred_time_end: Option<u32>,
    #[serde(default)]
    pub weekend_activity: Option<f64>,
    #[serde(default)]
    pub international_transactions: Option<f64>,
    #[serde(default)]
    pub avg_transaction_amount: Option<f64>,
    #[serde(default)]
    pub transaction_frequency: Option<f64>,
    #[serde(default)]
    pub behavioral_patterns: HashMap<String, f64>,
    #[serde(default)]
    pub device_fingerprints: HashSet<String>,
    /// Set when the profile was built on a cache miss rather than authored
    /// upstream; such profiles are never written back
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub synthesized: bool,
}

fn default_user_risk() -> f64 {
    0.5
}

fn default_kyc_status() -> String {
    "pending".to_string()
}

impl UserProfile {
    /// Default profile for a user with no cached entry
    pub fn unknown(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            account_age_days: 0,
            risk_score: 0.5,
            kyc_status: "pending".to_string(),
            verified: false,
            preferred_time_start: None,
            preferred_time_end: None,
            weekend_activity: None,
            international_transactions: None,
            avg_transaction_amount: None,
            transaction_frequency: None,
            behavioral_patterns: HashMap::new(),
            device_fingerprints: HashSet::new(),
            synthesized: true,
        }
    }

    /// Decode a profile from the flat string hash stored at `user:{id}`
    pub fn from_hash(user_id: &str, hash: &HashMap<String, String>) -> Self {
        let mut profile = Self::unknown(user_id);
        profile.synthesized = false;

        if let Some(v) = hash.get("account_age_days").and_then(|v| v.parse().ok()) {
            profile.account_age_days = v;
        }
        if let Some(v) = hash.get("risk_score").and_then(|v| v.parse().ok()) {
            profile.risk_score = v;
        }
        if let Some(v) = hash.get("kyc_status") {
            profile.kyc_status = v.clone();
        }
        if let Some(v) = hash.get("verified").and_then(|v| v.parse().ok()) {
            profile.verified = v;
        }
        profile.preferred_time_start = hash.get("preferred_time_start").and_then(|v| v.parse().ok());
        profile.preferred_time_end = hash.get("preferred_time_end").and_then(|v| v.parse().ok());
        profile.weekend_activity = hash.get("weekend_activity").and_then(|v| v.parse().ok());
        profile.international_transactions = hash
            .get("international_transactions")
            .and_then(|v| v.parse().ok());
        profile.avg_transaction_amount = hash
            .get("avg_transaction_amount")
            .and_then(|v| v.parse().ok());
        profile.transaction_frequency = hash
            .get("transaction_frequency")
            .and_then(|v| v.parse().ok());

        if let Some(raw) = hash.get("behavioral_patterns") {
            if let Ok(patterns) = serde_json::from_str::<HashMap<String, f64>>(raw) {
                profile.behavioral_patterns = patterns;
            }
        }
        if let Some(raw) = hash.get("device_fingerprints") {
            profile.device_fingerprints = match serde_json::from_str::<HashSet<String>>(raw) {
                Ok(set) => set,
                Err(_) => raw.split(',').map(|s| s.trim().to_string()).collect(),
            };
        }

        profile
    }

    pub fn is_new_account(&self) -> bool {
        self.account_age_days < 30
    }

    pub fn is_very_new_account(&self) -> bool {
        self.account_age_days < 7
    }

    /// Named behavioral pattern value with a fallback default
    pub fn pattern_value(&self, name: &str, default: f64) -> f64 {
        self.behavioral_patterns.get(name).copied().unwrap_or(default)
    }
}

/// Merchant risk classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MerchantRiskLevel {
    Low,
    Medium,
    High,
    Unknown,
}

impl MerchantRiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            MerchantRiskLevel::Low => "low",
            MerchantRiskLevel::Medium => "medium",
            MerchantRiskLevel::High => "high",
            MerchantRiskLevel::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "low" => MerchantRiskLevel::Low,
            "medium" => MerchantRiskLevel::Medium,
            "high" => MerchantRiskLevel::High,
            _ => MerchantRiskLevel::Unknown,
        }
    }
}

/// Merchant profile keyed by `merchant_id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantProfile {
    pub merchant_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_merchant_risk_level")]
    pub risk_level: MerchantRiskLevel,
    #[serde(default = "default_fraud_rate")]
    pub fraud_rate: f64,
    #[serde(default)]
    pub is_blacklisted: bool,
    #[serde(default)]
    pub avg_transaction_amount: Option<f64>,
    /// Hours of day (0..23) the merchant normally transacts in; empty means
    /// always open
    #[serde(default)]
    pub operating_hours: HashSet<u32>,
    #[serde(default = "default_risk_multiplier")]
    pub risk_multiplier: f64,
    #[serde(default)]
    pub is_high_risk_category: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub synthesized: bool,
}

fn default_merchant_risk_level() -> MerchantRiskLevel {
    MerchantRiskLevel::Medium
}

fn default_fraud_rate() -> f64 {
    0.05
}

fn default_risk_multiplier() -> f64 {
    2.0
}

impl MerchantProfile {
    /// Default profile for a merchant with no cached entry
    pub fn unknown(merchant_id: &str) -> Self {
        Self {
            merchant_id: merchant_id.to_string(),
            name: None,
            category: None,
            risk_level: MerchantRiskLevel::Medium,
            fraud_rate: 0.05,
            is_blacklisted: false,
            avg_transaction_amount: None,
            operating_hours: HashSet::new(),
            risk_multiplier: 2.0,
            is_high_risk_category: false,
            synthesized: true,
        }
    }

    /// Decode a profile from the flat string hash stored at `merchant:{id}`
    pub fn from_hash(merchant_id: &str, hash: &HashMap<String, String>) -> Self {
        let mut profile = Self::unknown(merchant_id);
        profile.synthesized = false;

        profile.name = hash.get("name").cloned();
        profile.category = hash.get("category").cloned();
        if let Some(v) = hash.get("risk_level") {
            profile.risk_level = MerchantRiskLevel::parse(v);
        }
        if let Some(v) = hash.get("fraud_rate").and_then(|v| v.parse().ok()) {
            profile.fraud_rate = v;
        }
        if let Some(v) = hash.get("is_blacklisted").and_then(|v| v.parse().ok()) {
            profile.is_blacklisted = v;
        }
        profile.avg_transaction_amount = hash
            .get("avg_transaction_amount")
            .and_then(|v| v.parse().ok());
        if let Some(raw) = hash.get("operating_hours") {
            profile.operating_hours = match serde_json::from_str::<HashSet<u32>>(raw) {
                Ok(set) => set,
                Err(_) => raw.split(',').filter_map(|s| s.trim().parse().ok()).collect(),
            };
        }
        if let Some(v) = hash.get("risk_multiplier").and_then(|v| v.parse().ok()) {
            profile.risk_multiplier = v;
        }
        if let Some(v) = hash.get("is_high_risk_category").and_then(|v| v.parse().ok()) {
            profile.is_high_risk_category = v;
        }

        profile
    }

    /// Whether the merchant normally transacts at the given hour
    pub fn is_operating_at(&self, hour: u32) -> bool {
        self.operating_hours.is_empty() || self.operating_hours.contains(&hour)
    }
}
