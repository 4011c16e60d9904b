//! Transaction model
//!
//! A transaction is immutable after decode except for the enrichment fields
//! (profiles, features, score, decision) written by the pipeline stages.

use crate::features::FeatureVector;
use crate::profile::{MerchantProfile, UserProfile};
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Risk level derived from the fraud score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Critical,
    High,
    Medium,
    Low,
    VeryLow,
    /// Assigned when a record could not be processed normally
    Error,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Critical => "CRITICAL",
            RiskLevel::High => "HIGH",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::Low => "LOW",
            RiskLevel::VeryLow => "VERY_LOW",
            RiskLevel::Error => "ERROR",
        }
    }
}

/// Action dictated by the scorer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approve,
    Review,
    Decline,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "APPROVE",
            Decision::Review => "REVIEW",
            Decision::Decline => "DECLINE",
        }
    }
}

/// Latitude/longitude pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Payment transaction event
///
/// Optional fields default to `None` on decode so that partially populated
/// input records still produce a valid transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub user_id: String,
    pub merchant_id: String,
    pub amount: f64,
    #[serde(default)]
    pub currency: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub card_type: Option<String>,
    #[serde(default)]
    pub transaction_type: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub device_fingerprint: Option<String>,
    #[serde(default)]
    pub geolocation: Option<GeoPoint>,
    #[serde(default)]
    pub merchant_location: Option<GeoPoint>,
    #[serde(default)]
    pub hour_of_day: Option<u32>,
    #[serde(default)]
    pub is_weekend: Option<bool>,
    /// Ground-truth label carried through for evaluation only
    #[serde(default)]
    pub is_fraud: Option<bool>,

    // Enrichment fields, populated by the pipeline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_profile: Option<UserProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_profile: Option<MerchantProfile>,
    #[serde(default, skip_serializing_if = "FeatureVector::is_empty")]
    pub features: FeatureVector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fraud_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
}

impl Transaction {
    /// Hour of day in UTC, preferring the precomputed field when present
    pub fn effective_hour(&self) -> u32 {
        self.hour_of_day.unwrap_or_else(|| self.timestamp.hour())
    }

    /// Weekend indicator, preferring the precomputed field when present
    pub fn effective_is_weekend(&self) -> bool {
        self.is_weekend
            .unwrap_or_else(|| self.timestamp.weekday().number_from_monday() >= 6)
    }

    /// Event time in milliseconds since epoch
    pub fn event_time_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    /// Compact alert payload for the fraud-alerts stream
    pub fn to_fraud_alert(&self) -> FraudAlert {
        FraudAlert {
            transaction_id: self.transaction_id.clone(),
            user_id: self.user_id.clone(),
            merchant_id: self.merchant_id.clone(),
            amount: self.amount,
            fraud_score: self.fraud_score.unwrap_or(0.0),
            risk_level: self.risk_level.unwrap_or(RiskLevel::Error),
            decision: self.decision.unwrap_or(Decision::Review),
            timestamp: self.timestamp,
        }
    }
}

/// Alert record emitted for transactions whose score crosses the alert
/// threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudAlert {
    pub transaction_id: String,
    pub user_id: String,
    pub merchant_id: String,
    pub amount: f64,
    pub fraud_score: f64,
    pub risk_level: RiskLevel,
    pub decision: Decision,
    pub timestamp: DateTime<Utc>,
}
