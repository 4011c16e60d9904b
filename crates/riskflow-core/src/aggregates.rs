//! Windowed aggregate records
//!
//! One record per window per key, emitted when the event-time watermark
//! passes the window end plus allowed lateness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-user sliding-window velocity summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserVelocityAggregate {
    pub user_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub transaction_count: u64,
    pub total_amount: f64,
    pub fraud_count: u64,
    pub high_risk_count: u64,
    pub unique_merchant_count: usize,
    pub unique_payment_method_count: usize,
    pub avg_amount: f64,
    pub fraud_rate: f64,
    pub velocity_score: f64,
}

/// Per-merchant tumbling-window risk summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantAggregate {
    pub merchant_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub transaction_count: u64,
    pub total_amount: f64,
    pub fraud_count: u64,
    pub fraud_amount: f64,
    pub high_risk_count: u64,
    pub unique_user_count: usize,
    pub unique_payment_method_count: usize,
    pub avg_amount: f64,
    pub fraud_rate: f64,
    pub amount_stddev: f64,
    pub risk_score: f64,
}

/// Gap-delimited user session summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSessionAggregate {
    pub user_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub transaction_count: u64,
    pub total_amount: f64,
    pub unique_merchant_count: usize,
    pub session_duration_ms: i64,
    pub avg_amount: f64,
}

/// Geographic grid-cell summary; cell key is `geo_{floor(lat)}_{floor(lon)}`
/// or `unknown` for records without coordinates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeographicAggregate {
    pub grid_key: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub transaction_count: u64,
    pub total_amount: f64,
    pub fraud_count: u64,
    pub unique_user_count: usize,
    pub avg_amount: f64,
    pub fraud_rate: f64,
}

/// Pattern-bucket summary keyed by payment method, merchant category and
/// amount bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudPatternAggregate {
    pub pattern_key: String,
    pub payment_method: String,
    pub merchant_category: String,
    pub amount_bucket: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub transaction_count: u64,
    pub total_amount: f64,
    pub fraud_count: u64,
    pub high_risk_count: u64,
    pub fraud_rate: f64,
    pub avg_amount: f64,
}

/// Log10 amount-cluster summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmountClusterAggregate {
    pub cluster_key: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub transaction_count: u64,
    pub total_amount: f64,
    pub fraud_count: u64,
    pub unique_user_count: usize,
    pub avg_amount: f64,
    pub min_amount: f64,
    pub max_amount: f64,
}

/// Burst alert for users transacting at high frequency inside a short window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighFrequencyAlert {
    pub user_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub transaction_count: u64,
    pub total_amount: f64,
    pub unique_merchant_count: usize,
    pub velocity_score: f64,
}

/// Union of the aggregate outputs, used where the emission path handles all
/// window types uniformly
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "aggregate_type", rename_all = "snake_case")]
pub enum AggregateRecord {
    UserVelocity(UserVelocityAggregate),
    Merchant(MerchantAggregate),
    UserSession(UserSessionAggregate),
    Geographic(GeographicAggregate),
    FraudPattern(FraudPatternAggregate),
    AmountCluster(AmountClusterAggregate),
    HighFrequency(HighFrequencyAlert),
}

impl AggregateRecord {
    /// Stable label of the aggregation that produced the record
    pub fn type_label(&self) -> &'static str {
        match self {
            AggregateRecord::UserVelocity(_) => "user_velocity",
            AggregateRecord::Merchant(_) => "merchant",
            AggregateRecord::UserSession(_) => "user_session",
            AggregateRecord::Geographic(_) => "geographic",
            AggregateRecord::FraudPattern(_) => "fraud_pattern",
            AggregateRecord::AmountCluster(_) => "amount_cluster",
            AggregateRecord::HighFrequency(_) => "high_frequency",
        }
    }

    /// Key the record was aggregated under
    pub fn key(&self) -> &str {
        match self {
            AggregateRecord::UserVelocity(a) => &a.user_id,
            AggregateRecord::Merchant(a) => &a.merchant_id,
            AggregateRecord::UserSession(a) => &a.user_id,
            AggregateRecord::Geographic(a) => &a.grid_key,
            AggregateRecord::FraudPattern(a) => &a.pattern_key,
            AggregateRecord::AmountCluster(a) => &a.cluster_key,
            AggregateRecord::HighFrequency(a) => &a.user_id,
        }
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        match self {
            AggregateRecord::UserVelocity(a) => a.window_start,
            AggregateRecord::Merchant(a) => a.window_start,
            AggregateRecord::UserSession(a) => a.window_start,
            AggregateRecord::Geographic(a) => a.window_start,
            AggregateRecord::FraudPattern(a) => a.window_start,
            AggregateRecord::AmountCluster(a) => a.window_start,
            AggregateRecord::HighFrequency(a) => a.window_start,
        }
    }

    pub fn window_end(&self) -> DateTime<Utc> {
        match self {
            AggregateRecord::UserVelocity(a) => a.window_end,
            AggregateRecord::Merchant(a) => a.window_end,
            AggregateRecord::UserSession(a) => a.window_end,
            AggregateRecord::Geographic(a) => a.window_end,
            AggregateRecord::FraudPattern(a) => a.window_end,
            AggregateRecord::AmountCluster(a) => a.window_end,
            AggregateRecord::HighFrequency(a) => a.window_end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_aggregate_record_tagged_serialization() {
        let agg = AggregateRecord::Merchant(MerchantAggregate {
            merchant_id: "m1".to_string(),
            window_start: Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
            window_end: Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap(),
            transaction_count: 100,
            total_amount: 50500.0,
            fraud_count: 10,
            fraud_amount: 5000.0,
            high_risk_count: 20,
            unique_user_count: 80,
            unique_payment_method_count: 3,
            avg_amount: 505.0,
            fraud_rate: 0.1,
            amount_stddev: 285.0,
            risk_score: 0.05,
        });

        let json = serde_json::to_value(&agg).unwrap();
        assert_eq!(json["aggregate_type"], "merchant");
        assert_eq!(json["merchant_id"], "m1");
        assert_eq!(agg.key(), "m1");
        assert!(agg.window_start() <= agg.window_end());
    }
}
