//! Secondary stream records joined against transactions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User activity event from the behavior stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBehaviorEvent {
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub anomalous_login: bool,
    #[serde(default)]
    pub short_session: bool,
    #[serde(default)]
    pub anomalous_navigation: bool,
    #[serde(default)]
    pub session_duration_ms: Option<i64>,
}

/// Merchant profile change notification
///
/// Profile updates never mutate an attached profile snapshot in place; the
/// joiner absorbs them as risk-factor side effects on matched transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantUpdateEvent {
    pub merchant_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub risk_level_increased: bool,
    #[serde(default)]
    pub fraud_rate_increased: bool,
    #[serde(default)]
    pub newly_blacklisted: bool,
}

/// Historical fraud pattern summary from the pattern stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalPattern {
    pub payment_method: String,
    pub merchant_category: String,
    /// Representative amount for the pattern's bucket
    pub amount_range: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub hour_of_day: Option<u32>,
    pub fraud_rate: f64,
    pub occurrence_count: u64,
    #[serde(default)]
    pub recent: bool,
}

impl HistoricalPattern {
    /// Composite join key: payment method, category, 100-unit amount bucket
    pub fn join_key(&self) -> String {
        format!(
            "{}:{}:{:.0}",
            self.payment_method,
            self.merchant_category,
            (self.amount_range / 100.0).floor() * 100.0
        )
    }
}
