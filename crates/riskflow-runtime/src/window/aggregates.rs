//! Window accumulators and key selectors
//!
//! One accumulator per aggregation, folded worker-locally and merged on
//! session coalescing. Emitted records bound the actual contributing event
//! times.

use super::{
    Accumulator, WindowKind, WindowedAggregator, DEFAULT_OUT_OF_ORDERNESS_MS,
    HIGH_FREQUENCY_OUT_OF_ORDERNESS_MS,
};
use chrono::{DateTime, Utc};
use riskflow_core::{
    AggregateRecord, AmountClusterAggregate, FraudPatternAggregate, GeographicAggregate,
    HighFrequencyAlert, MerchantAggregate, Transaction, UserSessionAggregate,
    UserVelocityAggregate,
};
use std::collections::HashSet;

/// Score above which a transaction counts as high risk in aggregates
const HIGH_RISK_SCORE: f64 = 0.7;

fn ts_from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

/// Event-time bounds tracked by every accumulator
#[derive(Debug, Clone, Copy)]
struct EventBounds {
    start_ms: i64,
    end_ms: i64,
}

impl Default for EventBounds {
    fn default() -> Self {
        Self {
            start_ms: i64::MAX,
            end_ms: i64::MIN,
        }
    }
}

impl EventBounds {
    fn observe(&mut self, ts: i64) {
        self.start_ms = self.start_ms.min(ts);
        self.end_ms = self.end_ms.max(ts);
    }

    fn absorb(&mut self, other: EventBounds) {
        self.start_ms = self.start_ms.min(other.start_ms);
        self.end_ms = self.end_ms.max(other.end_ms);
    }
}

// Key selectors

/// Geographic grid cell at 1-degree precision
pub fn geo_grid_key(tx: &Transaction) -> String {
    match tx.geolocation {
        Some(geo) => format!("geo_{}_{}", geo.lat.floor() as i64, geo.lon.floor() as i64),
        None => "unknown".to_string(),
    }
}

/// Coarse amount bucket for fraud-pattern grouping
pub fn pattern_amount_bucket(amount: f64) -> &'static str {
    if amount < 10.0 {
        "micro"
    } else if amount < 100.0 {
        "small"
    } else if amount < 500.0 {
        "medium"
    } else if amount < 2000.0 {
        "large"
    } else if amount < 10000.0 {
        "very_large"
    } else {
        "extreme"
    }
}

fn tx_payment_method(tx: &Transaction) -> &str {
    tx.payment_method.as_deref().unwrap_or("unknown")
}

fn tx_merchant_category(tx: &Transaction) -> &str {
    tx.merchant_profile
        .as_ref()
        .and_then(|p| p.category.as_deref())
        .unwrap_or("unknown")
}

/// Composite fraud-pattern key
pub fn fraud_pattern_key(tx: &Transaction) -> String {
    format!(
        "pattern_{}_{}_{}",
        tx_payment_method(tx),
        tx_merchant_category(tx),
        pattern_amount_bucket(tx.amount)
    )
}

/// Logarithmic amount-cluster key
pub fn amount_cluster_key(tx: &Transaction) -> String {
    if tx.amount <= 0.0 {
        return "zero".to_string();
    }
    let bucket = tx.amount.log10().floor() as i32;
    let bucket_base = 10f64.powi(bucket);
    let sub_bucket = (tx.amount / bucket_base).floor() as i64;
    format!("amount_{bucket}_{sub_bucket}")
}

// Accumulators

#[derive(Default)]
pub struct UserVelocityAccumulator {
    user_id: String,
    count: u64,
    total_amount: f64,
    fraud_count: u64,
    high_risk_count: u64,
    merchants: HashSet<String>,
    payment_methods: HashSet<String>,
    bounds: EventBounds,
}

impl UserVelocityAccumulator {
    fn velocity_score(&self) -> f64 {
        let mut score = 0.0;

        if self.count > 20 {
            score += 0.4;
        } else if self.count > 10 {
            score += 0.2;
        } else if self.count > 5 {
            score += 0.1;
        }

        if self.total_amount > 10_000.0 {
            score += 0.3;
        } else if self.total_amount > 5_000.0 {
            score += 0.2;
        } else if self.total_amount > 1_000.0 {
            score += 0.1;
        }

        let fraud_rate = if self.count > 0 {
            self.fraud_count as f64 / self.count as f64
        } else {
            0.0
        };
        score += fraud_rate * 0.4;

        // Hitting the same few merchants repeatedly reads as card testing
        let merchant_diversity = if self.count > 0 {
            self.merchants.len() as f64 / self.count as f64
        } else {
            0.0
        };
        if merchant_diversity < 0.2 {
            score += 0.2;
        }

        score.min(1.0)
    }
}

impl Accumulator for UserVelocityAccumulator {
    fn add(&mut self, tx: &Transaction) {
        self.user_id = tx.user_id.clone();
        self.count += 1;
        self.total_amount += tx.amount;
        self.merchants.insert(tx.merchant_id.clone());
        if tx.is_fraud == Some(true) {
            self.fraud_count += 1;
        }
        if tx.fraud_score.is_some_and(|s| s > HIGH_RISK_SCORE) {
            self.high_risk_count += 1;
        }
        if let Some(method) = &tx.payment_method {
            self.payment_methods.insert(method.clone());
        }
        self.bounds.observe(tx.event_time_ms());
    }

    fn merge(&mut self, other: Self) {
        if self.user_id.is_empty() {
            self.user_id = other.user_id;
        }
        self.count += other.count;
        self.total_amount += other.total_amount;
        self.fraud_count += other.fraud_count;
        self.high_risk_count += other.high_risk_count;
        self.merchants.extend(other.merchants);
        self.payment_methods.extend(other.payment_methods);
        self.bounds.absorb(other.bounds);
    }

    fn finish(&self) -> AggregateRecord {
        let count = self.count.max(1);
        AggregateRecord::UserVelocity(UserVelocityAggregate {
            user_id: self.user_id.clone(),
            window_start: ts_from_ms(self.bounds.start_ms),
            window_end: ts_from_ms(self.bounds.end_ms),
            transaction_count: self.count,
            total_amount: self.total_amount,
            fraud_count: self.fraud_count,
            high_risk_count: self.high_risk_count,
            unique_merchant_count: self.merchants.len(),
            unique_payment_method_count: self.payment_methods.len(),
            avg_amount: self.total_amount / count as f64,
            fraud_rate: self.fraud_count as f64 / count as f64,
            velocity_score: self.velocity_score(),
        })
    }

    fn count(&self) -> u64 {
        self.count
    }
}

#[derive(Default)]
pub struct MerchantAccumulator {
    merchant_id: String,
    count: u64,
    total_amount: f64,
    fraud_count: u64,
    fraud_amount: f64,
    high_risk_count: u64,
    users: HashSet<String>,
    payment_methods: HashSet<String>,
    amounts: Vec<f64>,
    bounds: EventBounds,
}

impl MerchantAccumulator {
    fn amount_stddev(&self) -> f64 {
        if self.amounts.len() < 2 {
            return 0.0;
        }
        let mean = self.amounts.iter().sum::<f64>() / self.amounts.len() as f64;
        let variance = self
            .amounts
            .iter()
            .map(|a| (a - mean).powi(2))
            .sum::<f64>()
            / self.amounts.len() as f64;
        variance.sqrt()
    }

    fn risk_score(&self) -> f64 {
        let mut score = 0.0;

        let fraud_rate = if self.count > 0 {
            self.fraud_count as f64 / self.count as f64
        } else {
            0.0
        };
        score += fraud_rate * 0.5;

        if self.count > 1000 {
            score += 0.2;
        } else if self.count > 500 {
            score += 0.1;
        }

        let avg = if self.count > 0 {
            self.total_amount / self.count as f64
        } else {
            0.0
        };
        if avg > 0.0 && self.amount_stddev() / avg > 2.0 {
            score += 0.2;
        }

        let user_diversity = if self.count > 0 {
            self.users.len() as f64 / self.count as f64
        } else {
            0.0
        };
        if user_diversity < 0.1 {
            score += 0.3;
        }

        score.min(1.0)
    }
}

impl Accumulator for MerchantAccumulator {
    fn add(&mut self, tx: &Transaction) {
        self.merchant_id = tx.merchant_id.clone();
        self.count += 1;
        self.total_amount += tx.amount;
        self.users.insert(tx.user_id.clone());
        self.amounts.push(tx.amount);
        if tx.is_fraud == Some(true) {
            self.fraud_count += 1;
            self.fraud_amount += tx.amount;
        }
        if tx.fraud_score.is_some_and(|s| s > HIGH_RISK_SCORE) {
            self.high_risk_count += 1;
        }
        if let Some(method) = &tx.payment_method {
            self.payment_methods.insert(method.clone());
        }
        self.bounds.observe(tx.event_time_ms());
    }

    fn merge(&mut self, other: Self) {
        if self.merchant_id.is_empty() {
            self.merchant_id = other.merchant_id;
        }
        self.count += other.count;
        self.total_amount += other.total_amount;
        self.fraud_count += other.fraud_count;
        self.fraud_amount += other.fraud_amount;
        self.high_risk_count += other.high_risk_count;
        self.users.extend(other.users);
        self.payment_methods.extend(other.payment_methods);
        self.amounts.extend(other.amounts);
        self.bounds.absorb(other.bounds);
    }

    fn finish(&self) -> AggregateRecord {
        let count = self.count.max(1);
        AggregateRecord::Merchant(MerchantAggregate {
            merchant_id: self.merchant_id.clone(),
            window_start: ts_from_ms(self.bounds.start_ms),
            window_end: ts_from_ms(self.bounds.end_ms),
            transaction_count: self.count,
            total_amount: self.total_amount,
            fraud_count: self.fraud_count,
            fraud_amount: self.fraud_amount,
            high_risk_count: self.high_risk_count,
            unique_user_count: self.users.len(),
            unique_payment_method_count: self.payment_methods.len(),
            avg_amount: self.total_amount / count as f64,
            fraud_rate: self.fraud_count as f64 / count as f64,
            amount_stddev: self.amount_stddev(),
            risk_score: self.risk_score(),
        })
    }

    fn count(&self) -> u64 {
        self.count
    }
}

#[derive(Default)]
pub struct UserSessionAccumulator {
    user_id: String,
    count: u64,
    total_amount: f64,
    merchants: HashSet<String>,
    bounds: EventBounds,
}

impl Accumulator for UserSessionAccumulator {
    fn add(&mut self, tx: &Transaction) {
        self.user_id = tx.user_id.clone();
        self.count += 1;
        self.total_amount += tx.amount;
        self.merchants.insert(tx.merchant_id.clone());
        self.bounds.observe(tx.event_time_ms());
    }

    fn merge(&mut self, other: Self) {
        if self.user_id.is_empty() {
            self.user_id = other.user_id;
        }
        self.count += other.count;
        self.total_amount += other.total_amount;
        self.merchants.extend(other.merchants);
        self.bounds.absorb(other.bounds);
    }

    fn finish(&self) -> AggregateRecord {
        let count = self.count.max(1);
        AggregateRecord::UserSession(UserSessionAggregate {
            user_id: self.user_id.clone(),
            window_start: ts_from_ms(self.bounds.start_ms),
            window_end: ts_from_ms(self.bounds.end_ms),
            transaction_count: self.count,
            total_amount: self.total_amount,
            unique_merchant_count: self.merchants.len(),
            session_duration_ms: self.bounds.end_ms - self.bounds.start_ms,
            avg_amount: self.total_amount / count as f64,
        })
    }

    fn count(&self) -> u64 {
        self.count
    }
}

#[derive(Default)]
pub struct GeographicAccumulator {
    grid_key: String,
    count: u64,
    total_amount: f64,
    fraud_count: u64,
    users: HashSet<String>,
    bounds: EventBounds,
}

impl Accumulator for GeographicAccumulator {
    fn add(&mut self, tx: &Transaction) {
        self.grid_key = geo_grid_key(tx);
        self.count += 1;
        self.total_amount += tx.amount;
        self.users.insert(tx.user_id.clone());
        if tx.is_fraud == Some(true) {
            self.fraud_count += 1;
        }
        self.bounds.observe(tx.event_time_ms());
    }

    fn merge(&mut self, other: Self) {
        if self.grid_key.is_empty() {
            self.grid_key = other.grid_key;
        }
        self.count += other.count;
        self.total_amount += other.total_amount;
        self.fraud_count += other.fraud_count;
        self.users.extend(other.users);
        self.bounds.absorb(other.bounds);
    }

    fn finish(&self) -> AggregateRecord {
        let count = self.count.max(1);
        AggregateRecord::Geographic(GeographicAggregate {
            grid_key: self.grid_key.clone(),
            window_start: ts_from_ms(self.bounds.start_ms),
            window_end: ts_from_ms(self.bounds.end_ms),
            transaction_count: self.count,
            total_amount: self.total_amount,
            fraud_count: self.fraud_count,
            unique_user_count: self.users.len(),
            avg_amount: self.total_amount / count as f64,
            fraud_rate: self.fraud_count as f64 / count as f64,
        })
    }

    fn count(&self) -> u64 {
        self.count
    }
}

#[derive(Default)]
pub struct FraudPatternAccumulator {
    payment_method: String,
    merchant_category: String,
    amount_bucket: String,
    count: u64,
    total_amount: f64,
    fraud_count: u64,
    high_risk_count: u64,
    bounds: EventBounds,
}

impl Accumulator for FraudPatternAccumulator {
    fn add(&mut self, tx: &Transaction) {
        self.payment_method = tx_payment_method(tx).to_string();
        self.merchant_category = tx_merchant_category(tx).to_string();
        self.amount_bucket = pattern_amount_bucket(tx.amount).to_string();
        self.count += 1;
        self.total_amount += tx.amount;
        if tx.is_fraud == Some(true) {
            self.fraud_count += 1;
        }
        if tx.fraud_score.is_some_and(|s| s > HIGH_RISK_SCORE) {
            self.high_risk_count += 1;
        }
        self.bounds.observe(tx.event_time_ms());
    }

    fn merge(&mut self, other: Self) {
        if self.payment_method.is_empty() {
            self.payment_method = other.payment_method;
            self.merchant_category = other.merchant_category;
            self.amount_bucket = other.amount_bucket;
        }
        self.count += other.count;
        self.total_amount += other.total_amount;
        self.fraud_count += other.fraud_count;
        self.high_risk_count += other.high_risk_count;
        self.bounds.absorb(other.bounds);
    }

    fn finish(&self) -> AggregateRecord {
        let count = self.count.max(1);
        AggregateRecord::FraudPattern(FraudPatternAggregate {
            pattern_key: format!(
                "pattern_{}_{}_{}",
                self.payment_method, self.merchant_category, self.amount_bucket
            ),
            payment_method: self.payment_method.clone(),
            merchant_category: self.merchant_category.clone(),
            amount_bucket: self.amount_bucket.clone(),
            window_start: ts_from_ms(self.bounds.start_ms),
            window_end: ts_from_ms(self.bounds.end_ms),
            transaction_count: self.count,
            total_amount: self.total_amount,
            fraud_count: self.fraud_count,
            high_risk_count: self.high_risk_count,
            fraud_rate: self.fraud_count as f64 / count as f64,
            avg_amount: self.total_amount / count as f64,
        })
    }

    fn count(&self) -> u64 {
        self.count
    }
}

#[derive(Default)]
pub struct HighFrequencyAccumulator {
    user_id: String,
    count: u64,
    total_amount: f64,
    merchants: HashSet<String>,
    bounds: EventBounds,
}

impl HighFrequencyAccumulator {
    fn velocity_score(&self) -> f64 {
        let mut score: f64 = 0.0;

        if self.count > 20 {
            score += 0.4;
        } else if self.count > 10 {
            score += 0.2;
        } else if self.count > 5 {
            score += 0.1;
        }

        if self.total_amount > 10_000.0 {
            score += 0.3;
        } else if self.total_amount > 5_000.0 {
            score += 0.2;
        } else if self.total_amount > 1_000.0 {
            score += 0.1;
        }

        let merchant_diversity = if self.count > 0 {
            self.merchants.len() as f64 / self.count as f64
        } else {
            0.0
        };
        if merchant_diversity < 0.2 {
            score += 0.2;
        }

        score.min(1.0)
    }
}

impl Accumulator for HighFrequencyAccumulator {
    fn add(&mut self, tx: &Transaction) {
        self.user_id = tx.user_id.clone();
        self.count += 1;
        self.total_amount += tx.amount;
        self.merchants.insert(tx.merchant_id.clone());
        self.bounds.observe(tx.event_time_ms());
    }

    fn merge(&mut self, other: Self) {
        if self.user_id.is_empty() {
            self.user_id = other.user_id;
        }
        self.count += other.count;
        self.total_amount += other.total_amount;
        self.merchants.extend(other.merchants);
        self.bounds.absorb(other.bounds);
    }

    fn finish(&self) -> AggregateRecord {
        AggregateRecord::HighFrequency(HighFrequencyAlert {
            user_id: self.user_id.clone(),
            window_start: ts_from_ms(self.bounds.start_ms),
            window_end: ts_from_ms(self.bounds.end_ms),
            transaction_count: self.count,
            total_amount: self.total_amount,
            unique_merchant_count: self.merchants.len(),
            velocity_score: self.velocity_score(),
        })
    }

    fn count(&self) -> u64 {
        self.count
    }
}

#[derive(Default)]
pub struct AmountClusterAccumulator {
    cluster_key: String,
    count: u64,
    total_amount: f64,
    fraud_count: u64,
    users: HashSet<String>,
    min_amount: f64,
    max_amount: f64,
    bounds: EventBounds,
}

impl Accumulator for AmountClusterAccumulator {
    fn add(&mut self, tx: &Transaction) {
        if self.count == 0 {
            self.min_amount = tx.amount;
            self.max_amount = tx.amount;
        } else {
            self.min_amount = self.min_amount.min(tx.amount);
            self.max_amount = self.max_amount.max(tx.amount);
        }
        self.cluster_key = amount_cluster_key(tx);
        self.count += 1;
        self.total_amount += tx.amount;
        self.users.insert(tx.user_id.clone());
        if tx.is_fraud == Some(true) {
            self.fraud_count += 1;
        }
        self.bounds.observe(tx.event_time_ms());
    }

    fn merge(&mut self, other: Self) {
        if self.cluster_key.is_empty() {
            self.cluster_key = other.cluster_key;
            self.min_amount = other.min_amount;
            self.max_amount = other.max_amount;
        } else if other.count > 0 {
            self.min_amount = self.min_amount.min(other.min_amount);
            self.max_amount = self.max_amount.max(other.max_amount);
        }
        self.count += other.count;
        self.total_amount += other.total_amount;
        self.fraud_count += other.fraud_count;
        self.users.extend(other.users);
        self.bounds.absorb(other.bounds);
    }

    fn finish(&self) -> AggregateRecord {
        let count = self.count.max(1);
        AggregateRecord::AmountCluster(AmountClusterAggregate {
            cluster_key: self.cluster_key.clone(),
            window_start: ts_from_ms(self.bounds.start_ms),
            window_end: ts_from_ms(self.bounds.end_ms),
            transaction_count: self.count,
            total_amount: self.total_amount,
            fraud_count: self.fraud_count,
            unique_user_count: self.users.len(),
            avg_amount: self.total_amount / count as f64,
            min_amount: self.min_amount,
            max_amount: self.max_amount,
        })
    }

    fn count(&self) -> u64 {
        self.count
    }
}

/// All seven window operators wired with their production window shapes
pub struct AggregatorSet {
    user_velocity: WindowedAggregator<UserVelocityAccumulator>,
    merchant: WindowedAggregator<MerchantAccumulator>,
    session: WindowedAggregator<UserSessionAccumulator>,
    geographic: WindowedAggregator<GeographicAccumulator>,
    pattern: WindowedAggregator<FraudPatternAccumulator>,
    high_frequency: WindowedAggregator<HighFrequencyAccumulator>,
    amount_cluster: WindowedAggregator<AmountClusterAccumulator>,
}

impl AggregatorSet {
    /// `velocity_window_ms` sizes the sliding user-velocity window;
    /// `session_gap_ms` is the session inactivity gap
    pub fn new(velocity_window_ms: i64, session_gap_ms: i64) -> Self {
        Self {
            user_velocity: WindowedAggregator::new(
                "user-velocity",
                WindowKind::Sliding {
                    size_ms: velocity_window_ms,
                    slide_ms: 60_000,
                },
                DEFAULT_OUT_OF_ORDERNESS_MS,
                |tx: &Transaction| tx.user_id.clone(),
            ),
            merchant: WindowedAggregator::new(
                "merchant-pattern",
                WindowKind::Tumbling { size_ms: 3_600_000 },
                DEFAULT_OUT_OF_ORDERNESS_MS,
                |tx: &Transaction| tx.merchant_id.clone(),
            ),
            session: WindowedAggregator::new(
                "user-session",
                WindowKind::Session { gap_ms: session_gap_ms },
                DEFAULT_OUT_OF_ORDERNESS_MS,
                |tx: &Transaction| tx.user_id.clone(),
            ),
            geographic: WindowedAggregator::new(
                "geo-cluster",
                WindowKind::Tumbling { size_ms: 900_000 },
                DEFAULT_OUT_OF_ORDERNESS_MS,
                geo_grid_key,
            ),
            pattern: WindowedAggregator::new(
                "fraud-pattern",
                WindowKind::Sliding {
                    size_ms: 600_000,
                    slide_ms: 120_000,
                },
                DEFAULT_OUT_OF_ORDERNESS_MS,
                fraud_pattern_key,
            ),
            high_frequency: WindowedAggregator::new(
                "high-frequency",
                WindowKind::Tumbling { size_ms: 300_000 },
                HIGH_FREQUENCY_OUT_OF_ORDERNESS_MS,
                |tx: &Transaction| tx.user_id.clone(),
            )
            .with_count_trigger(10),
            amount_cluster: WindowedAggregator::new(
                "amount-cluster",
                WindowKind::Tumbling { size_ms: 1_800_000 },
                DEFAULT_OUT_OF_ORDERNESS_MS,
                amount_cluster_key,
            ),
        }
    }

    /// Mirror a scored transaction into every aggregation
    pub fn process(&mut self, tx: &Transaction) -> Vec<AggregateRecord> {
        let mut emitted = Vec::new();
        emitted.extend(self.user_velocity.process(tx));
        emitted.extend(self.merchant.process(tx));
        emitted.extend(self.session.process(tx));
        emitted.extend(self.geographic.process(tx));
        emitted.extend(self.pattern.process(tx));
        emitted.extend(filter_high_frequency(self.high_frequency.process(tx)));
        emitted.extend(self.amount_cluster.process(tx));
        emitted
    }

    /// Advance every operator's watermark
    pub fn advance_watermark(&mut self, watermark_ms: i64) -> Vec<AggregateRecord> {
        let mut emitted = Vec::new();
        emitted.extend(self.user_velocity.advance_watermark(watermark_ms));
        emitted.extend(self.merchant.advance_watermark(watermark_ms));
        emitted.extend(self.session.advance_watermark(watermark_ms));
        emitted.extend(self.geographic.advance_watermark(watermark_ms));
        emitted.extend(self.pattern.advance_watermark(watermark_ms));
        emitted.extend(filter_high_frequency(
            self.high_frequency.advance_watermark(watermark_ms),
        ));
        emitted.extend(self.amount_cluster.advance_watermark(watermark_ms));
        emitted
    }

    /// Drain all buffered windows on shutdown
    pub fn flush(&mut self) -> Vec<AggregateRecord> {
        let mut emitted = Vec::new();
        emitted.extend(self.user_velocity.flush());
        emitted.extend(self.merchant.flush());
        emitted.extend(self.session.flush());
        emitted.extend(self.geographic.flush());
        emitted.extend(self.pattern.flush());
        emitted.extend(filter_high_frequency(self.high_frequency.flush()));
        emitted.extend(self.amount_cluster.flush());
        emitted
    }

    /// Total late events dropped across operators
    pub fn late_dropped(&self) -> u64 {
        self.user_velocity.late_dropped()
            + self.merchant.late_dropped()
            + self.session.late_dropped()
            + self.geographic.late_dropped()
            + self.pattern.late_dropped()
            + self.high_frequency.late_dropped()
            + self.amount_cluster.late_dropped()
    }
}

/// Burst alerts only fire on genuinely high activity
fn filter_high_frequency(records: Vec<AggregateRecord>) -> Vec<AggregateRecord> {
    records
        .into_iter()
        .filter(|record| match record {
            AggregateRecord::HighFrequency(alert) => {
                alert.transaction_count >= 10 || alert.velocity_score > 0.8
            }
            _ => true,
        })
        .collect()
}
