//! Window-bounded stream joins
//!
//! Correlates transactions with the user-behavior, merchant-update and
//! historical-pattern streams inside tumbling event-time windows. Joins add
//! named risk-factor increments to a transaction's context; they do not
//! re-score the record.
//!
//! Pairs are emitted incrementally as both sides of a window fill in, which
//! yields the same pair set as emitting at window close without buffering
//! results. Window state is garbage-collected as the watermark passes.

use riskflow_core::{HistoricalPattern, MerchantUpdateEvent, Transaction, UserBehaviorEvent};
use std::collections::HashMap;
use tracing::debug;

/// A transaction with join-derived risk factors attached
#[derive(Debug, Clone)]
pub struct EnrichedTransaction {
    pub transaction: Transaction,
    pub risk_factors: HashMap<String, f64>,
}

impl EnrichedTransaction {
    pub fn new(transaction: Transaction) -> Self {
        Self {
            transaction,
            risk_factors: HashMap::new(),
        }
    }

    pub fn add_risk_factor(&mut self, name: &str, value: f64) {
        self.risk_factors.insert(name.to_string(), value);
    }

    /// Sum of all attached risk-factor increments
    pub fn total_risk(&self) -> f64 {
        self.risk_factors.values().sum()
    }
}

/// Per-key, per-window buffer for one side of a join
struct JoinBuffer<E> {
    window_ms: i64,
    entries: HashMap<(String, i64), Vec<E>>,
}

impl<E> JoinBuffer<E> {
    fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            entries: HashMap::new(),
        }
    }

    fn window_start(&self, ts: i64) -> i64 {
        ts.div_euclid(self.window_ms) * self.window_ms
    }

    fn push(&mut self, key: String, ts: i64, entry: E) {
        let start = self.window_start(ts);
        self.entries.entry((key, start)).or_default().push(entry);
    }

    fn matching(&self, key: &str, ts: i64) -> Option<&Vec<E>> {
        let start = self.window_start(ts);
        self.entries.get(&(key.to_string(), start))
    }

    fn evict_before(&mut self, watermark_ms: i64) {
        let window_ms = self.window_ms;
        self.entries
            .retain(|(_, start), _| start + window_ms > watermark_ms);
    }

    fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

/// Transaction x UserBehavior join on `user_id`, 5-minute tumbling windows
pub struct BehaviorJoiner {
    transactions: JoinBuffer<Transaction>,
    behaviors: JoinBuffer<UserBehaviorEvent>,
    out_of_orderness_ms: i64,
    watermark_ms: i64,
}

impl Default for BehaviorJoiner {
    fn default() -> Self {
        Self::new()
    }
}

impl BehaviorJoiner {
    const WINDOW_MS: i64 = 300_000;

    pub fn new() -> Self {
        Self {
            transactions: JoinBuffer::new(Self::WINDOW_MS),
            behaviors: JoinBuffer::new(Self::WINDOW_MS),
            out_of_orderness_ms: 5_000,
            watermark_ms: i64::MIN,
        }
    }

    pub fn add_transaction(&mut self, tx: &Transaction) -> Vec<EnrichedTransaction> {
        let ts = tx.event_time_ms();
        let joined = self
            .behaviors
            .matching(&tx.user_id, ts)
            .map(|events| {
                events
                    .iter()
                    .map(|event| join_behavior(tx, event))
                    .collect()
            })
            .unwrap_or_default();

        self.transactions.push(tx.user_id.clone(), ts, tx.clone());
        self.advance(ts);
        joined
    }

    pub fn add_behavior(&mut self, event: UserBehaviorEvent) -> Vec<EnrichedTransaction> {
        let ts = event.timestamp.timestamp_millis();
        let joined = self
            .transactions
            .matching(&event.user_id, ts)
            .map(|txs| txs.iter().map(|tx| join_behavior(tx, &event)).collect())
            .unwrap_or_default();

        self.behaviors.push(event.user_id.clone(), ts, event);
        self.advance(ts);
        joined
    }

    fn advance(&mut self, ts: i64) {
        let watermark = ts - self.out_of_orderness_ms;
        if watermark > self.watermark_ms {
            self.watermark_ms = watermark;
            self.transactions.evict_before(watermark);
            self.behaviors.evict_before(watermark);
        }
    }

    pub fn buffered(&self) -> usize {
        self.transactions.len() + self.behaviors.len()
    }
}

fn join_behavior(tx: &Transaction, event: &UserBehaviorEvent) -> EnrichedTransaction {
    let mut enriched = EnrichedTransaction::new(tx.clone());
    enriched.add_risk_factor(
        "recent_login_anomaly",
        if event.anomalous_login { 0.3 } else { 0.0 },
    );
    enriched.add_risk_factor(
        "session_duration_anomaly",
        if event.short_session { 0.2 } else { 0.0 },
    );
    enriched.add_risk_factor(
        "navigation_pattern_anomaly",
        if event.anomalous_navigation { 0.25 } else { 0.0 },
    );
    debug!(
        transaction_id = %tx.transaction_id,
        user_id = %tx.user_id,
        "joined transaction with user behavior"
    );
    enriched
}

/// Transaction x MerchantUpdate join on `merchant_id`, 10-minute tumbling
/// windows
pub struct MerchantUpdateJoiner {
    transactions: JoinBuffer<Transaction>,
    updates: JoinBuffer<MerchantUpdateEvent>,
    out_of_orderness_ms: i64,
    watermark_ms: i64,
}

impl Default for MerchantUpdateJoiner {
    fn default() -> Self {
        Self::new()
    }
}

impl MerchantUpdateJoiner {
    const WINDOW_MS: i64 = 600_000;

    pub fn new() -> Self {
        Self {
            transactions: JoinBuffer::new(Self::WINDOW_MS),
            updates: JoinBuffer::new(Self::WINDOW_MS),
            out_of_orderness_ms: 5_000,
            watermark_ms: i64::MIN,
        }
    }

    pub fn add_transaction(&mut self, tx: &Transaction) -> Vec<EnrichedTransaction> {
        let ts = tx.event_time_ms();
        let joined = self
            .updates
            .matching(&tx.merchant_id, ts)
            .map(|updates| {
                updates
                    .iter()
                    .map(|update| join_merchant_update(tx, update))
                    .collect()
            })
            .unwrap_or_default();

        self.transactions.push(tx.merchant_id.clone(), ts, tx.clone());
        self.advance(ts);
        joined
    }

    pub fn add_update(&mut self, update: MerchantUpdateEvent) -> Vec<EnrichedTransaction> {
        let ts = update.timestamp.timestamp_millis();
        let joined = self
            .transactions
            .matching(&update.merchant_id, ts)
            .map(|txs| {
                txs.iter()
                    .map(|tx| join_merchant_update(tx, &update))
                    .collect()
            })
            .unwrap_or_default();

        self.updates.push(update.merchant_id.clone(), ts, update);
        self.advance(ts);
        joined
    }

    fn advance(&mut self, ts: i64) {
        let watermark = ts - self.out_of_orderness_ms;
        if watermark > self.watermark_ms {
            self.watermark_ms = watermark;
            self.transactions.evict_before(watermark);
            self.updates.evict_before(watermark);
        }
    }
}

fn join_merchant_update(tx: &Transaction, update: &MerchantUpdateEvent) -> EnrichedTransaction {
    let mut enriched = EnrichedTransaction::new(tx.clone());
    if update.risk_level_increased {
        enriched.add_risk_factor("merchant_risk_increase", 0.4);
    }
    if update.fraud_rate_increased {
        enriched.add_risk_factor("merchant_fraud_rate_increase", 0.3);
    }
    if update.newly_blacklisted {
        enriched.add_risk_factor("merchant_newly_blacklisted", 0.8);
    }
    debug!(
        transaction_id = %tx.transaction_id,
        merchant_id = %tx.merchant_id,
        "joined transaction with merchant update"
    );
    enriched
}

/// Transaction x HistoricalPattern join on the composite pattern key,
/// 1-hour tumbling windows with a wider out-of-orderness bound
pub struct HistoricalPatternJoiner {
    transactions: JoinBuffer<Transaction>,
    patterns: JoinBuffer<HistoricalPattern>,
    out_of_orderness_ms: i64,
    watermark_ms: i64,
}

impl Default for HistoricalPatternJoiner {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoricalPatternJoiner {
    const WINDOW_MS: i64 = 3_600_000;

    pub fn new() -> Self {
        Self {
            transactions: JoinBuffer::new(Self::WINDOW_MS),
            patterns: JoinBuffer::new(Self::WINDOW_MS),
            out_of_orderness_ms: 60_000,
            watermark_ms: i64::MIN,
        }
    }

    /// Composite key: payment method, merchant category, 100-unit amount
    /// bucket
    pub fn transaction_key(tx: &Transaction) -> String {
        let category = tx
            .merchant_profile
            .as_ref()
            .and_then(|p| p.category.as_deref())
            .unwrap_or("unknown");
        format!(
            "{}:{}:{:.0}",
            tx.payment_method.as_deref().unwrap_or("unknown"),
            category,
            (tx.amount / 100.0).floor() * 100.0
        )
    }

    pub fn add_transaction(&mut self, tx: &Transaction) -> Vec<EnrichedTransaction> {
        let ts = tx.event_time_ms();
        let key = Self::transaction_key(tx);
        let joined = self
            .patterns
            .matching(&key, ts)
            .map(|patterns| {
                patterns
                    .iter()
                    .map(|pattern| join_historical_pattern(tx, pattern))
                    .collect()
            })
            .unwrap_or_default();

        self.transactions.push(key, ts, tx.clone());
        self.advance(ts);
        joined
    }

    pub fn add_pattern(&mut self, pattern: HistoricalPattern) -> Vec<EnrichedTransaction> {
        let ts = pattern.timestamp.timestamp_millis();
        let key = pattern.join_key();
        let joined = self
            .transactions
            .matching(&key, ts)
            .map(|txs| {
                txs.iter()
                    .map(|tx| join_historical_pattern(tx, &pattern))
                    .collect()
            })
            .unwrap_or_default();

        self.patterns.push(key, ts, pattern);
        self.advance(ts);
        joined
    }

    fn advance(&mut self, ts: i64) {
        let watermark = ts - self.out_of_orderness_ms;
        if watermark > self.watermark_ms {
            self.watermark_ms = watermark;
            self.transactions.evict_before(watermark);
            self.patterns.evict_before(watermark);
        }
    }
}

fn join_historical_pattern(tx: &Transaction, pattern: &HistoricalPattern) -> EnrichedTransaction {
    let mut enriched = EnrichedTransaction::new(tx.clone());

    let similarity = pattern_similarity(tx, pattern);
    enriched.add_risk_factor(
        "historical_pattern_similarity",
        similarity * pattern.fraud_rate,
    );

    if pattern.recent && pattern.fraud_rate > 0.5 {
        enriched.add_risk_factor("recent_high_fraud_pattern", 0.4);
    }
    if pattern.occurrence_count > 100 && pattern.fraud_rate > 0.3 {
        enriched.add_risk_factor("frequent_fraud_pattern", 0.3);
    }

    debug!(
        transaction_id = %tx.transaction_id,
        fraud_rate = pattern.fraud_rate,
        "joined transaction with historical pattern"
    );
    enriched
}

/// Similarity of a transaction to a historical pattern, in [0, 1]
fn pattern_similarity(tx: &Transaction, pattern: &HistoricalPattern) -> f64 {
    let mut similarity = 0.0;

    if tx
        .payment_method
        .as_deref()
        .is_some_and(|pm| pm == pattern.payment_method)
    {
        similarity += 0.3;
    }

    let amount_diff = (tx.amount - pattern.amount_range).abs();
    let amount_base = tx.amount.max(pattern.amount_range);
    if amount_base > 0.0 {
        similarity += (1.0 - amount_diff / amount_base).max(0.0) * 0.4;
    }

    if let Some(pattern_hour) = pattern.hour_of_day {
        let hour_diff = (tx.effective_hour() as f64 - pattern_hour as f64).abs();
        similarity += (1.0 - hour_diff / 12.0).max(0.0) * 0.3;
    }

    similarity.clamp(0.0, 1.0)
}
