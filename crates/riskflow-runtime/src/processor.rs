//! Per-record processing stage
//!
//! Runs the enrich -> velocity -> extract -> score path for one decoded
//! record and leaves the transaction frozen for emission. Decode
//! placeholders short-circuit: they keep their REVIEW decision and skip
//! enrichment entirely.

use crate::features::FeatureExtractor;
use crate::observability::MetricsCollector;
use crate::profile::ProfileCache;
use crate::scoring::{decide, RuleScorer};
use crate::state::StateStore;
use crate::velocity::VelocityUpdater;
use riskflow_core::{Decoded, Transaction};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info};

/// Interval between progress log lines
const PROGRESS_LOG_SECS: u64 = 30;

/// Stateless-per-record processor shared by pipeline workers
pub struct TransactionProcessor {
    profiles: ProfileCache,
    extractor: FeatureExtractor,
    scorer: RuleScorer,
    velocity: VelocityUpdater,
    metrics: Arc<MetricsCollector>,
    enable_scoring: bool,
    processed: AtomicU64,
    last_progress_log: Mutex<Instant>,
}

impl TransactionProcessor {
    pub fn new(
        store: Arc<dyn StateStore>,
        metrics: Arc<MetricsCollector>,
        enable_scoring: bool,
    ) -> Self {
        Self {
            profiles: ProfileCache::new(store.clone()),
            extractor: FeatureExtractor::new(store.clone()),
            scorer: RuleScorer::new(),
            velocity: VelocityUpdater::new(store),
            metrics,
            enable_scoring,
            processed: AtomicU64::new(0),
            last_progress_log: Mutex::new(Instant::now()),
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Process one decoded record through the scoring path
    pub async fn process(&self, decoded: Decoded) -> Transaction {
        let started = Instant::now();

        let mut tx = match decoded {
            Decoded::Placeholder(tx) => {
                self.metrics.counter("decode_placeholders").inc();
                return tx;
            }
            Decoded::Transaction(tx) => tx,
        };

        // Enrich with profile snapshots
        let user_profile = self.profiles.get_user(&tx.user_id).await;
        let merchant_profile = self.profiles.get_merchant(&tx.merchant_id).await;
        tx.user_profile = Some(user_profile);
        tx.merchant_profile = Some(merchant_profile);

        // Counters first, so this event sees itself in its velocity
        self.velocity.bump(&tx).await;

        let extracted = self.extractor.extract(&tx).await;
        tx.features.merge(extracted);

        if self.enable_scoring {
            self.scorer.apply(&mut tx);
        } else if let Some(score) = tx.fraud_score {
            let (decision, risk_level) = decide(score.clamp(0.0, 1.0));
            tx.decision = Some(decision);
            tx.risk_level = Some(risk_level);
        }

        tx.processing_time_ms = Some(started.elapsed().as_millis() as u64);

        self.velocity.cache(&tx).await;

        self.metrics.counter("transactions_processed").inc();
        self.metrics
            .histogram("processing_time_ms")
            .observe_duration(started.elapsed());
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.log_progress();

        debug!(
            transaction_id = %tx.transaction_id,
            fraud_score = tx.fraud_score,
            decision = tx.decision.map(|d| d.as_str()),
            risk_level = tx.risk_level.map(|r| r.as_str()),
            "processed transaction"
        );
        tx
    }

    fn log_progress(&self) {
        let mut last = self.last_progress_log.lock().unwrap();
        if last.elapsed().as_secs() >= PROGRESS_LOG_SECS {
            *last = Instant::now();
            let histogram = self.metrics.histogram("processing_time_ms");
            info!(
                processed = self.processed.load(Ordering::Relaxed),
                avg_processing_ms = histogram.avg(),
                "transaction processing progress"
            );
        }
    }
}
