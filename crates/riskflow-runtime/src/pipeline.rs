//! Pipeline orchestration
//!
//! Wires the stages into a running job: a dispatcher decodes input records
//! and routes them to scoring workers partitioned by a hash of `user_id`
//! (which serializes each user's velocity updates), workers fan results out
//! to the three output sinks, and a single aggregation task absorbs the
//! mirrored stream into the windowed operators and the join layer. A
//! checkpoint coordinator periodically persists progress markers; sinks are
//! at-least-once with idempotent keys, so replay after a restore is safe.

use crate::config::JobConfig;
use crate::error::{Result, RuntimeError};
use crate::feature_store::FeatureStoreFacade;
use crate::join::{BehaviorJoiner, HistoricalPatternJoiner, MerchantUpdateJoiner};
use crate::observability::MetricsCollector;
use crate::processor::TransactionProcessor;
use crate::state::{keys, ttl, StateStore};
use crate::stream::{
    AlertRateLimiter, ProducerConfig, RecordSink, RecordSource, SinkWriter,
};
use crate::window::AggregatorSet;
use riskflow_core::{
    AggregateRecord, Decoded, FeatureRecord, HistoricalPattern, MerchantUpdateEvent, Transaction,
    TransactionCodec, UserBehaviorEvent,
};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Worker input channel depth
const CHANNEL_CAPACITY: usize = 1024;

/// The three output streams
pub struct PipelineSinks {
    pub enriched: Arc<dyn RecordSink>,
    pub alerts: Arc<dyn RecordSink>,
    pub features: Arc<dyn RecordSink>,
}

/// Secondary input streams consumed by the join layer
pub struct SecondaryStreams {
    pub behaviors: mpsc::Receiver<UserBehaviorEvent>,
    pub merchant_updates: mpsc::Receiver<MerchantUpdateEvent>,
    pub patterns: mpsc::Receiver<HistoricalPattern>,
}

impl SecondaryStreams {
    /// Channel senders plus the receiver bundle for the pipeline
    pub fn bounded(
        capacity: usize,
    ) -> (
        mpsc::Sender<UserBehaviorEvent>,
        mpsc::Sender<MerchantUpdateEvent>,
        mpsc::Sender<HistoricalPattern>,
        Self,
    ) {
        let (behavior_tx, behaviors) = mpsc::channel(capacity);
        let (update_tx, merchant_updates) = mpsc::channel(capacity);
        let (pattern_tx, patterns) = mpsc::channel(capacity);
        (
            behavior_tx,
            update_tx,
            pattern_tx,
            Self {
                behaviors,
                merchant_updates,
                patterns,
            },
        )
    }
}

/// Totals reported after the input stream drains
#[derive(Debug, Default, Clone)]
pub struct PipelineSummary {
    pub records_in: u64,
    pub processed: u64,
    pub alerts_emitted: u64,
    pub alerts_rate_limited: u64,
    pub aggregates_emitted: u64,
    pub joined_records: u64,
    pub late_events_dropped: u64,
    pub sink_failures: u64,
    pub checkpoints_completed: u64,
}

/// Periodic checkpoint marker writer
///
/// In-process stand-in for a barrier-based snapshot: progress counters and
/// the write position are persisted so a restarted job can resume from the
/// last marker. Interval and pause bounds follow the job configuration;
/// at most one checkpoint runs at a time.
struct CheckpointCoordinator {
    store: Arc<dyn StateStore>,
    metrics: Arc<MetricsCollector>,
    interval: Duration,
    timeout: Duration,
}

impl CheckpointCoordinator {
    fn new(config: &JobConfig, store: Arc<dyn StateStore>, metrics: Arc<MetricsCollector>) -> Self {
        let interval = Duration::from_millis(
            config
                .checkpoint_interval_ms
                .max(config.min_pause_between_checkpoints_ms),
        );
        Self {
            store,
            metrics,
            interval,
            timeout: Duration::from_millis(config.checkpoint_timeout_ms),
        }
    }

    async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut checkpoint_id: u64 = 0;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    checkpoint_id += 1;
                    self.checkpoint(checkpoint_id).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn checkpoint(&self, checkpoint_id: u64) {
        let marker = serde_json::json!({
            "checkpoint_id": checkpoint_id,
            "processed": self.metrics.counter("transactions_processed").get(),
            "alerts_emitted": self.metrics.counter("alerts_emitted").get(),
            "timestamp": chrono::Utc::now(),
        });

        let checkpoint_key = keys::aggregation("checkpoint");
        let write = self
            .store
            .set_json(&checkpoint_key, &marker, ttl::AGGREGATIONS);
        match tokio::time::timeout(self.timeout, write).await {
            Ok(Ok(())) => {
                self.metrics.counter("checkpoints_completed").inc();
                debug!(checkpoint_id, "checkpoint written");
            }
            Ok(Err(e)) => warn!(checkpoint_id, "checkpoint write failed: {}", e),
            Err(_) => warn!(checkpoint_id, "checkpoint timed out"),
        }
    }
}

/// The assembled scoring pipeline
pub struct FraudPipeline {
    config: JobConfig,
    store: Arc<dyn StateStore>,
    metrics: Arc<MetricsCollector>,
    feature_store: Option<Arc<FeatureStoreFacade>>,
}

impl FraudPipeline {
    pub fn new(config: JobConfig, store: Arc<dyn StateStore>, metrics: Arc<MetricsCollector>) -> Self {
        let feature_store = if config.enable_feature_store {
            Some(Arc::new(FeatureStoreFacade::new(store.clone())))
        } else {
            None
        };
        Self {
            config,
            store,
            metrics,
            feature_store,
        }
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    /// Run until the input source drains, then flush and report
    pub async fn run(
        self,
        mut source: impl RecordSource + 'static,
        sinks: PipelineSinks,
        secondary: Option<SecondaryStreams>,
    ) -> Result<PipelineSummary> {
        let parallelism = self.config.parallelism;
        info!(
            parallelism,
            fraud_threshold = self.config.fraud_threshold,
            "starting scoring pipeline"
        );

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let checkpointer =
            CheckpointCoordinator::new(&self.config, self.store.clone(), self.metrics.clone());
        let checkpoint_handle = tokio::spawn(checkpointer.run(shutdown_rx));

        // Mirror channel feeding the aggregation/join task
        let (mirror_tx, mirror_rx) = mpsc::channel::<Transaction>(CHANNEL_CAPACITY);
        let aggregation_handle = tokio::spawn(Self::aggregation_task(
            self.config.velocity_window_size_ms as i64,
            self.config.session_window_gap_ms as i64,
            self.config.max_alerts_per_minute,
            self.store.clone(),
            sinks.alerts.clone(),
            mirror_rx,
            secondary,
            sinks.enriched.clone(),
            self.metrics.clone(),
        ));

        // Scoring workers, one partition each
        let mut worker_handles = Vec::with_capacity(parallelism);
        let mut worker_senders = Vec::with_capacity(parallelism);
        for worker_id in 0..parallelism {
            let (tx, rx) = mpsc::channel::<Decoded>(CHANNEL_CAPACITY);
            worker_senders.push(tx);
            worker_handles.push(tokio::spawn(Self::worker_task(
                worker_id,
                self.config.clone(),
                self.store.clone(),
                self.metrics.clone(),
                self.feature_store.clone(),
                WorkerSinks {
                    enriched: SinkWriter::new(sinks.enriched.clone(), ProducerConfig::default()),
                    alerts: SinkWriter::new(sinks.alerts.clone(), ProducerConfig::default()),
                    features: SinkWriter::new(sinks.features.clone(), ProducerConfig::default()),
                },
                rx,
                mirror_tx.clone(),
            )));
        }
        drop(mirror_tx);

        // Dispatcher: decode and route by user hash for cache locality
        let mut records_in = 0u64;
        while let Some(bytes) = source.next_record().await {
            records_in += 1;
            let decoded = TransactionCodec::decode(&bytes);
            let partition = partition_for(&decoded, parallelism);
            if worker_senders[partition].send(decoded).await.is_err() {
                return Err(RuntimeError::ChannelClosed(format!(
                    "worker {partition} input"
                )));
            }
        }
        info!(records_in, "input stream drained, shutting down");

        // Drop worker inputs so the stage chain drains in order
        drop(worker_senders);

        let mut summary = PipelineSummary {
            records_in,
            ..Default::default()
        };
        for handle in worker_handles {
            let worker = handle
                .await
                .map_err(|e| RuntimeError::Runtime(format!("worker panicked: {e}")))?;
            summary.processed += worker.processed;
            summary.alerts_emitted += worker.alerts_emitted;
            summary.alerts_rate_limited += worker.alerts_rate_limited;
            summary.sink_failures += worker.sink_failures;
        }

        let aggregation = aggregation_handle
            .await
            .map_err(|e| RuntimeError::Runtime(format!("aggregation task panicked: {e}")))?;
        summary.aggregates_emitted = aggregation.aggregates_emitted;
        summary.joined_records = aggregation.joined_records;
        summary.late_events_dropped = aggregation.late_events_dropped;
        summary.alerts_rate_limited += aggregation.alerts_rate_limited;

        let _ = shutdown_tx.send(true);
        let _ = checkpoint_handle.await;
        summary.checkpoints_completed = self.metrics.counter("checkpoints_completed").get();

        info!(
            processed = summary.processed,
            alerts = summary.alerts_emitted,
            aggregates = summary.aggregates_emitted,
            "pipeline finished"
        );
        Ok(summary)
    }

    async fn worker_task(
        worker_id: usize,
        config: JobConfig,
        store: Arc<dyn StateStore>,
        metrics: Arc<MetricsCollector>,
        feature_store: Option<Arc<FeatureStoreFacade>>,
        sinks: WorkerSinks,
        mut input: mpsc::Receiver<Decoded>,
        mirror: mpsc::Sender<Transaction>,
    ) -> WorkerSummary {
        let processor =
            TransactionProcessor::new(store, metrics.clone(), config.enable_real_time_scoring);
        let mut limiter = AlertRateLimiter::new(config.max_alerts_per_minute);
        let mut summary = WorkerSummary::default();

        debug!(worker_id, "scoring worker started");
        while let Some(decoded) = input.recv().await {
            let tx = processor.process(decoded).await;
            summary.processed += 1;

            let mut failed_sinks = 0u32;

            // Enriched stream carries the full scored record
            let payload = TransactionCodec::encode(&tx);
            if let Err(e) = sinks.enriched.send(Some(&tx.user_id), &payload).await {
                error!(worker_id, "enriched write failed: {}", e);
                metrics.counter("sink_failures").inc();
                summary.sink_failures += 1;
                failed_sinks += 1;
            }

            // Compact feature record for ML consumers
            let record = FeatureRecord {
                entity_id: tx.transaction_id.clone(),
                entity_type: "transaction".to_string(),
                timestamp: tx.timestamp,
                version: "1.0".to_string(),
                features: tx.features.clone(),
            };
            if let Err(e) = sinks
                .features
                .send(Some(&tx.transaction_id), &TransactionCodec::encode_features(&record))
                .await
            {
                error!(worker_id, "feature write failed: {}", e);
                metrics.counter("sink_failures").inc();
                summary.sink_failures += 1;
                failed_sinks += 1;
            }

            if let Some(facade) = &feature_store {
                if let Err(e) = facade
                    .store_feature_values(&tx.transaction_id, "transaction", &tx.features)
                    .await
                {
                    warn!(worker_id, "feature store write failed: {}", e);
                }
            }

            // Alert stream for high-risk records, rate limited per shard
            let score = tx.fraud_score.unwrap_or(0.0);
            if config.enable_alerting && score > config.fraud_threshold {
                if limiter.try_acquire() {
                    let severity = if score >= config.critical_alert_threshold {
                        "critical"
                    } else if score >= config.high_alert_threshold {
                        "high"
                    } else {
                        "elevated"
                    };
                    metrics.counter(&format!("alerts_{severity}")).inc();

                    let alert = TransactionCodec::encode_alert(&tx.to_fraud_alert());
                    match sinks.alerts.send(Some(&tx.transaction_id), &alert).await {
                        Ok(()) => {
                            summary.alerts_emitted += 1;
                            metrics.counter("alerts_emitted").inc();
                        }
                        Err(e) => {
                            error!(worker_id, "alert write failed: {}", e);
                            metrics.counter("sink_failures").inc();
                            summary.sink_failures += 1;
                            failed_sinks += 1;
                        }
                    }
                } else {
                    summary.alerts_rate_limited += 1;
                    metrics.counter("alerts_rate_limited").inc();
                }
            }

            if failed_sinks == 3 {
                // Every sink rejected the record; surface loudly but keep
                // the stream moving
                error!(
                    worker_id,
                    transaction_id = %tx.transaction_id,
                    "all sinks failed for record"
                );
            }

            if mirror.send(tx).await.is_err() {
                warn!(worker_id, "aggregation channel closed early");
            }
        }
        debug!(worker_id, processed = summary.processed, "scoring worker drained");
        summary
    }

    async fn aggregation_task(
        velocity_window_ms: i64,
        session_gap_ms: i64,
        max_alerts_per_minute: u32,
        store: Arc<dyn StateStore>,
        alert_sink: Arc<dyn RecordSink>,
        mut mirror: mpsc::Receiver<Transaction>,
        secondary: Option<SecondaryStreams>,
        enriched_sink: Arc<dyn RecordSink>,
        metrics: Arc<MetricsCollector>,
    ) -> AggregationSummary {
        let mut aggregators = AggregatorSet::new(velocity_window_ms, session_gap_ms);
        let mut behavior_join = BehaviorJoiner::new();
        let mut merchant_join = MerchantUpdateJoiner::new();
        let mut pattern_join = HistoricalPatternJoiner::new();
        // Burst alerts share the alert sink, so this shard gets its own
        // token bucket
        let mut alert_limiter = AlertRateLimiter::new(max_alerts_per_minute);
        let mut summary = AggregationSummary::default();

        let (mut behaviors, mut updates, mut patterns) = match secondary {
            Some(streams) => (
                Some(streams.behaviors),
                Some(streams.merchant_updates),
                Some(streams.patterns),
            ),
            None => (None, None, None),
        };

        loop {
            tokio::select! {
                // Secondary streams drain ahead of the mirrored stream so a
                // join side buffered before a transaction is visible to it
                biased;
                Some(event) = recv_opt(&mut behaviors) => {
                    let joined = behavior_join.add_behavior(event);
                    summary.joined_records += Self::emit_joined(&enriched_sink, joined).await;
                }
                Some(update) = recv_opt(&mut updates) => {
                    let joined = merchant_join.add_update(update);
                    summary.joined_records += Self::emit_joined(&enriched_sink, joined).await;
                }
                Some(pattern) = recv_opt(&mut patterns) => {
                    let joined = pattern_join.add_pattern(pattern);
                    summary.joined_records += Self::emit_joined(&enriched_sink, joined).await;
                }
                tx = mirror.recv() => {
                    match tx {
                        Some(tx) => {
                            let emitted = aggregators.process(&tx);
                            summary.aggregates_emitted += emitted.len() as u64;
                            summary.alerts_rate_limited += Self::persist_aggregates(
                                &store,
                                &alert_sink,
                                &mut alert_limiter,
                                emitted,
                                &metrics,
                            )
                            .await;

                            let mut joined = behavior_join.add_transaction(&tx);
                            joined.extend(merchant_join.add_transaction(&tx));
                            joined.extend(pattern_join.add_transaction(&tx));
                            summary.joined_records +=
                                Self::emit_joined(&enriched_sink, joined).await;
                        }
                        None => break,
                    }
                }
            }
        }

        // Drain open windows on shutdown
        let emitted = aggregators.flush();
        summary.aggregates_emitted += emitted.len() as u64;
        summary.alerts_rate_limited +=
            Self::persist_aggregates(&store, &alert_sink, &mut alert_limiter, emitted, &metrics)
                .await;

        summary.late_events_dropped = aggregators.late_dropped();
        metrics
            .counter("late_events_dropped")
            .add(summary.late_events_dropped);
        summary
    }

    /// Persist emitted windows and forward burst alerts; returns how many
    /// alerts the shard's rate limiter dropped
    async fn persist_aggregates(
        store: &Arc<dyn StateStore>,
        alert_sink: &Arc<dyn RecordSink>,
        limiter: &mut AlertRateLimiter,
        records: Vec<AggregateRecord>,
        metrics: &Arc<MetricsCollector>,
    ) -> u64 {
        let mut rate_limited = 0;
        for record in records {
            let aggregation_key = format!(
                "{}:{}:{}",
                record.type_label(),
                record.key(),
                record.window_start().timestamp_millis()
            );
            match serde_json::to_value(&record) {
                Ok(value) => {
                    if let Err(e) = store
                        .set_json(&keys::aggregation(&aggregation_key), &value, ttl::AGGREGATIONS)
                        .await
                    {
                        warn!(key = %aggregation_key, "aggregate write failed: {}", e);
                    }
                }
                Err(e) => warn!("aggregate serialization failed: {}", e),
            }

            // Burst alerts also reach the alert consumer directly, through
            // the same token-bucket policy as the scoring alerts
            if let AggregateRecord::HighFrequency(alert) = &record {
                if limiter.try_acquire() {
                    if let Ok(payload) = serde_json::to_vec(alert) {
                        if alert_sink.send(Some(&alert.user_id), &payload).await.is_err() {
                            metrics.counter("sink_failures").inc();
                        }
                    }
                } else {
                    rate_limited += 1;
                    metrics.counter("alerts_rate_limited").inc();
                }
            }
        }
        rate_limited
    }

    async fn emit_joined(
        enriched_sink: &Arc<dyn RecordSink>,
        joined: Vec<crate::join::EnrichedTransaction>,
    ) -> u64 {
        let mut emitted = 0;
        for record in joined {
            let payload = serde_json::json!({
                "transaction": record.transaction,
                "risk_factors": record.risk_factors,
            });
            if let Ok(bytes) = serde_json::to_vec(&payload) {
                if enriched_sink
                    .send(Some(&record.transaction.transaction_id), &bytes)
                    .await
                    .is_ok()
                {
                    emitted += 1;
                }
            }
        }
        emitted
    }
}

struct WorkerSinks {
    enriched: SinkWriter,
    alerts: SinkWriter,
    features: SinkWriter,
}

#[derive(Default)]
struct WorkerSummary {
    processed: u64,
    alerts_emitted: u64,
    alerts_rate_limited: u64,
    sink_failures: u64,
}

#[derive(Default)]
struct AggregationSummary {
    aggregates_emitted: u64,
    joined_records: u64,
    late_events_dropped: u64,
    alerts_rate_limited: u64,
}

/// Receive from an optional channel; pending forever when absent or closed
/// so the surrounding select! ignores the branch
async fn recv_opt<T>(receiver: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match receiver {
        Some(rx) => match rx.recv().await {
            Some(item) => Some(item),
            None => {
                *receiver = None;
                std::future::pending().await
            }
        },
        None => std::future::pending().await,
    }
}

/// Partition selector: hash of `user_id` keeps a user's records on one
/// worker
fn partition_for(decoded: &Decoded, parallelism: usize) -> usize {
    let user_id = match decoded {
        Decoded::Transaction(tx) | Decoded::Placeholder(tx) => &tx.user_id,
    };
    let mut hasher = DefaultHasher::new();
    user_id.hash(&mut hasher);
    (hasher.finish() % parallelism as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_is_stable_per_user() {
        let tx = Decoded::Transaction(test_tx("user-42"));
        let first = partition_for(&tx, 12);
        for _ in 0..10 {
            assert_eq!(partition_for(&tx, 12), first);
        }
    }

    #[test]
    fn test_partition_in_range() {
        for user in ["a", "b", "c", "d", "e", "f", "g"] {
            let tx = Decoded::Transaction(test_tx(user));
            assert!(partition_for(&tx, 3) < 3);
        }
    }

    fn test_tx(user_id: &str) -> Transaction {
        use chrono::{TimeZone, Utc};
        Transaction {
            transaction_id: "tx".to_string(),
            user_id: user_id.to_string(),
            merchant_id: "m".to_string(),
            amount: 1.0,
            currency: None,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            payment_method: None,
            card_type: None,
            transaction_type: None,
            ip_address: None,
            user_agent: None,
            device_fingerprint: None,
            geolocation: None,
            merchant_location: None,
            hour_of_day: None,
            is_weekend: None,
            is_fraud: None,
            user_profile: None,
            merchant_profile: None,
            features: Default::default(),
            fraud_score: None,
            risk_level: None,
            decision: None,
            processing_time_ms: None,
        }
    }
}
