//! Record stream abstractions
//!
//! The message bus is external: the pipeline consumes a byte-record source
//! and produces byte records on named sinks. Implementations here cover the
//! in-process channel transport used by the orchestrator and a capturing
//! sink for tests; the bus-specific producer/consumer property sets travel
//! with the configs so a broker-backed implementation drops in unchanged.

use crate::error::{Result, RuntimeError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Producer properties applied to every output stream
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub acks: &'static str,
    pub retries: u32,
    pub batch_size: u32,
    pub linger_ms: u64,
    pub buffer_memory: u64,
    pub compression: &'static str,
    pub enable_idempotence: bool,
    pub max_in_flight: u32,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            acks: "all",
            retries: 3,
            batch_size: 16_384,
            linger_ms: 5,
            buffer_memory: 32 * 1024 * 1024,
            compression: "lz4",
            enable_idempotence: true,
            max_in_flight: 5,
        }
    }
}

/// Consumer properties for the transaction input stream
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub group_id: String,
    pub topics: Vec<String>,
    pub auto_offset_reset: &'static str,
    pub enable_auto_commit: bool,
    pub isolation_level: &'static str,
}

impl ConsumerConfig {
    pub fn new(group_id: &str, topics: Vec<String>) -> Self {
        Self {
            group_id: group_id.to_string(),
            topics,
            auto_offset_reset: "latest",
            enable_auto_commit: false,
            isolation_level: "read_committed",
        }
    }
}

/// Byte-record input stream
#[async_trait]
pub trait RecordSource: Send {
    /// Next record, or `None` once the stream is closed
    async fn next_record(&mut self) -> Option<Vec<u8>>;
}

/// Byte-record output stream
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn send(&self, key: Option<&str>, payload: &[u8]) -> Result<()>;

    fn topic(&self) -> &str;
}

/// Channel-backed source for in-process wiring
pub struct ChannelSource {
    receiver: mpsc::Receiver<Vec<u8>>,
}

impl ChannelSource {
    pub fn new(receiver: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { receiver }
    }

    /// Bounded channel pair sized like a consumer fetch buffer
    pub fn bounded(capacity: usize) -> (mpsc::Sender<Vec<u8>>, Self) {
        let (sender, receiver) = mpsc::channel(capacity);
        (sender, Self::new(receiver))
    }
}

#[async_trait]
impl RecordSource for ChannelSource {
    async fn next_record(&mut self) -> Option<Vec<u8>> {
        self.receiver.recv().await
    }
}

/// A record captured by [`CapturingSink`]
#[derive(Debug, Clone)]
pub struct CapturedRecord {
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

impl CapturedRecord {
    pub fn as_json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.payload).ok()
    }
}

/// Sink that records everything sent to it; test double for the bus
/// producer
pub struct CapturingSink {
    topic: String,
    records: Arc<Mutex<Vec<CapturedRecord>>>,
    failures_remaining: Arc<Mutex<u32>>,
}

impl CapturingSink {
    pub fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            records: Arc::new(Mutex::new(Vec::new())),
            failures_remaining: Arc::new(Mutex::new(0)),
        }
    }

    /// Make the next `n` sends fail, for retry-path tests
    pub fn fail_next(&self, n: u32) {
        *self.failures_remaining.lock().unwrap() = n;
    }

    pub fn records(&self) -> Vec<CapturedRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.records.lock().unwrap().clear();
    }
}

#[async_trait]
impl RecordSink for CapturingSink {
    async fn send(&self, key: Option<&str>, payload: &[u8]) -> Result<()> {
        {
            let mut failures = self.failures_remaining.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(RuntimeError::SinkWrite {
                    topic: self.topic.clone(),
                    reason: "injected failure".to_string(),
                });
            }
        }

        self.records.lock().unwrap().push(CapturedRecord {
            key: key.map(|k| k.to_string()),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn topic(&self) -> &str {
        &self.topic
    }
}

/// Sink wrapper applying the producer retry policy
pub struct SinkWriter {
    sink: Arc<dyn RecordSink>,
    config: ProducerConfig,
}

impl SinkWriter {
    pub fn new(sink: Arc<dyn RecordSink>, config: ProducerConfig) -> Self {
        Self { sink, config }
    }

    pub fn topic(&self) -> &str {
        self.sink.topic()
    }

    /// Send with retries; surfaces a retriable error once the budget is
    /// spent
    pub async fn send(&self, key: Option<&str>, payload: &[u8]) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.sink.send(key, payload).await {
                Ok(()) => {
                    debug!(topic = self.sink.topic(), "record written");
                    return Ok(());
                }
                Err(e) if attempt < self.config.retries => {
                    attempt += 1;
                    warn!(
                        topic = self.sink.topic(),
                        attempt,
                        "sink write failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(self.config.linger_ms * attempt as u64))
                        .await;
                }
                Err(e) => {
                    return Err(RuntimeError::SinkWrite {
                        topic: self.sink.topic().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}

/// Token-bucket limiter for the alert sink, refilled at
/// `max_per_minute` tokens per minute
pub struct AlertRateLimiter {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl AlertRateLimiter {
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            capacity: max_per_minute as f64,
            tokens: max_per_minute as f64,
            refill_per_sec: max_per_minute as f64 / 60.0,
            last_refill: Instant::now(),
        }
    }

    /// Try to take one token at the given instant
    pub fn try_acquire_at(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_producer_config_defaults() {
        let config = ProducerConfig::default();
        assert_eq!(config.acks, "all");
        assert_eq!(config.retries, 3);
        assert_eq!(config.batch_size, 16_384);
        assert_eq!(config.linger_ms, 5);
        assert_eq!(config.buffer_memory, 32 * 1024 * 1024);
        assert_eq!(config.compression, "lz4");
        assert!(config.enable_idempotence);
        assert_eq!(config.max_in_flight, 5);
    }

    #[test]
    fn test_consumer_config() {
        let config = ConsumerConfig::new("group-1", vec!["payment-transactions".to_string()]);
        assert_eq!(config.auto_offset_reset, "latest");
        assert!(!config.enable_auto_commit);
        assert_eq!(config.isolation_level, "read_committed");
    }

    #[tokio::test]
    async fn test_channel_source() {
        let (sender, mut source) = ChannelSource::bounded(4);
        sender.send(b"record-1".to_vec()).await.unwrap();
        drop(sender);

        assert_eq!(source.next_record().await, Some(b"record-1".to_vec()));
        assert_eq!(source.next_record().await, None);
    }

    #[tokio::test]
    async fn test_capturing_sink() {
        let sink = CapturingSink::new("transaction-enriched");
        sink.send(Some("u1"), b"{}").await.unwrap();
        sink.send(None, b"[]").await.unwrap();

        assert_eq!(sink.count(), 2);
        let records = sink.records();
        assert_eq!(records[0].key.as_deref(), Some("u1"));
        assert_eq!(records[1].key, None);

        sink.clear();
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn test_sink_writer_retries_until_success() {
        let sink = Arc::new(CapturingSink::new("fraud-alerts"));
        sink.fail_next(2);

        let writer = SinkWriter::new(sink.clone(), ProducerConfig::default());
        writer.send(Some("u1"), b"{}").await.unwrap();
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test]
    async fn test_sink_writer_exhausts_retries() {
        let sink = Arc::new(CapturingSink::new("fraud-alerts"));
        sink.fail_next(10);

        let writer = SinkWriter::new(sink.clone(), ProducerConfig::default());
        let err = writer.send(None, b"{}").await.unwrap_err();
        assert!(matches!(err, RuntimeError::SinkWrite { .. }));
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_rate_limiter_caps_burst() {
        let mut limiter = AlertRateLimiter::new(3);
        let now = Instant::now();

        assert!(limiter.try_acquire_at(now));
        assert!(limiter.try_acquire_at(now));
        assert!(limiter.try_acquire_at(now));
        assert!(!limiter.try_acquire_at(now));
    }

    #[test]
    fn test_rate_limiter_refills_over_time() {
        let mut limiter = AlertRateLimiter::new(60);
        let start = Instant::now();

        for _ in 0..60 {
            assert!(limiter.try_acquire_at(start));
        }
        assert!(!limiter.try_acquire_at(start));

        // One token per second at 60/minute
        assert!(limiter.try_acquire_at(start + Duration::from_secs(1)));
        assert!(!limiter.try_acquire_at(start + Duration::from_millis(1500)));
        assert!(limiter.try_acquire_at(start + Duration::from_secs(3)));
    }
}
