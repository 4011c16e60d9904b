//! riskflow-runtime - Streaming enrichment, scoring and aggregation
//!
//! This crate provides the execution layer of the riskflow pipeline: the
//! state store client, profile cache, feature extractor, rule scorer,
//! velocity updater, windowed aggregation, stream joins, the feature store
//! facade, and the orchestrator that wires them into a running job.

pub mod config;
pub mod error;
pub mod feature_store;
pub mod features;
pub mod join;
pub mod observability;
pub mod pipeline;
pub mod processor;
pub mod profile;
pub mod scoring;
pub mod state;
pub mod stream;
pub mod velocity;
pub mod window;

// Re-export main types
pub use config::JobConfig;
pub use error::{Result, RuntimeError};
pub use feature_store::{FeatureStats, FeatureStoreFacade};
pub use features::FeatureExtractor;
pub use join::{BehaviorJoiner, EnrichedTransaction, HistoricalPatternJoiner, MerchantUpdateJoiner};
pub use observability::MetricsCollector;
pub use pipeline::{FraudPipeline, PipelineSinks, PipelineSummary, SecondaryStreams};
pub use processor::TransactionProcessor;
pub use profile::ProfileCache;
pub use scoring::RuleScorer;
pub use state::{InMemoryStateStore, RedisStateStore, StateStore};
pub use stream::{
    AlertRateLimiter, CapturingSink, ChannelSource, ConsumerConfig, ProducerConfig, RecordSink,
    RecordSource, SinkWriter,
};
pub use velocity::{VelocityUpdater, VelocityWindow};
pub use window::{AggregatorSet, WindowedAggregator};
