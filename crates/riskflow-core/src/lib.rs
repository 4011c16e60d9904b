//! riskflow-core - Domain types for real-time transaction risk scoring
//!
//! This crate provides the transaction and profile models, the feature
//! registry, windowed aggregate records, and the wire codec shared by the
//! runtime and server crates.

pub mod aggregates;
pub mod codec;
pub mod events;
pub mod features;
pub mod profile;
pub mod transaction;

// Re-export main types
pub use aggregates::{
    AggregateRecord, AmountClusterAggregate, FraudPatternAggregate, GeographicAggregate,
    HighFrequencyAlert, MerchantAggregate, UserSessionAggregate, UserVelocityAggregate,
};
pub use codec::{Decoded, TransactionCodec};
pub use events::{HistoricalPattern, MerchantUpdateEvent, UserBehaviorEvent};
pub use features::{registered_features, FeatureKind, FeatureRecord, FeatureValue, FeatureVector};
pub use profile::{MerchantProfile, MerchantRiskLevel, UserProfile};
pub use transaction::{Decision, FraudAlert, GeoPoint, RiskLevel, Transaction};
