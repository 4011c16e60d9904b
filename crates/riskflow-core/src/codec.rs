//! Wire codec for transaction, feature and alert records
//!
//! Records travel as UTF-8 JSON. Decode and encode are total: bad input
//! yields a placeholder record routed to manual review, and an encode
//! failure yields a minimal error record, so the stream never breaks on
//! malformed data.

use crate::features::FeatureRecord;
use crate::transaction::{Decision, FraudAlert, RiskLevel, Transaction};
use chrono::Utc;
use tracing::{debug, error};
use uuid::Uuid;

/// Result of decoding an input record
///
/// Downstream stages pattern-match on this: placeholders skip enrichment
/// and scoring and carry their REVIEW decision straight to the sinks.
#[derive(Debug, Clone)]
pub enum Decoded {
    /// A well-formed transaction
    Transaction(Transaction),
    /// A placeholder built from undecodable input
    Placeholder(Transaction),
}

impl Decoded {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Decoded::Placeholder(_))
    }

    pub fn into_inner(self) -> Transaction {
        match self {
            Decoded::Transaction(tx) | Decoded::Placeholder(tx) => tx,
        }
    }
}

/// Stateless codec for the pipeline's wire records
pub struct TransactionCodec;

impl TransactionCodec {
    /// Decode an input record
    ///
    /// Never fails: undecodable bytes produce a placeholder with a fresh
    /// `ERROR_`-prefixed id, a moderate 0.5 score and a REVIEW decision.
    pub fn decode(bytes: &[u8]) -> Decoded {
        match serde_json::from_slice::<Transaction>(bytes) {
            Ok(tx) => {
                debug!(transaction_id = %tx.transaction_id, "decoded transaction");
                Decoded::Transaction(tx)
            }
            Err(e) => {
                error!("error decoding transaction: {}", e);
                Decoded::Placeholder(Self::error_placeholder())
            }
        }
    }

    /// Encode a transaction; total
    pub fn encode(tx: &Transaction) -> Vec<u8> {
        match serde_json::to_vec(tx) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(transaction_id = %tx.transaction_id, "error encoding transaction: {}", e);
                Self::encode_failure_record(&tx.transaction_id)
            }
        }
    }

    /// Encode an alert payload; total
    pub fn encode_alert(alert: &FraudAlert) -> Vec<u8> {
        match serde_json::to_vec(alert) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(transaction_id = %alert.transaction_id, "error encoding alert: {}", e);
                Self::encode_failure_record(&alert.transaction_id)
            }
        }
    }

    /// Encode a feature record; total
    pub fn encode_features(record: &FeatureRecord) -> Vec<u8> {
        match serde_json::to_vec(record) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(entity_id = %record.entity_id, "error encoding feature record: {}", e);
                Self::encode_failure_record(&record.entity_id)
            }
        }
    }

    fn error_placeholder() -> Transaction {
        Transaction {
            transaction_id: format!("ERROR_{}", Uuid::new_v4().simple()),
            user_id: String::new(),
            merchant_id: String::new(),
            amount: 0.0,
            currency: None,
            timestamp: Utc::now(),
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
            fraud_score: Some(0.5),
            risk_level: Some(RiskLevel::Error),
            decision: Some(Decision::Review),
            processing_time_ms: None,
        }
    }

    fn encode_failure_record(transaction_id: &str) -> Vec<u8> {
        let record = serde_json::json!({
            "transaction_id": transaction_id,
            "error": "serialization_failed",
            "timestamp": Utc::now(),
        });
        // json! of plain strings cannot fail to serialize
        serde_json::to_vec(&record).unwrap_or_default()
    }
}
