//! End-to-end pipeline tests over the in-memory state store and capturing
//! sinks

use chrono::{DateTime, TimeZone, Utc};
use riskflow_core::{
    registered_features, FeatureVector, Transaction, TransactionCodec, UserBehaviorEvent,
};
use riskflow_runtime::{
    CapturingSink, ChannelSource, FraudPipeline, InMemoryStateStore, JobConfig, MetricsCollector,
    PipelineSinks, SecondaryStreams, StateStore,
};
use std::collections::HashMap;
use std::sync::Arc;

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 5, 14, 0, 0).unwrap()
}

fn create_test_transaction(id: &str, user_id: &str, amount: f64) -> Transaction {
    Transaction {
        transaction_id: id.to_string(),
        user_id: user_id.to_string(),
        merchant_id: "m1".to_string(),
        amount,
        currency: Some("USD".to_string()),
        timestamp: base_time(),
        payment_method: Some("credit_card".to_string()),
        card_type: Some("visa".to_string()),
        transaction_type: Some("purchase".to_string()),
        ip_address: Some("192.168.0.4".to_string()),
        user_agent: Some("Mozilla/5.0 (X11; Linux x86_64) Firefox/125.0".to_string()),
        device_fingerprint: Some("dev-1".to_string()),
        geolocation: None,
        merchant_location: None,
        hour_of_day: None,
        is_weekend: None,
        is_fraud: None,
        user_profile: None,
        merchant_profile: None,
        features: FeatureVector::new(),
        fraud_score: None,
        risk_level: None,
        decision: None,
        processing_time_ms: None,
    }
}

fn seed_known_user(store: &InMemoryStateStore, user_id: &str) {
    let mut hash = HashMap::new();
    hash.insert("account_age_days".to_string(), "400".to_string());
    hash.insert("risk_score".to_string(), "0.1".to_string());
    hash.insert("verified".to_string(), "true".to_string());
    hash.insert("kyc_status".to_string(), "verified".to_string());
    hash.insert("avg_transaction_amount".to_string(), "50.0".to_string());
    hash.insert("device_fingerprints".to_string(), "[\"dev-1\"]".to_string());
    store.seed_hash(&format!("user:{user_id}"), hash);
}

fn seed_retail_merchant(store: &InMemoryStateStore) {
    let mut hash = HashMap::new();
    hash.insert("name".to_string(), "Corner Grocery".to_string());
    hash.insert("category".to_string(), "retail".to_string());
    hash.insert("risk_level".to_string(), "low".to_string());
    hash.insert("fraud_rate".to_string(), "0.01".to_string());
    store.seed_hash("merchant:m1", hash);
}

fn seed_blacklisted_merchant(store: &InMemoryStateStore) {
    let mut hash = HashMap::new();
    hash.insert("name".to_string(), "QuickCash Casino".to_string());
    hash.insert("category".to_string(), "gambling".to_string());
    hash.insert("risk_level".to_string(), "high".to_string());
    hash.insert("fraud_rate".to_string(), "0.3".to_string());
    hash.insert("is_blacklisted".to_string(), "true".to_string());
    hash.insert("is_high_risk_category".to_string(), "true".to_string());
    store.seed_hash("merchant:m1", hash);
}

struct TestSinks {
    enriched: Arc<CapturingSink>,
    alerts: Arc<CapturingSink>,
    features: Arc<CapturingSink>,
}

impl TestSinks {
    fn new() -> (Self, PipelineSinks) {
        let enriched = Arc::new(CapturingSink::new("transaction-enriched"));
        let alerts = Arc::new(CapturingSink::new("fraud-alerts"));
        let features = Arc::new(CapturingSink::new("transaction-features"));
        let pipeline_sinks = PipelineSinks {
            enriched: enriched.clone(),
            alerts: alerts.clone(),
            features: features.clone(),
        };
        (
            Self {
                enriched,
                alerts,
                features,
            },
            pipeline_sinks,
        )
    }
}

fn test_config() -> JobConfig {
    let mut config = JobConfig::default();
    config.parallelism = 2;
    config
}

async fn run_pipeline(
    store: Arc<InMemoryStateStore>,
    records: Vec<Vec<u8>>,
) -> (riskflow_runtime::PipelineSummary, TestSinks) {
    let (sender, source) = ChannelSource::bounded(records.len().max(1));
    for record in records {
        sender.send(record).await.unwrap();
    }
    drop(sender);

    let (test_sinks, pipeline_sinks) = TestSinks::new();
    let pipeline = FraudPipeline::new(test_config(), store, Arc::new(MetricsCollector::new()));
    let summary = pipeline.run(source, pipeline_sinks, None).await.unwrap();
    (summary, test_sinks)
}

#[tokio::test]
async fn test_routine_purchase_end_to_end() {
    let store = Arc::new(InMemoryStateStore::new());
    seed_known_user(&store, "u1");
    seed_retail_merchant(&store);

    let tx = create_test_transaction("tx-1", "u1", 42.5);
    let (summary, sinks) = run_pipeline(store.clone(), vec![TransactionCodec::encode(&tx)]).await;

    assert_eq!(summary.records_in, 1);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.alerts_emitted, 0);

    // Emitted on enriched and features, not on alerts
    assert_eq!(sinks.enriched.count(), 1);
    assert_eq!(sinks.features.count(), 1);
    assert_eq!(sinks.alerts.count(), 0);

    let enriched = sinks.enriched.records()[0].as_json().unwrap();
    assert_eq!(enriched["decision"], "APPROVE");
    assert_eq!(enriched["risk_level"], "VERY_LOW");
    assert!(enriched["fraud_score"].as_f64().unwrap() < 0.3);

    // Velocity counters incremented in all three windows
    for window in ["5min", "1hour", "24hour"] {
        let hash = store
            .get_hash(&format!("velocity:u1:{window}"))
            .await
            .unwrap();
        assert_eq!(hash.get("count"), Some(&"1".to_string()));
    }
}

#[tokio::test]
async fn test_feature_record_keys_are_registered() {
    let store = Arc::new(InMemoryStateStore::new());
    seed_known_user(&store, "u1");
    seed_retail_merchant(&store);

    let tx = create_test_transaction("tx-1", "u1", 42.5);
    let (_, sinks) = run_pipeline(store, vec![TransactionCodec::encode(&tx)]).await;

    let record = sinks.features.records()[0].as_json().unwrap();
    assert_eq!(record["entity_id"], "tx-1");
    assert_eq!(record["entity_type"], "transaction");
    assert_eq!(record["version"], "1.0");

    let registry: Vec<&str> = registered_features().iter().map(|(n, _)| *n).collect();
    for key in record["features"].as_object().unwrap().keys() {
        assert!(registry.contains(&key.as_str()), "unregistered feature {key}");
    }
}

#[tokio::test]
async fn test_card_testing_burst_alerts_on_sixth() {
    let store = Arc::new(InMemoryStateStore::new());
    seed_retail_merchant(&store);

    let mut records = Vec::new();
    for i in 0..6 {
        let mut tx = create_test_transaction(&format!("tx-{i}"), "u1", 1.0);
        tx.timestamp = base_time() + chrono::Duration::seconds(i * 10);
        tx.fraud_score = Some(0.9);
        records.push(TransactionCodec::encode(&tx));
    }

    let (summary, sinks) = run_pipeline(store, records).await;
    assert_eq!(summary.processed, 6);
    assert_eq!(summary.alerts_emitted, 1);

    let alert = sinks.alerts.records()[0].as_json().unwrap();
    assert_eq!(alert["transaction_id"], "tx-5");
    assert!(alert["fraud_score"].as_f64().unwrap() > 0.7);
}

#[tokio::test]
async fn test_blacklist_override_end_to_end() {
    let store = Arc::new(InMemoryStateStore::new());
    seed_blacklisted_merchant(&store);

    let mut tx = create_test_transaction("tx-1", "u-new", 5.0);
    tx.hour_of_day = Some(2);
    tx.ip_address = Some("203.0.113.9".to_string());
    let (summary, sinks) = run_pipeline(store, vec![TransactionCodec::encode(&tx)]).await;

    assert_eq!(summary.alerts_emitted, 1);

    let enriched = sinks.enriched.records()[0].as_json().unwrap();
    assert_eq!(enriched["decision"], "DECLINE");
    assert_eq!(enriched["risk_level"], "CRITICAL");

    let alert = sinks.alerts.records()[0].as_json().unwrap();
    assert_eq!(alert["transaction_id"], "tx-1");
    assert_eq!(alert["decision"], "DECLINE");
}

#[tokio::test]
async fn test_undecodable_record_flows_as_review() {
    let store = Arc::new(InMemoryStateStore::new());

    let (summary, sinks) =
        run_pipeline(store, vec![b"definitely not a transaction".to_vec()]).await;

    // The stream does not break; the placeholder reaches the enriched sink
    assert_eq!(summary.records_in, 1);
    assert_eq!(sinks.enriched.count(), 1);

    let enriched = sinks.enriched.records()[0].as_json().unwrap();
    assert!(enriched["transaction_id"]
        .as_str()
        .unwrap()
        .starts_with("ERROR_"));
    assert_eq!(enriched["decision"], "REVIEW");
    assert_eq!(enriched["risk_level"], "ERROR");
    assert_eq!(enriched["fraud_score"], 0.5);
}

#[tokio::test]
async fn test_per_user_velocity_isolated_across_users() {
    let store = Arc::new(InMemoryStateStore::new());
    seed_retail_merchant(&store);

    let mut records = Vec::new();
    for user in ["u1", "u2", "u3"] {
        for i in 0..2 {
            let tx = create_test_transaction(&format!("tx-{user}-{i}"), user, 10.0);
            records.push(TransactionCodec::encode(&tx));
        }
    }

    let (summary, _) = run_pipeline(store.clone(), records).await;
    assert_eq!(summary.processed, 6);

    for user in ["u1", "u2", "u3"] {
        let hash = store
            .get_hash(&format!("velocity:{user}:5min"))
            .await
            .unwrap();
        assert_eq!(hash.get("count"), Some(&"2".to_string()), "user {user}");
    }
}

#[tokio::test]
async fn test_aggregates_written_to_state_store() {
    let store = Arc::new(InMemoryStateStore::new());
    seed_known_user(&store, "u1");
    seed_retail_merchant(&store);

    let tx = create_test_transaction("tx-1", "u1", 42.5);
    let (summary, _) = run_pipeline(store.clone(), vec![TransactionCodec::encode(&tx)]).await;

    // Shutdown flush emits the open windows for every operator
    assert!(summary.aggregates_emitted > 0);

    // The merchant hourly window lands under the agg: namespace
    let window_start_ms = {
        let hour_ms = 3_600_000;
        base_time().timestamp_millis() / hour_ms * hour_ms
    };
    let value = store
        .get_json(&format!("agg:merchant:m1:{window_start_ms}"))
        .await
        .unwrap();
    let value = value.expect("merchant aggregate present");
    assert_eq!(value["aggregate_type"], "merchant");
    assert_eq!(value["transaction_count"], 1);
}

#[tokio::test]
async fn test_behavior_join_through_pipeline() {
    let store = Arc::new(InMemoryStateStore::new());
    seed_known_user(&store, "u1");
    seed_retail_merchant(&store);

    let (behavior_tx, _update_tx, _pattern_tx, secondary) = SecondaryStreams::bounded(16);
    behavior_tx
        .send(UserBehaviorEvent {
            user_id: "u1".to_string(),
            timestamp: base_time() + chrono::Duration::seconds(30),
            anomalous_login: true,
            short_session: true,
            anomalous_navigation: false,
            session_duration_ms: Some(8_000),
        })
        .await
        .unwrap();

    let (sender, source) = ChannelSource::bounded(4);
    let tx = create_test_transaction("tx-1", "u1", 42.5);
    sender.send(TransactionCodec::encode(&tx)).await.unwrap();
    drop(sender);

    let (test_sinks, pipeline_sinks) = TestSinks::new();
    let pipeline = FraudPipeline::new(test_config(), store, Arc::new(MetricsCollector::new()));
    let summary = pipeline
        .run(source, pipeline_sinks, Some(secondary))
        .await
        .unwrap();

    assert_eq!(summary.joined_records, 1);

    // The joined record lands on the enriched stream with its risk factors
    let joined = test_sinks
        .enriched
        .records()
        .iter()
        .filter_map(|r| r.as_json())
        .find(|v| v.get("risk_factors").is_some())
        .expect("joined record emitted");
    assert_eq!(joined["risk_factors"]["recent_login_anomaly"], 0.3);
    assert_eq!(joined["risk_factors"]["session_duration_anomaly"], 0.2);
    assert_eq!(joined["risk_factors"]["navigation_pattern_anomaly"], 0.0);
}

#[tokio::test]
async fn test_checkpoint_marker_written() {
    let store = Arc::new(InMemoryStateStore::new());
    seed_known_user(&store, "u1");
    seed_retail_merchant(&store);

    let mut config = test_config();
    // Tight interval so a marker lands during the run
    config.checkpoint_interval_ms = 20;
    config.min_pause_between_checkpoints_ms = 10;

    let (sender, source) = ChannelSource::bounded(64);
    let sender_task = tokio::spawn(async move {
        for i in 0..20 {
            let tx = create_test_transaction(&format!("tx-{i}"), "u1", 10.0);
            sender.send(TransactionCodec::encode(&tx)).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    });

    let (_sinks, pipeline_sinks) = TestSinks::new();
    let pipeline = FraudPipeline::new(config, store.clone(), Arc::new(MetricsCollector::new()));
    let summary = pipeline.run(source, pipeline_sinks, None).await.unwrap();
    sender_task.await.unwrap();

    assert!(summary.checkpoints_completed > 0);
    let marker = store.get_json("agg:checkpoint").await.unwrap().unwrap();
    assert!(marker["checkpoint_id"].as_u64().unwrap() >= 1);
}
