//! Job configuration
//!
//! Parsed from `--key value` command-line pairs with sensible defaults for
//! every option, validated once at startup.

use crate::error::{Result, RuntimeError};
use serde::{Deserialize, Serialize};

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    // Message bus
    pub kafka_brokers: String,
    pub consumer_group_id: String,

    // State store
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_password: String,
    pub redis_max_connections: u32,
    /// Per-operation deadline in milliseconds
    pub redis_timeout_ms: u64,

    // Pipeline
    pub parallelism: usize,
    pub checkpoint_interval_ms: u64,
    pub min_pause_between_checkpoints_ms: u64,
    pub checkpoint_timeout_ms: u64,
    pub max_concurrent_checkpoints: u32,

    // Scoring
    pub enable_feature_store: bool,
    pub enable_real_time_scoring: bool,
    pub fraud_threshold: f64,
    pub model_path: String,

    // Windowing
    pub velocity_window_size_ms: u64,
    pub session_window_gap_ms: u64,

    // Metrics
    pub enable_metrics: bool,
    pub metrics_port: u16,

    // Alerting
    pub enable_alerting: bool,
    pub critical_alert_threshold: f64,
    pub high_alert_threshold: f64,
    pub max_alerts_per_minute: u32,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            kafka_brokers: "localhost:9092".to_string(),
            consumer_group_id: "riskflow-scoring-job".to_string(),
            redis_host: "localhost".to_string(),
            redis_port: 6379,
            redis_password: String::new(),
            redis_max_connections: 20,
            redis_timeout_ms: 5000,
            parallelism: 12,
            checkpoint_interval_ms: 10_000,
            min_pause_between_checkpoints_ms: 5_000,
            checkpoint_timeout_ms: 60_000,
            max_concurrent_checkpoints: 1,
            enable_feature_store: true,
            enable_real_time_scoring: true,
            fraud_threshold: 0.7,
            model_path: "/opt/riskflow/models".to_string(),
            velocity_window_size_ms: 300_000,
            session_window_gap_ms: 1_800_000,
            enable_metrics: true,
            metrics_port: 9249,
            enable_alerting: true,
            critical_alert_threshold: 0.9,
            high_alert_threshold: 0.8,
            max_alerts_per_minute: 100,
        }
    }
}

impl JobConfig {
    /// Build configuration from `--key value` argument pairs
    ///
    /// Unknown keys are ignored; malformed values for known keys fail with
    /// the offending key named.
    pub fn from_args<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();
        let mut config = Self::default();

        let mut i = 0;
        while i + 1 < args.len() {
            let key = args[i].as_str();
            let value = args[i + 1].as_str();

            match key {
                "--kafka-brokers" => config.kafka_brokers = value.to_string(),
                "--consumer-group-id" => config.consumer_group_id = value.to_string(),
                "--redis-host" => config.redis_host = value.to_string(),
                "--redis-port" => config.redis_port = parse(key, value)?,
                "--redis-password" => config.redis_password = value.to_string(),
                "--redis-max-connections" => config.redis_max_connections = parse(key, value)?,
                "--redis-timeout" => config.redis_timeout_ms = parse(key, value)?,
                "--parallelism" => config.parallelism = parse(key, value)?,
                "--checkpoint-interval" => config.checkpoint_interval_ms = parse(key, value)?,
                "--fraud-threshold" => config.fraud_threshold = parse(key, value)?,
                "--enable-feature-store" => config.enable_feature_store = parse(key, value)?,
                "--enable-real-time-scoring" => {
                    config.enable_real_time_scoring = parse(key, value)?
                }
                "--model-path" => config.model_path = value.to_string(),
                "--velocity-window-size" => config.velocity_window_size_ms = parse(key, value)?,
                "--session-window-gap" => config.session_window_gap_ms = parse(key, value)?,
                "--enable-metrics" => config.enable_metrics = parse(key, value)?,
                "--metrics-port" => config.metrics_port = parse(key, value)?,
                "--enable-alerting" => config.enable_alerting = parse(key, value)?,
                "--critical-alert-threshold" => {
                    config.critical_alert_threshold = parse(key, value)?
                }
                "--high-alert-threshold" => config.high_alert_threshold = parse(key, value)?,
                "--max-alerts-per-minute" => config.max_alerts_per_minute = parse(key, value)?,
                _ => {
                    // Unknown parameters are ignored so launch wrappers can
                    // pass through their own flags
                }
            }
            i += 2;
        }

        Ok(config)
    }

    /// Validate configuration, failing with a message naming the bad key
    pub fn validate(&self) -> Result<()> {
        if self.kafka_brokers.trim().is_empty() {
            return Err(invalid("kafka-brokers", "must not be empty"));
        }
        if self.consumer_group_id.trim().is_empty() {
            return Err(invalid("consumer-group-id", "must not be empty"));
        }
        if self.redis_host.trim().is_empty() {
            return Err(invalid("redis-host", "must not be empty"));
        }
        if self.redis_port == 0 {
            return Err(invalid("redis-port", "must be between 1 and 65535"));
        }
        if self.parallelism == 0 {
            return Err(invalid("parallelism", "must be greater than 0"));
        }
        if self.checkpoint_interval_ms == 0 {
            return Err(invalid("checkpoint-interval", "must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.fraud_threshold) {
            return Err(invalid("fraud-threshold", "must be between 0.0 and 1.0"));
        }
        Ok(())
    }

    /// Redis connection URL for the state store client
    pub fn redis_url(&self) -> String {
        if self.redis_password.is_empty() {
            format!("redis://{}:{}", self.redis_host, self.redis_port)
        } else {
            format!(
                "redis://:{}@{}:{}",
                self.redis_password, self.redis_host, self.redis_port
            )
        }
    }

    /// Broker list as individual addresses
    pub fn kafka_broker_list(&self) -> Vec<&str> {
        self.kafka_brokers.split(',').map(|s| s.trim()).collect()
    }
}

fn invalid(key: &str, reason: &str) -> RuntimeError {
    RuntimeError::InvalidConfig {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| RuntimeError::InvalidConfig {
        key: key.trim_start_matches('-').to_string(),
        reason: format!("could not parse value '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = JobConfig::default();
        assert_eq!(config.parallelism, 12);
        assert_eq!(config.fraud_threshold, 0.7);
        assert_eq!(config.checkpoint_interval_ms, 10_000);
        assert_eq!(config.max_concurrent_checkpoints, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_args() {
        let config = JobConfig::from_args([
            "--kafka-brokers",
            "broker1:9092,broker2:9092",
            "--parallelism",
            "4",
            "--fraud-threshold",
            "0.8",
            "--enable-alerting",
            "false",
        ])
        .unwrap();

        assert_eq!(config.kafka_brokers, "broker1:9092,broker2:9092");
        assert_eq!(config.kafka_broker_list().len(), 2);
        assert_eq!(config.parallelism, 4);
        assert_eq!(config.fraud_threshold, 0.8);
        assert!(!config.enable_alerting);
    }

    #[test]
    fn test_from_args_ignores_unknown_keys() {
        let config = JobConfig::from_args(["--some-wrapper-flag", "x", "--parallelism", "2"]).unwrap();
        assert_eq!(config.parallelism, 2);
    }

    #[test]
    fn test_from_args_rejects_malformed_value() {
        let err = JobConfig::from_args(["--redis-port", "not-a-port"]).unwrap_err();
        assert!(err.to_string().contains("redis-port"));
    }

    #[test]
    fn test_validate_empty_brokers() {
        let mut config = JobConfig::default();
        config.kafka_brokers = "  ".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("kafka-brokers"));
    }

    #[test]
    fn test_validate_fraud_threshold_range() {
        let mut config = JobConfig::default();
        config.fraud_threshold = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("fraud-threshold"));
    }

    #[test]
    fn test_validate_zero_parallelism() {
        let mut config = JobConfig::default();
        config.parallelism = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redis_url() {
        let mut config = JobConfig::default();
        assert_eq!(config.redis_url(), "redis://localhost:6379");

        config.redis_password = "secret".to_string();
        assert_eq!(config.redis_url(), "redis://:secret@localhost:6379");
    }
}
