//! riskflow scoring pipeline runner
//!
//! Wires the pipeline to its deployment surroundings: configuration from
//! `--key value` arguments, the Redis state store, the health/metrics
//! endpoint, and line-delimited record transport on stdin/stdout. A
//! broker-backed source/sink pair plugs in through the same traits in
//! cluster deployments.

mod http;

use anyhow::{Context, Result};
use async_trait::async_trait;
use riskflow_runtime::stream::{RecordSink, RecordSource};
use riskflow_runtime::{
    ConsumerConfig, FeatureStoreFacade, FraudPipeline, JobConfig, MetricsCollector,
    PipelineSinks, RedisStateStore, StateStore,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = JobConfig::from_args(&args).context("failed to parse arguments")?;
    config.validate().context("invalid configuration")?;
    info!("loaded configuration: {:?}", config);

    let consumer = ConsumerConfig::new(
        &config.consumer_group_id,
        vec!["payment-transactions".to_string()],
    );
    info!(
        brokers = %config.kafka_brokers,
        group = %consumer.group_id,
        isolation = consumer.isolation_level,
        "input stream configured"
    );

    let store: Arc<dyn StateStore> = Arc::new(RedisStateStore::connect(&config).await);
    let metrics = Arc::new(MetricsCollector::new());

    if config.enable_real_time_scoring {
        info!(model_path = %config.model_path, "real-time scoring enabled");
    }

    if config.enable_feature_store {
        let facade = FeatureStoreFacade::new(store.clone());
        if let Err(e) = facade.register_builtin_features().await {
            warn!("feature registration failed, continuing: {}", e);
        }
    }

    if config.enable_metrics {
        let addr = format!("0.0.0.0:{}", config.metrics_port);
        let state = http::AppState {
            metrics: metrics.clone(),
            store: store.clone(),
        };
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind metrics endpoint on {addr}"))?;
        info!("metrics endpoint listening on http://{addr}/metrics");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, http::create_router(state)).await {
                warn!("metrics endpoint terminated: {}", e);
            }
        });
    }

    let sinks = PipelineSinks {
        enriched: Arc::new(StdoutSink::new("transaction-enriched")),
        alerts: Arc::new(StdoutSink::new("fraud-alerts")),
        features: Arc::new(StdoutSink::new("transaction-features")),
    };

    let pipeline = FraudPipeline::new(config, store, metrics);
    let summary = pipeline.run(StdinSource::new(), sinks, None).await?;

    info!(
        records_in = summary.records_in,
        processed = summary.processed,
        alerts = summary.alerts_emitted,
        aggregates = summary.aggregates_emitted,
        late_dropped = summary.late_events_dropped,
        "pipeline drained"
    );
    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "riskflow_server=info,riskflow_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))?;

    Ok(())
}

/// Line-delimited record source on stdin, for local runs and replay files
struct StdinSource {
    lines: tokio::io::Lines<BufReader<tokio::io::Stdin>>,
}

impl StdinSource {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

#[async_trait]
impl RecordSource for StdinSource {
    async fn next_record(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Some(line.into_bytes()),
                Ok(None) => return None,
                Err(e) => {
                    warn!("stdin read failed: {}", e);
                    return None;
                }
            }
        }
    }
}

/// Topic-tagged line sink on stdout
struct StdoutSink {
    topic: String,
    out: Mutex<tokio::io::Stdout>,
}

impl StdoutSink {
    fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            out: Mutex::new(tokio::io::stdout()),
        }
    }
}

#[async_trait]
impl RecordSink for StdoutSink {
    async fn send(&self, _key: Option<&str>, payload: &[u8]) -> riskflow_runtime::Result<()> {
        let mut out = self.out.lock().await;
        let line = format!("{}\t{}\n", self.topic, String::from_utf8_lossy(payload));
        out.write_all(line.as_bytes())
            .await
            .map_err(|e| riskflow_runtime::RuntimeError::SinkWrite {
                topic: self.topic.clone(),
                reason: e.to_string(),
            })?;
        out.flush()
            .await
            .map_err(|e| riskflow_runtime::RuntimeError::SinkWrite {
                topic: self.topic.clone(),
                reason: e.to_string(),
            })
    }

    fn topic(&self) -> &str {
        &self.topic
    }
}
