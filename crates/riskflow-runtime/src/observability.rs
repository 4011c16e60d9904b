//! Metrics collection and exposition
//!
//! Process-wide counters and histograms, created once at orchestrator
//! startup and handed into each stage. Rendered in Prometheus text format
//! for the scrape endpoint.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Monotonic counter metric
#[derive(Debug, Default)]
pub struct Counter {
    value: RwLock<u64>,
}

impl Counter {
    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, value: u64) {
        *self.value.write().unwrap() += value;
    }

    pub fn get(&self) -> u64 {
        *self.value.read().unwrap()
    }
}

/// Histogram metric tracking a value distribution
#[derive(Debug, Default)]
pub struct Histogram {
    values: RwLock<Vec<f64>>,
}

impl Histogram {
    pub fn observe(&self, value: f64) {
        self.values.write().unwrap().push(value);
    }

    pub fn observe_duration(&self, duration: Duration) {
        self.observe(duration.as_secs_f64() * 1000.0);
    }

    pub fn count(&self) -> usize {
        self.values.read().unwrap().len()
    }

    pub fn sum(&self) -> f64 {
        self.values.read().unwrap().iter().sum()
    }

    pub fn avg(&self) -> f64 {
        let values = self.values.read().unwrap();
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    }

    /// Percentile in [0, 100]
    pub fn percentile(&self, p: f64) -> f64 {
        let mut values = self.values.read().unwrap().clone();
        if values.is_empty() {
            return 0.0;
        }
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let index = ((p / 100.0) * (values.len() - 1) as f64).round() as usize;
        values[index]
    }
}

/// Registry of named metrics
#[derive(Default)]
pub struct MetricsCollector {
    counters: RwLock<HashMap<String, Arc<Counter>>>,
    histograms: RwLock<HashMap<String, Arc<Histogram>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> Arc<Counter> {
        self.counters
            .write()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    pub fn histogram(&self, name: &str) -> Arc<Histogram> {
        self.histograms
            .write()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Prometheus text exposition of every registered metric
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();

        let counters = self.counters.read().unwrap();
        let mut names: Vec<_> = counters.keys().collect();
        names.sort();
        for name in names {
            let value = counters[name].get();
            out.push_str(&format!("# TYPE riskflow_{name} counter\n"));
            out.push_str(&format!("riskflow_{name} {value}\n"));
        }

        let histograms = self.histograms.read().unwrap();
        let mut names: Vec<_> = histograms.keys().collect();
        names.sort();
        for name in names {
            let histogram = &histograms[name];
            out.push_str(&format!("# TYPE riskflow_{name} summary\n"));
            out.push_str(&format!("riskflow_{name}_count {}\n", histogram.count()));
            out.push_str(&format!("riskflow_{name}_sum {}\n", histogram.sum()));
            out.push_str(&format!(
                "riskflow_{name}{{quantile=\"0.95\"}} {}\n",
                histogram.percentile(95.0)
            ));
        }

        out
    }
}
