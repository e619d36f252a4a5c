//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define the sink the dispatch core records into
//! - Forward to the `metrics` facade in production
//! - Keep an inspectable in-memory copy for tests
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `origins_response_status_total` (counter): responses >= 400 by app and status
//! - `origins_response_total` (counter): responses by app, origin and status
//! - `origins_requests_cancelled_total` (counter): abandoned requests by app, and by app and origin
//! - `origin_request_latency_seconds` (histogram): time to response headers per origin
//! - `origin_status` (gauge): 1=active, 0=inactive, -1=disabled
//! - `connection_pool_busy` / `_available` / `_pending` (gauges) per origin

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use metrics::Label;
use metrics_exporter_prometheus::PrometheusBuilder;
use parking_lot::Mutex;

/// Label set attached to a metric.
pub type Labels<'a> = &'a [(&'static str, String)];

/// Destination for counters, gauges and timers.
pub trait MetricsSink: Send + Sync {
    fn increment_counter(&self, name: &'static str, labels: Labels<'_>);

    fn set_gauge(&self, name: &'static str, labels: Labels<'_>, value: f64);

    fn record_duration(&self, name: &'static str, labels: Labels<'_>, duration: Duration);
}

/// Forwards to whatever recorder is installed for the `metrics` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecorderMetrics;

fn to_labels(labels: Labels<'_>) -> Vec<Label> {
    labels
        .iter()
        .map(|(key, value)| Label::new(*key, value.clone()))
        .collect()
}

impl MetricsSink for RecorderMetrics {
    fn increment_counter(&self, name: &'static str, labels: Labels<'_>) {
        metrics::counter!(name, to_labels(labels)).increment(1);
    }

    fn set_gauge(&self, name: &'static str, labels: Labels<'_>, value: f64) {
        metrics::gauge!(name, to_labels(labels)).set(value);
    }

    fn record_duration(&self, name: &'static str, labels: Labels<'_>, duration: Duration) {
        metrics::histogram!(name, to_labels(labels)).record(duration.as_secs_f64());
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment_counter(&self, _name: &'static str, _labels: Labels<'_>) {}

    fn set_gauge(&self, _name: &'static str, _labels: Labels<'_>, _value: f64) {}

    fn record_duration(&self, _name: &'static str, _labels: Labels<'_>, _duration: Duration) {}
}

/// Records into maps keyed by `name{k=v,...}` with labels sorted by key.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: Mutex<BTreeMap<String, u64>>,
    gauges: Mutex<BTreeMap<String, f64>>,
    timers: Mutex<BTreeMap<String, Vec<Duration>>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(name: &str, labels: &[(&str, &str)]) -> String {
        let mut sorted: Vec<_> = labels.to_vec();
        sorted.sort();
        let rendered: Vec<String> = sorted.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        format!("{}{{{}}}", name, rendered.join(","))
    }

    fn key_of(name: &str, labels: Labels<'_>) -> String {
        let borrowed: Vec<(&str, &str)> = labels.iter().map(|(k, v)| (*k, v.as_str())).collect();
        Self::key(name, &borrowed)
    }

    /// Current value of a counter, 0 if never incremented.
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .lock()
            .get(&Self::key(name, labels))
            .copied()
            .unwrap_or(0)
    }

    pub fn gauge(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.gauges.lock().get(&Self::key(name, labels)).copied()
    }

    pub fn timings(&self, name: &str, labels: &[(&str, &str)]) -> usize {
        self.timers
            .lock()
            .get(&Self::key(name, labels))
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Sum of every counter called `name`, across all label sets.
    pub fn counter_total(&self, name: &str) -> u64 {
        let prefix = format!("{}{{", name);
        self.counters
            .lock()
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, value)| *value)
            .sum()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn increment_counter(&self, name: &'static str, labels: Labels<'_>) {
        *self.counters.lock().entry(Self::key_of(name, labels)).or_insert(0) += 1;
    }

    fn set_gauge(&self, name: &'static str, labels: Labels<'_>, value: f64) {
        self.gauges.lock().insert(Self::key_of(name, labels), value);
    }

    fn record_duration(&self, name: &'static str, labels: Labels<'_>, duration: Duration) {
        self.timers
            .lock()
            .entry(Self::key_of(name, labels))
            .or_default()
            .push(duration);
    }
}

/// Install the Prometheus recorder and its HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install Prometheus exporter"),
    }
}
