//! Request-scoped telemetry sinks. The gateway emits through the trait so
//! deployments can plug an APM exporter; the default is a no-op.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Sink for gateway metrics
pub trait MetricsSink: Send + Sync {
    /// Count an event, e.g. `gateway.circuit_breaker.rejected`
    fn incr_counter(&self, name: &str, tag: &str);

    /// Record a latency observation in milliseconds
    fn observe_latency(&self, name: &str, tag: &str, millis: u64);
}

/// Discards everything
#[derive(Debug, Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn incr_counter(&self, _name: &str, _tag: &str) {}

    fn observe_latency(&self, _name: &str, _tag: &str, _millis: u64) {}
}

/// Writes metrics to the log stream at debug level and keeps in-process
/// counters, which is enough for tests and local runs.
#[derive(Debug, Default)]
pub struct TracingMetricsSink {
    counters: DashMap<String, AtomicU64>,
}

impl TracingMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str, tag: &str) -> u64 {
        self.counters
            .get(&format!("{}|{}", name, tag))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl MetricsSink for TracingMetricsSink {
    fn incr_counter(&self, name: &str, tag: &str) {
        let key = format!("{}|{}", name, tag);
        self.counters
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
        tracing::debug!("metric {} [{}] +1", name, tag);
    }

    fn observe_latency(&self, name: &str, tag: &str, millis: u64) {
        tracing::debug!("metric {} [{}] {}ms", name, tag, millis);
    }
}
