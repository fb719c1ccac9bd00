//! Prometheus-backed metrics registry.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Labels are low-cardinality: request type, outcome, connectivity status.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{TelemetryError, TelemetryResult};

/// Prometheus-backed metrics registry for the request engine.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    requests_submitted_total: IntCounterVec,
    requests_completed_total: IntCounterVec,
    retries_total: IntCounter,
    connectivity_transitions_total: IntCounterVec,
    events_emitted_total: IntCounterVec,
    pool_depth: IntGauge,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Requests currently held by the pool.
    pub pool_depth: i64,
    /// Retries scheduled since start.
    pub retries_total: u64,
}

impl Metrics {
    /// Construct a registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if a collector cannot be built or registered.
    pub fn new() -> TelemetryResult<Self> {
        let registry = Registry::new();

        let requests_submitted_total = counter_vec(
            "netkit_requests_submitted_total",
            "Requests admitted to the pool by type",
            &["type"],
        )?;
        let requests_completed_total = counter_vec(
            "netkit_requests_completed_total",
            "Requests delivered to callers by type and outcome",
            &["type", "outcome"],
        )?;
        let retries_total = IntCounter::with_opts(Opts::new(
            "netkit_retries_total",
            "Failed attempts requeued for retry",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "netkit_retries_total",
            source,
        })?;
        let connectivity_transitions_total = counter_vec(
            "netkit_connectivity_transitions_total",
            "Connectivity changes observed by status",
            &["status"],
        )?;
        let events_emitted_total = counter_vec(
            "netkit_events_emitted_total",
            "Lifecycle events observed by kind",
            &["kind"],
        )?;
        let pool_depth = IntGauge::with_opts(Opts::new(
            "netkit_pool_depth",
            "Requests currently held by the pool",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "netkit_pool_depth",
            source,
        })?;

        register(&registry, "netkit_requests_submitted_total", &requests_submitted_total)?;
        register(&registry, "netkit_requests_completed_total", &requests_completed_total)?;
        register(&registry, "netkit_retries_total", &retries_total)?;
        register(
            &registry,
            "netkit_connectivity_transitions_total",
            &connectivity_transitions_total,
        )?;
        register(&registry, "netkit_events_emitted_total", &events_emitted_total)?;
        register(&registry, "netkit_pool_depth", &pool_depth)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                requests_submitted_total,
                requests_completed_total,
                retries_total,
                connectivity_transitions_total,
                events_emitted_total,
                pool_depth,
            }),
        })
    }

    /// Count a request admitted to the pool.
    pub fn inc_submitted(&self, request_type: &str) {
        self.inner
            .requests_submitted_total
            .with_label_values(&[request_type])
            .inc();
    }

    /// Count a request delivered to its caller.
    pub fn inc_completed(&self, request_type: &str, outcome: &str) {
        self.inner
            .requests_completed_total
            .with_label_values(&[request_type, outcome])
            .inc();
    }

    /// Count a scheduled retry.
    pub fn inc_retry(&self) {
        self.inner.retries_total.inc();
    }

    /// Count a connectivity transition.
    pub fn inc_connectivity_transition(&self, status: &str) {
        self.inner
            .connectivity_transitions_total
            .with_label_values(&[status])
            .inc();
    }

    /// Count an observed lifecycle event.
    pub fn inc_event(&self, kind: &str) {
        self.inner
            .events_emitted_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Set the pool depth gauge.
    pub fn set_pool_depth(&self, depth: i64) {
        self.inner.pool_depth.set(depth);
    }

    /// Current values of the health-relevant collectors.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pool_depth: self.inner.pool_depth.get(),
            retries_total: self.inner.retries_total.get(),
        }
    }

    /// Render all collectors in the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or produces invalid UTF-8.
    pub fn render(&self) -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.inner.registry.gather(), &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }
}

fn counter_vec(
    name: &'static str,
    help: &'static str,
    labels: &[&str],
) -> TelemetryResult<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::MetricsCollector { name, source })
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> TelemetryResult<()>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_render_in_text_format() -> anyhow::Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_submitted("data");
        metrics.inc_completed("data", "succeeded");
        metrics.inc_retry();
        metrics.inc_retry();
        metrics.inc_connectivity_transition("offline");
        metrics.inc_event("completed");
        metrics.set_pool_depth(3);

        let rendered = metrics.render()?;
        assert!(rendered.contains("netkit_requests_submitted_total{type=\"data\"} 1"));
        assert!(rendered.contains(
            "netkit_requests_completed_total{outcome=\"succeeded\",type=\"data\"} 1"
        ));
        assert!(rendered.contains("netkit_connectivity_transitions_total{status=\"offline\"} 1"));
        assert!(rendered.contains("netkit_pool_depth 3"));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.pool_depth, 3);
        assert_eq!(snapshot.retries_total, 2);
        Ok(())
    }

    #[test]
    fn registries_are_independent() -> anyhow::Result<()> {
        let first = Metrics::new()?;
        let second = Metrics::new()?;
        first.inc_retry();
        assert_eq!(second.snapshot().retries_total, 0);
        Ok(())
    }
}
