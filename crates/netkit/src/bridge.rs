#![allow(clippy::redundant_pub_crate)]

//! Event bus to Prometheus bridge.
//!
//! # Design
//! - One task subscribes to the bus and folds lifecycle events into counters.
//! - Request types are remembered from `RequestSubmitted` so terminal events
//!   can be labelled; ids are forgotten once a request completes or fails.
//! - Pool depth is sampled from the dispatcher after every event.

use std::collections::HashMap;

use netkit_engine::Dispatcher;
use netkit_events::{ConnectivityStatus, Event, EventBus, RequestType};
use netkit_telemetry::Metrics;
use tokio::task::JoinHandle;
use tracing::trace;
use uuid::Uuid;

const UNTRACKED_TYPE: &str = "unknown";

/// Spawn the bridge task. Runs until aborted.
pub(crate) fn spawn_metrics_bridge(
    events: &EventBus,
    metrics: Metrics,
    dispatcher: Dispatcher,
) -> JoinHandle<()> {
    let mut stream = events.subscribe(None);
    tokio::spawn(async move {
        let mut bridge = MetricsBridge::new(metrics, dispatcher);
        while let Some(envelope) = stream.next().await {
            bridge.observe(&envelope.event);
        }
        trace!("metrics bridge stopped");
    })
}

struct MetricsBridge {
    metrics: Metrics,
    dispatcher: Dispatcher,
    types: HashMap<Uuid, RequestType>,
}

impl MetricsBridge {
    fn new(metrics: Metrics, dispatcher: Dispatcher) -> Self {
        Self {
            metrics,
            dispatcher,
            types: HashMap::new(),
        }
    }

    fn observe(&mut self, event: &Event) {
        self.metrics.inc_event(event.kind());
        match event {
            Event::RequestSubmitted {
                request_id,
                request_type,
            } => {
                self.types.insert(*request_id, *request_type);
                self.metrics.inc_submitted(request_type.as_str());
            }
            Event::RetryScheduled { .. } => self.metrics.inc_retry(),
            Event::Completed { request_id, .. } => {
                let label = self.forget(*request_id);
                self.metrics.inc_completed(label, "succeeded");
            }
            Event::Failed {
                request_id, kind, ..
            } => {
                let label = self.forget(*request_id);
                self.metrics.inc_completed(label, kind);
            }
            Event::ConnectivityChanged { status } => {
                self.metrics
                    .inc_connectivity_transition(connectivity_label(*status));
            }
            Event::StateChanged { .. }
            | Event::Progress { .. }
            | Event::Paused { .. }
            | Event::HealthChanged { .. } => {}
        }
        self.metrics
            .set_pool_depth(i64::try_from(self.dispatcher.len()).unwrap_or(i64::MAX));
    }

    fn forget(&mut self, request_id: Uuid) -> &'static str {
        self.types
            .remove(&request_id)
            .map_or(UNTRACKED_TYPE, RequestType::as_str)
    }
}

const fn connectivity_label(status: ConnectivityStatus) -> &'static str {
    match status {
        ConnectivityStatus::Available => "available",
        ConnectivityStatus::Offline => "offline",
    }
}
