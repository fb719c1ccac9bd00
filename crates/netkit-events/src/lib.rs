#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Lifecycle event bus for NetKit.
//!
//! The bus carries a typed event enum with sequential identifiers and keeps a
//! bounded replay ring so late subscribers can catch up from a known id.
//! Internally it uses `tokio::broadcast`; when the channel overflows the oldest
//! events are dropped and slow subscribers skip ahead.

use std::collections::VecDeque;
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, Receiver, Sender};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

/// Identifier assigned to each event emitted by the bus.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Kind of transport operation a request maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    /// In-memory request/response exchange.
    Data,
    /// Request whose body is streamed from a local source.
    Upload,
    /// Request whose response is written to a file.
    Download,
}

impl RequestType {
    /// Lowercase label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Upload => "upload",
            Self::Download => "download",
        }
    }
}

impl Display for RequestType {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Lifecycle position of a tracked request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// Created but not yet handed to the dispatcher.
    #[default]
    Initiated,
    /// Admitted and waiting for the executor.
    Submitted,
    /// Transport operation in flight.
    Running,
    /// Suspended by the caller.
    Paused,
    /// Resume requested by the caller.
    Resumed,
    /// Transport reported completion without an error.
    Finished,
    /// Transport reported completion with an error.
    Failed,
    /// Cancellation requested by the caller.
    Cancelled,
}

impl RequestState {
    /// Lowercase label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Submitted => "submitted",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Resumed => "resumed",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl Display for RequestState {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Network reachability as reported by the connectivity monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityStatus {
    /// A usable network path exists.
    Available,
    /// No usable network path; requests are waiting or failing.
    Offline,
}

/// Typed lifecycle events surfaced by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A request entered the pool.
    RequestSubmitted {
        /// Caller-facing request identifier.
        request_id: Uuid,
        /// Transport operation kind.
        request_type: RequestType,
    },
    /// A request changed lifecycle state.
    StateChanged {
        /// Caller-facing request identifier.
        request_id: Uuid,
        /// New state.
        state: RequestState,
    },
    /// Transfer progress for a running request.
    Progress {
        /// Caller-facing request identifier.
        request_id: Uuid,
        /// Completed fraction in `[0, 1]`.
        fraction: f32,
    },
    /// A failed attempt was requeued.
    RetryScheduled {
        /// Caller-facing request identifier.
        request_id: Uuid,
        /// Retries left after this one.
        remaining: u32,
        /// Delay before the attempt is re-dispatched.
        delay_ms: u64,
    },
    /// A download was parked with a resume token.
    Paused {
        /// Caller-facing request identifier.
        request_id: Uuid,
    },
    /// A request completed with a success status.
    Completed {
        /// Caller-facing request identifier.
        request_id: Uuid,
        /// HTTP status delivered to the caller.
        status: u16,
    },
    /// A request failed permanently.
    Failed {
        /// Caller-facing request identifier.
        request_id: Uuid,
        /// Error kind label.
        kind: String,
        /// HTTP status when a response was received.
        status: Option<u16>,
    },
    /// Network reachability changed.
    ConnectivityChanged {
        /// New reachability status.
        status: ConnectivityStatus,
    },
    /// Set of degraded components changed.
    HealthChanged {
        /// Components currently degraded.
        degraded: Vec<String>,
    },
}

impl Event {
    /// Machine-friendly discriminator for metrics and subscribers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RequestSubmitted { .. } => "request_submitted",
            Self::StateChanged { .. } => "state_changed",
            Self::Progress { .. } => "progress",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::Paused { .. } => "paused",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::ConnectivityChanged { .. } => "connectivity_changed",
            Self::HealthChanged { .. } => "health_changed",
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    /// Sequential identifier.
    pub id: EventId,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Event payload.
    pub event: Event,
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    buffer: Arc<Mutex<VecDeque<EventEnvelope>>>,
    next_id: Arc<AtomicU64>,
    replay_capacity: usize,
}

impl EventBus {
    /// Construct a new bus with the provided broadcast capacity.
    ///
    /// The broadcast channel uses the same capacity as the replay buffer. A
    /// zero capacity is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            next_id: Arc::new(AtomicU64::new(1)),
            replay_capacity: capacity,
        }
    }

    /// Construct a bus with the default in-memory buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish a new event to the bus, assigning it a sequential identifier.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };

        {
            let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            if buffer.len() == self.replay_capacity {
                buffer.pop_front();
            }
            buffer.push_back(envelope.clone());
        }

        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe to the bus, replaying any buffered events newer than `since_id`.
    #[must_use]
    pub fn subscribe(&self, since_id: Option<EventId>) -> EventStream {
        let mut backlog = VecDeque::new();
        if let Some(since) = since_id {
            let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            backlog.extend(buffer.iter().filter(|item| item.id > since).cloned());
        }

        let receiver = self.sender.subscribe();
        EventStream { backlog, receiver }
    }

    /// Returns the last assigned identifier, if any events have been published.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.back().map(|event| event.id)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream wrapper that yields events either from the replay backlog or from the
/// live broadcast channel.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
}

impl EventStream {
    /// Receive the next event, respecting the replay backlog first.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }

        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Convert into a `Stream`, dropping any lag notifications.
    pub fn into_stream(self) -> impl Stream<Item = EventEnvelope> + Send + 'static {
        let live = BroadcastStream::new(self.receiver).filter_map(Result::ok);
        tokio_stream::iter(self.backlog).chain(live)
    }
}
