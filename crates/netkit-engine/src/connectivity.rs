//! Reachability monitoring.
//!
//! # Design
//! - The monitor is an owned collaborator; every component that needs the
//!   probe loop registers itself as an owner and the loop runs while at least
//!   one owner remains.
//! - The probe task holds a weak reference so dropping the last monitor handle
//!   ends it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use netkit_core::Connectivity;
use netkit_events::{ConnectivityStatus, Event, EventBus};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use uuid::Uuid;

/// Reachability check polled by the monitor.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Whether the network is currently usable.
    async fn probe(&self) -> bool;
}

/// Probe that opens a TCP connection to a well-known address.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
}

impl TcpProbe {
    /// Probe `addr` (`host:port`), giving up after `timeout`.
    #[must_use]
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ConnectivityProbe for TcpProbe {
    async fn probe(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(self.addr.as_str())).await {
            Ok(Ok(_)) => true,
            Ok(Err(error)) => {
                debug!(addr = %self.addr, error = %error, "connectivity probe failed");
                false
            }
            Err(_) => {
                debug!(addr = %self.addr, "connectivity probe timed out");
                false
            }
        }
    }
}

#[derive(Default)]
struct Owners {
    ids: HashSet<Uuid>,
    task: Option<JoinHandle<()>>,
}

struct MonitorInner {
    probe: Arc<dyn ConnectivityProbe>,
    interval: Duration,
    events: EventBus,
    status: watch::Sender<bool>,
    owners: Mutex<Owners>,
}

impl MonitorInner {
    fn report(&self, reachable: bool) {
        let changed = self.status.send_if_modified(|current| {
            if *current == reachable {
                false
            } else {
                *current = reachable;
                true
            }
        });
        if changed {
            let status = if reachable {
                ConnectivityStatus::Available
            } else {
                ConnectivityStatus::Offline
            };
            info!(?status, "connectivity changed");
            self.events.publish(Event::ConnectivityChanged { status });
        }
    }
}

impl Drop for MonitorInner {
    fn drop(&mut self) {
        let owners = self.owners.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = owners.task.take() {
            task.abort();
        }
    }
}

/// Tracks reachability and publishes transitions on the event bus.
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<MonitorInner>,
}

impl NetworkMonitor {
    /// Monitor polling `probe` every `interval`. Starts out reachable.
    #[must_use]
    pub fn new(probe: Arc<dyn ConnectivityProbe>, interval: Duration, events: EventBus) -> Self {
        let (status, _) = watch::channel(true);
        Self {
            inner: Arc::new(MonitorInner {
                probe,
                interval,
                events,
                status,
                owners: Mutex::new(Owners::default()),
            }),
        }
    }

    /// Register `owner`; the first owner starts the probe loop. Returns
    /// `false` when `owner` was already registered.
    pub fn start(&self, owner: Uuid) -> bool {
        let mut owners = self.owners();
        if !owners.ids.insert(owner) {
            return false;
        }
        if owners.task.is_none() {
            owners.task = Some(spawn_probe(Arc::downgrade(&self.inner), self.inner.interval));
            debug!("connectivity probe started");
        }
        true
    }

    /// Unregister `owner`; the last owner stops the probe loop. Returns
    /// `false` when `owner` was not registered.
    pub fn stop(&self, owner: Uuid) -> bool {
        let mut owners = self.owners();
        if !owners.ids.remove(&owner) {
            return false;
        }
        if owners.ids.is_empty()
            && let Some(task) = owners.task.take()
        {
            task.abort();
            debug!("connectivity probe stopped");
        }
        true
    }

    /// Registered owners.
    #[must_use]
    pub fn owner_count(&self) -> usize {
        self.owners().ids.len()
    }

    /// Whether the probe loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.owners().task.is_some()
    }

    /// Push a reachability observation from the embedding platform.
    pub fn report(&self, reachable: bool) {
        self.inner.report(reachable);
    }

    /// Receiver following reachability.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.status.subscribe()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ConnectivityStatus {
        if self.is_connected() {
            ConnectivityStatus::Available
        } else {
            ConnectivityStatus::Offline
        }
    }

    fn owners(&self) -> std::sync::MutexGuard<'_, Owners> {
        self.inner
            .owners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Connectivity for NetworkMonitor {
    fn is_connected(&self) -> bool {
        *self.inner.status.borrow()
    }
}

fn spawn_probe(inner: Weak<MonitorInner>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(probe) = inner.upgrade().map(|inner| Arc::clone(&inner.probe)) else {
                break;
            };
            let reachable = probe.probe().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            inner.report(reachable);
        }
    })
}
