//! Completion recorders for asserting callback deliveries.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow};
use netkit_core::{RequestError, ResponseMeta};
use tokio::sync::watch;

/// One callback invocation.
#[derive(Debug, Clone)]
pub struct Delivery<T> {
    /// Response metadata passed to the callback.
    pub response: Option<ResponseMeta>,
    /// Delivered artifact or error kind.
    pub result: Result<T, RequestError>,
}

impl<T> Delivery<T> {
    /// Error kind when the delivery was a failure.
    #[must_use]
    pub fn error(&self) -> Option<RequestError> {
        self.result.as_ref().err().copied()
    }
}

/// Collects completion callbacks so tests can wait for and inspect them.
#[derive(Debug)]
pub struct Recorder<T> {
    deliveries: Arc<Mutex<Vec<Delivery<T>>>>,
    count: Arc<watch::Sender<usize>>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            deliveries: Arc::clone(&self.deliveries),
            count: Arc::clone(&self.count),
        }
    }
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            deliveries: Arc::new(Mutex::new(Vec::new())),
            count: Arc::new(count),
        }
    }
}

impl<T: Clone + Send + 'static> Recorder<T> {
    /// Empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Completion callback that appends to this recorder.
    #[must_use]
    pub fn callback(
        &self,
    ) -> impl FnOnce(Option<ResponseMeta>, Result<T, RequestError>) + Send + 'static {
        let recorder = self.clone();
        move |response, result| {
            recorder
                .deliveries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Delivery { response, result });
            recorder.count.send_modify(|count| *count += 1);
        }
    }

    /// Deliveries received so far.
    #[must_use]
    pub fn deliveries(&self) -> Vec<Delivery<T>> {
        self.deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of deliveries received so far.
    #[must_use]
    pub fn len(&self) -> usize {
        *self.count.borrow()
    }

    /// Whether nothing has been delivered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least `count` deliveries arrived.
    ///
    /// # Errors
    ///
    /// Returns an error when `wait` elapses first.
    pub async fn wait_for(&self, count: usize, wait: Duration) -> Result<Vec<Delivery<T>>> {
        let mut receiver = self.count.subscribe();
        tokio::time::timeout(wait, receiver.wait_for(|seen| *seen >= count))
            .await
            .map_err(|_| anyhow!("timed out waiting for {count} deliveries"))?
            .map_err(|_| anyhow!("recorder dropped"))?;
        Ok(self.deliveries())
    }

    /// Wait for the first delivery.
    ///
    /// # Errors
    ///
    /// Returns an error when `wait` elapses first.
    pub async fn first(&self, wait: Duration) -> Result<Delivery<T>> {
        self.wait_for(1, wait)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no delivery recorded"))
    }
}
