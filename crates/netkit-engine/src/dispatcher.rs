//! Request pool and the FIFO queue feeding the executor worker.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use netkit_core::{RequestId, TaskId};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::container::RequestContainer;
use crate::error::{EngineError, EngineResult};

/// Admits containers to the pool and hands them to the executor in order.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    pool: Arc<RwLock<Vec<Arc<RequestContainer>>>>,
    queue: mpsc::Sender<Arc<RequestContainer>>,
}

impl Dispatcher {
    /// Create a dispatcher and the receiving end consumed by the executor.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Arc<RequestContainer>>) {
        let (queue, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                pool: Arc::new(RwLock::new(Vec::new())),
                queue,
            },
            receiver,
        )
    }

    /// Add a container to the pool without enqueuing it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateRequest`] when the request id is
    /// already pooled.
    pub fn admit(&self, container: Arc<RequestContainer>) -> EngineResult<()> {
        let mut pool = self.pool.write().unwrap_or_else(PoisonError::into_inner);
        let request_id = container.request_id();
        if pool.iter().any(|pooled| pooled.request_id() == request_id) {
            return Err(EngineError::DuplicateRequest { request_id });
        }
        pool.push(container);
        Ok(())
    }

    /// Admit a container, then enqueue it for execution.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateRequest`] for pooled ids and
    /// [`EngineError::QueueClosed`] once the executor stopped.
    pub async fn dispatch(&self, container: Arc<RequestContainer>) -> EngineResult<()> {
        self.admit(Arc::clone(&container))?;
        debug!(request_id = %container.request_id(), "request admitted");
        self.enqueue(container, "dispatch").await
    }

    /// Enqueue a pooled container again after a state change.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::QueueClosed`] once the executor stopped.
    pub async fn dispatch_existing(&self, container: Arc<RequestContainer>) -> EngineResult<()> {
        self.enqueue(container, "dispatch_existing").await
    }

    /// Re-dispatch `container` after `delay` unless it left the pool meanwhile.
    pub fn schedule_retry(&self, container: Arc<RequestContainer>, delay: Duration) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let request_id = container.request_id();
            if !dispatcher.contains(request_id) {
                debug!(request_id = %request_id, "retry dropped; request left the pool");
                return;
            }
            if let Err(error) = dispatcher.enqueue(container, "schedule_retry").await {
                warn!(request_id = %request_id, error = %error, "retry could not be enqueued");
            }
        });
    }

    /// First pooled container with `request_id`.
    #[must_use]
    pub fn lookup_by_request_id(&self, request_id: RequestId) -> Option<Arc<RequestContainer>> {
        self.find(|container| container.request_id() == request_id)
    }

    /// First pooled container currently bound to `task_id`.
    #[must_use]
    pub fn lookup_by_task_id(&self, task_id: TaskId) -> Option<Arc<RequestContainer>> {
        self.find(|container| container.task_id() == Some(task_id))
    }

    /// Whether `request_id` is pooled.
    #[must_use]
    pub fn contains(&self, request_id: RequestId) -> bool {
        self.lookup_by_request_id(request_id).is_some()
    }

    /// Remove `request_id` from the pool. Missing ids are ignored.
    pub fn remove(&self, request_id: RequestId) -> Option<Arc<RequestContainer>> {
        let mut pool = self.pool.write().unwrap_or_else(PoisonError::into_inner);
        let index = pool
            .iter()
            .position(|container| container.request_id() == request_id)?;
        Some(pool.remove(index))
    }

    /// Number of pooled requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pool.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the pool is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of pooled containers in admission order.
    #[must_use]
    pub fn containers(&self) -> Vec<Arc<RequestContainer>> {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Empty the pool, returning what it held.
    pub fn clear(&self) -> Vec<Arc<RequestContainer>> {
        std::mem::take(&mut *self.pool.write().unwrap_or_else(PoisonError::into_inner))
    }

    async fn enqueue(
        &self,
        container: Arc<RequestContainer>,
        operation: &'static str,
    ) -> EngineResult<()> {
        self.queue
            .send(container)
            .await
            .map_err(|_| EngineError::QueueClosed { operation })
    }

    fn find(
        &self,
        predicate: impl Fn(&RequestContainer) -> bool,
    ) -> Option<Arc<RequestContainer>> {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|container| predicate(container))
            .cloned()
    }
}
