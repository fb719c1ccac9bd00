#![allow(clippy::redundant_pub_crate)]

//! Pooled request state shared by the dispatcher, executor and finalizer.
//!
//! # Design
//! - Immutable request facts live on the container itself; everything that
//!   changes while the request runs sits behind one `RwLock` so each
//!   transition happens in a single critical section.
//! - Caller controls decide and write the next state under one write guard.
//!   A pause issued before the transport operation exists is remembered and
//!   applied by `mark_started`.
//! - The completion closure sits in its own `Mutex<Option<_>>` and is taken
//!   exactly once. The closure is only `Send`; the mutex keeps the container
//!   `Sync`.

use std::fmt::{self, Debug, Formatter};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use netkit_core::{
    AuthDetail, RequestError, RequestId, RequestState, RequestType, ResponseMeta, TaskId,
    WireRequest,
};
use netkit_events::{Event, EventBus};
use uuid::Uuid;

/// Progress observer receiving fractions in `[0, 1]`.
pub type ProgressCallback = Arc<dyn Fn(f32) + Send + Sync>;

/// Completion for data and upload requests.
pub type DataCompletion =
    Box<dyn FnOnce(Option<ResponseMeta>, Result<Vec<u8>, RequestError>) + Send>;

/// Completion for download requests.
pub type DownloadCompletion =
    Box<dyn FnOnce(Option<ResponseMeta>, Result<PathBuf, RequestError>) + Send>;

/// Typed completion; the variant fixes the request type.
pub enum Completion {
    /// In-memory exchange.
    Data(DataCompletion),
    /// Upload; delivers the response body.
    Upload(DataCompletion),
    /// Download; delivers the stored file.
    Download(DownloadCompletion),
}

impl Completion {
    /// Request type implied by the completion.
    #[must_use]
    pub const fn request_type(&self) -> RequestType {
        match self {
            Self::Data(_) => RequestType::Data,
            Self::Upload(_) => RequestType::Upload,
            Self::Download(_) => RequestType::Download,
        }
    }

    /// Invoke the closure with a success artifact or an error kind. An
    /// artifact that does not fit the completion is delivered as `Unknown`.
    pub(crate) fn deliver(
        self,
        response: Option<ResponseMeta>,
        result: Result<Artifact, RequestError>,
    ) {
        match self {
            Self::Data(callback) | Self::Upload(callback) => {
                let result = match result {
                    Ok(Artifact::Bytes(bytes)) => Ok(bytes),
                    Ok(Artifact::File(_)) => Err(RequestError::Unknown),
                    Err(error) => Err(error),
                };
                callback(response, result);
            }
            Self::Download(callback) => {
                let result = match result {
                    Ok(Artifact::File(path)) => Ok(path),
                    Ok(Artifact::Bytes(_)) => Err(RequestError::Unknown),
                    Err(error) => Err(error),
                };
                callback(response, result);
            }
        }
    }
}

impl Debug for Completion {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_tuple("Completion")
            .field(&self.request_type())
            .finish()
    }
}

/// Success payload produced by a finished request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Artifact {
    Bytes(Vec<u8>),
    File(PathBuf),
}

/// Outcome of consuming one retry from the budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryTicket {
    /// Delay before the request is re-dispatched.
    pub delay: Duration,
    /// Retries left afterwards.
    pub remaining: u32,
    /// Download artifact from the failed attempt, no longer referenced.
    pub discarded: Option<PathBuf>,
}

/// Caller-issued lifecycle change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Suspend a running upload or download.
    Pause,
    /// Continue a paused upload or download.
    Resume,
    /// Abandon the request.
    Cancel,
}

impl Control {
    /// Label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
        }
    }
}

/// Effect of a [`Control`] on a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    /// The state moved; the executor has to act on it.
    Moved(RequestState),
    /// A pause was recorded, or withdrawn, before the transport operation
    /// started.
    Deferred,
    /// Nothing applies in this state.
    Ignored(RequestState),
}

/// Point-in-time view of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSnapshot {
    /// Caller-facing identifier.
    pub request_id: RequestId,
    /// Operation kind.
    pub request_type: RequestType,
    /// Lifecycle state.
    pub state: RequestState,
    /// Current transport operation.
    pub task_id: Option<TaskId>,
    /// Retries left.
    pub retries_left: u32,
    /// Delay the next retry will use.
    pub backoff: Duration,
    /// Whether a resume token is stored.
    pub has_resume_data: bool,
}

struct ContainerState {
    task_id: Option<TaskId>,
    state: RequestState,
    received: Vec<u8>,
    download_path: Option<PathBuf>,
    resume_data: Option<Vec<u8>>,
    retries_left: u32,
    backoff: Duration,
    response: Option<ResponseMeta>,
    pending_pause: bool,
}

/// One caller request tracked from submission to its terminal callback.
pub struct RequestContainer {
    request_id: RequestId,
    request_type: RequestType,
    request: WireRequest,
    upload_body: Option<Vec<u8>>,
    auth: Option<AuthDetail>,
    progress: Option<ProgressCallback>,
    state: RwLock<ContainerState>,
    completion: Mutex<Option<Completion>>,
}

impl RequestContainer {
    /// Fresh container in the `Initiated` state with a new request id.
    #[must_use]
    pub fn new(
        request: WireRequest,
        completion: Completion,
        retry_budget: u32,
        initial_backoff: Duration,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            request_type: completion.request_type(),
            request,
            upload_body: None,
            auth: None,
            progress: None,
            state: RwLock::new(ContainerState {
                task_id: None,
                state: RequestState::Initiated,
                received: Vec::new(),
                download_path: None,
                resume_data: None,
                retries_left: retry_budget,
                backoff: initial_backoff,
                response: None,
                pending_pause: false,
            }),
            completion: Mutex::new(Some(completion)),
        }
    }

    /// Attach the bytes sent by an upload.
    #[must_use]
    pub fn with_upload_body(mut self, body: Vec<u8>) -> Self {
        self.upload_body = Some(body);
        self
    }

    /// Attach authentication settings used for challenges.
    #[must_use]
    pub fn with_auth(mut self, auth: Option<AuthDetail>) -> Self {
        self.auth = auth;
        self
    }

    /// Attach a progress observer.
    #[must_use]
    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Caller-facing identifier.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Operation kind.
    #[must_use]
    pub const fn request_type(&self) -> RequestType {
        self.request_type
    }

    /// Wire request handed to the transport.
    #[must_use]
    pub const fn request(&self) -> &WireRequest {
        &self.request
    }

    /// Upload payload.
    #[must_use]
    pub fn upload_body(&self) -> &[u8] {
        self.upload_body.as_deref().unwrap_or_default()
    }

    /// Authentication settings.
    #[must_use]
    pub const fn auth(&self) -> Option<&AuthDetail> {
        self.auth.as_ref()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RequestState {
        self.read().state
    }

    /// Overwrite the lifecycle state.
    pub fn set_state(&self, state: RequestState) {
        self.write().state = state;
    }

    /// Move from `expected` to `next`. Returns `false`, leaving the state
    /// alone, when another writer got there first.
    pub fn advance_state(&self, expected: RequestState, next: RequestState) -> bool {
        let mut state = self.write();
        if state.state != expected {
            return false;
        }
        state.state = next;
        true
    }

    /// Current transport operation.
    #[must_use]
    pub fn task_id(&self) -> Option<TaskId> {
        self.read().task_id
    }

    /// Record a freshly started transport operation and move to `Running`,
    /// or to `Paused` when a pause arrived before the start. A pause or
    /// cancel requested while the start was in flight is kept so its queued
    /// dispatch still applies. Returns `true` when a pending pause was
    /// applied; the caller then has to pause the new operation itself.
    pub fn mark_started(&self, task_id: TaskId) -> bool {
        let mut state = self.write();
        state.task_id = Some(task_id);
        state.resume_data = None;
        if !matches!(
            state.state,
            RequestState::Initiated | RequestState::Submitted | RequestState::Resumed
        ) {
            return false;
        }
        let paused = std::mem::take(&mut state.pending_pause);
        state.state = if paused {
            RequestState::Paused
        } else {
            RequestState::Running
        };
        paused
    }

    /// Apply a caller control. The current state is read and the next one
    /// written under a single write guard.
    ///
    /// Data requests cannot be paused. A pause before the transport operation
    /// exists is deferred until [`Self::mark_started`]; a resume or cancel
    /// withdraws it. Cancelling a paused transfer moves it to `Finished`,
    /// which the executor turns into a cancellation of the suspended task.
    pub fn apply_control(&self, control: Control) -> ControlOutcome {
        let mut state = self.write();
        let current = state.state;
        let next = match control {
            Control::Pause | Control::Resume if self.request_type == RequestType::Data => None,
            Control::Pause => match current {
                RequestState::Initiated | RequestState::Submitted => {
                    state.pending_pause = true;
                    return ControlOutcome::Deferred;
                }
                RequestState::Running | RequestState::Resumed => Some(RequestState::Paused),
                _ => None,
            },
            Control::Resume if state.pending_pause => {
                state.pending_pause = false;
                return ControlOutcome::Deferred;
            }
            Control::Resume => (current == RequestState::Paused).then_some(RequestState::Resumed),
            Control::Cancel => {
                state.pending_pause = false;
                match current {
                    RequestState::Finished | RequestState::Failed => None,
                    RequestState::Paused => Some(RequestState::Finished),
                    _ => Some(RequestState::Cancelled),
                }
            }
        };
        next.map_or(ControlOutcome::Ignored(current), |next| {
            state.state = next;
            ControlOutcome::Moved(next)
        })
    }

    /// Append a response body chunk.
    pub fn append_received(&self, bytes: &[u8]) {
        self.write().received.extend_from_slice(bytes);
    }

    /// Record where the finished download was stored.
    pub fn set_download_path(&self, path: PathBuf) {
        self.write().download_path = Some(path);
    }

    /// Store a resume token.
    pub fn store_resume_data(&self, resume_data: Vec<u8>) {
        self.write().resume_data = Some(resume_data);
    }

    /// Remove and return the resume token.
    pub fn take_resume_data(&self) -> Option<Vec<u8>> {
        self.write().resume_data.take()
    }

    /// Record the response and the state implied by the completion. Returns
    /// the state written, which is what the attempt is classified on.
    pub fn record_completion(&self, response: Option<ResponseMeta>, failed: bool) -> RequestState {
        let mut state = self.write();
        if response.is_some() {
            state.response = response;
        }
        state.state = if failed {
            RequestState::Failed
        } else {
            RequestState::Finished
        };
        state.state
    }

    /// Last recorded response.
    #[must_use]
    pub fn response(&self) -> Option<ResponseMeta> {
        self.read().response.clone()
    }

    /// Forward a progress fraction to the observer, if any.
    pub fn report_progress(&self, fraction: f32) {
        if let Some(progress) = &self.progress {
            progress(fraction);
        }
    }

    /// Consume one retry. Resets per-attempt state and returns the delay to
    /// wait, or `None` once the budget is exhausted.
    pub fn try_consume_retry(&self, step: Duration) -> Option<RetryTicket> {
        let mut state = self.write();
        if state.retries_left == 0 {
            return None;
        }
        state.retries_left -= 1;
        state.received.clear();
        let discarded = state.download_path.take();
        state.resume_data = None;
        state.state = RequestState::Submitted;
        state.task_id = None;
        let delay = state.backoff;
        state.backoff = state.backoff.saturating_add(step);
        Some(RetryTicket {
            delay,
            remaining: state.retries_left,
            discarded,
        })
    }

    /// Park a cancelled download with its resume token. Returns `false` when
    /// the container cannot be parked.
    pub fn park_paused(&self, resume_data: Option<Vec<u8>>) -> bool {
        if self.request_type != RequestType::Download {
            return false;
        }
        let Some(resume_data) = resume_data else {
            return false;
        };
        let mut state = self.write();
        state.resume_data = Some(resume_data);
        state.state = RequestState::Paused;
        state.task_id = None;
        true
    }

    /// Success artifact for the request type; `None` for a download that never
    /// produced a file.
    pub(crate) fn take_artifact(&self) -> Option<Artifact> {
        let mut state = self.write();
        match self.request_type {
            RequestType::Data | RequestType::Upload => {
                Some(Artifact::Bytes(std::mem::take(&mut state.received)))
            }
            RequestType::Download => state.download_path.take().map(Artifact::File),
        }
    }

    /// Take the completion closure. Returns `None` after the first call.
    pub fn take_completion(&self) -> Option<Completion> {
        self.completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Point-in-time view.
    #[must_use]
    pub fn snapshot(&self) -> ContainerSnapshot {
        let state = self.read();
        ContainerSnapshot {
            request_id: self.request_id,
            request_type: self.request_type,
            state: state.state,
            task_id: state.task_id,
            retries_left: state.retries_left,
            backoff: state.backoff,
            has_resume_data: state.resume_data.is_some(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ContainerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ContainerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Debug for RequestContainer {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        let state = self.read();
        formatter
            .debug_struct("RequestContainer")
            .field("request_id", &self.request_id)
            .field("request_type", &self.request_type)
            .field("url", &self.request.url.as_str())
            .field("state", &state.state)
            .field("task_id", &state.task_id)
            .field("retries_left", &state.retries_left)
            .finish_non_exhaustive()
    }
}

/// Publish the container's current state on the bus.
pub(crate) fn announce_state(events: &EventBus, container: &RequestContainer) {
    events.publish(Event::StateChanged {
        request_id: container.request_id(),
        state: container.state(),
    });
}
