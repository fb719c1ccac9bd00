//! Scriptable in-memory transport.
//!
//! Responses are queued per URL. Each start call consumes the front of the
//! queue; the last entry is sticky so a single script serves every attempt.
//! Events are emitted from spawned tasks, mirroring a real transport that
//! reports on its own schedule.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use http::{HeaderName, HeaderValue, StatusCode};
use netkit_core::{
    ActiveOperation, AuthChallenge, ChallengeDisposition, RequestType, ResponseMeta, TaskId,
    Transport, TransportEvent, TransportEventSink, TransportFailure, WireRequest,
};
use tracing::debug;
use uuid::Uuid;

const RESUME_PREFIX: &str = "memory-resume:";

/// One scripted outcome for a URL.
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    status: Option<StatusCode>,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Vec<u8>,
    error: Option<i64>,
    held: bool,
    challenge: Option<AuthChallenge>,
}

impl ScriptedResponse {
    /// Response with `status` and an empty body.
    #[must_use]
    pub fn status(status: u16) -> Self {
        Self {
            status: Some(StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)),
            headers: Vec::new(),
            body: Vec::new(),
            error: None,
            held: false,
            challenge: None,
        }
    }

    /// `200 OK` with `body`.
    #[must_use]
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::status(200).body(body)
    }

    /// Transport failure with `code` and no response.
    #[must_use]
    pub fn failure(code: i64) -> Self {
        Self {
            status: None,
            headers: Vec::new(),
            body: Vec::new(),
            error: Some(code),
            held: false,
            challenge: None,
        }
    }

    /// Replace the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Add a response header. Invalid pairs are ignored.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.push((name, value));
        }
        self
    }

    /// Keep the task running until it is cancelled, paused or released.
    #[must_use]
    pub fn held(mut self) -> Self {
        self.held = true;
        self
    }

    /// Raise `challenge` before delivering the response. A `Cancel`
    /// disposition completes the task as cancelled.
    #[must_use]
    pub fn challenge(mut self, challenge: AuthChallenge) -> Self {
        self.challenge = Some(challenge);
        self
    }
}

/// Call observed by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    /// `start_data`.
    StartData {
        /// Assigned task.
        task_id: TaskId,
        /// Request URL.
        url: String,
    },
    /// `start_download`.
    StartDownload {
        /// Assigned task.
        task_id: TaskId,
        /// Request URL.
        url: String,
    },
    /// `start_download_from_resume`.
    StartDownloadFromResume {
        /// Assigned task.
        task_id: TaskId,
        /// URL recovered from the token.
        url: String,
    },
    /// `start_upload`.
    StartUpload {
        /// Assigned task.
        task_id: TaskId,
        /// Request URL.
        url: String,
        /// Uploaded byte count.
        body_len: usize,
    },
    /// `cancel`.
    Cancel(TaskId),
    /// `suspend`.
    Suspend(TaskId),
    /// `resume`.
    Resume(TaskId),
    /// `request_resume_token`.
    RequestResumeToken(TaskId),
    /// `invalidate`.
    Invalidate {
        /// Whether running tasks were cancelled.
        cancel_running: bool,
    },
}

#[derive(Debug, Clone)]
struct ActiveTask {
    url: String,
    request_type: RequestType,
    script: ScriptedResponse,
    suspended: bool,
}

#[derive(Default)]
struct Inner {
    sink: Mutex<Option<TransportEventSink>>,
    scripts: Mutex<HashMap<String, VecDeque<ScriptedResponse>>>,
    active: Mutex<HashMap<TaskId, ActiveTask>>,
    calls: Mutex<Vec<TransportCall>>,
    requests: Mutex<Vec<WireRequest>>,
    next_task: AtomicU64,
    failing_starts: AtomicUsize,
}

/// In-memory [`Transport`] driven by scripted responses.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

impl MemoryTransport {
    /// Transport with no scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `response` for `url`.
    pub fn script(&self, url: &str, response: ScriptedResponse) {
        lock(&self.inner.scripts)
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    /// Make the next `count` start calls fail.
    pub fn fail_next_starts(&self, count: usize) {
        self.inner.failing_starts.store(count, Ordering::SeqCst);
    }

    /// Every call observed so far.
    #[must_use]
    pub fn calls(&self) -> Vec<TransportCall> {
        lock(&self.inner.calls).clone()
    }

    /// Number of start calls (any kind) observed so far.
    #[must_use]
    pub fn start_count(&self) -> usize {
        lock(&self.inner.calls)
            .iter()
            .filter(|call| {
                matches!(
                    call,
                    TransportCall::StartData { .. }
                        | TransportCall::StartDownload { .. }
                        | TransportCall::StartDownloadFromResume { .. }
                        | TransportCall::StartUpload { .. }
                )
            })
            .count()
    }

    /// Wire requests received by start calls, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<WireRequest> {
        lock(&self.inner.requests).clone()
    }

    /// Whether `task_id` is currently suspended.
    #[must_use]
    pub fn is_suspended(&self, task_id: TaskId) -> bool {
        lock(&self.inner.active)
            .get(&task_id)
            .is_some_and(|task| task.suspended)
    }

    /// Deliver the scripted response of a held task.
    ///
    /// # Errors
    ///
    /// Returns an error when the task is unknown.
    pub fn release(&self, task_id: TaskId) -> Result<()> {
        let task = lock(&self.inner.active)
            .get(&task_id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown task {task_id}"))?;
        self.deliver(task_id, task);
        Ok(())
    }

    /// Emit a progress event for a running task.
    pub fn emit_progress(&self, task_id: TaskId, transferred: u64, total: Option<u64>) {
        self.emit(TransportEvent::Progress {
            task_id,
            transferred,
            total,
        });
    }

    fn emit(&self, event: TransportEvent) {
        let sink = lock(&self.inner.sink).clone();
        if let Some(sink) = sink {
            sink.emit(event);
        }
    }

    fn record(&self, call: TransportCall) {
        lock(&self.inner.calls).push(call);
    }

    fn start(
        &self,
        url: &str,
        request_type: RequestType,
        request: Option<&WireRequest>,
    ) -> Result<(TaskId, ActiveTask)> {
        if let Some(request) = request {
            lock(&self.inner.requests).push(request.clone());
        }
        let failing = self
            .inner
            .failing_starts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if failing.is_ok() {
            bail!("scripted start failure for {url}");
        }
        let script = self
            .next_script(url)
            .ok_or_else(|| anyhow!("no scripted response for {url}"))?;
        let task_id = TaskId(self.inner.next_task.fetch_add(1, Ordering::SeqCst) + 1);
        let task = ActiveTask {
            url: url.to_string(),
            request_type,
            script,
            suspended: false,
        };
        lock(&self.inner.active).insert(task_id, task.clone());
        Ok((task_id, task))
    }

    fn next_script(&self, url: &str) -> Option<ScriptedResponse> {
        let mut scripts = lock(&self.inner.scripts);
        let queue = scripts.get_mut(url)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    fn launch(&self, task_id: TaskId, task: ActiveTask) {
        if !task.script.held {
            self.deliver(task_id, task);
        }
    }

    fn deliver(&self, task_id: TaskId, task: ActiveTask) {
        let transport = self.clone();
        tokio::spawn(async move {
            transport.run(task_id, task).await;
        });
    }

    async fn run(&self, task_id: TaskId, task: ActiveTask) {
        let sink = lock(&self.inner.sink).clone();
        let Some(sink) = sink else {
            return;
        };
        let script = task.script;

        if let Some(challenge) = script.challenge.clone() {
            let disposition = sink.challenge(task_id, challenge).await;
            debug!(task_id = %task_id, ?disposition, "challenge answered");
            if disposition == ChallengeDisposition::Cancel {
                if lock(&self.inner.active).remove(&task_id).is_some() {
                    sink.emit(TransportEvent::Completed {
                        task_id,
                        response: None,
                        error: Some(TransportFailure::cancelled()),
                    });
                }
                return;
            }
        }

        if !lock(&self.inner.active).contains_key(&task_id) {
            return;
        }

        let total = u64::try_from(script.body.len()).unwrap_or(u64::MAX);
        if script.error.is_none() {
            sink.emit(TransportEvent::Progress {
                task_id,
                transferred: total,
                total: Some(total),
            });
            match task.request_type {
                RequestType::Download => {
                    let location = std::env::temp_dir()
                        .join(format!("netkit-memory-{}.part", Uuid::new_v4()));
                    if tokio::fs::write(&location, &script.body).await.is_ok() {
                        sink.emit(TransportEvent::DownloadFinished { task_id, location });
                    }
                }
                RequestType::Data | RequestType::Upload => {
                    if !script.body.is_empty() {
                        sink.emit(TransportEvent::DataChunk {
                            task_id,
                            bytes: script.body.clone(),
                        });
                    }
                }
            }
        }

        if lock(&self.inner.active).remove(&task_id).is_none() {
            return;
        }
        let response = script.status.map(|status| {
            let mut meta = ResponseMeta::new(status);
            for (name, value) in &script.headers {
                meta.headers.append(name.clone(), value.clone());
            }
            meta
        });
        let error = script
            .error
            .map(|code| TransportFailure::new(code, format!("scripted failure {code}")));
        sink.emit(TransportEvent::Completed {
            task_id,
            response,
            error,
        });
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn bind(&self, sink: TransportEventSink) {
        *lock(&self.inner.sink) = Some(sink);
    }

    async fn start_data(&self, request: &WireRequest) -> Result<TaskId> {
        let url = request.url.to_string();
        let (task_id, task) = self.start(&url, RequestType::Data, Some(request))?;
        self.record(TransportCall::StartData { task_id, url });
        self.launch(task_id, task);
        Ok(task_id)
    }

    async fn start_download(&self, request: &WireRequest) -> Result<TaskId> {
        let url = request.url.to_string();
        let (task_id, task) = self.start(&url, RequestType::Download, Some(request))?;
        self.record(TransportCall::StartDownload { task_id, url });
        self.launch(task_id, task);
        Ok(task_id)
    }

    async fn start_download_from_resume(&self, resume_data: &[u8]) -> Result<TaskId> {
        let token = String::from_utf8_lossy(resume_data);
        let url = token
            .strip_prefix(RESUME_PREFIX)
            .ok_or_else(|| anyhow!("unrecognised resume token"))?
            .to_string();
        let (task_id, task) = self.start(&url, RequestType::Download, None)?;
        self.record(TransportCall::StartDownloadFromResume { task_id, url });
        self.launch(task_id, task);
        Ok(task_id)
    }

    async fn start_upload(&self, request: &WireRequest, body: &[u8]) -> Result<TaskId> {
        let url = request.url.to_string();
        let (task_id, task) = self.start(&url, RequestType::Upload, Some(request))?;
        self.record(TransportCall::StartUpload {
            task_id,
            url,
            body_len: body.len(),
        });
        self.launch(task_id, task);
        Ok(task_id)
    }

    async fn cancel(&self, task_id: TaskId) -> Result<()> {
        self.record(TransportCall::Cancel(task_id));
        if lock(&self.inner.active).remove(&task_id).is_some() {
            self.emit(TransportEvent::Completed {
                task_id,
                response: None,
                error: Some(TransportFailure::cancelled()),
            });
        }
        Ok(())
    }

    async fn suspend(&self, task_id: TaskId) -> Result<()> {
        self.record(TransportCall::Suspend(task_id));
        let mut active = lock(&self.inner.active);
        let task = active
            .get_mut(&task_id)
            .ok_or_else(|| anyhow!("unknown task {task_id}"))?;
        task.suspended = true;
        Ok(())
    }

    async fn resume(&self, task_id: TaskId) -> Result<()> {
        self.record(TransportCall::Resume(task_id));
        let mut active = lock(&self.inner.active);
        let task = active
            .get_mut(&task_id)
            .ok_or_else(|| anyhow!("unknown task {task_id}"))?;
        task.suspended = false;
        Ok(())
    }

    async fn request_resume_token(&self, task_id: TaskId) -> Result<Option<Vec<u8>>> {
        self.record(TransportCall::RequestResumeToken(task_id));
        let Some(task) = lock(&self.inner.active).remove(&task_id) else {
            return Ok(None);
        };
        if task.request_type != RequestType::Download {
            return Ok(None);
        }
        let token = format!("{RESUME_PREFIX}{}", task.url).into_bytes();
        self.emit(TransportEvent::Completed {
            task_id,
            response: None,
            error: Some(TransportFailure::cancelled().with_resume_data(token.clone())),
        });
        Ok(Some(token))
    }

    async fn list_active_operations(&self) -> Result<Vec<ActiveOperation>> {
        let mut operations: Vec<ActiveOperation> = lock(&self.inner.active)
            .iter()
            .map(|(task_id, task)| ActiveOperation {
                task_id: *task_id,
                request_type: task.request_type,
            })
            .collect();
        operations.sort_by_key(|operation| operation.task_id);
        Ok(operations)
    }

    async fn invalidate(&self, cancel_running: bool) -> Result<()> {
        self.record(TransportCall::Invalidate { cancel_running });
        if cancel_running {
            for operation in self.list_active_operations().await? {
                self.cancel(operation.task_id).await?;
            }
        }
        Ok(())
    }
}

/// Whether `path` is a temporary download artifact written by [`MemoryTransport`].
#[must_use]
pub fn is_memory_artifact(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("netkit-memory-"))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
