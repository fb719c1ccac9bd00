#![allow(clippy::redundant_pub_crate)]

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use netkit_core::{
    ActiveOperation, AuthResolver, ChallengeDisposition, RequestError, RequestState, RequestType,
    TaskId, Transport, TransportEvent, TransportEventSink, TransportFailure, transport_code,
};
use netkit_events::{Event, EventBus};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::container::{RequestContainer, announce_state};
use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, EngineResult};
use crate::finalizer::Finalizer;

const TRANSPORT_COMPONENT: &str = "transport";
const ARTIFACT_COMPONENT: &str = "download_dir";

/// Collaborators handed to the executor at spawn time.
pub(crate) struct ExecutorDeps {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) finalizer: Finalizer,
    pub(crate) resolver: Arc<dyn AuthResolver>,
    pub(crate) events: EventBus,
    pub(crate) download_dir: PathBuf,
    pub(crate) active_operations_timeout: Duration,
}

struct Shared {
    deps: ExecutorDeps,
    health: Mutex<BTreeSet<String>>,
    shutdown: watch::Sender<bool>,
}

/// Drives pooled requests through the transport and feeds transport events
/// back into their containers.
#[derive(Clone)]
pub struct Executor {
    shared: Arc<Shared>,
}

impl Executor {
    /// Bind the transport and start the worker consuming `queue`.
    pub(crate) fn spawn(
        deps: ExecutorDeps,
        mut queue: mpsc::Receiver<Arc<RequestContainer>>,
    ) -> Self {
        let (sink, mut transport_events) = TransportEventSink::channel();
        deps.transport.bind(sink);
        let (shutdown, mut stopped) = watch::channel(false);
        let executor = Self {
            shared: Arc::new(Shared {
                deps,
                health: Mutex::new(BTreeSet::new()),
                shutdown,
            }),
        };

        let worker = executor.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    container = queue.recv() => {
                        match container {
                            Some(container) => worker.execute(container).await,
                            None => break,
                        }
                    }
                    event = transport_events.recv() => {
                        match event {
                            Some(event) => worker.ingest(event).await,
                            None => break,
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }
            debug!("executor worker stopped");
        });
        executor
    }

    /// Cancel every operation the transport reports as active.
    ///
    /// # Errors
    ///
    /// Returns an error when listing or cancelling fails.
    pub async fn cancel_all(&self) -> EngineResult<usize> {
        let operations = self.get_all_active_operations().await?;
        for operation in &operations {
            let result = self.transport().cancel(operation.task_id).await;
            self.track("cancel_all", result)?;
        }
        info!(count = operations.len(), "cancelled active operations");
        Ok(operations.len())
    }

    /// Operations currently known to the transport.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Timeout`] when the transport does not answer in
    /// time and [`EngineError::Transport`] when it fails.
    pub async fn get_all_active_operations(&self) -> EngineResult<Vec<ActiveOperation>> {
        const OPERATION: &str = "list_active_operations";
        let timeout = self.shared.deps.active_operations_timeout;
        if let Ok(result) = tokio::time::timeout(timeout, self.transport().list_active_operations()).await {
            self.track(OPERATION, result)
        } else {
            self.mark_degraded(TRANSPORT_COMPONENT, Some("active operation listing timed out"));
            Err(EngineError::Timeout {
                operation: OPERATION,
            })
        }
    }

    /// Invalidate the transport session. With `cancel_running`, requests that
    /// hold no running operation are delivered as cancelled; running ones are
    /// cancelled by the transport and finalized through its events.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport fails to invalidate.
    pub async fn purge_session(&self, cancel_running: bool) -> EngineResult<()> {
        let result = self.transport().invalidate(cancel_running).await;
        self.track("invalidate", result)?;
        if cancel_running {
            for container in self.shared.deps.dispatcher.containers() {
                if container.task_id().is_none() {
                    self.shared
                        .deps
                        .finalizer
                        .abort(&container, RequestError::UserCancelled);
                }
            }
        }
        info!(cancel_running, "session purged");
        Ok(())
    }

    /// Stop the worker and deliver `UserCancelled` to everything still pooled.
    pub async fn shutdown(&self) {
        if let Err(error) = self.transport().invalidate(true).await {
            warn!(error = %error, "transport invalidation failed during shutdown");
        }
        self.shared.shutdown.send_replace(true);
        for container in self.shared.deps.dispatcher.clear() {
            self.shared
                .deps
                .finalizer
                .abort(&container, RequestError::UserCancelled);
        }
    }

    /// Components currently marked degraded.
    #[must_use]
    pub fn degraded(&self) -> Vec<String> {
        self.health().iter().cloned().collect()
    }

    async fn execute(&self, container: Arc<RequestContainer>) {
        let request_id = container.request_id();
        if !self.shared.deps.dispatcher.contains(request_id) {
            debug!(request_id = %request_id, "skipping request no longer pooled");
            return;
        }

        match (container.request_type(), container.state()) {
            (_, RequestState::Submitted) => self.start(&container).await,
            (_, RequestState::Cancelled) => self.cancel(&container).await,
            (RequestType::Upload | RequestType::Download, RequestState::Paused) => {
                self.pause(&container).await;
            }
            (RequestType::Upload, RequestState::Resumed) => {
                if let Some(task_id) = container.task_id() {
                    let result = self.transport().resume(task_id).await;
                    if self.track("resume", result).is_ok()
                        && container.advance_state(RequestState::Resumed, RequestState::Running)
                    {
                        announce_state(self.events(), &container);
                    }
                }
            }
            (RequestType::Upload, RequestState::Finished) => self.cancel(&container).await,
            (RequestType::Download, RequestState::Resumed) => {
                self.resume_download(&container).await;
            }
            (RequestType::Download, RequestState::Finished) => {
                self.shared
                    .deps
                    .finalizer
                    .finalize_paused_task(&container, &TransportFailure::cancelled());
            }
            (request_type, state) => {
                debug!(request_id = %request_id, ?request_type, ?state, "no action for state");
            }
        }
    }

    async fn start(&self, container: &Arc<RequestContainer>) {
        let transport = self.transport();
        let request = container.request();
        let started = match container.request_type() {
            RequestType::Data => transport.start_data(request).await,
            RequestType::Download => transport.start_download(request).await,
            RequestType::Upload => transport.start_upload(request, container.upload_body()).await,
        };
        match self.track("start", started) {
            Ok(task_id) => self.bind_task(container, task_id).await,
            Err(error) => self.fail_attempt(
                container,
                &TransportFailure::new(transport_code::UNKNOWN, error.to_string()),
            ),
        }
    }

    async fn cancel(&self, container: &Arc<RequestContainer>) {
        if let Some(task_id) = container.task_id() {
            let result = self.transport().cancel(task_id).await;
            let _ = self.track("cancel", result);
            return;
        }
        debug!(request_id = %container.request_id(), "cancelled before start");
        self.shared
            .deps
            .finalizer
            .abort(container, RequestError::UserCancelled);
    }

    async fn pause(&self, container: &Arc<RequestContainer>) {
        match container.request_type() {
            RequestType::Upload => {
                if let Some(task_id) = container.task_id() {
                    let result = self.transport().suspend(task_id).await;
                    if self.track("suspend", result).is_ok() {
                        announce_state(self.events(), container);
                    }
                }
            }
            RequestType::Download => self.request_resume_token(container),
            RequestType::Data => {}
        }
    }

    fn request_resume_token(&self, container: &Arc<RequestContainer>) {
        let Some(task_id) = container.task_id() else {
            return;
        };
        let executor = self.clone();
        let container = Arc::clone(container);
        tokio::spawn(async move {
            let result = executor.transport().request_resume_token(task_id).await;
            match executor.track("request_resume_token", result) {
                Ok(Some(token)) if container.state() == RequestState::Paused => {
                    container.store_resume_data(token);
                }
                Ok(Some(_)) => debug!(task_id = %task_id, "resume token arrived after state change"),
                Ok(None) => debug!(task_id = %task_id, "transport produced no resume token"),
                Err(_) => {}
            }
        });
    }

    async fn resume_download(&self, container: &Arc<RequestContainer>) {
        let Some(token) = container.take_resume_data() else {
            debug!(request_id = %container.request_id(), "resume requested without a token");
            return;
        };
        let result = self.transport().start_download_from_resume(&token).await;
        match self.track("start_download_from_resume", result) {
            Ok(task_id) => self.bind_task(container, task_id).await,
            Err(error) => self.fail_attempt(
                container,
                &TransportFailure::new(transport_code::CANNOT_RESUME_DOWNLOAD, error.to_string()),
            ),
        }
    }

    async fn bind_task(&self, container: &Arc<RequestContainer>, task_id: TaskId) {
        let paused = container.mark_started(task_id);
        debug!(request_id = %container.request_id(), task_id = %task_id, paused, "operation started");
        announce_state(self.events(), container);
        if paused {
            info!(request_id = %container.request_id(), "pause requested before start applied");
            self.pause(container).await;
        }
    }

    fn fail_attempt(&self, container: &Arc<RequestContainer>, failure: &TransportFailure) {
        let state = container.record_completion(None, true);
        self.shared
            .deps
            .finalizer
            .finalize(container, state, Some(failure));
    }

    async fn ingest(&self, event: TransportEvent) {
        let dispatcher = &self.shared.deps.dispatcher;
        match event {
            TransportEvent::Progress {
                task_id,
                transferred,
                total,
            } => {
                let Some(container) = dispatcher.lookup_by_task_id(task_id) else {
                    return;
                };
                let Some(total) = total.filter(|total| *total > 0) else {
                    return;
                };
                let fraction = fraction(transferred, total);
                container.report_progress(fraction);
                self.events().publish(Event::Progress {
                    request_id: container.request_id(),
                    fraction,
                });
            }
            TransportEvent::DataChunk { task_id, bytes } => {
                if let Some(container) = dispatcher.lookup_by_task_id(task_id) {
                    container.append_received(&bytes);
                }
            }
            TransportEvent::DownloadFinished { task_id, location } => {
                let Some(container) = dispatcher.lookup_by_task_id(task_id) else {
                    discard(location);
                    return;
                };
                match self.store_download(&container, &location).await {
                    Ok(path) => {
                        self.mark_recovered(ARTIFACT_COMPONENT);
                        container.set_download_path(path);
                    }
                    Err(error) => {
                        let detail = error.to_string();
                        self.mark_degraded(ARTIFACT_COMPONENT, Some(&detail));
                        discard(location);
                    }
                }
            }
            TransportEvent::Completed {
                task_id,
                response,
                error,
            } => {
                let Some(container) = dispatcher.lookup_by_task_id(task_id) else {
                    debug!(task_id = %task_id, "completion for unknown task ignored");
                    return;
                };
                // A paused download cancelled by the caller is finalized from the queue.
                if container.request_type() == RequestType::Download
                    && container.state() == RequestState::Finished
                    && error.as_ref().is_some_and(TransportFailure::is_cancelled)
                {
                    debug!(task_id = %task_id, "cancelled download awaiting finalization");
                    return;
                }
                let state = container.record_completion(response, error.is_some());
                self.shared
                    .deps
                    .finalizer
                    .finalize(&container, state, error.as_ref());
            }
            TransportEvent::AuthChallenge {
                task_id,
                challenge,
                reply,
            } => {
                let Some(container) = dispatcher.lookup_by_task_id(task_id) else {
                    let _ = reply.send(ChallengeDisposition::PerformDefaultHandling);
                    return;
                };
                let auth = container.auth().cloned();
                let resolver = Arc::clone(&self.shared.deps.resolver);
                tokio::spawn(async move {
                    let disposition = resolver.resolve(auth.as_ref(), &challenge).await;
                    let _ = reply.send(disposition);
                });
            }
        }
    }

    async fn store_download(
        &self,
        container: &RequestContainer,
        location: &Path,
    ) -> EngineResult<PathBuf> {
        let directory = &self.shared.deps.download_dir;
        tokio::fs::create_dir_all(directory)
            .await
            .map_err(|source| EngineError::Artifact {
                operation: "download.create_dir",
                path: directory.clone(),
                source,
            })?;
        let name = container
            .request()
            .url
            .path_segments()
            .and_then(Iterator::last)
            .filter(|segment| !segment.is_empty())
            .unwrap_or("download");
        let target = directory.join(format!("{}-{name}", Uuid::new_v4()));
        if tokio::fs::rename(location, &target).await.is_err() {
            tokio::fs::copy(location, &target)
                .await
                .map_err(|source| EngineError::Artifact {
                    operation: "download.copy",
                    path: target.clone(),
                    source,
                })?;
            discard(location.to_path_buf());
        }
        Ok(target)
    }

    fn track<T>(&self, operation: &'static str, result: anyhow::Result<T>) -> EngineResult<T> {
        match result {
            Ok(value) => {
                self.mark_recovered(TRANSPORT_COMPONENT);
                Ok(value)
            }
            Err(source) => {
                let detail = format!("{operation}: {source}");
                self.mark_degraded(TRANSPORT_COMPONENT, Some(&detail));
                Err(EngineError::Transport { operation, source })
            }
        }
    }

    fn mark_degraded(&self, component: &str, detail: Option<&str>) {
        let mut health = self.health();
        if health.insert(component.to_string()) {
            let degraded = health.iter().cloned().collect::<Vec<_>>();
            drop(health);
            self.events().publish(Event::HealthChanged { degraded });
            if let Some(detail) = detail {
                warn!(component = component, detail = %detail, "engine component degraded");
            } else {
                warn!(component = component, "engine component degraded");
            }
        } else if let Some(detail) = detail {
            warn!(component = component, detail = %detail, "engine component still degraded");
        }
    }

    fn mark_recovered(&self, component: &str) {
        let mut health = self.health();
        if health.remove(component) {
            let degraded = health.iter().cloned().collect::<Vec<_>>();
            drop(health);
            self.events().publish(Event::HealthChanged { degraded });
            info!(component = component, "engine component recovered");
        }
    }

    fn health(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.shared
            .health
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn transport(&self) -> &dyn Transport {
        self.shared.deps.transport.as_ref()
    }

    fn events(&self) -> &EventBus {
        &self.shared.deps.events
    }
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn fraction(transferred: u64, total: u64) -> f32 {
    (transferred as f64 / total as f64).clamp(0.0, 1.0) as f32
}

fn discard(path: PathBuf) {
    tokio::spawn(async move {
        if let Err(error) = tokio::fs::remove_file(&path).await {
            debug!(path = %path.display(), error = %error, "temporary artifact not removed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{Completion, Control, ControlOutcome, ProgressCallback};
    use crate::settings::RetrySettings;
    use anyhow::{Result, anyhow};
    use netkit_core::{
        AuthChallenge, AuthMethod, DefaultAuthResolver, HttpRequest, NullDiagnostics,
    };
    use netkit_test_support::{MemoryTransport, Recorder, ScriptedResponse, TransportCall};
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(5);

    struct Harness {
        transport: MemoryTransport,
        dispatcher: Dispatcher,
        executor: Executor,
        events: EventBus,
        downloads: TempDir,
    }

    fn harness(retry_codes: &[i64]) -> Result<Harness> {
        let transport = MemoryTransport::new();
        let (dispatcher, queue) = Dispatcher::new(16);
        let events = EventBus::with_capacity(64);
        let retry = RetrySettings {
            codes: retry_codes.iter().copied().collect(),
            max_retry: 2,
            backoff_step: Duration::from_millis(10),
            initial_backoff: Duration::ZERO,
        };
        let finalizer = Finalizer::new(
            dispatcher.clone(),
            retry,
            events.clone(),
            Arc::new(NullDiagnostics),
        );
        let downloads = TempDir::new()?;
        let executor = Executor::spawn(
            ExecutorDeps {
                transport: Arc::new(transport.clone()),
                dispatcher: dispatcher.clone(),
                finalizer,
                resolver: Arc::new(DefaultAuthResolver),
                events: events.clone(),
                download_dir: downloads.path().to_path_buf(),
                active_operations_timeout: Duration::from_secs(12),
            },
            queue,
        );
        Ok(Harness {
            transport,
            dispatcher,
            executor,
            events,
            downloads,
        })
    }

    fn submitted(container: RequestContainer) -> Arc<RequestContainer> {
        container.set_state(RequestState::Submitted);
        Arc::new(container)
    }

    fn data_request(url: &str, recorder: &Recorder<Vec<u8>>, budget: u32) -> Result<RequestContainer> {
        Ok(RequestContainer::new(
            HttpRequest::get(url, "").prepare(None)?,
            Completion::Data(Box::new(recorder.callback())),
            budget,
            Duration::ZERO,
        ))
    }

    fn download_request(url: &str, recorder: &Recorder<PathBuf>) -> Result<RequestContainer> {
        Ok(RequestContainer::new(
            HttpRequest::get(url, "").prepare(None)?,
            Completion::Download(Box::new(recorder.callback())),
            0,
            Duration::ZERO,
        ))
    }

    async fn wait_until(mut check: impl FnMut() -> bool) -> Result<()> {
        tokio::time::timeout(WAIT, async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .map_err(|_| anyhow!("condition not reached"))
    }

    #[tokio::test]
    async fn data_request_delivers_body_and_progress() -> Result<()> {
        let harness = harness(&[])?;
        let url = "https://example.test/data";
        harness.transport.script(url, ScriptedResponse::ok("hello"));
        let recorder = Recorder::new();
        let fractions = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fractions);
        let progress: ProgressCallback = Arc::new(move |fraction| {
            sink.lock().unwrap_or_else(PoisonError::into_inner).push(fraction);
        });
        let container = submitted(data_request(url, &recorder, 0)?.with_progress(Some(progress)));
        harness.dispatcher.dispatch(container).await?;

        let delivery = recorder.first(WAIT).await?;
        assert_eq!(delivery.result, Ok(b"hello".to_vec()));
        assert_eq!(delivery.response.map(|meta| meta.status.as_u16()), Some(200));
        assert_eq!(*fractions.lock().unwrap_or_else(PoisonError::into_inner), vec![1.0]);
        assert!(harness.dispatcher.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn zero_length_progress_is_skipped() -> Result<()> {
        let harness = harness(&[])?;
        let url = "https://example.test/empty";
        harness.transport.script(url, ScriptedResponse::status(204).held());
        let recorder: Recorder<Vec<u8>> = Recorder::new();
        let container = submitted(data_request(url, &recorder, 0)?);
        harness.dispatcher.dispatch(Arc::clone(&container)).await?;
        wait_until(|| container.task_id().is_some()).await?;
        let task_id = container.task_id().ok_or_else(|| anyhow!("no task"))?;

        let mut stream = harness.events.subscribe(None);
        harness.transport.emit_progress(task_id, 10, Some(0));
        harness.transport.emit_progress(task_id, 10, None);
        harness.transport.emit_progress(task_id, 5, Some(10));
        let envelope = tokio::time::timeout(WAIT, stream.next())
            .await?
            .ok_or_else(|| anyhow!("stream closed"))?;
        assert!(matches!(envelope.event, Event::Progress { fraction, .. } if (fraction - 0.5).abs() < f32::EPSILON));
        Ok(())
    }

    #[tokio::test]
    async fn retry_then_success_restarts_the_transport() -> Result<()> {
        let harness = harness(&[503])?;
        let url = "https://example.test/flaky";
        harness.transport.script(url, ScriptedResponse::status(503));
        harness.transport.script(url, ScriptedResponse::ok("ok"));
        let recorder = Recorder::new();
        harness
            .dispatcher
            .dispatch(submitted(data_request(url, &recorder, 2)?))
            .await?;

        let delivery = recorder.first(WAIT).await?;
        assert_eq!(delivery.result, Ok(b"ok".to_vec()));
        assert_eq!(harness.transport.start_count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn start_failure_is_delivered_as_unknown_and_marks_health() -> Result<()> {
        let harness = harness(&[])?;
        let url = "https://example.test/down";
        harness.transport.script(url, ScriptedResponse::ok("unused"));
        harness.transport.fail_next_starts(1);
        let recorder: Recorder<Vec<u8>> = Recorder::new();
        harness
            .dispatcher
            .dispatch(submitted(data_request(url, &recorder, 0)?))
            .await?;

        let delivery = recorder.first(WAIT).await?;
        assert_eq!(delivery.error(), Some(RequestError::Unknown));
        assert_eq!(harness.executor.degraded(), vec![TRANSPORT_COMPONENT.to_string()]);

        let recovered = Recorder::new();
        harness
            .dispatcher
            .dispatch(submitted(data_request(url, &recovered, 0)?))
            .await?;
        recovered.first(WAIT).await?;
        assert!(harness.executor.degraded().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn cancel_before_start_delivers_user_cancelled() -> Result<()> {
        let harness = harness(&[])?;
        let recorder: Recorder<Vec<u8>> = Recorder::new();
        let container = Arc::new(data_request("https://example.test/never", &recorder, 0)?);
        container.set_state(RequestState::Cancelled);
        harness.dispatcher.dispatch(container).await?;

        let delivery = recorder.first(WAIT).await?;
        assert_eq!(delivery.error(), Some(RequestError::UserCancelled));
        assert_eq!(harness.transport.start_count(), 0);
        assert!(harness.dispatcher.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn running_data_request_is_cancelled_through_transport() -> Result<()> {
        let harness = harness(&[])?;
        let url = "https://example.test/slow";
        harness.transport.script(url, ScriptedResponse::ok("late").held());
        let recorder: Recorder<Vec<u8>> = Recorder::new();
        let container = submitted(data_request(url, &recorder, 0)?);
        harness.dispatcher.dispatch(Arc::clone(&container)).await?;
        wait_until(|| container.state() == RequestState::Running).await?;

        container.set_state(RequestState::Cancelled);
        harness.dispatcher.dispatch_existing(Arc::clone(&container)).await?;
        let delivery = recorder.first(WAIT).await?;
        assert_eq!(delivery.error(), Some(RequestError::UserCancelled));
        assert!(harness.transport.calls().contains(&TransportCall::Cancel(TaskId(1))));
        Ok(())
    }

    #[tokio::test]
    async fn download_is_moved_into_download_dir() -> Result<()> {
        let harness = harness(&[])?;
        let url = "https://example.test/files/report.pdf";
        harness.transport.script(url, ScriptedResponse::ok("pdf-bytes"));
        let recorder = Recorder::new();
        harness
            .dispatcher
            .dispatch(submitted(download_request(url, &recorder)?))
            .await?;

        let path = recorder
            .first(WAIT)
            .await?
            .result
            .map_err(|error| anyhow!("download failed: {error}"))?;
        assert!(path.starts_with(harness.downloads.path()));
        let name = path.file_name().and_then(|name| name.to_str()).unwrap_or_default();
        assert!(name.ends_with("-report.pdf"));
        assert_eq!(tokio::fs::read(&path).await?, b"pdf-bytes");
        Ok(())
    }

    #[tokio::test]
    async fn download_pause_and_resume_round_trip() -> Result<()> {
        let harness = harness(&[])?;
        let url = "https://example.test/big.iso";
        harness.transport.script(url, ScriptedResponse::ok("first").held());
        harness.transport.script(url, ScriptedResponse::ok("resumed"));
        let recorder = Recorder::new();
        let container = submitted(download_request(url, &recorder)?);
        harness.dispatcher.dispatch(Arc::clone(&container)).await?;
        wait_until(|| container.state() == RequestState::Running).await?;

        container.set_state(RequestState::Paused);
        harness.dispatcher.dispatch_existing(Arc::clone(&container)).await?;
        wait_until(|| container.snapshot().has_resume_data).await?;
        wait_until(|| container.task_id().is_none()).await?;
        assert!(recorder.is_empty());
        assert!(harness.dispatcher.contains(container.request_id()));

        container.set_state(RequestState::Resumed);
        harness.dispatcher.dispatch_existing(Arc::clone(&container)).await?;
        let path = recorder
            .first(WAIT)
            .await?
            .result
            .map_err(|error| anyhow!("download failed: {error}"))?;
        assert_eq!(tokio::fs::read(&path).await?, b"resumed");
        assert!(harness.transport.calls().iter().any(|call| matches!(
            call,
            TransportCall::StartDownloadFromResume { .. }
        )));
        Ok(())
    }

    #[tokio::test]
    async fn cancelling_a_paused_download_delivers_user_cancelled() -> Result<()> {
        let harness = harness(&[])?;
        let url = "https://example.test/paused.bin";
        harness.transport.script(url, ScriptedResponse::ok("bytes").held());
        let recorder = Recorder::new();
        let container = submitted(download_request(url, &recorder)?);
        harness.dispatcher.dispatch(Arc::clone(&container)).await?;
        wait_until(|| container.state() == RequestState::Running).await?;
        container.set_state(RequestState::Paused);
        harness.dispatcher.dispatch_existing(Arc::clone(&container)).await?;
        wait_until(|| container.snapshot().has_resume_data).await?;

        container.set_state(RequestState::Finished);
        harness.dispatcher.dispatch_existing(Arc::clone(&container)).await?;
        let delivery = recorder.first(WAIT).await?;
        assert_eq!(delivery.error(), Some(RequestError::UserCancelled));
        wait_until(|| harness.dispatcher.is_empty()).await?;
        Ok(())
    }

    #[tokio::test]
    async fn pause_recorded_before_start_suspends_the_new_upload() -> Result<()> {
        let harness = harness(&[])?;
        let url = "https://example.test/early";
        harness.transport.script(url, ScriptedResponse::ok("stored").held());
        let recorder = Recorder::new();
        let container = submitted(
            RequestContainer::new(
                HttpRequest::post(url, "").prepare(None)?,
                Completion::Upload(Box::new(recorder.callback())),
                0,
                Duration::ZERO,
            )
            .with_upload_body(b"payload".to_vec()),
        );
        assert_eq!(
            container.apply_control(Control::Pause),
            ControlOutcome::Deferred
        );
        harness.dispatcher.dispatch(Arc::clone(&container)).await?;

        wait_until(|| {
            container
                .task_id()
                .is_some_and(|task_id| harness.transport.is_suspended(task_id))
        })
        .await?;
        assert_eq!(container.state(), RequestState::Paused);
        assert!(recorder.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn upload_pause_and_resume_use_suspend() -> Result<()> {
        let harness = harness(&[])?;
        let url = "https://example.test/upload";
        harness.transport.script(url, ScriptedResponse::ok("stored").held());
        let recorder = Recorder::new();
        let container = submitted(
            RequestContainer::new(
                HttpRequest::post(url, "").prepare(None)?,
                Completion::Upload(Box::new(recorder.callback())),
                0,
                Duration::ZERO,
            )
            .with_upload_body(b"payload".to_vec()),
        );
        harness.dispatcher.dispatch(Arc::clone(&container)).await?;
        wait_until(|| container.state() == RequestState::Running).await?;
        let task_id = container.task_id().ok_or_else(|| anyhow!("no task"))?;

        container.set_state(RequestState::Paused);
        harness.dispatcher.dispatch_existing(Arc::clone(&container)).await?;
        wait_until(|| harness.transport.is_suspended(task_id)).await?;

        container.set_state(RequestState::Resumed);
        harness.dispatcher.dispatch_existing(Arc::clone(&container)).await?;
        wait_until(|| container.state() == RequestState::Running).await?;
        assert!(!harness.transport.is_suspended(task_id));

        harness.transport.release(task_id)?;
        let delivery = recorder.first(WAIT).await?;
        assert_eq!(delivery.result, Ok(b"stored".to_vec()));
        assert!(harness.transport.calls().contains(&TransportCall::StartUpload {
            task_id,
            url: url.to_string(),
            body_len: 7,
        }));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_task_events_are_ignored() -> Result<()> {
        let harness = harness(&[])?;
        harness.executor.ingest(TransportEvent::Completed {
            task_id: TaskId(99),
            response: None,
            error: None,
        })
        .await;
        let (reply, answer) = tokio::sync::oneshot::channel();
        harness
            .executor
            .ingest(TransportEvent::AuthChallenge {
                task_id: TaskId(99),
                challenge: AuthChallenge {
                    method: AuthMethod::HttpBasic,
                    host: "example.test".into(),
                    previous_failure_count: 0,
                    server_certificate: None,
                },
                reply,
            })
            .await;
        assert_eq!(answer.await?, ChallengeDisposition::PerformDefaultHandling);
        Ok(())
    }

    #[tokio::test]
    async fn pool_wide_operations_reach_the_transport() -> Result<()> {
        let harness = harness(&[])?;
        let url = "https://example.test/held";
        harness.transport.script(url, ScriptedResponse::ok("x").held());
        let running: Recorder<Vec<u8>> = Recorder::new();
        let container = submitted(data_request(url, &running, 0)?);
        harness.dispatcher.dispatch(Arc::clone(&container)).await?;
        wait_until(|| container.state() == RequestState::Running).await?;

        let operations = harness.executor.get_all_active_operations().await?;
        assert_eq!(operations.len(), 1);
        assert_eq!(harness.executor.cancel_all().await?, 1);
        assert_eq!(running.first(WAIT).await?.error(), Some(RequestError::UserCancelled));

        let idle: Recorder<Vec<u8>> = Recorder::new();
        harness
            .dispatcher
            .admit(submitted(data_request("https://example.test/idle", &idle, 0)?))?;
        harness.executor.purge_session(true).await?;
        assert_eq!(idle.first(WAIT).await?.error(), Some(RequestError::UserCancelled));
        assert!(harness
            .transport
            .calls()
            .contains(&TransportCall::Invalidate { cancel_running: true }));
        Ok(())
    }

    #[tokio::test]
    async fn shutdown_cancels_pooled_requests() -> Result<()> {
        let harness = harness(&[])?;
        let recorder: Recorder<Vec<u8>> = Recorder::new();
        harness
            .dispatcher
            .admit(submitted(data_request("https://example.test/pending", &recorder, 0)?))?;
        harness.executor.shutdown().await;
        assert_eq!(recorder.first(WAIT).await?.error(), Some(RequestError::UserCancelled));
        assert!(harness.dispatcher.is_empty());
        Ok(())
    }
}
