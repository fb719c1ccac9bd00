#![allow(clippy::redundant_pub_crate)]

//! Caller-facing submission surface.
//!
//! Requests are validated and encoded here; anything that cannot be built is
//! answered synchronously and never reaches the pool.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue};
use netkit_core::{
    BodyEncryptor, Connectivity, HttpRequest, MultipartBody, RequestError, RequestId,
    RequestState, ResponseMeta, WireRequest,
};
use netkit_events::{Event, EventBus};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::container::{
    Completion, Control, ControlOutcome, ProgressCallback, RequestContainer, announce_state,
};
use crate::dispatcher::Dispatcher;
use crate::error::EngineError;
use crate::finalizer::Finalizer;

/// Poll interval while a submission waits for connectivity.
const CONNECTIVITY_POLL: Duration = Duration::from_millis(250);

/// Bytes sent by an upload.
#[derive(Debug, Clone)]
pub enum UploadSource {
    /// Read from a file at submission time.
    File(PathBuf),
    /// In-memory payload.
    Bytes(Vec<u8>),
    /// Multipart form; sets the request's content type.
    Multipart(MultipartBody),
}

#[derive(Debug, Clone)]
pub(crate) struct MakerSettings {
    pub(crate) common_headers: HeaderMap,
    pub(crate) waits_for_connectivity: bool,
    pub(crate) connectivity_timeout: Duration,
    pub(crate) max_retry: u32,
    pub(crate) initial_backoff: Duration,
}

/// Builds containers from request descriptions and hands them to the
/// dispatcher.
#[derive(Clone)]
pub struct RequestMaker {
    dispatcher: Dispatcher,
    finalizer: Finalizer,
    events: EventBus,
    settings: MakerSettings,
    connectivity: Option<Arc<dyn Connectivity>>,
    encryptor: Option<Arc<dyn BodyEncryptor>>,
}

impl RequestMaker {
    pub(crate) fn new(
        dispatcher: Dispatcher,
        finalizer: Finalizer,
        events: EventBus,
        settings: MakerSettings,
        connectivity: Option<Arc<dyn Connectivity>>,
        encryptor: Option<Arc<dyn BodyEncryptor>>,
    ) -> Self {
        Self {
            dispatcher,
            finalizer,
            events,
            settings,
            connectivity,
            encryptor,
        }
    }

    /// Submit an in-memory exchange. Returns the request id, or `None` when
    /// the completion already fired.
    pub async fn data_request<F>(
        &self,
        request: &HttpRequest,
        completion: F,
        progress: Option<ProgressCallback>,
    ) -> Option<RequestId>
    where
        F: FnOnce(Option<ResponseMeta>, Result<Vec<u8>, RequestError>) + Send + 'static,
    {
        let wire = match self.prepare(request) {
            Ok(wire) => wire,
            Err(error) => {
                completion(None, Err(error));
                return None;
            }
        };
        let container = self.container(request, wire, Completion::Data(Box::new(completion)));
        self.submit(container.with_progress(progress)).await
    }

    /// Submit a download delivered as a file in the download directory.
    pub async fn download_request<F>(
        &self,
        request: &HttpRequest,
        completion: F,
        progress: Option<ProgressCallback>,
    ) -> Option<RequestId>
    where
        F: FnOnce(Option<ResponseMeta>, Result<PathBuf, RequestError>) + Send + 'static,
    {
        let wire = match self.prepare(request) {
            Ok(wire) => wire,
            Err(error) => {
                completion(None, Err(error));
                return None;
            }
        };
        let container = self.container(request, wire, Completion::Download(Box::new(completion)));
        self.submit(container.with_progress(progress)).await
    }

    /// Submit an upload of `source`.
    pub async fn upload_request<F>(
        &self,
        request: &HttpRequest,
        source: UploadSource,
        completion: F,
        progress: Option<ProgressCallback>,
    ) -> Option<RequestId>
    where
        F: FnOnce(Option<ResponseMeta>, Result<Vec<u8>, RequestError>) + Send + 'static,
    {
        let prepared = match self.prepare(request) {
            Ok(wire) => upload_body(wire, source).await,
            Err(error) => Err(error),
        };
        let (wire, body) = match prepared {
            Ok(prepared) => prepared,
            Err(error) => {
                completion(None, Err(error));
                return None;
            }
        };
        let container = self
            .container(request, wire, Completion::Upload(Box::new(completion)))
            .with_upload_body(body);
        self.submit(container.with_progress(progress)).await
    }

    /// Pause a running upload or download. A pause issued before the
    /// transport operation starts is applied once it does. Data requests are
    /// left running. Returns whether the request is pooled.
    pub async fn pause(&self, request_id: RequestId) -> bool {
        self.control(request_id, Control::Pause).await
    }

    /// Resume a paused upload or download. Returns whether the request is
    /// pooled.
    pub async fn resume(&self, request_id: RequestId) -> bool {
        self.control(request_id, Control::Resume).await
    }

    /// Cancel a request. Paused transfers move to finished, which the
    /// executor turns into a cancellation. Returns whether the request is
    /// pooled.
    pub async fn cancel(&self, request_id: RequestId) -> bool {
        self.control(request_id, Control::Cancel).await
    }

    async fn control(&self, request_id: RequestId, control: Control) -> bool {
        let operation = control.as_str();
        let Some(container) = self.dispatcher.lookup_by_request_id(request_id) else {
            debug!(request_id = %request_id, operation, "request not pooled");
            return false;
        };
        match container.apply_control(control) {
            ControlOutcome::Moved(_) => {
                announce_state(&self.events, &container);
                if let Err(error) = self.dispatcher.dispatch_existing(container).await {
                    warn!(request_id = %request_id, operation, error = %error, "state change not dispatched");
                }
            }
            ControlOutcome::Deferred => {
                debug!(request_id = %request_id, operation, "applied when the transport operation starts");
            }
            ControlOutcome::Ignored(current) => {
                debug!(request_id = %request_id, operation, ?current, "transition not applicable");
            }
        }
        true
    }

    fn prepare(&self, request: &HttpRequest) -> Result<WireRequest, RequestError> {
        let mut wire = request.prepare(self.encryptor.as_deref()).map_err(|error| {
            warn!(
                url = %format!("{}{}", request.base_url, request.path),
                error = %error,
                "request could not be built"
            );
            error.kind()
        })?;
        wire.apply_default_headers(&self.settings.common_headers);
        if !self.settings.waits_for_connectivity && !self.is_connected() {
            info!(url = %wire.url, "offline; request rejected");
            return Err(RequestError::NotConnectedToInternet);
        }
        Ok(wire)
    }

    fn container(
        &self,
        request: &HttpRequest,
        wire: WireRequest,
        completion: Completion,
    ) -> RequestContainer {
        RequestContainer::new(
            wire,
            completion,
            request.max_retry.unwrap_or(self.settings.max_retry),
            self.settings.initial_backoff,
        )
        .with_auth(request.auth.clone())
    }

    async fn submit(&self, container: RequestContainer) -> Option<RequestId> {
        let container = Arc::new(container);
        let request_id = container.request_id();
        container.set_state(RequestState::Submitted);
        self.events.publish(Event::RequestSubmitted {
            request_id,
            request_type: container.request_type(),
        });

        let queued = if self.is_connected() {
            self.dispatcher.dispatch(Arc::clone(&container)).await
        } else {
            self.dispatcher
                .admit(Arc::clone(&container))
                .map(|()| self.hold_until_connected(Arc::clone(&container)))
        };
        match queued {
            Ok(()) => {
                debug!(request_id = %request_id, request_type = ?container.request_type(), "request submitted");
                Some(request_id)
            }
            Err(error) => {
                warn!(request_id = %request_id, error = %error, "request could not be dispatched");
                if matches!(error, EngineError::QueueClosed { .. }) {
                    self.finalizer.abort(&container, RequestError::Unknown);
                } else if let Some(completion) = container.take_completion() {
                    completion.deliver(None, Err(RequestError::Unknown));
                }
                None
            }
        }
    }

    fn hold_until_connected(&self, container: Arc<RequestContainer>) {
        let maker = self.clone();
        let deadline = Instant::now() + self.settings.connectivity_timeout;
        info!(request_id = %container.request_id(), "waiting for connectivity");
        tokio::spawn(async move {
            let request_id = container.request_id();
            loop {
                if !maker.dispatcher.contains(request_id) {
                    return;
                }
                if maker.is_connected() {
                    if let Err(error) = maker.dispatcher.dispatch_existing(container).await {
                        warn!(request_id = %request_id, error = %error, "held request not dispatched");
                    }
                    return;
                }
                if Instant::now() >= deadline {
                    maker
                        .finalizer
                        .abort(&container, RequestError::NotConnectedToInternet);
                    return;
                }
                tokio::time::sleep(CONNECTIVITY_POLL).await;
            }
        });
    }

    fn is_connected(&self) -> bool {
        self.connectivity
            .as_ref()
            .is_none_or(|connectivity| connectivity.is_connected())
    }
}

async fn upload_body(
    mut wire: WireRequest,
    source: UploadSource,
) -> Result<(WireRequest, Vec<u8>), RequestError> {
    let body = match source {
        UploadSource::Bytes(bytes) => bytes,
        UploadSource::File(path) => tokio::fs::read(&path).await.map_err(|error| {
            warn!(path = %path.display(), error = %error, "upload source unreadable");
            RequestError::ClientError
        })?,
        UploadSource::Multipart(form) => {
            let content_type = HeaderValue::from_str(&form.content_type())
                .map_err(|_| RequestError::ClientError)?;
            wire.headers.insert(CONTENT_TYPE, content_type);
            form.encode()
        }
    };
    Ok((wire, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{EngineSettings, RetrySettings};
    use crate::{Engine, EngineBuilder};
    use anyhow::{Result, anyhow};
    use netkit_core::{BodyEncoding, BodyEncryption};
    use netkit_test_support::object;
    use serde_json::json;
    use netkit_test_support::{
        MemoryTransport, Recorder, ScriptedResponse, ToggleConnectivity, TransportCall,
    };
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(5);

    fn engine(
        transport: &MemoryTransport,
        connectivity: Option<ToggleConnectivity>,
        waits: bool,
        downloads: &TempDir,
    ) -> Engine {
        let mut common_headers = HeaderMap::new();
        common_headers.insert("x-client", HeaderValue::from_static("netkit"));
        let settings = EngineSettings {
            retry: RetrySettings::default(),
            download_dir: downloads.path().to_path_buf(),
            common_headers,
            waits_for_connectivity: waits,
            connectivity_timeout: Duration::from_secs(2),
            ..EngineSettings::default()
        };
        let mut builder = EngineBuilder::new(settings, Arc::new(transport.clone()), EventBus::new());
        if let Some(connectivity) = connectivity {
            builder = builder.connectivity(Arc::new(connectivity) as Arc<dyn Connectivity>);
        }
        builder.build()
    }

    #[tokio::test]
    async fn unbuildable_request_fails_synchronously() -> Result<()> {
        let downloads = TempDir::new()?;
        let transport = MemoryTransport::new();
        let engine = engine(&transport, None, false, &downloads);
        let recorder: Recorder<Vec<u8>> = Recorder::new();

        let id = engine
            .maker()
            .data_request(&HttpRequest::get("not a url", "/x"), recorder.callback(), None)
            .await;
        assert!(id.is_none());
        assert_eq!(recorder.deliveries()[0].error(), Some(RequestError::ClientError));
        assert!(engine.dispatcher().is_empty());

        let encrypted = HttpRequest::post("https://example.test", "/secure")
            .body(object(json!({"a": 1})), BodyEncoding::Json)
            .encryption(BodyEncryption::Aes256 {
                key: "k".repeat(32),
                iv: "i".repeat(16),
            });
        let sealed: Recorder<Vec<u8>> = Recorder::new();
        assert!(engine
            .maker()
            .data_request(&encrypted, sealed.callback(), None)
            .await
            .is_none());
        assert_eq!(sealed.deliveries()[0].error(), Some(RequestError::ClientError));
        Ok(())
    }

    #[tokio::test]
    async fn offline_gate_rejects_without_pooling() -> Result<()> {
        let downloads = TempDir::new()?;
        let transport = MemoryTransport::new();
        let engine = engine(&transport, Some(ToggleConnectivity::new(false)), false, &downloads);
        let recorder: Recorder<PathBuf> = Recorder::new();

        let id = engine
            .maker()
            .download_request(&HttpRequest::get("https://example.test", "/f"), recorder.callback(), None)
            .await;
        assert!(id.is_none());
        assert_eq!(
            recorder.deliveries()[0].error(),
            Some(RequestError::NotConnectedToInternet)
        );
        assert_eq!(transport.start_count(), 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_submission_starts_once_online() -> Result<()> {
        let downloads = TempDir::new()?;
        let transport = MemoryTransport::new();
        transport.script("https://example.test/later", ScriptedResponse::ok("late"));
        let connectivity = ToggleConnectivity::new(false);
        let engine = engine(&transport, Some(connectivity.clone()), true, &downloads);
        let recorder = Recorder::new();

        let id = engine
            .maker()
            .data_request(&HttpRequest::get("https://example.test", "/later"), recorder.callback(), None)
            .await
            .ok_or_else(|| anyhow!("request rejected"))?;
        assert!(engine.dispatcher().contains(id));
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(transport.start_count(), 0);

        connectivity.set(true);
        let delivery = recorder.first(WAIT).await?;
        assert_eq!(delivery.result, Ok(b"late".to_vec()));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_submission_times_out() -> Result<()> {
        let downloads = TempDir::new()?;
        let transport = MemoryTransport::new();
        let engine = engine(&transport, Some(ToggleConnectivity::new(false)), true, &downloads);
        let recorder: Recorder<Vec<u8>> = Recorder::new();

        engine
            .maker()
            .data_request(&HttpRequest::get("https://example.test", "/never"), recorder.callback(), None)
            .await
            .ok_or_else(|| anyhow!("request rejected"))?;
        let delivery = recorder.first(WAIT).await?;
        assert_eq!(delivery.error(), Some(RequestError::NotConnectedToInternet));
        assert!(engine.dispatcher().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn common_headers_do_not_override_request_headers() -> Result<()> {
        let downloads = TempDir::new()?;
        let transport = MemoryTransport::new();
        transport.script("https://example.test/h", ScriptedResponse::ok("ok"));
        transport.script("https://example.test/o", ScriptedResponse::ok("ok"));
        let engine = engine(&transport, None, false, &downloads);

        let first: Recorder<Vec<u8>> = Recorder::new();
        engine
            .maker()
            .data_request(&HttpRequest::get("https://example.test", "/h"), first.callback(), None)
            .await;
        first.first(WAIT).await?;
        let second: Recorder<Vec<u8>> = Recorder::new();
        engine
            .maker()
            .data_request(
                &HttpRequest::get("https://example.test", "/o").header("x-client", "custom"),
                second.callback(),
                None,
            )
            .await;
        second.first(WAIT).await?;

        let requests = transport.requests();
        assert_eq!(requests[0].headers.get("x-client").map(HeaderValue::as_bytes), Some(&b"netkit"[..]));
        assert_eq!(requests[1].headers.get("x-client").map(HeaderValue::as_bytes), Some(&b"custom"[..]));
        Ok(())
    }

    #[tokio::test]
    async fn upload_sources_are_read_at_submission() -> Result<()> {
        let downloads = TempDir::new()?;
        let transport = MemoryTransport::new();
        transport.script("https://example.test/up", ScriptedResponse::ok("stored"));
        let engine = engine(&transport, None, false, &downloads);
        let request = HttpRequest::post("https://example.test", "/up");

        let missing: Recorder<Vec<u8>> = Recorder::new();
        let id = engine
            .maker()
            .upload_request(
                &request,
                UploadSource::File(downloads.path().join("absent.bin")),
                missing.callback(),
                None,
            )
            .await;
        assert!(id.is_none());
        assert_eq!(missing.deliveries()[0].error(), Some(RequestError::ClientError));

        let form = MultipartBody::with_boundary("Boundary-test").text("name", "value");
        let uploaded: Recorder<Vec<u8>> = Recorder::new();
        engine
            .maker()
            .upload_request(&request, UploadSource::Multipart(form), uploaded.callback(), None)
            .await;
        assert_eq!(uploaded.first(WAIT).await?.result, Ok(b"stored".to_vec()));
        let content_type = transport.requests()[0]
            .headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        assert_eq!(
            content_type.as_deref(),
            Some("multipart/form-data; boundary=Boundary-test")
        );
        Ok(())
    }

    #[tokio::test]
    async fn controls_report_unknown_requests() -> Result<()> {
        let downloads = TempDir::new()?;
        let transport = MemoryTransport::new();
        let engine = engine(&transport, None, false, &downloads);
        let unknown = uuid::Uuid::new_v4();
        assert!(!engine.maker().pause(unknown).await);
        assert!(!engine.maker().resume(unknown).await);
        assert!(!engine.maker().cancel(unknown).await);
        Ok(())
    }

    #[tokio::test]
    async fn cancel_moves_paused_requests_to_finished() -> Result<()> {
        let downloads = TempDir::new()?;
        let transport = MemoryTransport::new();
        transport.script("https://example.test/slow", ScriptedResponse::ok("x").held());
        let engine = engine(&transport, None, false, &downloads);
        let recorder: Recorder<Vec<u8>> = Recorder::new();
        let id = engine
            .maker()
            .upload_request(
                &HttpRequest::post("https://example.test", "/slow"),
                UploadSource::Bytes(b"body".to_vec()),
                recorder.callback(),
                None,
            )
            .await
            .ok_or_else(|| anyhow!("request rejected"))?;
        let container = engine
            .dispatcher()
            .lookup_by_request_id(id)
            .ok_or_else(|| anyhow!("not pooled"))?;
        tokio::time::timeout(WAIT, async {
            while container.state() != RequestState::Running {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await?;

        assert!(engine.maker().resume(id).await);
        assert_eq!(container.state(), RequestState::Running);
        assert!(engine.maker().pause(id).await);
        assert_eq!(container.state(), RequestState::Paused);
        assert!(engine.maker().cancel(id).await);
        assert_eq!(recorder.first(WAIT).await?.error(), Some(RequestError::UserCancelled));
        Ok(())
    }

    #[tokio::test]
    async fn data_requests_stay_running_when_paused_and_still_cancel() -> Result<()> {
        let downloads = TempDir::new()?;
        let transport = MemoryTransport::new();
        transport.script("https://example.test/feed", ScriptedResponse::ok("late").held());
        let engine = engine(&transport, None, false, &downloads);
        let recorder: Recorder<Vec<u8>> = Recorder::new();
        let id = engine
            .maker()
            .data_request(&HttpRequest::get("https://example.test", "/feed"), recorder.callback(), None)
            .await
            .ok_or_else(|| anyhow!("request rejected"))?;
        let container = engine
            .dispatcher()
            .lookup_by_request_id(id)
            .ok_or_else(|| anyhow!("not pooled"))?;
        tokio::time::timeout(WAIT, async {
            while container.state() != RequestState::Running {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await?;
        let task_id = container.task_id().ok_or_else(|| anyhow!("no task"))?;

        assert!(engine.maker().pause(id).await);
        assert_eq!(container.state(), RequestState::Running);
        assert!(engine.maker().resume(id).await);
        assert_eq!(container.state(), RequestState::Running);

        assert!(engine.maker().cancel(id).await);
        assert_eq!(recorder.first(WAIT).await?.error(), Some(RequestError::UserCancelled));
        assert!(transport.calls().contains(&TransportCall::Cancel(task_id)));
        assert_eq!(recorder.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn pause_right_after_submission_applies_once_the_download_starts() -> Result<()> {
        let downloads = TempDir::new()?;
        let transport = MemoryTransport::new();
        let url = "https://example.test/image.iso";
        transport.script(url, ScriptedResponse::ok("partial").held());
        transport.script(url, ScriptedResponse::ok("complete"));
        let engine = engine(&transport, None, false, &downloads);
        let recorder: Recorder<PathBuf> = Recorder::new();
        let id = engine
            .maker()
            .download_request(&HttpRequest::get("https://example.test", "/image.iso"), recorder.callback(), None)
            .await
            .ok_or_else(|| anyhow!("request rejected"))?;
        let container = engine
            .dispatcher()
            .lookup_by_request_id(id)
            .ok_or_else(|| anyhow!("not pooled"))?;

        assert!(engine.maker().pause(id).await);
        tokio::time::timeout(WAIT, async {
            while !(container.snapshot().has_resume_data && container.task_id().is_none()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await?;
        assert_eq!(container.state(), RequestState::Paused);
        assert!(recorder.is_empty());

        assert!(engine.maker().resume(id).await);
        let path = recorder
            .first(WAIT)
            .await?
            .result
            .map_err(|error| anyhow!("download failed: {error}"))?;
        assert_eq!(tokio::fs::read(&path).await?, b"complete");
        assert_eq!(transport.start_count(), 2);
        assert!(transport.calls().iter().any(|call| matches!(
            call,
            TransportCall::StartDownloadFromResume { .. }
        )));
        Ok(())
    }
}
