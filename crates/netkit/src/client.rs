//! The `NetKit` facade.
//!
//! # Design
//! - Owns every long-lived collaborator: event bus, connectivity monitor,
//!   transaction log, metrics bridge and engine.
//! - Callback submissions mirror the engine; the `fetch_*` wrappers await the
//!   completion instead.
//! - Dropping the last handle stops the bridge and releases the monitor.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use netkit_config::NetKitConfig;
use netkit_core::{
    ActiveOperation, AuthResolver, HttpRequest, RequestError, RequestId, ResponseMeta, Transport,
};
use netkit_engine::{
    ChallengeAcceptor, ConnectivityProbe, ContainerSnapshot, Engine, EngineBuilder, NetworkMonitor,
    ProgressCallback, TcpProbe, UploadSource,
};
use netkit_events::{EventBus, EventId, EventStream};
use netkit_telemetry::{Metrics, MetricsSnapshot, TransactionLog};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::bridge::spawn_metrics_bridge;
use crate::engine_config::engine_settings;
use crate::error::{NetKitError, NetKitResult};
use crate::options::NetKitOptions;

/// Connect timeout of the default TCP probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Completion captured by the `fetch_*` wrappers.
#[derive(Debug, Clone)]
pub struct Reply<T> {
    /// Best-effort response metadata.
    pub response: Option<ResponseMeta>,
    /// Artifact or error kind.
    pub result: Result<T, RequestError>,
}

/// Networking facade composing configuration, telemetry, events and the
/// request engine.
#[derive(Clone)]
pub struct NetKit {
    inner: Arc<Inner>,
}

struct Inner {
    engine: Engine,
    events: EventBus,
    monitor: NetworkMonitor,
    monitor_owner: Uuid,
    metrics: Metrics,
    journal: TransactionLog,
    bridge: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.monitor.stop(self.monitor_owner);
        let bridge = self.bridge.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = bridge.take() {
            task.abort();
        }
    }
}

impl NetKit {
    /// Validate `config` and wire the engine around `transport`. Must run
    /// inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration is invalid, the transaction
    /// log cannot be opened, or the metrics registry cannot be built.
    pub async fn new(
        config: NetKitConfig,
        transport: Arc<dyn Transport>,
        options: NetKitOptions,
    ) -> NetKitResult<Self> {
        config.validate().map_err(|source| NetKitError::Config {
            operation: "validate",
            source,
        })?;
        let settings = engine_settings(&config)?;

        let events = EventBus::with_capacity(config.events.capacity);
        let metrics =
            Metrics::new().map_err(|source| NetKitError::telemetry("metrics", source))?;
        let journal = match &config.storage.transaction_log {
            Some(path) => TransactionLog::open(path)
                .await
                .map_err(|source| NetKitError::telemetry("transaction_log", source))?,
            None => TransactionLog::tracing_only(),
        };

        let probe: Arc<dyn ConnectivityProbe> = options.probe.unwrap_or_else(|| {
            Arc::new(TcpProbe::new(
                config.connectivity.probe_addr.clone(),
                PROBE_TIMEOUT,
            ))
        });
        let resolver: Arc<dyn AuthResolver> = options
            .resolver
            .unwrap_or_else(|| Arc::new(ChallengeAcceptor));
        let monitor = NetworkMonitor::new(
            probe,
            config.connectivity.probe_interval(),
            events.clone(),
        );

        let mut builder = EngineBuilder::new(settings, transport, events.clone())
            .resolver(resolver)
            .connectivity(Arc::new(monitor.clone()))
            .diagnostics(Arc::new(journal.clone()));
        if let Some(encryptor) = options.encryptor {
            builder = builder.encryptor(encryptor);
        }
        let engine = builder.build();
        let bridge = spawn_metrics_bridge(&events, metrics.clone(), engine.dispatcher().clone());

        let monitor_owner = Uuid::new_v4();
        if options.polls_connectivity {
            monitor.start(monitor_owner);
        }
        info!(
            download_dir = %config.storage.download_dir.display(),
            waits_for_connectivity = config.connectivity.waits_for_connectivity,
            polls_connectivity = options.polls_connectivity,
            "netkit started"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                engine,
                events,
                monitor,
                monitor_owner,
                metrics,
                journal,
                bridge: Mutex::new(Some(bridge)),
            }),
        })
    }

    /// Submit an in-memory exchange. Returns the request id, or `None` when
    /// the completion already fired.
    pub async fn data<F>(
        &self,
        request: &HttpRequest,
        completion: F,
        progress: Option<ProgressCallback>,
    ) -> Option<RequestId>
    where
        F: FnOnce(Option<ResponseMeta>, Result<Vec<u8>, RequestError>) + Send + 'static,
    {
        self.inner
            .engine
            .maker()
            .data_request(request, completion, progress)
            .await
    }

    /// Submit a download; the completion receives the stored file.
    pub async fn download<F>(
        &self,
        request: &HttpRequest,
        completion: F,
        progress: Option<ProgressCallback>,
    ) -> Option<RequestId>
    where
        F: FnOnce(Option<ResponseMeta>, Result<PathBuf, RequestError>) + Send + 'static,
    {
        self.inner
            .engine
            .maker()
            .download_request(request, completion, progress)
            .await
    }

    /// Submit an upload of `source`.
    pub async fn upload<F>(
        &self,
        request: &HttpRequest,
        source: UploadSource,
        completion: F,
        progress: Option<ProgressCallback>,
    ) -> Option<RequestId>
    where
        F: FnOnce(Option<ResponseMeta>, Result<Vec<u8>, RequestError>) + Send + 'static,
    {
        self.inner
            .engine
            .maker()
            .upload_request(request, source, completion, progress)
            .await
    }

    /// Run an in-memory exchange to completion.
    ///
    /// # Errors
    ///
    /// Returns [`NetKitError::CompletionDropped`] if the engine stopped
    /// without delivering. Request failures are reported in [`Reply::result`].
    pub async fn fetch_data(&self, request: &HttpRequest) -> NetKitResult<Reply<Vec<u8>>> {
        let (sender, receiver) = oneshot::channel();
        self.data(request, reply_to(sender), None).await;
        await_reply(receiver, "fetch_data").await
    }

    /// Run a download to completion.
    ///
    /// # Errors
    ///
    /// Returns [`NetKitError::CompletionDropped`] if the engine stopped
    /// without delivering.
    pub async fn fetch_download(&self, request: &HttpRequest) -> NetKitResult<Reply<PathBuf>> {
        let (sender, receiver) = oneshot::channel();
        self.download(request, reply_to(sender), None).await;
        await_reply(receiver, "fetch_download").await
    }

    /// Run an upload to completion.
    ///
    /// # Errors
    ///
    /// Returns [`NetKitError::CompletionDropped`] if the engine stopped
    /// without delivering.
    pub async fn fetch_upload(
        &self,
        request: &HttpRequest,
        source: UploadSource,
    ) -> NetKitResult<Reply<Vec<u8>>> {
        let (sender, receiver) = oneshot::channel();
        self.upload(request, source, reply_to(sender), None).await;
        await_reply(receiver, "fetch_upload").await
    }

    /// Pause a running upload or download; a pause issued before the
    /// transfer starts applies once it does. Data requests keep running.
    /// Returns whether the request is pooled.
    pub async fn pause(&self, request_id: RequestId) -> bool {
        self.inner.engine.maker().pause(request_id).await
    }

    /// Resume a paused request. Returns whether the request is pooled.
    pub async fn resume(&self, request_id: RequestId) -> bool {
        self.inner.engine.maker().resume(request_id).await
    }

    /// Cancel a request. Returns whether the request is pooled.
    pub async fn cancel(&self, request_id: RequestId) -> bool {
        self.inner.engine.maker().cancel(request_id).await
    }

    /// Cancel every task the transport is running. Returns how many were
    /// cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`NetKitError::Engine`] when the transport cannot list its
    /// operations in time.
    pub async fn cancel_all(&self) -> NetKitResult<usize> {
        self.inner
            .engine
            .executor()
            .cancel_all()
            .await
            .map_err(|source| NetKitError::engine("cancel_all", source))
    }

    /// Invalidate the transport session.
    ///
    /// # Errors
    ///
    /// Returns [`NetKitError::Engine`] when the transport rejects the purge.
    pub async fn purge_session(&self, cancel_running: bool) -> NetKitResult<()> {
        self.inner
            .engine
            .executor()
            .purge_session(cancel_running)
            .await
            .map_err(|source| NetKitError::engine("purge_session", source))
    }

    /// Operations the transport currently runs.
    ///
    /// # Errors
    ///
    /// Returns [`NetKitError::Engine`] when the listing fails or times out.
    pub async fn active_operations(&self) -> NetKitResult<Vec<ActiveOperation>> {
        self.inner
            .engine
            .executor()
            .get_all_active_operations()
            .await
            .map_err(|source| NetKitError::engine("active_operations", source))
    }

    /// Snapshot of a pooled request.
    #[must_use]
    pub fn inspect(&self, request_id: RequestId) -> Option<ContainerSnapshot> {
        self.inner
            .engine
            .dispatcher()
            .lookup_by_request_id(request_id)
            .map(|container| container.snapshot())
    }

    /// Requests currently pooled.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.engine.dispatcher().len()
    }

    /// Components the executor currently reports as degraded.
    #[must_use]
    pub fn degraded(&self) -> Vec<String> {
        self.inner.engine.executor().degraded()
    }

    /// Whether the connectivity monitor considers the network usable.
    #[must_use]
    pub fn is_network_connected(&self) -> bool {
        netkit_core::Connectivity::is_connected(&self.inner.monitor)
    }

    /// Connectivity monitor, for platform reachability reports.
    #[must_use]
    pub fn monitor(&self) -> &NetworkMonitor {
        &self.inner.monitor
    }

    /// Subscribe to lifecycle events, replaying buffered events newer than
    /// `since`.
    #[must_use]
    pub fn events(&self, since: Option<EventId>) -> EventStream {
        self.inner.events.subscribe(since)
    }

    /// Shared event bus.
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.inner.events
    }

    /// Metrics registry fed by the event bridge.
    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    /// Pool depth and retry totals.
    #[must_use]
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Prometheus text exposition of all collectors.
    ///
    /// # Errors
    ///
    /// Returns [`NetKitError::Telemetry`] when encoding fails.
    pub fn render_metrics(&self) -> NetKitResult<String> {
        self.inner
            .metrics
            .render()
            .map_err(|source| NetKitError::telemetry("render_metrics", source))
    }

    /// Stop polling, cancel pooled requests with `UserCancelled` and flush
    /// the transaction log.
    pub async fn shutdown(&self) {
        self.inner.monitor.stop(self.inner.monitor_owner);
        self.inner.engine.shutdown().await;
        self.inner.journal.flush().await;
        info!("netkit stopped");
    }
}

fn reply_to<T: Send + 'static>(
    sender: oneshot::Sender<Reply<T>>,
) -> impl FnOnce(Option<ResponseMeta>, Result<T, RequestError>) + Send + 'static {
    move |response, result| {
        let _ = sender.send(Reply { response, result });
    }
}

async fn await_reply<T: Send>(
    receiver: oneshot::Receiver<Reply<T>>,
    operation: &'static str,
) -> NetKitResult<Reply<T>> {
    receiver
        .await
        .map_err(|_| NetKitError::CompletionDropped { operation })
}
