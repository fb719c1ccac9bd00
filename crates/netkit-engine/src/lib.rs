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

//! Request engine: pooling, dispatch, execution against an injected
//! transport, retry and completion delivery.

/// Challenge answers derived from per-request auth settings.
pub mod challenge;
/// Reachability monitor and probes.
pub mod connectivity;
pub mod container;
/// Request pool and dispatch queue.
pub mod dispatcher;
pub mod error;
/// Worker that drives the transport.
pub mod executor;
/// Retry and completion handling.
pub mod finalizer;
pub mod maker;
pub mod settings;

use std::sync::Arc;

use netkit_core::{
    AuthResolver, BodyEncryptor, Connectivity, DefaultAuthResolver, DiagnosticsSink,
    NullDiagnostics, Transport,
};
use netkit_events::EventBus;

pub use challenge::ChallengeAcceptor;
pub use connectivity::{ConnectivityProbe, NetworkMonitor, TcpProbe};
pub use container::{
    Completion, ContainerSnapshot, Control, ControlOutcome, DataCompletion, DownloadCompletion,
    ProgressCallback, RequestContainer,
};
pub use dispatcher::Dispatcher;
pub use error::{EngineError, EngineResult};
pub use executor::Executor;
pub use finalizer::{FinalizeOutcome, Finalizer};
pub use maker::{RequestMaker, UploadSource};
pub use settings::{EngineSettings, RetrySettings};

use executor::ExecutorDeps;
use maker::MakerSettings;

/// Assembles an [`Engine`] from its collaborators.
pub struct EngineBuilder {
    settings: EngineSettings,
    transport: Arc<dyn Transport>,
    events: EventBus,
    resolver: Arc<dyn AuthResolver>,
    connectivity: Option<Arc<dyn Connectivity>>,
    encryptor: Option<Arc<dyn BodyEncryptor>>,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl EngineBuilder {
    /// Start from settings, a transport and the shared event bus.
    #[must_use]
    pub fn new(settings: EngineSettings, transport: Arc<dyn Transport>, events: EventBus) -> Self {
        Self {
            settings,
            transport,
            events,
            resolver: Arc::new(DefaultAuthResolver),
            connectivity: None,
            encryptor: None,
            diagnostics: Arc::new(NullDiagnostics),
        }
    }

    /// Answer authentication challenges with `resolver`.
    #[must_use]
    pub fn resolver(mut self, resolver: Arc<dyn AuthResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Gate submissions on `connectivity`.
    #[must_use]
    pub fn connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    /// Encrypt request bodies with `encryptor`.
    #[must_use]
    pub fn encryptor(mut self, encryptor: Arc<dyn BodyEncryptor>) -> Self {
        self.encryptor = Some(encryptor);
        self
    }

    /// Record finished transactions in `diagnostics`.
    #[must_use]
    pub fn diagnostics(mut self, diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Bind the transport and spawn the executor worker. Must run inside a
    /// tokio runtime.
    #[must_use]
    pub fn build(self) -> Engine {
        let settings = self.settings;
        let (dispatcher, queue) = Dispatcher::new(settings.dispatch_capacity);
        let finalizer = Finalizer::new(
            dispatcher.clone(),
            settings.retry.clone(),
            self.events.clone(),
            self.diagnostics,
        );
        let executor = Executor::spawn(
            ExecutorDeps {
                transport: self.transport,
                dispatcher: dispatcher.clone(),
                finalizer: finalizer.clone(),
                resolver: self.resolver,
                events: self.events.clone(),
                download_dir: settings.download_dir.clone(),
                active_operations_timeout: settings.active_operations_timeout,
            },
            queue,
        );
        let maker = RequestMaker::new(
            dispatcher.clone(),
            finalizer,
            self.events,
            MakerSettings {
                common_headers: settings.common_headers,
                waits_for_connectivity: settings.waits_for_connectivity,
                connectivity_timeout: settings.connectivity_timeout,
                max_retry: settings.retry.max_retry,
                initial_backoff: settings.retry.initial_backoff,
            },
            self.connectivity,
            self.encryptor,
        );
        Engine {
            maker,
            executor,
            dispatcher,
        }
    }
}

/// Running engine: submission surface plus pool-wide controls.
#[derive(Clone)]
pub struct Engine {
    maker: RequestMaker,
    executor: Executor,
    dispatcher: Dispatcher,
}

impl Engine {
    /// Submission and per-request controls.
    #[must_use]
    pub const fn maker(&self) -> &RequestMaker {
        &self.maker
    }

    /// Pool-wide transport controls.
    #[must_use]
    pub const fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Pool inspection.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Stop the worker, delivering `UserCancelled` to pooled requests.
    pub async fn shutdown(&self) {
        self.executor.shutdown().await;
    }
}
