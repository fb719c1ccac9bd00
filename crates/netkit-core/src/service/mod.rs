//! Collaborator traits consumed by the request engine.
//!
//! The engine never performs network I/O, certificate evaluation, encryption or
//! file logging itself; it drives the implementations injected here.

use std::path::PathBuf;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::{HeaderMap, Method};
use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::error::RequestError;
use crate::model::{
    ActiveOperation, AuthChallenge, AuthDetail, ChallengeDisposition, RequestId, ResponseMeta,
    TaskId, TransportFailure,
};
use crate::request::{BodyEncryption, WireRequest};
use netkit_events::RequestType;

/// Events a transport delivers about its operations.
#[derive(Debug)]
pub enum TransportEvent {
    /// Bytes moved so far for a task.
    Progress {
        /// Transport identifier.
        task_id: TaskId,
        /// Bytes sent (uploads) or written (downloads and data).
        transferred: u64,
        /// Expected total, when known.
        total: Option<u64>,
    },
    /// Response body chunk for data and upload tasks.
    DataChunk {
        /// Transport identifier.
        task_id: TaskId,
        /// Chunk contents.
        bytes: Vec<u8>,
    },
    /// Download body fully written to a temporary file.
    DownloadFinished {
        /// Transport identifier.
        task_id: TaskId,
        /// Temporary file owned by the receiver from now on.
        location: PathBuf,
    },
    /// Task ended, with or without an error.
    Completed {
        /// Transport identifier.
        task_id: TaskId,
        /// Response metadata, when a response was received.
        response: Option<ResponseMeta>,
        /// Transport-level failure.
        error: Option<TransportFailure>,
    },
    /// Server requested authentication for a task.
    AuthChallenge {
        /// Transport identifier.
        task_id: TaskId,
        /// Challenge details.
        challenge: AuthChallenge,
        /// Channel receiving the disposition.
        reply: oneshot::Sender<ChallengeDisposition>,
    },
}

/// Sending half through which a transport reports [`TransportEvent`]s.
#[derive(Debug, Clone)]
pub struct TransportEventSink {
    sender: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportEventSink {
    /// Create a sink and the receiver the engine consumes.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Deliver an event. Returns `false` once the receiver is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    /// Raise an authentication challenge and wait for the disposition.
    ///
    /// Falls back to default handling when the receiver is gone or drops the
    /// reply.
    pub async fn challenge(&self, task_id: TaskId, challenge: AuthChallenge) -> ChallengeDisposition {
        let (reply, response) = oneshot::channel();
        if !self.emit(TransportEvent::AuthChallenge {
            task_id,
            challenge,
            reply,
        }) {
            return ChallengeDisposition::PerformDefaultHandling;
        }
        response
            .await
            .unwrap_or(ChallengeDisposition::PerformDefaultHandling)
    }
}

/// Underlying transfer primitive shared by every request.
///
/// Start calls return once the operation is registered; progress and
/// completion arrive later through the bound [`TransportEventSink`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Attach the sink that receives this transport's events.
    fn bind(&self, sink: TransportEventSink);

    /// Start an in-memory request/response exchange.
    async fn start_data(&self, request: &WireRequest) -> Result<TaskId>;

    /// Start a download written to a temporary file.
    async fn start_download(&self, request: &WireRequest) -> Result<TaskId>;

    /// Continue a download from an opaque resume token.
    async fn start_download_from_resume(&self, resume_data: &[u8]) -> Result<TaskId>;

    /// Start an upload of `body`.
    async fn start_upload(&self, request: &WireRequest, body: &[u8]) -> Result<TaskId>;

    /// Cancel a task. Unknown ids are ignored.
    async fn cancel(&self, task_id: TaskId) -> Result<()>;

    /// Suspend a running task.
    async fn suspend(&self, task_id: TaskId) -> Result<()> {
        bail!("transport cannot suspend task {task_id}")
    }

    /// Resume a suspended task.
    async fn resume(&self, task_id: TaskId) -> Result<()> {
        bail!("transport cannot resume task {task_id}")
    }

    /// Cancel a download while producing a resume token.
    async fn request_resume_token(&self, task_id: TaskId) -> Result<Option<Vec<u8>>>;

    /// Operations the transport currently tracks.
    async fn list_active_operations(&self) -> Result<Vec<ActiveOperation>>;

    /// Tear the session down, cancelling running tasks when asked.
    async fn invalidate(&self, cancel_running: bool) -> Result<()> {
        if cancel_running {
            for operation in self.list_active_operations().await? {
                self.cancel(operation.task_id).await?;
            }
        }
        Ok(())
    }
}

/// Answers authentication challenges on behalf of requests.
#[async_trait]
pub trait AuthResolver: Send + Sync {
    /// Decide how to answer `challenge` given the request's auth settings.
    async fn resolve(
        &self,
        detail: Option<&AuthDetail>,
        challenge: &AuthChallenge,
    ) -> ChallengeDisposition;
}

/// Resolver that always defers to the transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAuthResolver;

#[async_trait]
impl AuthResolver for DefaultAuthResolver {
    async fn resolve(
        &self,
        _detail: Option<&AuthDetail>,
        _challenge: &AuthChallenge,
    ) -> ChallengeDisposition {
        ChallengeDisposition::PerformDefaultHandling
    }
}

/// Reports whether the device currently has a usable network path.
pub trait Connectivity: Send + Sync {
    /// Current reachability.
    fn is_connected(&self) -> bool;
}

/// Encrypts encoded request bodies.
pub trait BodyEncryptor: Send + Sync {
    /// Return the sealed body, prefixed with the IV where the scheme uses one.
    ///
    /// # Errors
    ///
    /// Returns an error when the cipher rejects the key material.
    fn encrypt(&self, encryption: &BodyEncryption, plaintext: &[u8]) -> Result<Vec<u8>>;
}

/// Result artifact summarised for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSummary {
    /// In-memory body of the given length.
    Bytes(usize),
    /// Downloaded file.
    File(PathBuf),
}

/// How a transaction ended, from the engine's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// Success callback delivered.
    Succeeded,
    /// Failure callback delivered.
    Failed(RequestError),
    /// Attempt failed and was requeued.
    Retrying,
}

impl TransactionOutcome {
    /// Lowercase label for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed(_) => "failed",
            Self::Retrying => "retrying",
        }
    }
}

/// Everything the diagnostics sink learns about one finished attempt.
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    /// Caller-facing request identifier.
    pub request_id: RequestId,
    /// Operation kind.
    pub request_type: RequestType,
    /// When the attempt was finalised.
    pub timestamp: DateTime<Utc>,
    /// Request verb.
    pub method: Method,
    /// Request URL.
    pub url: Url,
    /// Headers sent.
    pub request_headers: HeaderMap,
    /// Response metadata when received.
    pub response: Option<ResponseMeta>,
    /// Transport error code when the attempt failed at transport level.
    pub error_code: Option<i64>,
    /// Engine outcome.
    pub outcome: TransactionOutcome,
    /// Delivered artifact.
    pub artifact: Option<ArtifactSummary>,
}

/// Fire-and-forget sink for transaction diagnostics.
pub trait DiagnosticsSink: Send + Sync {
    /// Record a transaction. Must not block.
    fn record(&self, record: TransactionRecord);
}

/// Sink that discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDiagnostics;

impl DiagnosticsSink for NullDiagnostics {
    fn record(&self, _record: TransactionRecord) {}
}
