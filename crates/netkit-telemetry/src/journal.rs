//! File-backed transaction log.
//!
//! Records are handed to a background writer over an unbounded channel so
//! `record` never blocks the engine. Each record becomes a human-readable
//! block appended to the configured file and a `debug!` event.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use netkit_core::{ArtifactSummary, DiagnosticsSink, TransactionRecord};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{TelemetryError, TelemetryResult};

enum JournalMessage {
    Record(Box<TransactionRecord>),
    Flush(oneshot::Sender<()>),
}

/// Diagnostics sink writing transaction blocks to a file.
#[derive(Debug, Clone)]
pub struct TransactionLog {
    sender: mpsc::UnboundedSender<JournalMessage>,
    path: Option<PathBuf>,
}

impl TransactionLog {
    /// Open (or create) `path` for appending and spawn the writer task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::JournalOpen`] when the file or its parent
    /// directory cannot be created.
    pub async fn open(path: impl AsRef<Path>) -> TelemetryResult<Self> {
        let path = path.as_ref().to_path_buf();
        let open_error = |source| TelemetryError::JournalOpen {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(open_error)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(open_error)?;
        Ok(Self::spawn(Some(file), Some(path)))
    }

    /// Log that only emits `debug!` events.
    #[must_use]
    pub fn tracing_only() -> Self {
        Self::spawn(None, None)
    }

    /// File receiving the blocks, when one is configured.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Wait until every record sent so far has been written.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.sender.send(JournalMessage::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    fn spawn(file: Option<File>, path: Option<PathBuf>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(file, receiver));
        Self { sender, path }
    }
}

impl DiagnosticsSink for TransactionLog {
    fn record(&self, record: TransactionRecord) {
        if self
            .sender
            .send(JournalMessage::Record(Box::new(record)))
            .is_err()
        {
            warn!("transaction log writer stopped; record dropped");
        }
    }
}

async fn run_writer(mut file: Option<File>, mut receiver: mpsc::UnboundedReceiver<JournalMessage>) {
    while let Some(message) = receiver.recv().await {
        match message {
            JournalMessage::Record(record) => {
                debug!(
                    request_id = %record.request_id,
                    request_type = %record.request_type,
                    method = %record.method,
                    url = %record.url,
                    status = record.response.as_ref().map(|meta| meta.status.as_u16()),
                    error_code = record.error_code,
                    outcome = record.outcome.as_str(),
                    "transaction finished"
                );
                if let Some(handle) = file.as_mut() {
                    let block = render_block(&record);
                    if let Err(err) = handle.write_all(block.as_bytes()).await {
                        warn!(error = %err, "transaction log write failed; disabling file output");
                        file = None;
                    }
                }
            }
            JournalMessage::Flush(ack) => {
                if let Some(handle) = file.as_mut()
                    && let Err(err) = handle.flush().await
                {
                    warn!(error = %err, "transaction log flush failed");
                }
                let _ = ack.send(());
            }
        }
    }
}

/// Render one record as a text block.
#[must_use]
pub fn render_block(record: &TransactionRecord) -> String {
    let mut block = String::new();
    let _ = writeln!(
        block,
        "\n==== {} {} {} {}",
        record.timestamp.to_rfc3339(),
        record.request_type,
        record.request_id,
        record.outcome.as_str()
    );
    let _ = writeln!(block, "---- request");
    let _ = writeln!(block, "{} {}", record.method, record.url);
    for (name, value) in &record.request_headers {
        let _ = writeln!(block, "{name} - {}", String::from_utf8_lossy(value.as_bytes()));
    }
    let _ = writeln!(block, "---- response");
    match &record.response {
        Some(meta) => {
            let _ = writeln!(block, "status {}", meta.status.as_u16());
            for (name, value) in &meta.headers {
                let _ = writeln!(block, "{name} - {}", String::from_utf8_lossy(value.as_bytes()));
            }
        }
        None => {
            let _ = writeln!(block, "no response");
        }
    }
    if let Some(code) = record.error_code {
        let _ = writeln!(block, "---- error");
        let _ = writeln!(block, "code {code}");
    }
    match &record.artifact {
        Some(ArtifactSummary::Bytes(len)) => {
            let _ = writeln!(block, "---- artifact\nbytes {len}");
        }
        Some(ArtifactSummary::File(path)) => {
            let _ = writeln!(block, "---- artifact\nfile {}", path.display());
        }
        None => {}
    }
    let _ = writeln!(block, "==== end");
    block
}
