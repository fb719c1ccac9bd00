//! # Design
//!
//! - Keep error messages constant; store operational context in fields.
//! - Transport failures keep the `anyhow` source produced at the trait seam.

use std::path::PathBuf;

use netkit_core::RequestId;
use thiserror::Error;

/// Errors raised by engine operations that have no completion callback to
/// report through.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A container with the same request id is already pooled.
    #[error("request already pooled")]
    DuplicateRequest {
        /// Conflicting identifier.
        request_id: RequestId,
    },
    /// The executor worker is no longer consuming the dispatch queue.
    #[error("dispatch queue closed")]
    QueueClosed {
        /// Operation that attempted to enqueue.
        operation: &'static str,
    },
    /// A transport call failed.
    #[error("transport operation failed")]
    Transport {
        /// Operation that invoked the transport.
        operation: &'static str,
        /// Error reported by the transport.
        source: anyhow::Error,
    },
    /// A transport call did not answer in time.
    #[error("transport operation timed out")]
    Timeout {
        /// Operation that invoked the transport.
        operation: &'static str,
    },
    /// A filesystem operation on a download artifact failed.
    #[error("download artifact operation failed")]
    Artifact {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
}

/// Convenience alias for engine results.
pub type EngineResult<T> = Result<T, EngineError>;
