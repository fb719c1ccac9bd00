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

//! Telemetry primitives for the NetKit workspace.
//!
//! This crate centralises logging setup, Prometheus metrics and the
//! transaction log so the engine and facade share one observability story.

pub mod error;
pub mod init;
pub mod journal;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use init::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, build_sha, init_logging};
pub use journal::{TransactionLog, render_block};
pub use metrics::{Metrics, MetricsSnapshot};
