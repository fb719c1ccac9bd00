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

//! Shared test helpers used across NetKit test suites.
//! Layout: transport.rs (scripted transport double), recorder.rs (completion
//! recorders), fixtures.rs (connectivity double and body helpers).

pub mod fixtures;
pub mod recorder;
pub mod transport;

pub use fixtures::{ToggleConnectivity, object};
pub use recorder::{Delivery, Recorder};
pub use transport::{MemoryTransport, ScriptedResponse, TransportCall, is_memory_artifact};
