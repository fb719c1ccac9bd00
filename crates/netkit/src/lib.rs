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

//! Networking facade: configuration, telemetry and events composed around
//! the request engine.
//!
//! Layout: `client.rs` (the [`NetKit`] handle), `options.rs` (collaborator
//! overrides), `bootstrap.rs` (config loading and logging), `bridge.rs`
//! (event to metrics bridge), `engine_config.rs` (config to engine settings).

pub mod bootstrap;
mod bridge;
pub mod client;
mod engine_config;
pub mod error;
pub mod options;

pub use bootstrap::{init_logging, load_config};
pub use client::{NetKit, Reply};
pub use error::{NetKitError, NetKitResult};
pub use options::NetKitOptions;

pub use netkit_config::NetKitConfig;
pub use netkit_core::{
    ActiveOperation, AuthDetail, AuthMethod, BodyEncoding, BodyEncryption, Credential,
    HttpMethod, HttpRequest, MultipartBody, QueryEncoding, RequestError, RequestId,
    RequestState, RequestType, ResponseMeta, Transport,
};
pub use netkit_engine::{ConnectivityProbe, NetworkMonitor, ProgressCallback, UploadSource};
pub use netkit_events::{ConnectivityStatus, Event, EventEnvelope};
