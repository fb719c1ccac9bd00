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

//! File and environment backed configuration for the networking engine.
//!
//! Layout: `model.rs` (typed config sections), `defaults.rs` (default values),
//! `validate.rs` (`NetKitConfig::validate`), `loader.rs` (JSON documents and
//! `NETKIT_*` overrides).

mod defaults;
pub mod error;
pub mod loader;
pub mod model;
mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{apply_env_overrides, from_env, load_from_path, read_document};
pub use model::{
    ConnectivityConfig, EventsConfig, LogFormatSetting, NetKitConfig, RetryPolicy, StorageConfig,
    TelemetryConfig,
};
