#![allow(clippy::redundant_pub_crate)]

//! Default values for configuration documents.
//!
//! # Design
//! - Centralize defaults so the model, loader and docs agree.
//! - Keep time-based defaults explicit in their unit.

/// Retries allowed per request when neither config nor request overrides it.
pub(crate) const MAX_RETRY: u32 = 2;
/// Upper bound accepted for `retry.max_retry`.
pub(crate) const MAX_RETRY_LIMIT: u32 = 16;
/// Linear backoff increment between attempts, in seconds.
pub(crate) const BACKOFF_STEP_SECS: u64 = 2;
/// Delay before the first retry, in seconds.
pub(crate) const INITIAL_BACKOFF_SECS: u64 = 0;
/// Upper bound accepted for backoff values, in seconds.
pub(crate) const BACKOFF_LIMIT_SECS: u64 = 3_600;
/// Time a request may wait for connectivity, in seconds.
pub(crate) const CONNECTIVITY_TIMEOUT_SECS: u64 = 60;
/// Address dialled by the default connectivity probe.
pub(crate) const PROBE_ADDR: &str = "1.1.1.1:443";
/// Interval between connectivity probes, in milliseconds.
pub(crate) const PROBE_INTERVAL_MS: u64 = 5_000;
/// Smallest accepted probe interval, in milliseconds.
pub(crate) const PROBE_INTERVAL_FLOOR_MS: u64 = 100;
/// Directory name, under the system temp dir, for finished downloads.
pub(crate) const DOWNLOAD_DIR_NAME: &str = "netkit-downloads";
/// Default tracing level.
pub(crate) const LOG_LEVEL: &str = "info";
/// Event bus replay capacity.
pub(crate) const EVENT_CAPACITY: usize = 1_024;
