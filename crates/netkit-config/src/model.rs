//! Typed configuration models.
//!
//! # Design
//! - Pure data carriers; every section defaults independently so partial
//!   documents load.
//! - Durations are stored in explicit units to keep documents readable.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;

/// Root configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct NetKitConfig {
    /// Headers added to every request that does not set them.
    pub common_headers: BTreeMap<String, String>,
    /// Connectivity gating and probing.
    pub connectivity: ConnectivityConfig,
    /// Retry policy.
    pub retry: RetryPolicy,
    /// Output locations.
    pub storage: StorageConfig,
    /// Logging settings.
    pub telemetry: TelemetryConfig,
    /// Event bus sizing.
    pub events: EventsConfig,
}

/// Connectivity gating and probe settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectivityConfig {
    /// Hold requests while offline instead of failing them immediately.
    pub waits_for_connectivity: bool,
    /// How long a request may wait for connectivity, in seconds.
    pub timeout_secs: u64,
    /// `host:port` dialled by the TCP probe.
    pub probe_addr: String,
    /// Interval between probes, in milliseconds.
    pub probe_interval_ms: u64,
}

impl ConnectivityConfig {
    /// Connectivity wait timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Probe interval.
    #[must_use]
    pub const fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            waits_for_connectivity: false,
            timeout_secs: defaults::CONNECTIVITY_TIMEOUT_SECS,
            probe_addr: defaults::PROBE_ADDR.to_string(),
            probe_interval_ms: defaults::PROBE_INTERVAL_MS,
        }
    }
}

/// Codes eligible for retry and the budget/backoff applied to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// HTTP statuses and/or negative transport codes that trigger a retry.
    /// Empty disables retry.
    pub codes: BTreeSet<i64>,
    /// Retries allowed per request unless the request overrides it.
    pub max_retry: u32,
    /// Linear backoff increment, in seconds.
    pub backoff_step_secs: u64,
    /// Delay before the first retry, in seconds.
    pub initial_backoff_secs: u64,
}

impl RetryPolicy {
    /// Whether `code` is configured as retryable.
    #[must_use]
    pub fn is_retryable(&self, code: i64) -> bool {
        self.codes.contains(&code)
    }

    /// Backoff increment.
    #[must_use]
    pub const fn backoff_step(&self) -> Duration {
        Duration::from_secs(self.backoff_step_secs)
    }

    /// Delay before the first retry.
    #[must_use]
    pub const fn initial_backoff(&self) -> Duration {
        Duration::from_secs(self.initial_backoff_secs)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            codes: BTreeSet::new(),
            max_retry: defaults::MAX_RETRY,
            backoff_step_secs: defaults::BACKOFF_STEP_SECS,
            initial_backoff_secs: defaults::INITIAL_BACKOFF_SECS,
        }
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Directory receiving finished downloads.
    pub download_dir: PathBuf,
    /// Transaction log file; logging to file is disabled when unset.
    pub transaction_log: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            download_dir: std::env::temp_dir().join(defaults::DOWNLOAD_DIR_NAME),
            transaction_log: None,
        }
    }
}

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormatSetting {
    /// Pretty in debug builds, JSON in release builds.
    #[default]
    Auto,
    /// Structured JSON lines.
    Json,
    /// Human-readable output.
    Pretty,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Output format.
    pub log_format: LogFormatSetting,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: defaults::LOG_LEVEL.to_string(),
            log_format: LogFormatSetting::Auto,
        }
    }
}

/// Event bus sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventsConfig {
    /// Broadcast and replay capacity.
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: defaults::EVENT_CAPACITY,
        }
    }
}
