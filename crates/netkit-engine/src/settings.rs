//! Runtime parameters consumed by the engine.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use http::HeaderMap;

/// Default capacity of the dispatch queue.
pub const DISPATCH_CAPACITY: usize = 256;

/// Bound on listing the transport's active operations.
pub const ACTIVE_OPERATIONS_TIMEOUT: Duration = Duration::from_secs(12);

/// Retry behaviour applied by the finalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySettings {
    /// HTTP statuses and transport codes that trigger a retry. Empty disables
    /// retry.
    pub codes: BTreeSet<i64>,
    /// Budget assigned to requests that do not override it.
    pub max_retry: u32,
    /// Amount added to a request's backoff after each retry.
    pub backoff_step: Duration,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
}

impl RetrySettings {
    /// Whether `code` is retryable.
    #[must_use]
    pub fn is_retryable(&self, code: i64) -> bool {
        self.codes.contains(&code)
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            codes: BTreeSet::new(),
            max_retry: 2,
            backoff_step: Duration::from_secs(2),
            initial_backoff: Duration::ZERO,
        }
    }
}

/// Parameters applied to the engine at construction.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Retry behaviour.
    pub retry: RetrySettings,
    /// Directory receiving finished downloads.
    pub download_dir: PathBuf,
    /// Headers added to every wire request that does not set them.
    pub common_headers: HeaderMap,
    /// Hold submissions while offline instead of failing them.
    pub waits_for_connectivity: bool,
    /// How long a held submission waits for connectivity.
    pub connectivity_timeout: Duration,
    /// Dispatch queue capacity.
    pub dispatch_capacity: usize,
    /// Bound on listing the transport's active operations.
    pub active_operations_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            retry: RetrySettings::default(),
            download_dir: std::env::temp_dir().join("netkit-downloads"),
            common_headers: HeaderMap::new(),
            waits_for_connectivity: false,
            connectivity_timeout: Duration::from_secs(60),
            dispatch_capacity: DISPATCH_CAPACITY,
            active_operations_timeout: ACTIVE_OPERATIONS_TIMEOUT,
        }
    }
}
