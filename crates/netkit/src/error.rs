//! # Design
//!
//! - One error type for facade construction and pool-wide operations.
//! - Constant messages; context lives in fields and the preserved source.
//! - Per-request failures never surface here; they reach the completion.

use thiserror::Error;

/// Result alias for facade operations.
pub type NetKitResult<T> = Result<T, NetKitError>;

/// Facade-level error type.
#[derive(Debug, Error)]
pub enum NetKitError {
    /// Configuration was rejected.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: netkit_config::ConfigError,
    },
    /// A configured header could not be converted.
    #[error("invalid common header")]
    Header {
        /// Source build error.
        source: netkit_core::RequestBuildError,
    },
    /// Telemetry setup or rendering failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: netkit_telemetry::TelemetryError,
    },
    /// A pool-wide engine operation failed.
    #[error("engine operation failed")]
    Engine {
        /// Operation identifier.
        operation: &'static str,
        /// Source engine error.
        source: netkit_engine::EngineError,
    },
    /// The engine dropped a completion without invoking it.
    #[error("completion was dropped")]
    CompletionDropped {
        /// Operation identifier.
        operation: &'static str,
    },
}

impl NetKitError {
    pub(crate) const fn engine(operation: &'static str, source: netkit_engine::EngineError) -> Self {
        Self::Engine { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: netkit_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn engine_errors_keep_their_source() {
        let error = NetKitError::engine(
            "cancel_all",
            netkit_engine::EngineError::Timeout {
                operation: "list_active_operations",
            },
        );
        assert_eq!(error.to_string(), "engine operation failed");
        assert!(error.source().is_some());
    }

    #[test]
    fn dropped_completion_has_no_source() {
        let error = NetKitError::CompletionDropped {
            operation: "fetch_data",
        };
        assert!(error.source().is_none());
    }
}
