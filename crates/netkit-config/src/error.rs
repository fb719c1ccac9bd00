//! Error types for configuration operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Field contained an invalid value.
    #[error("invalid configuration field")]
    InvalidField {
        /// Section that failed validation.
        section: &'static str,
        /// Field that failed validation.
        field: &'static str,
        /// Offending value when available.
        value: Option<String>,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
    /// Configuration document was not valid JSON for the model.
    #[error("configuration document could not be parsed")]
    Parse {
        /// Document path.
        path: PathBuf,
        /// Source parse error.
        source: serde_json::Error,
    },
    /// File system operation failed.
    #[error("filesystem operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(
        section: &'static str,
        field: &'static str,
        value: Option<String>,
        reason: &'static str,
    ) -> Self {
        Self::InvalidField {
            section,
            field,
            value,
            reason,
        }
    }
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;
