//! Logging initialisation and configuration.
//!
//! # Design
//! - Single entry point installing an fmt or JSON subscriber.
//! - `RUST_LOG` wins over the configured level.
//! - Records the build SHA once so every module reports the same value.

use once_cell::sync::OnceCell;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{TelemetryError, TelemetryResult};

/// Default logging target when `RUST_LOG` is not provided.
pub const DEFAULT_LOG_LEVEL: &str = "info";

static BUILD_SHA: OnceCell<String> = OnceCell::new();

/// Configure and install the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if another subscriber has already been installed.
pub fn init_logging(config: &LoggingConfig<'_>) -> TelemetryResult<()> {
    let _ = BUILD_SHA.set(config.build_sha.to_string());
    let filter = build_env_filter(config.level);
    let installed = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_thread_ids(false),
            )
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_thread_ids(false))
            .try_init(),
    };
    installed.map_err(|source| TelemetryError::SubscriberInstall { source })
}

/// Build SHA recorded during logging initialisation.
#[must_use]
pub fn build_sha() -> &'static str {
    BUILD_SHA.get().map_or("dev", String::as_str)
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig<'a> {
    /// Log level directive (e.g., `info`, `netkit_engine=debug`).
    pub level: &'a str,
    /// Output format.
    pub format: LogFormat,
    /// Build identifier recorded in structured logs.
    pub build_sha: &'a str,
}

impl Default for LoggingConfig<'_> {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL,
            format: LogFormat::infer(),
            build_sha: build_sha(),
        }
    }
}

/// Available output formats for the logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Structured JSON objects.
    Json,
    /// Human-readable output.
    Pretty,
}

impl LogFormat {
    /// Pretty in debug builds, JSON otherwise.
    #[must_use]
    pub const fn infer() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }

    /// Parse a configured format name; unknown names fall back to [`LogFormat::infer`].
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "json" => Self::Json,
            "pretty" => Self::Pretty,
            _ => Self::infer(),
        }
    }
}

fn build_env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_names_parse() {
        assert_eq!(LogFormat::from_name("json"), LogFormat::Json);
        assert_eq!(LogFormat::from_name("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::from_name("auto"), LogFormat::infer());
    }

    #[test]
    fn init_logging_installs_subscriber_once() {
        let config = LoggingConfig {
            level: "info",
            format: LogFormat::Pretty,
            build_sha: "abc123",
        };
        let first = init_logging(&config);
        let second = init_logging(&config);
        assert!(first.is_err() || second.is_err());
        assert_eq!(build_sha(), "abc123");
    }
}
