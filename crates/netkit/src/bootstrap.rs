//! Process-level setup helpers for embedders.

use std::path::Path;

use netkit_config::{LogFormatSetting, NetKitConfig, TelemetryConfig};
use netkit_telemetry::{LogFormat, LoggingConfig, build_sha};

use crate::error::{NetKitError, NetKitResult};

/// Load configuration from `path`, or from defaults when no path is given.
/// Environment overrides are applied and the result validated either way.
///
/// # Errors
///
/// Returns [`NetKitError::Config`] when the document cannot be read, an
/// override is malformed, or validation fails.
pub async fn load_config(path: Option<&Path>) -> NetKitResult<NetKitConfig> {
    let loaded = match path {
        Some(path) => netkit_config::load_from_path(path).await,
        None => netkit_config::from_env(),
    };
    loaded.map_err(|source| NetKitError::Config {
        operation: "load",
        source,
    })
}

/// Install the global tracing subscriber described by `config`.
///
/// # Errors
///
/// Returns [`NetKitError::Telemetry`] when a subscriber is already installed.
pub fn init_logging(config: &TelemetryConfig) -> NetKitResult<()> {
    netkit_telemetry::init_logging(&LoggingConfig {
        level: &config.log_level,
        format: log_format(config.log_format),
        build_sha: build_sha(),
    })
    .map_err(|source| NetKitError::telemetry("init_logging", source))
}

const fn log_format(setting: LogFormatSetting) -> LogFormat {
    match setting {
        LogFormatSetting::Auto => LogFormat::infer(),
        LogFormatSetting::Json => LogFormat::Json,
        LogFormatSetting::Pretty => LogFormat::Pretty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn format_settings_map_to_logger_formats() {
        assert_eq!(log_format(LogFormatSetting::Json), LogFormat::Json);
        assert_eq!(log_format(LogFormatSetting::Pretty), LogFormat::Pretty);
        assert_eq!(log_format(LogFormatSetting::Auto), LogFormat::infer());
    }

    #[tokio::test]
    async fn documents_load_and_invalid_ones_are_rejected() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("netkit.json");
        tokio::fs::write(&path, br#"{ "retry": { "codes": [503], "max_retry": 3 } }"#).await?;
        let config = load_config(Some(&path)).await?;
        assert!(config.retry.is_retryable(503));

        tokio::fs::write(&path, br#"{ "events": { "capacity": 0 } }"#).await?;
        assert!(matches!(
            load_config(Some(&path)).await,
            Err(NetKitError::Config { operation: "load", .. })
        ));
        Ok(())
    }
}
