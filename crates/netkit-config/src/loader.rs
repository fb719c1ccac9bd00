//! JSON document and environment loading.
//!
//! # Design
//! - Documents are optional: a missing file yields defaults.
//! - Environment overrides run after the document and before validation.
//! - The variable lookup is injectable so tests never touch process state.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::model::{LogFormatSetting, NetKitConfig};

/// Overrides `telemetry.log_level`.
pub const ENV_LOG_LEVEL: &str = "NETKIT_LOG_LEVEL";
/// Overrides `telemetry.log_format` (`auto`, `json`, `pretty`).
pub const ENV_LOG_FORMAT: &str = "NETKIT_LOG_FORMAT";
/// Overrides `storage.download_dir`.
pub const ENV_DOWNLOAD_DIR: &str = "NETKIT_DOWNLOAD_DIR";
/// Overrides `storage.transaction_log`.
pub const ENV_TRANSACTION_LOG: &str = "NETKIT_TRANSACTION_LOG";
/// Overrides `connectivity.waits_for_connectivity`.
pub const ENV_WAITS_FOR_CONNECTIVITY: &str = "NETKIT_WAITS_FOR_CONNECTIVITY";
/// Overrides `connectivity.probe_addr`.
pub const ENV_PROBE_ADDR: &str = "NETKIT_PROBE_ADDR";
/// Overrides `retry.max_retry`.
pub const ENV_MAX_RETRY: &str = "NETKIT_MAX_RETRY";
/// Overrides `retry.codes` with a comma-separated list.
pub const ENV_RETRY_CODES: &str = "NETKIT_RETRY_CODES";

/// Read a configuration document, apply process environment overrides and
/// validate the result.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file cannot be read or parsed, an override
/// is malformed, or validation fails.
pub async fn load_from_path(path: impl AsRef<Path>) -> ConfigResult<NetKitConfig> {
    let mut config = read_document(path.as_ref()).await?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    config.validate()?;
    Ok(config)
}

/// Defaults plus process environment overrides.
///
/// # Errors
///
/// Returns [`ConfigError`] when an override is malformed or validation fails.
pub fn from_env() -> ConfigResult<NetKitConfig> {
    let mut config = NetKitConfig::default();
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    config.validate()?;
    Ok(config)
}

/// Parse the JSON document at `path`, falling back to defaults when it does
/// not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] or [`ConfigError::Parse`].
pub async fn read_document(path: &Path) -> ConfigResult<NetKitConfig> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let config = serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            info!(path = %path.display(), "configuration document loaded");
            Ok(config)
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "configuration document missing; using defaults");
            Ok(NetKitConfig::default())
        }
        Err(source) => Err(ConfigError::Io {
            operation: "config.read",
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Apply `NETKIT_*` overrides resolved through `lookup`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] when a variable does not parse.
pub fn apply_env_overrides<F>(config: &mut NetKitConfig, lookup: F) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(level) = lookup(ENV_LOG_LEVEL) {
        config.telemetry.log_level = level;
    }
    if let Some(format) = lookup(ENV_LOG_FORMAT) {
        config.telemetry.log_format = match format.trim().to_ascii_lowercase().as_str() {
            "auto" => LogFormatSetting::Auto,
            "json" => LogFormatSetting::Json,
            "pretty" => LogFormatSetting::Pretty,
            _ => {
                return Err(ConfigError::invalid(
                    "telemetry",
                    "log_format",
                    Some(format),
                    "unsupported_format",
                ));
            }
        };
    }
    if let Some(dir) = lookup(ENV_DOWNLOAD_DIR) {
        config.storage.download_dir = PathBuf::from(dir);
    }
    if let Some(file) = lookup(ENV_TRANSACTION_LOG) {
        config.storage.transaction_log = (!file.is_empty()).then(|| PathBuf::from(file));
    }
    if let Some(flag) = lookup(ENV_WAITS_FOR_CONNECTIVITY) {
        config.connectivity.waits_for_connectivity =
            parse_env(&flag, "connectivity", "waits_for_connectivity")?;
    }
    if let Some(addr) = lookup(ENV_PROBE_ADDR) {
        config.connectivity.probe_addr = addr;
    }
    if let Some(max_retry) = lookup(ENV_MAX_RETRY) {
        config.retry.max_retry = parse_env(&max_retry, "retry", "max_retry")?;
    }
    if let Some(codes) = lookup(ENV_RETRY_CODES) {
        config.retry.codes = codes
            .split(',')
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(|code| parse_env(code, "retry", "codes"))
            .collect::<ConfigResult<_>>()?;
    }
    Ok(())
}

fn parse_env<T: FromStr>(raw: &str, section: &'static str, field: &'static str) -> ConfigResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::invalid(section, field, Some(raw.to_string()), "parse_failed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[tokio::test]
    async fn missing_document_yields_defaults() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let config = read_document(&dir.path().join("absent.json")).await?;
        assert_eq!(config, NetKitConfig::default());
        Ok(())
    }

    #[tokio::test]
    async fn document_values_are_loaded() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("netkit.json");
        tokio::fs::write(
            &path,
            r#"{
                "common_headers": {"x-app": "demo"},
                "retry": {"codes": [500, 503], "max_retry": 4},
                "storage": {"download_dir": "/var/tmp/dl"}
            }"#,
        )
        .await?;

        let config = read_document(&path).await?;
        assert_eq!(config.retry.max_retry, 4);
        assert!(config.retry.is_retryable(500));
        assert_eq!(config.storage.download_dir, PathBuf::from("/var/tmp/dl"));
        assert_eq!(
            config.common_headers.get("x-app").map(String::as_str),
            Some("demo")
        );
        Ok(())
    }

    #[tokio::test]
    async fn malformed_document_reports_path() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("broken.json");
        tokio::fs::write(&path, "{not json").await?;
        match read_document(&path).await {
            Err(ConfigError::Parse { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected parse error, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn env_overrides_replace_document_values() -> anyhow::Result<()> {
        let mut config = NetKitConfig::default();
        apply_env_overrides(
            &mut config,
            lookup(&[
                (ENV_LOG_LEVEL, "debug"),
                (ENV_LOG_FORMAT, "JSON"),
                (ENV_WAITS_FOR_CONNECTIVITY, "true"),
                (ENV_MAX_RETRY, "5"),
                (ENV_RETRY_CODES, "503, -1001,"),
                (ENV_TRANSACTION_LOG, "/tmp/netkit.log"),
            ]),
        )?;
        assert_eq!(config.telemetry.log_level, "debug");
        assert_eq!(config.telemetry.log_format, LogFormatSetting::Json);
        assert!(config.connectivity.waits_for_connectivity);
        assert_eq!(config.retry.max_retry, 5);
        assert_eq!(config.retry.codes.len(), 2);
        assert!(config.retry.is_retryable(-1001));
        assert_eq!(
            config.storage.transaction_log,
            Some(PathBuf::from("/tmp/netkit.log"))
        );
        Ok(())
    }

    #[test]
    fn malformed_env_values_are_rejected() {
        let mut config = NetKitConfig::default();
        let result = apply_env_overrides(&mut config, lookup(&[(ENV_MAX_RETRY, "many")]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidField {
                field: "max_retry",
                reason: "parse_failed",
                ..
            })
        ));

        let result = apply_env_overrides(&mut config, lookup(&[(ENV_LOG_FORMAT, "xml")]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidField {
                field: "log_format",
                ..
            })
        ));
    }
}
