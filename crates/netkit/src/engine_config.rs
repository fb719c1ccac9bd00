#![allow(clippy::redundant_pub_crate)]

//! Mapping from the configuration document to engine runtime settings.

use http::HeaderMap;
use netkit_config::NetKitConfig;
use netkit_core::parse_header;
use netkit_engine::{EngineSettings, RetrySettings};

use crate::error::{NetKitError, NetKitResult};

/// Derive engine settings from a validated configuration.
pub(crate) fn engine_settings(config: &NetKitConfig) -> NetKitResult<EngineSettings> {
    let mut common_headers = HeaderMap::new();
    for (name, value) in &config.common_headers {
        let (name, value) =
            parse_header(name, value).map_err(|source| NetKitError::Header { source })?;
        common_headers.insert(name, value);
    }

    Ok(EngineSettings {
        retry: RetrySettings {
            codes: config.retry.codes.clone(),
            max_retry: config.retry.max_retry,
            backoff_step: config.retry.backoff_step(),
            initial_backoff: config.retry.initial_backoff(),
        },
        download_dir: config.storage.download_dir.clone(),
        common_headers,
        waits_for_connectivity: config.connectivity.waits_for_connectivity,
        connectivity_timeout: config.connectivity.timeout(),
        ..EngineSettings::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn config_sections_map_onto_settings() -> anyhow::Result<()> {
        let mut config = NetKitConfig::default();
        config
            .common_headers
            .insert("x-client".into(), "netkit".into());
        config.retry.codes.extend([503, -1001]);
        config.retry.max_retry = 4;
        config.retry.initial_backoff_secs = 1;
        config.connectivity.waits_for_connectivity = true;
        config.connectivity.timeout_secs = 9;

        let settings = engine_settings(&config)?;
        assert_eq!(settings.common_headers["x-client"], "netkit");
        assert!(settings.retry.is_retryable(503));
        assert!(settings.retry.is_retryable(-1001));
        assert_eq!(settings.retry.max_retry, 4);
        assert_eq!(settings.retry.initial_backoff, Duration::from_secs(1));
        assert_eq!(settings.retry.backoff_step, Duration::from_secs(2));
        assert!(settings.waits_for_connectivity);
        assert_eq!(settings.connectivity_timeout, Duration::from_secs(9));
        assert_eq!(settings.download_dir, config.storage.download_dir);
        Ok(())
    }

    #[test]
    fn header_pairs_parse_into_typed_values() -> anyhow::Result<()> {
        let (name, value) = parse_header("X-Client", "netkit")?;
        assert_eq!(name.as_str(), "x-client");
        assert_eq!(value, "netkit");
        assert!(parse_header("x-client", "line\nbreak").is_err());
        Ok(())
    }

    #[test]
    fn unparseable_headers_are_rejected() {
        let mut config = NetKitConfig::default();
        config.common_headers.insert("bad header".into(), "x".into());
        assert!(matches!(
            engine_settings(&config),
            Err(NetKitError::Header { .. })
        ));
    }
}
