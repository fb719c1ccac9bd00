//! Validation for configuration documents.

use http::{HeaderName, HeaderValue};

use crate::defaults::{BACKOFF_LIMIT_SECS, MAX_RETRY_LIMIT, PROBE_INTERVAL_FLOOR_MS};
use crate::error::{ConfigError, ConfigResult};
use crate::model::{ConnectivityConfig, NetKitConfig, RetryPolicy};

impl NetKitConfig {
    /// Check every section for values the engine cannot honour.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::InvalidField`] encountered.
    pub fn validate(&self) -> ConfigResult<()> {
        validate_headers(self)?;
        validate_retry(&self.retry)?;
        validate_connectivity(&self.connectivity)?;
        if self.events.capacity == 0 {
            return Err(ConfigError::invalid(
                "events",
                "capacity",
                Some("0".to_string()),
                "must_be_positive",
            ));
        }
        if self.telemetry.log_level.trim().is_empty() {
            return Err(ConfigError::invalid(
                "telemetry",
                "log_level",
                None,
                "must_not_be_empty",
            ));
        }
        Ok(())
    }
}

fn validate_headers(config: &NetKitConfig) -> ConfigResult<()> {
    for (name, value) in &config.common_headers {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            return Err(ConfigError::invalid(
                "common_headers",
                "name",
                Some(name.clone()),
                "invalid_header_name",
            ));
        }
        if HeaderValue::from_str(value).is_err() {
            return Err(ConfigError::invalid(
                "common_headers",
                "value",
                Some(name.clone()),
                "invalid_header_value",
            ));
        }
    }
    Ok(())
}

fn validate_retry(retry: &RetryPolicy) -> ConfigResult<()> {
    if let Some(code) = retry
        .codes
        .iter()
        .find(|code| !(**code < 0 || (100..=599).contains(*code)))
    {
        return Err(ConfigError::invalid(
            "retry",
            "codes",
            Some(code.to_string()),
            "must_be_http_status_or_transport_code",
        ));
    }
    if retry.max_retry > MAX_RETRY_LIMIT {
        return Err(ConfigError::invalid(
            "retry",
            "max_retry",
            Some(retry.max_retry.to_string()),
            "exceeds_limit",
        ));
    }
    if retry.backoff_step_secs > BACKOFF_LIMIT_SECS {
        return Err(ConfigError::invalid(
            "retry",
            "backoff_step_secs",
            Some(retry.backoff_step_secs.to_string()),
            "exceeds_limit",
        ));
    }
    if retry.initial_backoff_secs > BACKOFF_LIMIT_SECS {
        return Err(ConfigError::invalid(
            "retry",
            "initial_backoff_secs",
            Some(retry.initial_backoff_secs.to_string()),
            "exceeds_limit",
        ));
    }
    Ok(())
}

fn validate_connectivity(connectivity: &ConnectivityConfig) -> ConfigResult<()> {
    if connectivity.probe_interval_ms < PROBE_INTERVAL_FLOOR_MS {
        return Err(ConfigError::invalid(
            "connectivity",
            "probe_interval_ms",
            Some(connectivity.probe_interval_ms.to_string()),
            "below_floor",
        ));
    }
    if connectivity.timeout_secs == 0 {
        return Err(ConfigError::invalid(
            "connectivity",
            "timeout_secs",
            Some("0".to_string()),
            "must_be_positive",
        ));
    }
    let valid_addr = connectivity
        .probe_addr
        .rsplit_once(':')
        .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
    if !valid_addr {
        return Err(ConfigError::invalid(
            "connectivity",
            "probe_addr",
            Some(connectivity.probe_addr.clone()),
            "must_be_host_and_port",
        ));
    }
    Ok(())
}
