//! Error kinds surfaced to callers and errors raised while building requests.
//!
//! # Design
//!
//! - `RequestError` is the caller-visible taxonomy; it is derived either from an
//!   HTTP status or from a transport error code.
//! - Display strings are the user-facing messages.
//! - `RequestBuildError` keeps constant messages and carries context in fields.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transport error codes understood by the engine.
///
/// The values follow the URL-loading convention of negative integers, so a
/// transport wrapping a platform stack can forward them unchanged.
pub mod transport_code {
    /// Catch-all for failures without a more specific code.
    pub const UNKNOWN: i64 = -1;
    /// Operation cancelled by the caller or the engine.
    pub const CANCELLED: i64 = -999;
    /// A resume token could not be used.
    pub const CANNOT_RESUME_DOWNLOAD: i64 = -1000;
    /// Request exceeded its timeout.
    pub const TIMED_OUT: i64 = -1001;
    /// Host did not accept the connection.
    pub const CANNOT_CONNECT_TO_HOST: i64 = -1004;
    /// Resource could not be obtained.
    pub const RESOURCE_UNAVAILABLE: i64 = -1008;
    /// No network path is available.
    pub const NOT_CONNECTED_TO_INTERNET: i64 = -1009;
    /// Roaming data is disabled.
    pub const INTERNATIONAL_ROAMING_OFF: i64 = -1018;
    /// A call is blocking the data connection.
    pub const CALL_IS_ACTIVE: i64 = -1019;
    /// Device policy forbids data.
    pub const DATA_NOT_ALLOWED: i64 = -1020;
}

/// Failure kinds delivered through completion callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestError {
    /// 3xx response.
    #[error("Request doesn't seem to be proper.")]
    Redirection,
    /// 4xx response or a request that could not be built locally.
    #[error("Request doesn't seem to be proper.")]
    ClientError,
    /// 5xx response.
    #[error("Server seems to be down.")]
    ServerError,
    /// Transport timeout.
    #[error("Request timed out.")]
    TimedOut,
    /// Host refused or could not be reached.
    #[error("Server is unreachable.")]
    CannotConnectToHost,
    /// Resource unavailable on the transport.
    #[error("Resource unavailable")]
    ResourceUnavailable,
    /// No network path.
    #[error("Internet is unavailable.")]
    NotConnectedToInternet,
    /// Roaming data disabled.
    #[error("Data is not enabled while your are roaming.")]
    InternationalRoamingOff,
    /// Active call blocks data.
    #[error("You are on call")]
    CallIsActive,
    /// Data disabled on the device.
    #[error("Your seem to be offline as data is not allowed in this device.")]
    DataNotAllowed,
    /// Cancelled by the caller.
    #[error("User cancelled request")]
    UserCancelled,
    /// Download could not be resumed.
    #[error("Download resume failed")]
    CanNotResumeDownload,
    /// Anything not covered above.
    #[error("System Error")]
    Unknown,
}

impl RequestError {
    /// Map an HTTP status or transport error code onto an error kind.
    #[must_use]
    pub const fn from_code(code: i64) -> Self {
        match code {
            300..=399 => Self::Redirection,
            400..=499 => Self::ClientError,
            500..=599 => Self::ServerError,
            transport_code::CANCELLED => Self::UserCancelled,
            transport_code::CANNOT_RESUME_DOWNLOAD => Self::CanNotResumeDownload,
            transport_code::TIMED_OUT => Self::TimedOut,
            transport_code::CANNOT_CONNECT_TO_HOST => Self::CannotConnectToHost,
            transport_code::RESOURCE_UNAVAILABLE => Self::ResourceUnavailable,
            transport_code::NOT_CONNECTED_TO_INTERNET => Self::NotConnectedToInternet,
            transport_code::INTERNATIONAL_ROAMING_OFF => Self::InternationalRoamingOff,
            transport_code::CALL_IS_ACTIVE => Self::CallIsActive,
            transport_code::DATA_NOT_ALLOWED => Self::DataNotAllowed,
            _ => Self::Unknown,
        }
    }

    /// Map an HTTP status onto an error kind.
    #[must_use]
    pub fn from_status(status: http::StatusCode) -> Self {
        Self::from_code(i64::from(status.as_u16()))
    }

    /// Machine-friendly label used in events and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Redirection => "redirection",
            Self::ClientError => "client_error",
            Self::ServerError => "server_error",
            Self::TimedOut => "timed_out",
            Self::CannotConnectToHost => "cannot_connect_to_host",
            Self::ResourceUnavailable => "resource_unavailable",
            Self::NotConnectedToInternet => "not_connected_to_internet",
            Self::InternationalRoamingOff => "international_roaming_off",
            Self::CallIsActive => "call_is_active",
            Self::DataNotAllowed => "data_not_allowed",
            Self::UserCancelled => "user_cancelled",
            Self::CanNotResumeDownload => "can_not_resume_download",
            Self::Unknown => "unknown",
        }
    }
}

/// Reasons a request description could not be turned into a wire request.
#[derive(Debug, Error)]
pub enum RequestBuildError {
    /// Base URL and path did not form a valid URL.
    #[error("invalid request url")]
    InvalidUrl {
        /// Concatenated URL text.
        url: String,
        /// Parser failure.
        source: url::ParseError,
    },
    /// A header name or value was rejected.
    #[error("invalid request header")]
    InvalidHeader {
        /// Offending header name.
        name: String,
    },
    /// Body could not be serialised.
    #[error("request body encoding failed")]
    BodyEncoding {
        /// Underlying serializer error.
        source: serde_json::Error,
    },
    /// Encryption was requested without an encryptor or the encryptor failed.
    #[error("request body encryption failed")]
    Encryption {
        /// Static reason for the failure.
        reason: &'static str,
    },
    /// Encryption key or IV had the wrong length.
    #[error("invalid encryption parameters")]
    InvalidEncryptionParameters {
        /// Field with the wrong length.
        field: &'static str,
        /// Expected byte length.
        expected: usize,
        /// Actual byte length.
        actual: usize,
    },
}

impl RequestBuildError {
    /// Every build failure surfaces to callers as a client error.
    #[must_use]
    pub const fn kind(&self) -> RequestError {
        RequestError::ClientError
    }
}
