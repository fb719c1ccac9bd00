//! Shared DTOs exchanged between the engine and its collaborators.

use std::fmt::{self, Debug, Display, Formatter};
use std::path::PathBuf;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RequestError, transport_code};
use netkit_events::RequestType;

/// Caller-facing request identifier.
pub type RequestId = Uuid;

/// Transport-assigned identifier of an in-flight operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl Display for TaskId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Response metadata recorded when a transport operation completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMeta {
    /// HTTP status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
}

impl ResponseMeta {
    /// Metadata with a status and no headers.
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
        }
    }

    /// Whether the status is in `[200, 299]`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Error reported by the transport for a completed operation.
#[derive(Clone, PartialEq, Eq)]
pub struct TransportFailure {
    /// Transport error code (see [`transport_code`]).
    pub code: i64,
    /// Human readable description from the transport.
    pub message: String,
    /// Opaque resume token attached to cancelled downloads.
    pub resume_data: Option<Vec<u8>>,
}

impl TransportFailure {
    /// Failure with a code and message.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            resume_data: None,
        }
    }

    /// Cancellation as produced by a caller-initiated cancel.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(transport_code::CANCELLED, "cancelled")
    }

    /// Attach a resume token.
    #[must_use]
    pub fn with_resume_data(mut self, resume_data: Vec<u8>) -> Self {
        self.resume_data = Some(resume_data);
        self
    }

    /// Whether the failure represents a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        self.code == transport_code::CANCELLED
    }

    /// Caller-visible error kind for this failure.
    #[must_use]
    pub const fn kind(&self) -> RequestError {
        RequestError::from_code(self.code)
    }
}

impl Debug for TransportFailure {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TransportFailure")
            .field("code", &self.code)
            .field("message", &self.message)
            .field(
                "resume_data_len",
                &self.resume_data.as_ref().map(Vec::len),
            )
            .finish()
    }
}

/// Operation currently known to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveOperation {
    /// Transport identifier.
    pub task_id: TaskId,
    /// Operation kind.
    pub request_type: RequestType,
}

/// Authentication scheme requested by a server or configured by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// RFC 7617 basic authentication.
    HttpBasic,
    /// RFC 7616 digest authentication.
    HttpDigest,
    /// NTLM.
    Ntlm,
    /// SPNEGO negotiate.
    Negotiate,
    /// TLS client certificate.
    ClientCertificate,
    /// Server certificate evaluation.
    ServerTrust,
}

/// Authentication challenge raised by the transport for a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    /// Challenge scheme.
    pub method: AuthMethod,
    /// Host that issued the challenge.
    pub host: String,
    /// Number of failed attempts for this protection space.
    pub previous_failure_count: u32,
    /// DER bytes of the server's leaf certificate, when the transport evaluated
    /// the chain successfully.
    pub server_certificate: Option<Vec<u8>>,
}

/// Username/password pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Account name.
    pub user: String,
    /// Secret.
    pub password: String,
}

impl Credential {
    /// Build a credential.
    #[must_use]
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Value for an `Authorization: Basic` header.
    #[must_use]
    pub fn basic_authorization(&self) -> String {
        let encoded = STANDARD.encode(format!("{}:{}", self.user, self.password));
        format!("Basic {encoded}")
    }
}

impl Debug for Credential {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credential")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Answer to an [`AuthChallenge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeDisposition {
    /// Answer with the supplied credential.
    UseCredential(Credential),
    /// Accept the server's certificate chain.
    TrustServer,
    /// Abort the challenge (and usually the request).
    Cancel,
    /// Let the transport apply its default handling.
    PerformDefaultHandling,
}

/// Authentication settings attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthDetail {
    /// Scheme this detail answers.
    pub auth_type: AuthMethod,
    /// Require the challenge host to equal [`AuthDetail::host`].
    pub validate_host: bool,
    /// Expected host when validation is enabled.
    pub host: Option<String>,
    /// Credential for credential-based schemes.
    pub credential: Option<Credential>,
    /// Pinned certificate file (DER) for server trust.
    pub pinned_certificate: Option<PathBuf>,
}

impl AuthDetail {
    /// Credential-based detail for basic or digest schemes.
    #[must_use]
    pub fn with_credential(auth_type: AuthMethod, credential: Credential) -> Self {
        Self {
            auth_type,
            validate_host: false,
            host: None,
            credential: Some(credential),
            pinned_certificate: None,
        }
    }

    /// Server-trust detail pinned to a certificate file.
    #[must_use]
    pub fn pinned(certificate: PathBuf) -> Self {
        Self {
            auth_type: AuthMethod::ServerTrust,
            validate_host: false,
            host: None,
            credential: None,
            pinned_certificate: Some(certificate),
        }
    }

    /// Require challenges to come from `host`.
    #[must_use]
    pub fn validating_host(mut self, host: impl Into<String>) -> Self {
        self.validate_host = true;
        self.host = Some(host.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_authorization_encodes_user_and_password() {
        let credential = Credential::new("Aladdin", "open sesame");
        assert_eq!(
            credential.basic_authorization(),
            "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ=="
        );
    }

    #[test]
    fn credential_debug_redacts_password() {
        let rendered = format!("{:?}", Credential::new("user", "hunter2"));
        assert!(rendered.contains("user"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn transport_failure_reports_cancellation() {
        let failure = TransportFailure::cancelled().with_resume_data(vec![1, 2, 3]);
        assert!(failure.is_cancelled());
        assert_eq!(failure.kind(), RequestError::UserCancelled);
        assert!(format!("{failure:?}").contains("resume_data_len: Some(3)"));
    }

    #[test]
    fn host_validation_builder_sets_fields() {
        let detail = AuthDetail::with_credential(
            AuthMethod::HttpBasic,
            Credential::new("user", "secret"),
        )
        .validating_host("api.example.com");
        assert!(detail.validate_host);
        assert_eq!(detail.host.as_deref(), Some("api.example.com"));
    }
}
