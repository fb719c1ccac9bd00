//! Authentication challenge handling driven by per-request [`AuthDetail`].

use async_trait::async_trait;
use netkit_core::{AuthChallenge, AuthDetail, AuthMethod, AuthResolver, ChallengeDisposition};
use tracing::{debug, warn};

/// Credential attempts allowed per protection space.
pub const MAX_CREDENTIAL_ATTEMPTS: u32 = 3;

/// Answers challenges with the request's credential or pinned certificate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChallengeAcceptor;

#[async_trait]
impl AuthResolver for ChallengeAcceptor {
    async fn resolve(
        &self,
        detail: Option<&AuthDetail>,
        challenge: &AuthChallenge,
    ) -> ChallengeDisposition {
        let Some(detail) = detail else {
            return ChallengeDisposition::PerformDefaultHandling;
        };
        if detail.validate_host && detail.host.as_deref() != Some(challenge.host.as_str()) {
            warn!(host = %challenge.host, "challenge host does not match");
            return ChallengeDisposition::Cancel;
        }

        match (detail.auth_type, challenge.method) {
            (AuthMethod::HttpBasic, AuthMethod::HttpBasic)
            | (AuthMethod::HttpDigest, AuthMethod::HttpDigest) => match &detail.credential {
                Some(credential) if challenge.previous_failure_count < MAX_CREDENTIAL_ATTEMPTS => {
                    ChallengeDisposition::UseCredential(credential.clone())
                }
                Some(_) => {
                    warn!(
                        host = %challenge.host,
                        attempts = challenge.previous_failure_count,
                        "credential rejected too often"
                    );
                    ChallengeDisposition::Cancel
                }
                None => ChallengeDisposition::Cancel,
            },
            (AuthMethod::ServerTrust, AuthMethod::ServerTrust) => evaluate_trust(detail, challenge).await,
            (configured, requested) => {
                debug!(?configured, ?requested, "challenge method not configured");
                ChallengeDisposition::Cancel
            }
        }
    }
}

async fn evaluate_trust(detail: &AuthDetail, challenge: &AuthChallenge) -> ChallengeDisposition {
    let (Some(pinned), Some(presented)) = (&detail.pinned_certificate, &challenge.server_certificate)
    else {
        return ChallengeDisposition::Cancel;
    };
    match tokio::fs::read(pinned).await {
        Ok(expected) if expected == *presented => ChallengeDisposition::TrustServer,
        Ok(_) => {
            warn!(host = %challenge.host, "server certificate does not match pin");
            ChallengeDisposition::Cancel
        }
        Err(error) => {
            warn!(path = %pinned.display(), error = %error, "pinned certificate unreadable");
            ChallengeDisposition::Cancel
        }
    }
}
