//! Optional collaborators supplied when building the facade.

use std::sync::Arc;

use netkit_core::{AuthResolver, BodyEncryptor};
use netkit_engine::ConnectivityProbe;

/// Collaborators that override the facade's defaults.
#[derive(Clone)]
pub struct NetKitOptions {
    pub(crate) resolver: Option<Arc<dyn AuthResolver>>,
    pub(crate) encryptor: Option<Arc<dyn BodyEncryptor>>,
    pub(crate) probe: Option<Arc<dyn ConnectivityProbe>>,
    pub(crate) polls_connectivity: bool,
}

impl Default for NetKitOptions {
    fn default() -> Self {
        Self {
            resolver: None,
            encryptor: None,
            probe: None,
            polls_connectivity: true,
        }
    }
}

impl NetKitOptions {
    /// Defaults: challenge acceptor, no encryptor, TCP probe polling.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer authentication challenges with `resolver` instead of the
    /// built-in acceptor.
    #[must_use]
    pub fn resolver(mut self, resolver: Arc<dyn AuthResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Encrypt bodies of requests that carry an encryption descriptor.
    #[must_use]
    pub fn encryptor(mut self, encryptor: Arc<dyn BodyEncryptor>) -> Self {
        self.encryptor = Some(encryptor);
        self
    }

    /// Poll `probe` instead of the configured TCP address.
    #[must_use]
    pub fn probe(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Never poll; reachability changes only through
    /// [`NetworkMonitor::report`](netkit_engine::NetworkMonitor::report).
    #[must_use]
    pub const fn manual_connectivity(mut self) -> Self {
        self.polls_connectivity = false;
        self
    }
}
