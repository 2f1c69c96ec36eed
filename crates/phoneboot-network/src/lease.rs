//! Lease acquisition for the designated call interface.

use std::sync::Arc;

use async_trait::async_trait;
use phoneboot_common::{AddressFamily, BootError, BootResult, BootstrapConfig};

use crate::classify::NetworkInterface;
use crate::dhcp::{DhcpClient, Lease};

/// Outcome of one lease request.
pub type LeaseResult = Result<Lease, BootError>;

/// Lease results for one interface.
#[derive(Debug)]
pub struct LeaseOutcome {
    /// Interface the leases were requested on.
    pub iface: String,
    /// IPv4 result. Always attempted.
    pub v4: LeaseResult,
    /// IPv6 result, `None` when no IPv6 lease was attempted.
    pub v6: Option<LeaseResult>,
}

impl LeaseOutcome {
    /// The IPv4 lease, if obtained.
    #[must_use]
    pub fn ipv4(&self) -> Option<&Lease> {
        self.v4.as_ref().ok()
    }

    /// The IPv6 lease, if attempted and obtained.
    #[must_use]
    pub fn ipv6(&self) -> Option<&Lease> {
        self.v6.as_ref().and_then(|r| r.as_ref().ok())
    }

    /// Whether an IPv6 lease was requested at all.
    #[must_use]
    pub const fn ipv6_attempted(&self) -> bool {
        self.v6.is_some()
    }

    /// Successful leases of both families.
    pub fn leases(&self) -> impl Iterator<Item = &Lease> {
        self.ipv4().into_iter().chain(self.ipv6())
    }
}

/// Observer of lease events.
///
/// Hook failures never change the lease outcome. They are logged and the
/// remaining hooks still run. Each call is bounded by the configured timeout.
#[async_trait]
pub trait LeaseHook: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Called for every lease as soon as it is obtained.
    async fn on_lease(&self, lease: &Lease) -> BootResult<()>;

    /// Called once after every requested family has settled.
    async fn on_settled(&self, _outcome: &LeaseOutcome) -> BootResult<()> {
        Ok(())
    }
}

/// Whether an IPv6 lease should be requested on `iface`.
#[must_use]
pub const fn should_attempt_ipv6(config: &BootstrapConfig, iface: &NetworkInterface) -> bool {
    !config.legacy && iface.capability.supports_ipv6()
}

/// Drives the DHCP client for both families, each bounded by the configured
/// timeout.
pub struct LeaseAcquirer {
    client: Arc<dyn DhcpClient>,
    hooks: Vec<Arc<dyn LeaseHook>>,
}

impl LeaseAcquirer {
    /// Create an acquirer without hooks.
    pub fn new(client: Arc<dyn DhcpClient>) -> Self {
        Self {
            client,
            hooks: Vec::new(),
        }
    }

    /// Register a lease hook. Hooks run in registration order.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn LeaseHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Request leases on `iface`.
    ///
    /// IPv4 is always requested. IPv6 is requested concurrently when
    /// [`should_attempt_ipv6`] allows it. Each request that does not finish
    /// within `config.timeout` is cancelled and reported as
    /// [`BootError::LeaseTimeout`].
    pub async fn acquire(&self, iface: &NetworkInterface, config: &BootstrapConfig) -> LeaseOutcome {
        let want_v6 = should_attempt_ipv6(config, iface);
        tracing::info!(
            iface = %iface,
            ipv6 = want_v6,
            timeout_secs = config.timeout_secs(),
            "Requesting leases"
        );

        let v4 = self.request(&iface.name, AddressFamily::V4, config);
        let v6 = async {
            if want_v6 {
                Some(self.request(&iface.name, AddressFamily::V6, config).await)
            } else {
                None
            }
        };
        let (v4, v6) = tokio::join!(v4, v6);

        let outcome = LeaseOutcome {
            iface: iface.name.clone(),
            v4,
            v6,
        };

        for hook in &self.hooks {
            match tokio::time::timeout(config.timeout, hook.on_settled(&outcome)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(hook = hook.name(), error = %e, "Lease hook failed"),
                Err(_) => tracing::warn!(
                    hook = hook.name(),
                    timeout_secs = config.timeout_secs(),
                    "Lease hook timed out"
                ),
            }
        }

        outcome
    }

    async fn request(&self, iface: &str, family: AddressFamily, config: &BootstrapConfig) -> LeaseResult {
        let lease = match tokio::time::timeout(config.timeout, self.client.request(iface, family)).await {
            Ok(Ok(lease)) => lease,
            Ok(Err(e)) => {
                tracing::warn!(iface, %family, error = %e, "Lease request failed");
                return Err(e);
            }
            Err(_) => {
                tracing::warn!(iface, %family, timeout_secs = config.timeout_secs(), "Lease request timed out");
                return Err(BootError::LeaseTimeout {
                    iface: iface.to_string(),
                    family: family.to_string(),
                    seconds: config.timeout_secs(),
                });
            }
        };

        tracing::info!(
            iface,
            %family,
            address = %lease.address,
            expiry = ?lease.expiry,
            "Lease obtained"
        );

        for hook in &self.hooks {
            match tokio::time::timeout(config.timeout, hook.on_lease(&lease)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(hook = hook.name(), iface, %family, error = %e, "Lease hook failed");
                }
                Err(_) => tracing::warn!(
                    hook = hook.name(),
                    iface,
                    %family,
                    timeout_secs = config.timeout_secs(),
                    "Lease hook timed out"
                ),
            }
        }

        Ok(lease)
    }
}
