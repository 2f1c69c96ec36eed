//! Bootstrap configuration.
//!
//! The configuration is resolved once at startup and handed by reference to
//! every component. Nothing reads the environment after that point.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::time::Duration;

use crate::{BootError, BootResult};

/// Default bound, in seconds, for each lease and readiness wait.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Largest accepted timeout, one day.
pub const MAX_TIMEOUT_SECS: u64 = 86_400;

/// Default name of the management VRF.
pub const DEFAULT_MGMT_VRF: &str = "mgmt";

/// Default routing table of the management VRF.
pub const DEFAULT_MGMT_TABLE: u32 = 10;

/// Immutable bootstrap configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    /// Bound for each lease, readiness and interface wait.
    pub timeout: Duration,
    /// IPv4-only operation. IPv6 leases are never requested when set.
    pub legacy: bool,
    /// Resolvers replacing the IPv4 resolvers offered by DHCP.
    pub dns_override_v4: Vec<Ipv4Addr>,
    /// Resolvers replacing the IPv6 resolvers offered by DHCP.
    pub dns_override_v6: Vec<Ipv6Addr>,
    /// Explicitly designated call interface.
    pub call_iface: Option<String>,
    /// Exact number of call interfaces required, if any.
    pub expected_call_ifaces: Option<usize>,
    /// VRF the management interface is enslaved to.
    pub mgmt_vrf: String,
    /// Routing table backing the management VRF.
    pub mgmt_table: u32,
    /// Executable run on each lease event.
    pub lease_hook: Option<PathBuf>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            legacy: false,
            dns_override_v4: Vec::new(),
            dns_override_v6: Vec::new(),
            call_iface: None,
            expected_call_ifaces: None,
            mgmt_vrf: DEFAULT_MGMT_VRF.to_string(),
            mgmt_table: DEFAULT_MGMT_TABLE,
            lease_hook: None,
        }
    }
}

impl BootstrapConfig {
    /// Set the wait bound in seconds.
    #[must_use]
    pub const fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    /// Enable or disable legacy (IPv4-only) mode.
    #[must_use]
    pub const fn with_legacy(mut self, legacy: bool) -> Self {
        self.legacy = legacy;
        self
    }

    /// Override the IPv4 resolvers.
    #[must_use]
    pub fn with_dns_v4(mut self, servers: Vec<Ipv4Addr>) -> Self {
        self.dns_override_v4 = servers;
        self
    }

    /// Override the IPv6 resolvers.
    #[must_use]
    pub fn with_dns_v6(mut self, servers: Vec<Ipv6Addr>) -> Self {
        self.dns_override_v6 = servers;
        self
    }

    /// Designate the call interface explicitly.
    #[must_use]
    pub fn with_call_iface(mut self, iface: impl Into<String>) -> Self {
        self.call_iface = Some(iface.into());
        self
    }

    /// Require an exact call interface count.
    #[must_use]
    pub const fn with_expected_call_ifaces(mut self, count: usize) -> Self {
        self.expected_call_ifaces = Some(count);
        self
    }

    /// Set the management VRF name and table.
    #[must_use]
    pub fn with_mgmt_vrf(mut self, name: impl Into<String>, table: u32) -> Self {
        self.mgmt_vrf = name.into();
        self.mgmt_table = table;
        self
    }

    /// Set the lease event script.
    #[must_use]
    pub fn with_lease_hook(mut self, path: impl Into<PathBuf>) -> Self {
        self.lease_hook = Some(path.into());
        self
    }

    /// Timeout in whole seconds, for diagnostics.
    #[must_use]
    pub const fn timeout_secs(&self) -> u64 {
        self.timeout.as_secs()
    }

    /// Check the values that cannot be expressed by the types alone.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::Config`] for a zero timeout, a timeout above
    /// [`MAX_TIMEOUT_SECS`], an empty VRF name,
    /// the main routing table as VRF table, or a zero call interface count.
    pub fn validate(&self) -> BootResult<()> {
        if self.timeout.is_zero() {
            return Err(BootError::Config {
                message: "TIMEOUT must be at least 1 second".to_string(),
            });
        }
        if self.timeout > Duration::from_secs(MAX_TIMEOUT_SECS) {
            return Err(BootError::Config {
                message: format!("TIMEOUT must not exceed {MAX_TIMEOUT_SECS} seconds"),
            });
        }
        if self.mgmt_vrf.trim().is_empty() {
            return Err(BootError::Config {
                message: "management VRF name must not be empty".to_string(),
            });
        }
        // 253-255 are the kernel's default/main/local tables.
        if matches!(self.mgmt_table, 0 | 253..=255) {
            return Err(BootError::Config {
                message: format!("table {} is reserved by the kernel", self.mgmt_table),
            });
        }
        if self.expected_call_ifaces == Some(0) {
            return Err(BootError::Config {
                message: "at least one call interface must be expected".to_string(),
            });
        }
        Ok(())
    }
}

/// Parse a `yes`/`no` style switch.
///
/// # Errors
///
/// Returns a message naming the accepted spellings.
pub fn parse_yes_no(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "yes" | "y" | "true" | "1" | "on" => Ok(true),
        "no" | "n" | "false" | "0" | "off" | "" => Ok(false),
        other => Err(format!("expected yes or no, got '{other}'")),
    }
}
