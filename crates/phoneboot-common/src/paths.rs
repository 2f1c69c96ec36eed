//! Standard filesystem paths for phoneboot.

use std::path::PathBuf;

use crate::AddressFamily;

/// Default runtime directory for lease, pid and report files.
pub const DEFAULT_RUNTIME_DIR: &str = "/run/phoneboot";

/// Default resolver configuration file.
pub const DEFAULT_RESOLV_CONF: &str = "/etc/resolv.conf";

/// Standard paths used during bootstrap.
#[derive(Debug, Clone)]
pub struct BootPaths {
    /// Runtime directory (default: /run/phoneboot).
    pub runtime: PathBuf,
    /// Resolver configuration written after leasing.
    pub resolv_conf: PathBuf,
}

impl BootPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths under a custom runtime directory.
    #[must_use]
    pub fn with_runtime(runtime: impl Into<PathBuf>) -> Self {
        Self {
            runtime: runtime.into(),
            resolv_conf: PathBuf::from(DEFAULT_RESOLV_CONF),
        }
    }

    /// Use a different resolver file.
    #[must_use]
    pub fn with_resolv_conf(mut self, path: impl Into<PathBuf>) -> Self {
        self.resolv_conf = path.into();
        self
    }

    /// DHCP lease database for an interface and family.
    #[must_use]
    pub fn lease_file(&self, iface: &str, family: AddressFamily) -> PathBuf {
        self.runtime
            .join(format!("dhclient-{iface}.{}.leases", family.tag()))
    }

    /// DHCP client pid file for an interface and family.
    #[must_use]
    pub fn pid_file(&self, iface: &str, family: AddressFamily) -> PathBuf {
        self.runtime.join(format!("dhclient-{iface}.{}.pid", family.tag()))
    }

    /// Generated DHCP client configuration for an interface and family.
    #[must_use]
    pub fn client_config(&self, iface: &str, family: AddressFamily) -> PathBuf {
        self.runtime.join(format!("dhclient-{iface}.{}.conf", family.tag()))
    }

    /// Boot report written at the end of the bootstrap.
    #[must_use]
    pub fn report(&self) -> PathBuf {
        self.runtime.join("report.json")
    }

    /// Create the runtime directory.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.runtime)
    }
}

impl Default for BootPaths {
    fn default() -> Self {
        Self::with_runtime(DEFAULT_RUNTIME_DIR)
    }
}
