//! Resolver file management.
//!
//! Once the call interface is leased, name resolution must go through the
//! call plane. The resolver file is rewritten from the leases, with the
//! configured override taking precedence per address family.

use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use phoneboot_common::{AddressFamily, BootError, BootResult, BootstrapConfig};

use crate::dhcp::Lease;
use crate::lease::{LeaseHook, LeaseOutcome};

#[derive(Debug, Default)]
struct Offered {
    v4: Option<Vec<IpAddr>>,
    v6: Option<Vec<IpAddr>>,
    search: Vec<String>,
}

/// Lease hook that maintains the resolver file.
#[derive(Debug)]
pub struct ResolverHook {
    path: PathBuf,
    override_v4: Vec<IpAddr>,
    override_v6: Vec<IpAddr>,
    offered: Mutex<Offered>,
}

impl ResolverHook {
    /// Create a hook writing `path` with the overrides from `config`.
    pub fn new(path: impl Into<PathBuf>, config: &BootstrapConfig) -> Self {
        Self {
            path: path.into(),
            override_v4: config.dns_override_v4.iter().copied().map(IpAddr::V4).collect(),
            override_v6: config.dns_override_v6.iter().copied().map(IpAddr::V6).collect(),
            offered: Mutex::new(Offered::default()),
        }
    }

    /// Path of the resolver file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Effective resolvers, IPv4 first.
    ///
    /// A family contributes only once it has been leased. Its override, when
    /// configured, replaces whatever the DHCP server offered.
    pub fn nameservers(&self) -> Vec<IpAddr> {
        let offered = self.offered.lock();
        let pick = |leased: &Option<Vec<IpAddr>>, overrides: &[IpAddr]| -> Vec<IpAddr> {
            match leased {
                None => Vec::new(),
                Some(_) if !overrides.is_empty() => overrides.to_vec(),
                Some(servers) => servers.clone(),
            }
        };
        let mut servers = pick(&offered.v4, &self.override_v4);
        servers.extend(pick(&offered.v6, &self.override_v6));
        servers
    }

    /// Render the resolver file.
    pub fn render(&self) -> String {
        let search = self.offered.lock().search.clone();
        let mut content = String::from("# Generated by phoneboot\n");
        if !search.is_empty() {
            content.push_str(&format!("search {}\n", search.join(" ")));
        }
        for server in self.nameservers() {
            content.push_str(&format!("nameserver {server}\n"));
        }
        content
    }

    fn write(&self) -> BootResult<()> {
        let servers = self.nameservers();
        if servers.is_empty() {
            tracing::debug!(path = %self.path.display(), "No resolvers known yet");
            return Ok(());
        }

        // Docker bind-mounts the resolver file, so it is rewritten in place
        // rather than replaced.
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| self.error(&e))?;
        file.write_all(self.render().as_bytes())
            .map_err(|e| self.error(&e))?;

        tracing::info!(
            path = %self.path.display(),
            nameservers = ?servers,
            "Resolver file written"
        );
        Ok(())
    }

    fn error(&self, e: &std::io::Error) -> BootError {
        BootError::Hook {
            hook: self.name().to_string(),
            message: format!("cannot write {}: {e}", self.path.display()),
        }
    }
}

#[async_trait]
impl LeaseHook for ResolverHook {
    fn name(&self) -> &str {
        "resolver"
    }

    async fn on_lease(&self, lease: &Lease) -> BootResult<()> {
        {
            let mut offered = self.offered.lock();
            match lease.family {
                AddressFamily::V4 => offered.v4 = Some(lease.dns.clone()),
                AddressFamily::V6 => offered.v6 = Some(lease.dns.clone()),
            }
            for domain in &lease.search {
                if !offered.search.contains(domain) {
                    offered.search.push(domain.clone());
                }
            }
        }
        self.write()
    }

    async fn on_settled(&self, _outcome: &LeaseOutcome) -> BootResult<()> {
        self.write()
    }
}
