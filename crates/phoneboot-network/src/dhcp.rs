//! DHCP client integration.
//!
//! The DHCP protocol itself is left to `dhclient`. This module starts it for a
//! single family and reads the resulting lease back from its lease database.

use std::ffi::OsString;
use std::fmt::Write as _;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use phoneboot_common::{AddressFamily, BootError, BootPaths, BootResult, BootstrapConfig};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// A DHCP-assigned address and its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Interface the lease belongs to.
    pub iface: String,
    /// Address family.
    pub family: AddressFamily,
    /// Assigned address.
    pub address: IpAddr,
    /// End of validity, `None` for infinite leases.
    pub expiry: Option<DateTime<Utc>>,
    /// Resolvers offered by the server.
    pub dns: Vec<IpAddr>,
    /// Search domains offered by the server.
    pub search: Vec<String>,
}

/// Something that can obtain a lease for one interface and family.
///
/// Implementations may take arbitrarily long. Callers bound them with a
/// timeout and drop the future to cancel.
#[async_trait]
pub trait DhcpClient: Send + Sync {
    /// Request a lease.
    async fn request(&self, iface: &str, family: AddressFamily) -> BootResult<Lease>;
}

/// `dhclient` from ISC.
///
/// Each run gets a generated configuration file. It carries the lease
/// timeout and, when resolvers are overridden, `supersede` statements so that
/// the daemon's later renewals cannot bring the offered resolvers back.
#[derive(Debug, Clone)]
pub struct Dhclient {
    binary: PathBuf,
    paths: BootPaths,
    timeout_secs: u64,
    dns_v4: Vec<Ipv4Addr>,
    dns_v6: Vec<Ipv6Addr>,
}

impl Dhclient {
    /// Create a client using `binary`, keeping lease and pid files under `paths`.
    pub fn new(binary: impl Into<PathBuf>, paths: BootPaths) -> Self {
        let defaults = BootstrapConfig::default();
        Self {
            binary: binary.into(),
            paths,
            timeout_secs: defaults.timeout_secs(),
            dns_v4: Vec::new(),
            dns_v6: Vec::new(),
        }
    }

    /// Take the timeout and resolver overrides from `config`.
    #[must_use]
    pub fn with_config(mut self, config: &BootstrapConfig) -> Self {
        self.timeout_secs = config.timeout_secs();
        self.dns_v4.clone_from(&config.dns_override_v4);
        self.dns_v6.clone_from(&config.dns_override_v6);
        self
    }

    /// Contents of the generated `dhclient.conf` for `family`.
    #[must_use]
    pub fn client_config(&self, family: AddressFamily) -> String {
        // One second past our own deadline, so the caller's timeout fires first.
        let mut conf = format!(
            "# Generated by phoneboot\ntimeout {};\n",
            self.timeout_secs.saturating_add(1)
        );

        let (request, supersede, servers) = match family {
            AddressFamily::V4 => (
                "subnet-mask, broadcast-address, time-offset, routers, domain-name, domain-name-servers, domain-search, host-name",
                "domain-name-servers",
                join(&self.dns_v4),
            ),
            AddressFamily::V6 => (
                "dhcp6.name-servers, dhcp6.domain-search",
                "dhcp6.name-servers",
                join(&self.dns_v6),
            ),
        };
        let _ = writeln!(conf, "request {request};");
        if !servers.is_empty() {
            let _ = writeln!(conf, "supersede {supersede} {servers};");
        }
        conf
    }

    /// Arguments for a one-shot request on `iface`.
    #[must_use]
    pub fn request_args(&self, iface: &str, family: AddressFamily) -> Vec<OsString> {
        vec![
            Self::family_flag(family).into(),
            "-1".into(),
            "-v".into(),
            "-cf".into(),
            self.paths.client_config(iface, family).into(),
            "-lf".into(),
            self.paths.lease_file(iface, family).into(),
            "-pf".into(),
            self.paths.pid_file(iface, family).into(),
            iface.into(),
        ]
    }

    const fn family_flag(family: AddressFamily) -> &'static str {
        match family {
            AddressFamily::V4 => "-4",
            AddressFamily::V6 => "-6",
        }
    }

    /// Stop a client left over from an earlier boot of this container.
    async fn stop_previous(&self, iface: &str, family: AddressFamily) {
        let pid_file = self.paths.pid_file(iface, family);
        if !pid_file.exists() {
            return;
        }
        tracing::debug!(iface, %family, "Stopping previous DHCP client");
        let status = Command::new(&self.binary)
            .arg(Self::family_flag(family))
            .arg("-x")
            .arg("-pf")
            .arg(&pid_file)
            .arg(iface)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .await;
        if let Err(e) = status {
            tracing::warn!(iface, %family, error = %e, "Failed to stop previous DHCP client");
        }
    }
}

#[async_trait]
impl DhcpClient for Dhclient {
    async fn request(&self, iface: &str, family: AddressFamily) -> BootResult<Lease> {
        self.paths.create_dirs()?;
        self.stop_previous(iface, family).await;

        let lease_file = self.paths.lease_file(iface, family);
        std::fs::write(
            self.paths.client_config(iface, family),
            self.client_config(family),
        )?;

        // dhclient forks a daemon that keeps the lease renewed. Its stdout must
        // not be a pipe we wait on, or the wait would last as long as the daemon.
        let status = Command::new(&self.binary)
            .args(self.request_args(iface, family))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| BootError::Lease {
                iface: iface.to_string(),
                family: family.to_string(),
                message: format!("failed to run {}: {e}", self.binary.display()),
            })?;

        if !status.success() {
            return Err(BootError::Lease {
                iface: iface.to_string(),
                family: family.to_string(),
                message: format!("{} exited with {status}", self.binary.display()),
            });
        }

        let content = std::fs::read_to_string(&lease_file)?;
        parse_lease_file(&content, iface, family).ok_or_else(|| BootError::Lease {
            iface: iface.to_string(),
            family: family.to_string(),
            message: format!("no lease recorded in {}", lease_file.display()),
        })
    }
}

fn join<T: std::fmt::Display>(servers: &[T]) -> String {
    servers
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse the newest lease for `iface` from a dhclient lease database.
#[must_use]
pub fn parse_lease_file(content: &str, iface: &str, family: AddressFamily) -> Option<Lease> {
    let keyword = match family {
        AddressFamily::V4 => "lease",
        AddressFamily::V6 => "lease6",
    };
    lease_blocks(content, keyword)
        .iter()
        .rev()
        .find_map(|block| parse_block(block, iface, family))
}

/// Bodies of the top level `<keyword> { ... }` blocks, one statement per line.
fn lease_blocks(content: &str, keyword: &str) -> Vec<Vec<String>> {
    let mut blocks = Vec::new();
    let mut current: Option<Vec<String>> = None;
    let mut depth = 0usize;

    for raw in content.lines() {
        let line = raw.trim();

        let Some(block) = current.as_mut() else {
            let opens = line
                .strip_prefix(keyword)
                .is_some_and(|rest| rest.trim_start().starts_with('{'));
            if opens {
                current = Some(Vec::new());
                depth = 1;
            }
            continue;
        };

        depth += line.matches('{').count();
        depth = depth.saturating_sub(line.matches('}').count());
        if depth == 0 {
            blocks.extend(current.take());
        } else {
            block.push(line.to_string());
        }
    }

    blocks
}

fn statement<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(key)?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let rest = rest.split_once(" #").map_or(rest, |(stmt, _)| stmt);
    Some(rest.trim().trim_end_matches(';').trim())
}

fn unquote_list(value: &str) -> Vec<String> {
    value
        .split([',', ' '])
        .map(|s| s.trim().trim_matches('"').trim_end_matches('.'))
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_addresses(value: &str) -> Vec<IpAddr> {
    value
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}

/// `expire 4 2026/10/18 13:00:00`, `expire epoch 1760792400` or `expire never`.
fn parse_v4_expiry(value: &str) -> Option<DateTime<Utc>> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    match parts.as_slice() {
        ["never"] => None,
        ["epoch", secs, ..] => DateTime::from_timestamp(secs.parse().ok()?, 0),
        [.., date, time] => NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y/%m/%d %H:%M:%S")
            .ok()
            .map(|n| n.and_utc()),
        _ => None,
    }
}

fn parse_block(block: &[String], iface: &str, family: AddressFamily) -> Option<Lease> {
    let mut address: Option<IpAddr> = None;
    let mut expiry = None;
    let mut dns = Vec::new();
    let mut search = Vec::new();
    let mut in_iaaddr = false;
    let mut starts: Option<i64> = None;
    let mut max_life: Option<i64> = None;

    for line in block {
        if let Some(name) = statement(line, "interface") {
            if name.trim_matches('"') != iface {
                return None;
            }
            continue;
        }

        match family {
            AddressFamily::V4 => {
                if let Some(v) = statement(line, "fixed-address") {
                    address = v.parse().ok();
                } else if let Some(v) = statement(line, "expire") {
                    expiry = parse_v4_expiry(v);
                } else if let Some(v) = statement(line, "option domain-name-servers") {
                    dns = parse_addresses(v);
                } else if let Some(v) = statement(line, "option domain-search") {
                    search = unquote_list(v);
                } else if let Some(v) = statement(line, "option domain-name") {
                    if search.is_empty() {
                        search = unquote_list(v);
                    }
                }
            }
            AddressFamily::V6 => {
                if let Some(v) = statement(line, "iaaddr") {
                    address = v.trim_end_matches('{').trim().parse().ok();
                    in_iaaddr = true;
                } else if in_iaaddr && line.starts_with('}') {
                    in_iaaddr = false;
                } else if in_iaaddr {
                    if let Some(v) = statement(line, "starts") {
                        starts = v.parse().ok();
                    } else if let Some(v) = statement(line, "max-life") {
                        max_life = v.parse().ok();
                    }
                } else if let Some(v) = statement(line, "option dhcp6.name-servers") {
                    dns = parse_addresses(v);
                } else if let Some(v) = statement(line, "option dhcp6.domain-search") {
                    search = unquote_list(v);
                }
            }
        }
    }

    if family == AddressFamily::V6 {
        // 0xffffffff is the DHCPv6 infinite lifetime.
        expiry = match (starts, max_life) {
            (Some(s), Some(l)) if l != i64::from(u32::MAX) => {
                s.checked_add(l).and_then(|end| DateTime::from_timestamp(end, 0))
            }
            _ => None,
        };
    }

    Some(Lease {
        iface: iface.to_string(),
        family,
        address: address?,
        expiry,
        dns,
        search,
    })
}
