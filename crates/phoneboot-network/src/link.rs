//! Link and route inspection.
//!
//! Reads the interface table through `ip -j` so the classifier can work on a
//! plain snapshot. The JSON parsers are kept separate from the command calls
//! so they can be tested against captured output.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use phoneboot_common::{BootError, BootResult};
use serde::Deserialize;

use crate::command;

/// One network link as seen inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    /// Interface name.
    pub name: String,
    /// Administrative state is up.
    pub up: bool,
    /// Loopback device.
    pub loopback: bool,
    /// Link kind (`vrf`, `veth`, ...), when reported.
    pub kind: Option<String>,
    /// Master device, if enslaved.
    pub master: Option<String>,
    /// IPv6 is enabled on the link.
    pub ipv6_capable: bool,
}

impl LinkInfo {
    /// Whether the link is a VRF master device.
    #[must_use]
    pub fn is_vrf(&self) -> bool {
        self.kind.as_deref() == Some("vrf")
    }
}

/// An IPv4 default route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    /// Outgoing device.
    pub dev: String,
    /// Next hop.
    pub gateway: Option<Ipv4Addr>,
    /// Routing table, `None` for the main table.
    pub table: Option<String>,
}

impl RouteInfo {
    /// Whether the route lives in the main table.
    #[must_use]
    pub fn in_main_table(&self) -> bool {
        matches!(self.table.as_deref(), None | Some("main" | "254"))
    }

    /// Whether the route lives in the given numbered table.
    #[must_use]
    pub fn in_table(&self, table: u32) -> bool {
        self.table.as_deref() == Some(table.to_string().as_str())
    }
}

/// Point-in-time view of links and default routes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkSnapshot {
    /// All links.
    pub links: Vec<LinkInfo>,
    /// IPv4 default routes across all tables.
    pub default_routes: Vec<RouteInfo>,
}

impl LinkSnapshot {
    /// Find a link by name.
    #[must_use]
    pub fn link(&self, name: &str) -> Option<&LinkInfo> {
        self.links.iter().find(|l| l.name == name)
    }
}

/// Source of link snapshots.
#[async_trait]
pub trait LinkInspector: Send + Sync {
    /// Take a snapshot of the current links and default routes.
    async fn snapshot(&self) -> BootResult<LinkSnapshot>;
}

/// Inspector backed by `ip` and `/proc/sys`.
#[derive(Debug, Clone)]
pub struct SystemInspector {
    ipv6_conf: PathBuf,
}

impl SystemInspector {
    /// Create an inspector reading the real system.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ipv6_conf("/proc/sys/net/ipv6/conf")
    }

    /// Read IPv6 per-interface settings from another directory.
    #[must_use]
    pub fn with_ipv6_conf(path: impl Into<PathBuf>) -> Self {
        Self {
            ipv6_conf: path.into(),
        }
    }
}

impl Default for SystemInspector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LinkInspector for SystemInspector {
    async fn snapshot(&self) -> BootResult<LinkSnapshot> {
        let output = command::run("ip", ["-j", "-d", "link", "show"]).await?;
        if !output.status.success() {
            return Err(BootError::Internal {
                message: format!("ip link show failed: {}", command::stderr_of(&output)),
            });
        }
        let mut links = parse_links(&String::from_utf8_lossy(&output.stdout))?;
        for link in &mut links {
            link.ipv6_capable = ipv6_enabled(&self.ipv6_conf, &link.name);
        }

        let output = command::run("ip", ["-j", "-4", "route", "show", "table", "all"]).await?;
        if !output.status.success() {
            return Err(BootError::Internal {
                message: format!("ip route show failed: {}", command::stderr_of(&output)),
            });
        }
        let default_routes = parse_default_routes(&String::from_utf8_lossy(&output.stdout))?;

        tracing::debug!(
            links = links.len(),
            default_routes = default_routes.len(),
            "Link snapshot taken"
        );
        Ok(LinkSnapshot {
            links,
            default_routes,
        })
    }
}

/// Whether IPv6 is enabled on an interface, per `disable_ipv6`.
pub fn ipv6_enabled(conf_dir: &Path, iface: &str) -> bool {
    std::fs::read_to_string(conf_dir.join(iface).join("disable_ipv6"))
        .map(|v| v.trim() == "0")
        .unwrap_or(false)
}

#[derive(Deserialize)]
struct IpLink {
    ifname: String,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    master: Option<String>,
    #[serde(default)]
    link_type: Option<String>,
    #[serde(default)]
    linkinfo: Option<IpLinkInfo>,
}

#[derive(Deserialize)]
struct IpLinkInfo {
    #[serde(default)]
    info_kind: Option<String>,
}

#[derive(Deserialize)]
struct IpRoute {
    dst: String,
    #[serde(default)]
    gateway: Option<String>,
    #[serde(default)]
    dev: Option<String>,
    #[serde(default)]
    table: Option<serde_json::Value>,
    #[serde(default, rename = "type")]
    route_type: Option<String>,
}

/// Parse `ip -j -d link show` output.
///
/// IPv6 capability is left `false`; it is not part of this output.
///
/// # Errors
///
/// Returns [`BootError::Serialization`] for malformed JSON.
pub fn parse_links(json: &str) -> BootResult<Vec<LinkInfo>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let raw: Vec<IpLink> = serde_json::from_str(json)?;
    Ok(raw
        .into_iter()
        .map(|l| {
            let up = l.flags.iter().any(|f| f == "UP");
            let loopback =
                l.link_type.as_deref() == Some("loopback") || l.flags.iter().any(|f| f == "LOOPBACK");
            LinkInfo {
                name: l.ifname,
                up,
                loopback,
                kind: l.linkinfo.and_then(|i| i.info_kind),
                master: l.master,
                ipv6_capable: false,
            }
        })
        .collect())
}

/// Parse `ip -j -4 route show ...` output, keeping only default routes.
///
/// # Errors
///
/// Returns [`BootError::Serialization`] for malformed JSON.
pub fn parse_default_routes(json: &str) -> BootResult<Vec<RouteInfo>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let raw: Vec<IpRoute> = serde_json::from_str(json)?;
    Ok(raw
        .into_iter()
        .filter(|r| r.dst == "default")
        .filter(|r| matches!(r.route_type.as_deref(), None | Some("unicast")))
        .filter_map(|r| {
            let dev = r.dev?;
            let table = r.table.map(|t| match t {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            });
            Some(RouteInfo {
                dev,
                gateway: r.gateway.and_then(|g| g.parse().ok()),
                table,
            })
        })
        .collect())
}
