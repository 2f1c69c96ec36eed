//! Management VRF and route scoping.
//!
//! The management interface is moved into its own VRF so its Docker default
//! route lives in a separate table and never competes with the call
//! interface's default route in the main table.

use std::net::Ipv4Addr;
use std::path::Path;

use phoneboot_common::{BootError, BootResult};

use crate::command;
use crate::link::{parse_default_routes, parse_links};

fn isolation_error(iface: &str, message: impl Into<String>) -> BootError {
    BootError::Isolation {
        iface: iface.to_string(),
        message: message.into(),
    }
}

async fn ip(iface: &str, args: &[&str]) -> BootResult<std::process::Output> {
    command::run("ip", args)
        .await
        .map_err(|e| isolation_error(iface, e.to_string()))
}

async fn ip_checked(iface: &str, args: &[&str]) -> BootResult<()> {
    let output = ip(iface, args).await?;
    if !output.status.success() {
        return Err(isolation_error(
            iface,
            format!("ip {} failed: {}", args.join(" "), command::stderr_of(&output)),
        ));
    }
    Ok(())
}

/// Whether a VRF device with this name exists.
pub async fn vrf_exists(name: &str) -> BootResult<bool> {
    let output = ip(name, &["-j", "-d", "link", "show", "dev", name]).await?;
    if !output.status.success() {
        return Ok(false);
    }
    let links = parse_links(&String::from_utf8_lossy(&output.stdout))?;
    Ok(links.iter().any(|l| l.name == name && l.is_vrf()))
}

/// Create a VRF device bound to `table` and bring it up.
pub async fn create_vrf(name: &str, table: u32) -> BootResult<()> {
    tracing::debug!(name, table, "Creating VRF");
    let table = table.to_string();
    ip_checked(name, &["link", "add", name, "type", "vrf", "table", &table]).await?;
    ip_checked(name, &["link", "set", "dev", name, "up"]).await?;
    tracing::info!(name, "VRF created");
    Ok(())
}

/// Current master of an interface.
///
/// # Errors
///
/// Returns [`BootError::Isolation`] if the interface does not exist.
pub async fn link_master(iface: &str) -> BootResult<Option<String>> {
    let output = ip(iface, &["-j", "link", "show", "dev", iface]).await?;
    if !output.status.success() {
        return Err(isolation_error(
            iface,
            format!("interface is gone: {}", command::stderr_of(&output)),
        ));
    }
    let links = parse_links(&String::from_utf8_lossy(&output.stdout))?;
    Ok(links.into_iter().find(|l| l.name == iface).and_then(|l| l.master))
}

/// Enslave an interface to a VRF.
pub async fn set_master(iface: &str, vrf: &str) -> BootResult<()> {
    ip_checked(iface, &["link", "set", "dev", iface, "master", vrf]).await?;
    tracing::info!(iface, vrf, "Interface moved into VRF");
    Ok(())
}

async fn default_routes(dev: &str, table: Option<u32>) -> BootResult<Vec<crate::link::RouteInfo>> {
    let table = table.map_or_else(|| "main".to_string(), |t| t.to_string());
    // Filtering with `dev` makes ip omit the device from its output, so the
    // device is matched here instead.
    let output = ip(dev, &["-j", "-4", "route", "show", "default", "table", &table]).await?;
    if !output.status.success() {
        return Err(isolation_error(
            dev,
            format!("ip route show failed: {}", command::stderr_of(&output)),
        ));
    }
    Ok(parse_default_routes(&String::from_utf8_lossy(&output.stdout))?
        .into_iter()
        .filter(|r| r.dev == dev)
        .collect())
}

/// Whether `table` has a default route via `gateway` on `dev`.
pub async fn has_default_route(dev: &str, gateway: Ipv4Addr, table: u32) -> BootResult<bool> {
    Ok(default_routes(dev, Some(table))
        .await?
        .iter()
        .any(|r| r.gateway == Some(gateway)))
}

/// Install or replace the default route of `table`.
pub async fn replace_default_route(dev: &str, gateway: Ipv4Addr, table: u32) -> BootResult<()> {
    let gateway = gateway.to_string();
    let table = table.to_string();
    ip_checked(
        dev,
        &["-4", "route", "replace", "default", "via", &gateway, "dev", dev, "table", &table],
    )
    .await
}

/// Whether the main table still has a default route on `dev`.
pub async fn has_main_default(dev: &str) -> BootResult<bool> {
    Ok(!default_routes(dev, None).await?.is_empty())
}

/// Remove the main table default route on `dev`.
pub async fn delete_main_default(dev: &str) -> BootResult<()> {
    ip_checked(dev, &["-4", "route", "del", "default", "dev", dev]).await?;
    tracing::info!(dev, "Main table default route removed");
    Ok(())
}

/// Whether IPv6 is disabled on an interface.
pub fn ipv6_disabled(conf_dir: &Path, iface: &str) -> BootResult<bool> {
    let path = conf_dir.join(iface).join("disable_ipv6");
    std::fs::read_to_string(&path)
        .map(|v| v.trim() == "1")
        .map_err(|e| isolation_error(iface, format!("cannot read {}: {e}", path.display())))
}

/// Disable IPv6 on an interface.
pub fn disable_ipv6(conf_dir: &Path, iface: &str) -> BootResult<()> {
    let path = conf_dir.join(iface).join("disable_ipv6");
    std::fs::write(&path, "1")
        .map_err(|e| isolation_error(iface, format!("cannot write {}: {e}", path.display())))?;
    tracing::debug!(iface, "IPv6 disabled");
    Ok(())
}
