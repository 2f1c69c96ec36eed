//! External lease event scripts.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use phoneboot_common::{BootError, BootResult};
use tokio::process::Command;

use crate::dhcp::Lease;
use crate::lease::LeaseHook;

/// Runs an executable for every lease.
///
/// The lease is passed through the environment:
///
/// | Variable | Value |
/// |---|---|
/// | `PHONEBOOT_IFACE` | interface name |
/// | `PHONEBOOT_FAMILY` | `ipv4` or `ipv6` |
/// | `PHONEBOOT_ADDRESS` | leased address |
/// | `PHONEBOOT_EXPIRY` | RFC 3339 expiry, empty for infinite leases |
/// | `PHONEBOOT_DNS` | space separated resolvers offered by the server |
#[derive(Debug, Clone)]
pub struct ScriptHook {
    program: PathBuf,
    name: String,
}

impl ScriptHook {
    /// Create a hook running `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let name = program.display().to_string();
        Self { program, name }
    }

    /// Environment handed to the script.
    #[must_use]
    pub fn environment(lease: &Lease) -> Vec<(&'static str, String)> {
        vec![
            ("PHONEBOOT_IFACE", lease.iface.clone()),
            ("PHONEBOOT_FAMILY", lease.family.to_string()),
            ("PHONEBOOT_ADDRESS", lease.address.to_string()),
            (
                "PHONEBOOT_EXPIRY",
                lease.expiry.map(|e| e.to_rfc3339()).unwrap_or_default(),
            ),
            (
                "PHONEBOOT_DNS",
                lease
                    .dns
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
        ]
    }
}

#[async_trait]
impl LeaseHook for ScriptHook {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_lease(&self, lease: &Lease) -> BootResult<()> {
        let output = Command::new(&self.program)
            .envs(Self::environment(lease))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BootError::Hook {
                hook: self.name.clone(),
                message: format!("failed to run: {e}"),
            })?;

        if !output.status.success() {
            return Err(BootError::Hook {
                hook: self.name.clone(),
                message: format!(
                    "exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        tracing::debug!(hook = %self.name, iface = %lease.iface, family = %lease.family, "Lease hook ran");
        Ok(())
    }
}
