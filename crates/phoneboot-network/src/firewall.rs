//! Forwarding filters between the management and call planes.
//!
//! Rules are tagged with a comment so they can be found again, and every add
//! is preceded by an `-C` check so re-running never duplicates a rule.

use phoneboot_common::{AddressFamily, BootError, BootResult};

use crate::command;

/// Comment attached to every rule phoneboot installs.
pub const RULE_COMMENT: &str = "phoneboot-isolation";

/// Filter action for a forward rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOp {
    /// Check whether the rule exists.
    Check,
    /// Append the rule.
    Append,
}

impl RuleOp {
    const fn as_flag(self) -> &'static str {
        match self {
            Self::Check => "-C",
            Self::Append => "-A",
        }
    }
}

/// Filter binary for a family.
#[must_use]
pub const fn binary(family: AddressFamily) -> &'static str {
    match family {
        AddressFamily::V4 => "iptables",
        AddressFamily::V6 => "ip6tables",
    }
}

/// Arguments for a DROP rule on traffic forwarded from `inbound` to `outbound`.
#[must_use]
pub fn forward_drop_args(op: RuleOp, inbound: &str, outbound: &str) -> Vec<String> {
    [
        "-w",
        op.as_flag(),
        "FORWARD",
        "-i",
        inbound,
        "-o",
        outbound,
        "-m",
        "comment",
        "--comment",
        RULE_COMMENT,
        "-j",
        "DROP",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

/// Whether the forward DROP rule is already installed.
///
/// # Errors
///
/// Returns [`BootError::Isolation`] when the filter tool cannot evaluate the
/// rule at all (missing binary, unknown interface syntax, lock timeout).
pub async fn forward_drop_exists(
    family: AddressFamily,
    inbound: &str,
    outbound: &str,
) -> BootResult<bool> {
    let output = command::run(binary(family), forward_drop_args(RuleOp::Check, inbound, outbound))
        .await
        .map_err(|e| BootError::Isolation {
            iface: outbound.to_string(),
            message: e.to_string(),
        })?;

    match output.status.code() {
        Some(0) => Ok(true),
        // 1 means "no such rule".
        Some(1) => Ok(false),
        _ => Err(BootError::Isolation {
            iface: outbound.to_string(),
            message: format!(
                "{} -C failed: {}",
                binary(family),
                command::stderr_of(&output)
            ),
        }),
    }
}

/// Install the forward DROP rule.
///
/// # Errors
///
/// Returns [`BootError::Isolation`] when the rule is rejected.
pub async fn add_forward_drop(family: AddressFamily, inbound: &str, outbound: &str) -> BootResult<()> {
    let output = command::run(binary(family), forward_drop_args(RuleOp::Append, inbound, outbound))
        .await
        .map_err(|e| BootError::Isolation {
            iface: outbound.to_string(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(BootError::Isolation {
            iface: outbound.to_string(),
            message: format!(
                "Failed to add forward rule: {}",
                command::stderr_of(&output)
            ),
        });
    }

    tracing::debug!(%family, inbound, outbound, "Forward drop rule added");
    Ok(())
}
