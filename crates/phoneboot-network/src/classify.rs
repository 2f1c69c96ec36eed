//! Interface classification.
//!
//! Splits the container's links into one management interface and one or more
//! call interfaces, and designates the call interface that gets leased.

use std::cmp::Ordering;
use std::fmt;
use std::net::Ipv4Addr;

use phoneboot_common::{BootError, BootResult, BootstrapConfig};
use serde::{Deserialize, Serialize};

use crate::link::{LinkInfo, LinkSnapshot};

/// Role of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceRole {
    /// Docker-provided control plane interface.
    Management,
    /// SIP/RTP interface.
    Call,
}

/// Address families an interface can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressCapability {
    /// IPv4 only.
    #[serde(rename = "v4")]
    V4,
    /// IPv4 and IPv6.
    #[serde(rename = "v4+v6")]
    V4V6,
}

impl AddressCapability {
    /// Whether IPv6 is available.
    #[must_use]
    pub const fn supports_ipv6(self) -> bool {
        matches!(self, Self::V4V6)
    }
}

/// Configuration state of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceState {
    /// Nothing applied yet.
    Unconfigured,
    /// A lease was obtained.
    Leased,
    /// Isolation or leasing failed.
    Failed,
}

/// A classified interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    /// Interface name.
    pub name: String,
    /// Assigned role.
    pub role: InterfaceRole,
    /// Address family capability.
    pub capability: AddressCapability,
    /// Current state.
    pub state: InterfaceState,
}

impl NetworkInterface {
    fn from_link(link: &LinkInfo, role: InterfaceRole) -> Self {
        Self {
            name: link.name.clone(),
            role,
            capability: if link.ipv6_capable {
                AddressCapability::V4V6
            } else {
                AddressCapability::V4
            },
            state: InterfaceState::Unconfigured,
        }
    }
}

impl fmt::Display for NetworkInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Result of classifying a link snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    /// The management interface.
    pub management: NetworkInterface,
    /// Docker gateway reachable through the management interface.
    pub management_gateway: Option<Ipv4Addr>,
    /// All call interfaces in natural name order.
    pub calls: Vec<NetworkInterface>,
    designated: usize,
}

impl Classification {
    /// The call interface that gets leased.
    #[must_use]
    pub fn designated_call(&self) -> &NetworkInterface {
        &self.calls[self.designated]
    }

    /// Call interfaces other than the designated one.
    pub fn auxiliary_calls(&self) -> impl Iterator<Item = &NetworkInterface> {
        self.calls
            .iter()
            .enumerate()
            .filter(move |(i, _)| *i != self.designated)
            .map(|(_, c)| c)
    }

    /// Management followed by every call interface.
    pub fn interfaces(&self) -> impl Iterator<Item = &NetworkInterface> {
        std::iter::once(&self.management).chain(self.calls.iter())
    }

    /// Whether a failure on this interface must abort the bootstrap.
    #[must_use]
    pub fn is_essential(&self, iface: &str) -> bool {
        iface == self.management.name || iface == self.designated_call().name
    }

    /// Update the state of an interface by name.
    pub fn set_state(&mut self, iface: &str, state: InterfaceState) {
        if self.management.name == iface {
            self.management.state = state;
        }
        if let Some(call) = self.calls.iter_mut().find(|c| c.name == iface) {
            call.state = state;
        }
    }
}

/// Classify a snapshot.
///
/// The management interface is the one already enslaved to the management VRF
/// or, on a first boot, the device of the main table default route. Every
/// other up link that is neither loopback nor a VRF device is a call
/// interface.
///
/// # Errors
///
/// Returns [`BootError::Classification`] when no management interface can be
/// found, no call interface is up, the call interface count differs from the
/// expected count, or the explicitly designated call interface is missing.
pub fn classify(snapshot: &LinkSnapshot, config: &BootstrapConfig) -> BootResult<Classification> {
    let vrf = config.mgmt_vrf.as_str();

    let management = snapshot
        .links
        .iter()
        .find(|l| l.master.as_deref() == Some(vrf) && !l.is_vrf())
        .or_else(|| {
            snapshot
                .default_routes
                .iter()
                .find(|r| r.in_main_table())
                .and_then(|r| snapshot.link(&r.dev))
        })
        .ok_or_else(|| BootError::Classification {
            message: "no interface carries the Docker default route".to_string(),
        })?;

    let management_gateway = snapshot
        .default_routes
        .iter()
        .filter(|r| r.dev == management.name)
        .find(|r| r.in_table(config.mgmt_table))
        .or_else(|| {
            snapshot
                .default_routes
                .iter()
                .find(|r| r.dev == management.name && r.in_main_table())
        })
        .and_then(|r| r.gateway);

    let mut candidates: Vec<&LinkInfo> = snapshot
        .links
        .iter()
        .filter(|l| l.name != management.name)
        .filter(|l| l.up && !l.loopback && !l.is_vrf())
        .filter(|l| l.master.as_deref() != Some(vrf))
        .collect();
    candidates.sort_by(|a, b| natural_cmp(&a.name, &b.name));

    if candidates.is_empty() {
        return Err(BootError::Classification {
            message: format!("no call interface is up besides management interface '{}'", management.name),
        });
    }

    if let Some(expected) = config.expected_call_ifaces {
        if candidates.len() != expected {
            return Err(BootError::Classification {
                message: format!(
                    "expected {expected} call interface(s), found {}: {}",
                    candidates.len(),
                    names(&candidates)
                ),
            });
        }
    }

    let designated = match config.call_iface.as_deref() {
        Some(wanted) => candidates
            .iter()
            .position(|l| l.name == wanted)
            .ok_or_else(|| BootError::Classification {
                message: format!(
                    "designated call interface '{wanted}' is not among the up interfaces: {}",
                    names(&candidates)
                ),
            })?,
        None => 0,
    };

    let classification = Classification {
        management: NetworkInterface::from_link(management, InterfaceRole::Management),
        management_gateway,
        calls: candidates
            .into_iter()
            .map(|l| NetworkInterface::from_link(l, InterfaceRole::Call))
            .collect(),
        designated,
    };

    tracing::info!(
        management = %classification.management,
        call = %classification.designated_call(),
        calls = classification.calls.len(),
        "Interfaces classified"
    );
    Ok(classification)
}

fn names(links: &[&LinkInfo]) -> String {
    links
        .iter()
        .map(|l| l.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Compare interface names so that `eth2` sorts before `eth10`.
#[must_use]
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    fn split(name: &str) -> (&str, Option<u64>) {
        let prefix_len = name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
        let (prefix, digits) = name.split_at(prefix_len);
        (prefix, digits.parse().ok())
    }

    let (pa, na) = split(a);
    let (pb, nb) = split(b);
    pa.cmp(pb).then(na.cmp(&nb)).then_with(|| a.cmp(b))
}
