//! Isolation of the management plane from the call plane.
//!
//! The policy is derived from a [`Classification`] as an ordered list of
//! rules. Each rule is probed before it is applied, so enforcing the same
//! policy twice leaves the system exactly as enforcing it once.

use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use phoneboot_common::{AddressFamily, BootError, BootResult, BootstrapConfig};
use serde::Serialize;

use crate::classify::Classification;
use crate::{firewall, routing};

/// A single routing or filtering rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum IsolationRule {
    /// Create the management VRF.
    CreateVrf {
        /// VRF device name.
        name: String,
        /// Routing table of the VRF.
        table: u32,
    },
    /// Enslave an interface to a VRF.
    EnslaveToVrf {
        /// Interface to move.
        iface: String,
        /// Target VRF.
        vrf: String,
    },
    /// Default route inside the VRF table.
    VrfDefaultRoute {
        /// VRF table.
        table: u32,
        /// Next hop.
        gateway: Ipv4Addr,
        /// Outgoing device.
        dev: String,
    },
    /// No main table default route through this device.
    DropMainDefault {
        /// Device whose main default route is removed.
        dev: String,
    },
    /// Drop traffic forwarded from `inbound` to `outbound`.
    DropForward {
        /// Filter family.
        family: AddressFamily,
        /// Ingress interface.
        inbound: String,
        /// Egress interface.
        outbound: String,
    },
    /// Disable IPv6 on an interface.
    DisableIpv6 {
        /// Interface to restrict.
        iface: String,
    },
}

impl fmt::Display for IsolationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateVrf { name, table } => write!(f, "vrf {name} table {table}"),
            Self::EnslaveToVrf { iface, vrf } => write!(f, "{iface} master {vrf}"),
            Self::VrfDefaultRoute {
                table,
                gateway,
                dev,
            } => write!(f, "default via {gateway} dev {dev} table {table}"),
            Self::DropMainDefault { dev } => write!(f, "no main default dev {dev}"),
            Self::DropForward {
                family,
                inbound,
                outbound,
            } => write!(f, "{family} forward {inbound} -> {outbound} drop"),
            Self::DisableIpv6 { iface } => write!(f, "ipv6 off {iface}"),
        }
    }
}

/// A rule and the interface whose isolation it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyEntry {
    /// Interface the rule isolates.
    pub subject: String,
    /// The rule.
    #[serde(flatten)]
    pub rule: IsolationRule,
}

/// Ordered rules derived from a classification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IsolationPolicy {
    entries: Vec<PolicyEntry>,
}

impl IsolationPolicy {
    /// Derive the policy for a classification.
    #[must_use]
    pub fn derive(classification: &Classification, config: &BootstrapConfig) -> Self {
        let mgmt = classification.management.name.as_str();
        let mut policy = Self::default();

        policy.push(
            mgmt,
            IsolationRule::CreateVrf {
                name: config.mgmt_vrf.clone(),
                table: config.mgmt_table,
            },
        );
        policy.push(
            mgmt,
            IsolationRule::EnslaveToVrf {
                iface: mgmt.to_string(),
                vrf: config.mgmt_vrf.clone(),
            },
        );
        if let Some(gateway) = classification.management_gateway {
            policy.push(
                mgmt,
                IsolationRule::VrfDefaultRoute {
                    table: config.mgmt_table,
                    gateway,
                    dev: mgmt.to_string(),
                },
            );
        }
        policy.push(
            mgmt,
            IsolationRule::DropMainDefault {
                dev: mgmt.to_string(),
            },
        );

        for call in &classification.calls {
            let mut families = vec![AddressFamily::V4];
            if !config.legacy && call.capability.supports_ipv6() {
                families.push(AddressFamily::V6);
            }
            for family in families {
                for (inbound, outbound) in [(mgmt, call.name.as_str()), (call.name.as_str(), mgmt)] {
                    policy.push(
                        &call.name,
                        IsolationRule::DropForward {
                            family,
                            inbound: inbound.to_string(),
                            outbound: outbound.to_string(),
                        },
                    );
                }
            }
            if config.legacy && call.capability.supports_ipv6() {
                policy.push(
                    &call.name,
                    IsolationRule::DisableIpv6 {
                        iface: call.name.clone(),
                    },
                );
            }
        }

        policy
    }

    fn push(&mut self, subject: &str, rule: IsolationRule) {
        self.entries.push(PolicyEntry {
            subject: subject.to_string(),
            rule,
        });
    }

    /// Rules in application order.
    #[must_use]
    pub fn entries(&self) -> &[PolicyEntry] {
        &self.entries
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the policy has no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Primitive that probes and applies single rules.
#[async_trait]
pub trait RuleApplier: Send + Sync {
    /// Whether the rule is already in effect.
    async fn is_applied(&self, rule: &IsolationRule) -> BootResult<bool>;

    /// Put the rule into effect.
    async fn apply(&self, rule: &IsolationRule) -> BootResult<()>;
}

/// Applier backed by `ip`, `iptables` and `/proc/sys`.
#[derive(Debug, Clone)]
pub struct SystemApplier {
    ipv6_conf: PathBuf,
}

impl SystemApplier {
    /// Create an applier acting on the real system.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ipv6_conf: PathBuf::from("/proc/sys/net/ipv6/conf"),
        }
    }
}

impl Default for SystemApplier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuleApplier for SystemApplier {
    async fn is_applied(&self, rule: &IsolationRule) -> BootResult<bool> {
        match rule {
            IsolationRule::CreateVrf { name, .. } => routing::vrf_exists(name).await,
            IsolationRule::EnslaveToVrf { iface, vrf } => {
                Ok(routing::link_master(iface).await?.as_deref() == Some(vrf.as_str()))
            }
            IsolationRule::VrfDefaultRoute {
                table,
                gateway,
                dev,
            } => routing::has_default_route(dev, *gateway, *table).await,
            IsolationRule::DropMainDefault { dev } => {
                Ok(!routing::has_main_default(dev).await?)
            }
            IsolationRule::DropForward {
                family,
                inbound,
                outbound,
            } => firewall::forward_drop_exists(*family, inbound, outbound).await,
            IsolationRule::DisableIpv6 { iface } => routing::ipv6_disabled(&self.ipv6_conf, iface),
        }
    }

    async fn apply(&self, rule: &IsolationRule) -> BootResult<()> {
        match rule {
            IsolationRule::CreateVrf { name, table } => routing::create_vrf(name, *table).await,
            IsolationRule::EnslaveToVrf { iface, vrf } => routing::set_master(iface, vrf).await,
            IsolationRule::VrfDefaultRoute {
                table,
                gateway,
                dev,
            } => routing::replace_default_route(dev, *gateway, *table).await,
            IsolationRule::DropMainDefault { dev } => routing::delete_main_default(dev).await,
            IsolationRule::DropForward {
                family,
                inbound,
                outbound,
            } => firewall::add_forward_drop(*family, inbound, outbound).await,
            IsolationRule::DisableIpv6 { iface } => routing::disable_ipv6(&self.ipv6_conf, iface),
        }
    }
}

/// A rule that could not be put into effect.
#[derive(Debug)]
pub struct RuleFailure {
    /// Interface the rule isolates.
    pub iface: String,
    /// The rule.
    pub rule: IsolationRule,
    /// Why it failed.
    pub error: BootError,
}

/// Result of enforcing a policy.
#[derive(Debug, Default)]
pub struct IsolationReport {
    /// Rules newly applied.
    pub applied: usize,
    /// Rules found already in effect.
    pub unchanged: usize,
    /// Rules that failed.
    pub failures: Vec<RuleFailure>,
}

impl IsolationReport {
    /// Interfaces with at least one failed rule.
    #[must_use]
    pub fn failed_interfaces(&self) -> BTreeSet<&str> {
        self.failures.iter().map(|f| f.iface.as_str()).collect()
    }

    /// Whether every rule is in effect.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Applies isolation policies.
pub struct IsolationEnforcer {
    applier: Arc<dyn RuleApplier>,
}

impl IsolationEnforcer {
    /// Create an enforcer on top of a rule applier.
    pub fn new(applier: Arc<dyn RuleApplier>) -> Self {
        Self { applier }
    }

    /// Apply every rule of the policy, collecting failures per interface.
    ///
    /// A failed rule does not stop the remaining rules. Deciding whether a
    /// failure is fatal is left to the caller.
    pub async fn enforce(&self, policy: &IsolationPolicy) -> IsolationReport {
        let mut report = IsolationReport::default();

        for entry in policy.entries() {
            let result = match self.applier.is_applied(&entry.rule).await {
                Ok(true) => {
                    tracing::debug!(rule = %entry.rule, "Rule already in effect");
                    report.unchanged += 1;
                    continue;
                }
                Ok(false) => self.applier.apply(&entry.rule).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    tracing::debug!(rule = %entry.rule, "Rule applied");
                    report.applied += 1;
                }
                Err(e) => {
                    let error = match e {
                        e @ BootError::Isolation { .. } => e,
                        other => BootError::Isolation {
                            iface: entry.subject.clone(),
                            message: other.to_string(),
                        },
                    };
                    tracing::warn!(
                        iface = %entry.subject,
                        rule = %entry.rule,
                        error = %error,
                        "Isolation rule failed"
                    );
                    report.failures.push(RuleFailure {
                        iface: entry.subject.clone(),
                        rule: entry.rule.clone(),
                        error,
                    });
                }
            }
        }

        tracing::info!(
            applied = report.applied,
            unchanged = report.unchanged,
            failed = report.failures.len(),
            "Isolation policy enforced"
        );
        report
    }
}
