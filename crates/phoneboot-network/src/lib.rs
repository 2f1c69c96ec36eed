//! # phoneboot-network
//!
//! Network bring-up for a containerized SIP phone.
//!
//! This crate classifies the container's interfaces into the Docker
//! management interface and the call interfaces, isolates the two planes
//! from each other, and leases addresses on the designated call interface.

#![warn(missing_docs)]

pub mod classify;
pub mod command;
pub mod dhcp;
pub mod dns;
pub mod firewall;
pub mod hooks;
pub mod isolate;
pub mod lease;
pub mod link;
pub mod routing;

pub use classify::{
    AddressCapability, Classification, InterfaceRole, InterfaceState, NetworkInterface, classify,
};
pub use dhcp::{DhcpClient, Dhclient, Lease};
pub use dns::ResolverHook;
pub use hooks::ScriptHook;
pub use isolate::{
    IsolationEnforcer, IsolationPolicy, IsolationReport, IsolationRule, PolicyEntry, RuleApplier,
    RuleFailure, SystemApplier,
};
pub use lease::{LeaseAcquirer, LeaseHook, LeaseOutcome, LeaseResult, should_attempt_ipv6};
pub use link::{LinkInfo, LinkInspector, LinkSnapshot, RouteInfo, SystemInspector};
