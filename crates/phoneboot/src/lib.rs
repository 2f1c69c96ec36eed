//! # Phoneboot
//!
//! Network bootstrap for a containerized SIP phone.
//!
//! A phone container starts with Docker's management interface plus one or
//! more call interfaces attached by the lab orchestrator. Phoneboot
//! classifies them, isolates the management plane in its own VRF, leases
//! the call interface over DHCP, starts SSH for operators and finally execs
//! the SIP agent.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use phoneboot::admin::SshService;
//! use phoneboot::agent::ExecAgent;
//! use phoneboot::boot::{Collaborators, Orchestrator};
//! use phoneboot_common::{BootPaths, BootstrapConfig};
//! use phoneboot_network::{Dhclient, LeaseAcquirer, SystemApplier, SystemInspector};
//!
//! # async fn example() {
//! let config = BootstrapConfig::default().with_timeout_secs(30);
//! let parts = Collaborators {
//!     inspector: Arc::new(SystemInspector::new()),
//!     applier: Arc::new(SystemApplier::new()),
//!     leases: LeaseAcquirer::new(Arc::new(Dhclient::new("dhclient", BootPaths::new()))),
//!     admin: Arc::new(SshService::new("/usr/sbin/sshd", "mgmt", 22)),
//!     agent: Arc::new(ExecAgent::new(Vec::new())),
//! };
//!
//! let outcome = Orchestrator::new(config, parts).run().await;
//! std::process::exit(i32::from(outcome.exit_code()));
//! # }
//! ```

#![warn(missing_docs)]

pub mod admin;
pub mod agent;
pub mod boot;
pub mod cli;
pub mod report;

pub use boot::{AbortReason, BootState, BootstrapOutcome, Orchestrator};
