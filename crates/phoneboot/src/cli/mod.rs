//! CLI command definitions and handlers.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Result, eyre};
use phoneboot_common::paths::DEFAULT_RUNTIME_DIR;
use phoneboot_common::{BootPaths, BootstrapConfig, config, parse_yes_no};
use phoneboot_network::{
    Dhclient, IsolationPolicy, LeaseAcquirer, LinkInspector, ResolverHook, ScriptHook,
    SystemApplier, SystemInspector, classify,
};

use crate::admin::SshService;
use crate::agent::ExecAgent;
use crate::boot::{Collaborators, Orchestrator};
use crate::report::ReportStore;

/// Phoneboot - network bootstrap for containerized SIP phones
#[derive(Parser)]
#[command(name = "phoneboot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory for lease files, pid files and the boot report
    #[arg(
        long,
        global = true,
        env = "PHONEBOOT_RUNTIME_DIR",
        default_value = DEFAULT_RUNTIME_DIR
    )]
    pub runtime_dir: PathBuf,

    /// Enable debug logging (yes/no)
    #[arg(
        long,
        global = true,
        env = "DEBUG",
        value_parser = parse_yes_no,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value = "no",
        default_missing_value = "yes"
    )]
    pub debug: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Phoneboot commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Bootstrap the network and hand off to the SIP agent
    Run {
        /// Network options
        #[command(flatten)]
        network: NetworkArgs,

        /// Service options
        #[command(flatten)]
        services: ServiceArgs,

        /// SIP agent command line (default: pjsua --null-audio)
        #[arg(last = true)]
        agent: Vec<String>,
    },

    /// Show the classification and isolation plan without changing anything
    Inspect {
        /// Network options
        #[command(flatten)]
        network: NetworkArgs,
    },

    /// Print the last boot report
    Report,
}

/// Comma separated address list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrList<T>(pub Vec<T>);

/// Parse a comma separated address list. Empty entries are ignored.
///
/// # Errors
///
/// Returns the first entry that is not an address.
pub fn parse_addr_list<T: FromStr>(value: &str) -> Result<AddrList<T>, String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|_| format!("'{s}' is not a valid address")))
        .collect::<Result<Vec<T>, String>>()
        .map(AddrList)
}

/// Options shared by `run` and `inspect`.
#[derive(Args, Debug, Clone)]
pub struct NetworkArgs {
    /// Seconds bounding each lease, readiness and interface wait
    #[arg(long, env = "TIMEOUT", default_value_t = config::DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Legacy mode, no IPv6 (yes/no)
    #[arg(
        long,
        env = "LEGACY",
        value_parser = parse_yes_no,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value = "no",
        default_missing_value = "yes"
    )]
    pub legacy: bool,

    /// IPv4 resolvers overriding the DHCP offer
    #[arg(long, env = "DNS_IPv4", value_parser = parse_addr_list::<Ipv4Addr>)]
    pub dns_ipv4: Option<AddrList<Ipv4Addr>>,

    /// IPv6 resolvers overriding the DHCP offer
    #[arg(long, env = "DNS_IPv6", value_parser = parse_addr_list::<Ipv6Addr>)]
    pub dns_ipv6: Option<AddrList<Ipv6Addr>>,

    /// Call interface to lease (default: first in name order)
    #[arg(long, env = "CALL_IFACE")]
    pub call_iface: Option<String>,

    /// Exact number of call interfaces required
    #[arg(long, env = "CALL_IFACES")]
    pub expect_call_ifaces: Option<usize>,

    /// VRF the management interface is moved into
    #[arg(long, env = "MGMT_VRF", default_value = config::DEFAULT_MGMT_VRF)]
    pub mgmt_vrf: String,

    /// Routing table of the management VRF
    #[arg(long, env = "MGMT_VRF_TABLE", default_value_t = config::DEFAULT_MGMT_TABLE)]
    pub mgmt_table: u32,

    /// Executable run on every lease
    #[arg(long, env = "LEASE_HOOK")]
    pub lease_hook: Option<PathBuf>,
}

impl NetworkArgs {
    /// Resolve the bootstrap configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the values are inconsistent.
    pub fn to_config(&self) -> Result<BootstrapConfig> {
        let mut config = BootstrapConfig::default()
            .with_timeout_secs(self.timeout)
            .with_legacy(self.legacy)
            .with_dns_v4(self.dns_ipv4.clone().map(|l| l.0).unwrap_or_default())
            .with_dns_v6(self.dns_ipv6.clone().map(|l| l.0).unwrap_or_default())
            .with_mgmt_vrf(self.mgmt_vrf.clone(), self.mgmt_table);

        if let Some(iface) = self.call_iface.as_deref().filter(|s| !s.is_empty()) {
            config = config.with_call_iface(iface);
        }
        if let Some(count) = self.expect_call_ifaces {
            config = config.with_expected_call_ifaces(count);
        }
        if let Some(hook) = &self.lease_hook {
            config = config.with_lease_hook(hook.clone());
        }

        config.validate().map_err(|e| eyre!(e))?;
        Ok(config)
    }
}

/// Options only `run` needs.
#[derive(Args, Debug, Clone)]
pub struct ServiceArgs {
    /// Resolver file rewritten after leasing
    #[arg(long, env = "RESOLV_CONF", default_value = phoneboot_common::paths::DEFAULT_RESOLV_CONF)]
    pub resolv_conf: PathBuf,

    /// DHCP client binary
    #[arg(long, env = "DHCLIENT", default_value = "dhclient")]
    pub dhclient: PathBuf,

    /// SSH daemon binary
    #[arg(long, env = "SSHD", default_value = "/usr/sbin/sshd")]
    pub sshd: PathBuf,

    /// Port the SSH daemon listens on
    #[arg(long, env = "SSH_PORT", default_value_t = 22)]
    pub ssh_port: u16,
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<ExitCode> {
        let paths = BootPaths::with_runtime(self.runtime_dir.clone());
        let store = ReportStore::new(paths.report());

        match self.command {
            Commands::Run {
                network,
                services,
                agent,
            } => {
                let config = network.to_config()?;
                let paths = paths.with_resolv_conf(services.resolv_conf);

                let mut leases = LeaseAcquirer::new(Arc::new(
                    Dhclient::new(services.dhclient, paths.clone()).with_config(&config),
                ))
                .with_hook(Arc::new(ResolverHook::new(&paths.resolv_conf, &config)));
                if let Some(script) = &config.lease_hook {
                    leases = leases.with_hook(Arc::new(ScriptHook::new(script)));
                }

                let parts = Collaborators {
                    inspector: Arc::new(SystemInspector::new()),
                    applier: Arc::new(SystemApplier::new()),
                    leases,
                    admin: Arc::new(SshService::new(
                        services.sshd,
                        config.mgmt_vrf.clone(),
                        services.ssh_port,
                    )),
                    agent: Arc::new(ExecAgent::new(agent)),
                };

                let mut orchestrator = Orchestrator::new(config, parts).with_report_store(store);
                let outcome = orchestrator.run().await;
                Ok(ExitCode::from(outcome.exit_code()))
            }

            Commands::Inspect { network } => {
                let config = network.to_config()?;
                let snapshot = SystemInspector::new()
                    .snapshot()
                    .await
                    .map_err(|e| eyre!("Failed to inspect interfaces: {}", e))?;
                let classification = classify(&snapshot, &config)
                    .map_err(|e| eyre!("{}", e))?;
                let policy = IsolationPolicy::derive(&classification, &config);

                let plan = serde_json::json!({
                    "classification": classification,
                    "ipv6": phoneboot_network::should_attempt_ipv6(&config, classification.designated_call()),
                    "policy": policy.entries(),
                });
                println!("{}", serde_json::to_string_pretty(&plan)?);
                Ok(ExitCode::SUCCESS)
            }

            Commands::Report => {
                let report = store.load().map_err(|e| {
                    eyre!("No boot report at {}: {}", store.path().display(), e)
                })?;
                println!("{}", serde_json::to_string_pretty(&report)?);
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}
