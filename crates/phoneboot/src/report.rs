//! Boot report persistence.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use phoneboot_common::{AddressFamily, BootResult};
use phoneboot_network::{IsolationReport, LeaseResult, NetworkInterface};
use serde::{Deserialize, Serialize};

use crate::boot::{BootState, BootstrapOutcome};

/// Lease result as recorded in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    /// Interface.
    pub iface: String,
    /// Address family.
    pub family: AddressFamily,
    /// Leased address, absent on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<IpAddr>,
    /// Lease expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
    /// Failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LeaseRecord {
    /// Record a lease result.
    #[must_use]
    pub fn from_result(iface: &str, family: AddressFamily, result: &LeaseResult) -> Self {
        match result {
            Ok(lease) => Self {
                iface: iface.to_string(),
                family,
                address: Some(lease.address),
                expiry: lease.expiry,
                error: None,
            },
            Err(e) => Self {
                iface: iface.to_string(),
                family,
                address: None,
                expiry: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// A non-fatal failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Degradation {
    /// Component that degraded (`isolation`, `lease`, `admin`).
    pub component: String,
    /// What went wrong.
    pub message: String,
}

/// Isolation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolationSummary {
    /// Rules newly applied.
    pub applied: usize,
    /// Rules already in effect.
    pub unchanged: usize,
    /// Rules that failed.
    pub failed: usize,
}

impl From<&IsolationReport> for IsolationSummary {
    fn from(report: &IsolationReport) -> Self {
        Self {
            applied: report.applied,
            unchanged: report.unchanged,
            failed: report.failures.len(),
        }
    }
}

/// What happened during one bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootReport {
    /// When the bootstrap started.
    pub started_at: DateTime<Utc>,
    /// When the outcome was decided.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Last state reached.
    pub state: BootState,
    /// Final outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<BootstrapOutcome>,
    /// Classified interfaces with their states.
    #[serde(default)]
    pub interfaces: Vec<NetworkInterface>,
    /// Isolation counters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isolation: Option<IsolationSummary>,
    /// Lease results.
    #[serde(default)]
    pub leases: Vec<LeaseRecord>,
    /// Non-fatal failures.
    #[serde(default)]
    pub degradations: Vec<Degradation>,
}

impl BootReport {
    /// Start a report now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            state: BootState::Start,
            outcome: None,
            interfaces: Vec::new(),
            isolation: None,
            leases: Vec::new(),
            degradations: Vec::new(),
        }
    }

    /// Record the outcome.
    pub fn finish(&mut self, outcome: BootstrapOutcome) {
        self.outcome = Some(outcome);
        self.finished_at = Some(Utc::now());
    }
}

impl Default for BootReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads and writes the boot report.
#[derive(Debug, Clone)]
pub struct ReportStore {
    path: PathBuf,
}

impl ReportStore {
    /// Create a store for the report at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Report location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save a report, replacing the previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, report: &BootReport) -> BootResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(&self.path, json)?;

        tracing::debug!(
            state = %report.state,
            path = %self.path.display(),
            "Saved boot report"
        );

        Ok(())
    }

    /// Load the last saved report.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or malformed.
    pub fn load(&self) -> BootResult<BootReport> {
        let json = std::fs::read_to_string(&self.path)?;
        let report: BootReport = serde_json::from_str(&json)?;

        tracing::debug!(path = %self.path.display(), "Loaded boot report");

        Ok(report)
    }
}
