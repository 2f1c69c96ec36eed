//! Bootstrap orchestration.
//!
//! The [`Orchestrator`] drives the container from its initial network state
//! to the SIP agent:
//!
//! 1. **Classifying**: find the management and call interfaces, waiting for
//!    the call interface to be attached.
//! 2. **Isolating**: move management into its VRF and filter forwarding
//!    between the planes.
//! 3. **Leasing**: IPv4 (and IPv6 when allowed) on the designated call
//!    interface.
//! 4. **AdminUp**: SSH in the management VRF. Never fatal.
//! 5. **AgentHandoff**: exec the agent.
//!
//! Every abort logs exactly one error naming its reason, and the boot report
//! is saved before the process either exits or becomes the agent.

mod events;
mod guards;
mod state;

use std::sync::Arc;
use std::time::Duration;

use phoneboot_common::{AddressFamily, BootError, BootResult, BootstrapConfig};
use phoneboot_network::{
    Classification, InterfaceState, IsolationEnforcer, IsolationPolicy, LeaseAcquirer,
    LeaseOutcome, LinkInspector, RuleApplier, classify,
};
use tokio::time::Instant;

pub use events::{BootEvent, EventBus};
pub use guards::{fatal_isolation_failure, has_ipv4_lease, ipv6_degraded, isolation_permits_leasing};
pub use state::{AbortReason, BootState, BootstrapOutcome};

use crate::admin::{self, AdminService};
use crate::agent::AgentLauncher;
use crate::report::{BootReport, Degradation, IsolationSummary, LeaseRecord, ReportStore};

/// Interval between interface inspections while classifying.
pub const CLASSIFY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Interval between admin readiness probes.
pub const ADMIN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Everything the orchestrator acts through.
pub struct Collaborators {
    /// Reads the container's links and routes.
    pub inspector: Arc<dyn LinkInspector>,
    /// Applies isolation rules.
    pub applier: Arc<dyn RuleApplier>,
    /// Obtains leases and runs lease hooks.
    pub leases: LeaseAcquirer,
    /// Administrative access service.
    pub admin: Arc<dyn AdminService>,
    /// The SIP agent.
    pub agent: Arc<dyn AgentLauncher>,
}

/// Bootstrap state machine.
pub struct Orchestrator {
    config: BootstrapConfig,
    parts: Collaborators,
    state: BootState,
    report: BootReport,
    store: Option<ReportStore>,
    events: EventBus,
}

impl Orchestrator {
    /// Create an orchestrator in [`BootState::Start`].
    pub fn new(config: BootstrapConfig, parts: Collaborators) -> Self {
        Self {
            config,
            parts,
            state: BootState::Start,
            report: BootReport::new(),
            store: None,
            events: EventBus::new(),
        }
    }

    /// Persist the boot report through `store`.
    #[must_use]
    pub fn with_report_store(mut self, store: ReportStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Publish events on an existing bus.
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> BootState {
        self.state
    }

    /// Report of the run so far.
    #[must_use]
    pub const fn report(&self) -> &BootReport {
        &self.report
    }

    /// Event bus the orchestrator publishes on.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run the bootstrap to a terminal state.
    pub async fn run(&mut self) -> BootstrapOutcome {
        if self.state.is_terminal() {
            return self
                .report
                .outcome
                .clone()
                .unwrap_or(BootstrapOutcome::Ready);
        }

        tracing::info!(
            timeout_secs = self.config.timeout_secs(),
            legacy = self.config.legacy,
            "Starting network bootstrap"
        );

        // Classifying
        self.advance(BootState::Classifying);
        let mut classification = match self.classify().await {
            Ok(c) => c,
            Err(e) => {
                let reason = match e {
                    BootError::Classification { .. } => AbortReason::ClassificationFailed,
                    _ => AbortReason::Internal,
                };
                return self.abort(reason, &e);
            }
        };
        self.record_interfaces(&classification);

        // Isolating
        self.advance(BootState::Isolating);
        let policy = IsolationPolicy::derive(&classification, &self.config);
        let isolation = IsolationEnforcer::new(Arc::clone(&self.parts.applier))
            .enforce(&policy)
            .await;
        self.report.isolation = Some(IsolationSummary::from(&isolation));

        for iface in isolation.failed_interfaces() {
            classification.set_state(iface, InterfaceState::Failed);
        }
        self.record_interfaces(&classification);

        if !isolation_permits_leasing(&classification, &isolation) {
            if let Some(failure) = fatal_isolation_failure(&classification, &isolation) {
                return self.abort(AbortReason::IsolationFailed, &failure.error);
            }
        }
        for failure in &isolation.failures {
            self.degrade("isolation", format!("{}: {}", failure.rule, failure.error));
        }

        // Leasing
        self.advance(BootState::Leasing);
        let call = classification.designated_call().clone();
        let outcome = self.parts.leases.acquire(&call, &self.config).await;
        self.record_leases(&outcome);

        if !has_ipv4_lease(&outcome) {
            classification.set_state(&call.name, InterfaceState::Failed);
            self.record_interfaces(&classification);
            return match &outcome.v4 {
                Err(e) => self.abort(AbortReason::NoIpv4, e),
                Ok(_) => self.abort(
                    AbortReason::Internal,
                    &BootError::Internal {
                        message: "IPv4 lease vanished".to_string(),
                    },
                ),
            };
        }
        classification.set_state(&call.name, InterfaceState::Leased);
        self.record_interfaces(&classification);

        if ipv6_degraded(&outcome) {
            if let Some(Err(e)) = &outcome.v6 {
                self.degrade("lease", e.to_string());
            }
        }

        // AdminUp
        self.advance(BootState::AdminUp);
        if let Err(e) = self.start_admin().await {
            self.degrade("admin", e.to_string());
        }

        // AgentHandoff
        self.advance(BootState::AgentHandoff);
        self.report.state = BootState::Ready;
        self.report.finish(BootstrapOutcome::Ready);
        self.save_report();

        if let Err(e) = self.parts.agent.handoff() {
            self.report.state = BootState::AgentHandoff;
            return self.abort(AbortReason::Internal, &e);
        }

        self.advance(BootState::Ready);
        tracing::info!(agent = %self.parts.agent.describe(), "Bootstrap complete");
        BootstrapOutcome::Ready
    }

    /// Classify, re-inspecting until the call interface shows up or the
    /// timeout elapses.
    async fn classify(&self) -> BootResult<Classification> {
        let deadline = deadline_after(self.config.timeout);

        loop {
            let result = match self.parts.inspector.snapshot().await {
                Ok(snapshot) => classify(&snapshot, &self.config),
                Err(e) => Err(e),
            };

            match result {
                Ok(classification) => return Ok(classification),
                Err(e) if Instant::now() >= deadline => return Err(e),
                Err(e) => {
                    tracing::debug!(error = %e, "Interfaces not ready yet");
                    let wake = (Instant::now() + CLASSIFY_POLL_INTERVAL).min(deadline);
                    tokio::time::sleep_until(wake).await;
                }
            }
        }
    }

    /// Start the admin service and wait for it to listen, all within one
    /// timeout.
    async fn start_admin(&self) -> BootResult<()> {
        let admin = self.parts.admin.as_ref();
        let timeout = self.config.timeout;

        let bring_up = async {
            if admin.is_listening().await.unwrap_or(false) {
                tracing::info!(service = admin.name(), "Admin service already listening");
                return Ok(());
            }

            admin.start().await?;
            admin::wait_until_listening(admin, timeout, ADMIN_POLL_INTERVAL).await?;
            tracing::info!(service = admin.name(), "Admin service listening");
            Ok::<(), BootError>(())
        };

        tokio::time::timeout(timeout, bring_up)
            .await
            .map_err(|_| BootError::AdminService {
                message: format!(
                    "{} did not come up within {}s",
                    admin.name(),
                    self.config.timeout_secs()
                ),
            })?
    }

    fn advance(&mut self, next: BootState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {} -> {next}",
            self.state
        );

        let from = std::mem::replace(&mut self.state, next);
        self.report.state = next;
        tracing::info!(from = %from, to = %next, "Bootstrap state changed");
        self.events.publish(BootEvent::Transition {
            from,
            to: next,
            timestamp: chrono::Utc::now().timestamp(),
        });
    }

    fn abort(&mut self, reason: AbortReason, error: &BootError) -> BootstrapOutcome {
        tracing::error!(
            reason = %reason,
            state = %self.state,
            error = %error,
            "Bootstrap aborted"
        );

        self.advance(BootState::Aborted(reason));
        let outcome = BootstrapOutcome::Aborted {
            reason,
            detail: error.to_string(),
        };
        self.report.finish(outcome.clone());
        self.save_report();
        outcome
    }

    fn degrade(&mut self, component: &str, message: String) {
        tracing::warn!(component, message = %message, "Continuing degraded");
        self.events.publish(BootEvent::Degraded {
            component: component.to_string(),
            message: message.clone(),
            timestamp: chrono::Utc::now().timestamp(),
        });
        self.report.degradations.push(Degradation {
            component: component.to_string(),
            message,
        });
    }

    fn record_interfaces(&mut self, classification: &Classification) {
        self.report.interfaces = classification.interfaces().cloned().collect();
    }

    fn record_leases(&mut self, outcome: &LeaseOutcome) {
        self.report
            .leases
            .push(LeaseRecord::from_result(&outcome.iface, AddressFamily::V4, &outcome.v4));
        if let Some(v6) = &outcome.v6 {
            self.report
                .leases
                .push(LeaseRecord::from_result(&outcome.iface, AddressFamily::V6, v6));
        }
    }

    fn save_report(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&self.report) {
                tracing::warn!(path = %store.path().display(), error = %e, "Failed to save boot report");
            }
        }
    }
}

/// `timeout` from now, saturating far in the future.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}
