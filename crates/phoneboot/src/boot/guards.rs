//! Transition guards.
//!
//! Each predicate decides one transition of the bootstrap state machine and
//! is kept free of side effects.

use phoneboot_network::{Classification, IsolationReport, LeaseOutcome, RuleFailure};

/// The first isolation failure that must abort the bootstrap.
///
/// Failures on the management interface or the designated call interface
/// are fatal. Failures on auxiliary call interfaces are not.
#[must_use]
pub fn fatal_isolation_failure<'a>(
    classification: &Classification,
    report: &'a IsolationReport,
) -> Option<&'a RuleFailure> {
    report
        .failures
        .iter()
        .find(|f| classification.is_essential(&f.iface))
}

/// Whether `Isolating -> Leasing` may proceed.
#[must_use]
pub fn isolation_permits_leasing(classification: &Classification, report: &IsolationReport) -> bool {
    fatal_isolation_failure(classification, report).is_none()
}

/// Whether `Leasing -> AdminUp` may proceed.
#[must_use]
pub fn has_ipv4_lease(outcome: &LeaseOutcome) -> bool {
    outcome.ipv4().is_some()
}

/// Whether IPv6 was requested and did not produce a lease.
#[must_use]
pub fn ipv6_degraded(outcome: &LeaseOutcome) -> bool {
    outcome.ipv6_attempted() && outcome.ipv6().is_none()
}
