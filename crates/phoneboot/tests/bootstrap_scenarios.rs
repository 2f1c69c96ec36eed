//! End-to-end bootstrap scenarios against in-memory collaborators.

mod common;

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{
    Answer, FakeAdmin, FakeAgent, FakeDhcp, Harness, LogCapture, StuckHook, docker_snapshot, link,
};
use phoneboot::boot::BootEvent;
use phoneboot::report::ReportStore;
use phoneboot::{AbortReason, BootState, BootstrapOutcome};
use phoneboot_common::{AddressFamily, BootstrapConfig};
use phoneboot_network::{InterfaceState, IsolationRule, ResolverHook};
use tokio::time::Instant;
use tracing::Level;

fn resolver(addr: &str) -> Vec<IpAddr> {
    vec![addr.parse().unwrap()]
}

fn lease_after(secs: u64) -> Answer {
    Answer::Lease(Duration::from_secs(secs), resolver("10.20.0.1"))
}

fn aborted(outcome: &BootstrapOutcome) -> Option<AbortReason> {
    outcome.abort_reason()
}

#[tokio::test(start_paused = true)]
async fn ipv4_only_call_interface_reaches_ready() {
    let harness = Harness::new(
        vec![docker_snapshot(&[link("eth1", false)])],
        FakeDhcp::new(lease_after(1), lease_after(1)),
    );
    let config = BootstrapConfig::default().with_timeout_secs(5);
    let mut orchestrator = harness.orchestrator(config);

    let outcome = orchestrator.run().await;

    assert_eq!(outcome, BootstrapOutcome::Ready);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(orchestrator.state(), BootState::Ready);
    assert_eq!(harness.dhcp.families(), vec![AddressFamily::V4]);
    assert_eq!(harness.admin.starts.load(Ordering::SeqCst), 1);
    assert_eq!(harness.agent.handoffs.load(Ordering::SeqCst), 1);

    let report = orchestrator.report();
    assert!(report.degradations.is_empty());
    assert_eq!(report.leases.len(), 1);
    let eth1 = report.interfaces.iter().find(|i| i.name == "eth1").unwrap();
    assert_eq!(eth1.state, InterfaceState::Leased);
}

#[tokio::test(start_paused = true)]
async fn ipv4_lease_never_resolving_aborts_within_timeout() {
    let harness = Harness::new(
        vec![docker_snapshot(&[link("eth1", false)])],
        FakeDhcp::new(Answer::Never, Answer::Never),
    );
    let config = BootstrapConfig::default().with_timeout_secs(2);
    let mut orchestrator = harness.orchestrator(config);

    let start = Instant::now();
    let outcome = orchestrator.run().await;
    let elapsed = start.elapsed();

    assert_eq!(aborted(&outcome), Some(AbortReason::NoIpv4));
    assert_eq!(outcome.exit_code(), 5);
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(3));
    assert_eq!(harness.admin.starts.load(Ordering::SeqCst), 0);
    assert_eq!(harness.agent.handoffs.load(Ordering::SeqCst), 0);

    let eth1 = orchestrator
        .report()
        .interfaces
        .iter()
        .find(|i| i.name == "eth1")
        .unwrap();
    assert_eq!(eth1.state, InterfaceState::Failed);
}

#[tokio::test(start_paused = true)]
async fn ipv4_client_failure_aborts() {
    let harness = Harness::new(
        vec![docker_snapshot(&[link("eth1", true)])],
        FakeDhcp::new(Answer::Fail, lease_after(0)),
    );
    let outcome = harness.orchestrator(BootstrapConfig::default()).run().await;
    assert_eq!(aborted(&outcome), Some(AbortReason::NoIpv4));
}

#[tokio::test(start_paused = true)]
async fn dns_override_wins_over_dhcp_offer() {
    let dir = tempfile::tempdir().unwrap();
    let resolv_conf = dir.path().join("resolv.conf");
    std::fs::write(&resolv_conf, "nameserver 127.0.0.11\n").unwrap();

    let config = BootstrapConfig::default()
        .with_timeout_secs(5)
        .with_dns_v4(vec![Ipv4Addr::new(9, 9, 9, 9)]);

    let mut harness = Harness::new(
        vec![docker_snapshot(&[link("eth1", false)])],
        FakeDhcp::new(
            Answer::Lease(Duration::from_secs(1), resolver("10.20.0.1")),
            Answer::Never,
        ),
    );
    harness
        .hooks
        .push(Arc::new(ResolverHook::new(&resolv_conf, &config)));

    let outcome = harness.orchestrator(config).run().await;
    assert!(outcome.is_ready());

    let content = std::fs::read_to_string(&resolv_conf).unwrap();
    assert!(content.contains("nameserver 9.9.9.9"));
    assert!(!content.contains("10.20.0.1"));
    assert!(!content.contains("127.0.0.11"));
}

#[tokio::test(start_paused = true)]
async fn legacy_mode_never_requests_ipv6() {
    let harness = Harness::new(
        vec![docker_snapshot(&[link("eth1", true)])],
        FakeDhcp::new(lease_after(0), lease_after(0)),
    );
    let config = BootstrapConfig::default().with_legacy(true);

    let outcome = harness.orchestrator(config).run().await;

    assert!(outcome.is_ready());
    assert!(!harness.dhcp.families().contains(&AddressFamily::V6));
    let state = harness.network.snapshot();
    assert!(state.contains(&IsolationRule::DisableIpv6 {
        iface: "eth1".to_string()
    }));
    assert!(!state.iter().any(|r| matches!(
        r,
        IsolationRule::DropForward {
            family: AddressFamily::V6,
            ..
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn ipv6_failure_with_ipv4_reaches_ready() {
    let harness = Harness::new(
        vec![docker_snapshot(&[link("eth1", true)])],
        FakeDhcp::new(lease_after(1), Answer::Never),
    );
    let config = BootstrapConfig::default().with_timeout_secs(3);
    let mut orchestrator = harness.orchestrator(config);

    let outcome = orchestrator.run().await;

    assert!(outcome.is_ready());
    assert_eq!(
        harness.dhcp.families(),
        vec![AddressFamily::V4, AddressFamily::V6]
    );
    let report = orchestrator.report();
    assert_eq!(report.leases.len(), 2);
    assert!(report.leases[1].error.is_some());
    assert!(report.degradations.iter().any(|d| d.component == "lease"));
}

#[tokio::test(start_paused = true)]
async fn isolation_failure_on_call_interface_is_fatal() {
    let harness = Harness::new(
        vec![docker_snapshot(&[link("eth1", false)])],
        FakeDhcp::new(lease_after(0), Answer::Never),
    );
    harness.network.break_iface("eth1");

    let outcome = harness.orchestrator(BootstrapConfig::default()).run().await;

    assert_eq!(aborted(&outcome), Some(AbortReason::IsolationFailed));
    assert_eq!(outcome.exit_code(), 4);
    assert!(harness.dhcp.families().is_empty());
}

#[tokio::test(start_paused = true)]
async fn isolation_failure_on_auxiliary_interface_degrades() {
    let harness = Harness::new(
        vec![docker_snapshot(&[link("eth1", false), link("eth2", false)])],
        FakeDhcp::new(lease_after(0), Answer::Never),
    );
    harness.network.break_iface("eth2");
    let mut orchestrator = harness.orchestrator(BootstrapConfig::default());

    let outcome = orchestrator.run().await;

    assert!(outcome.is_ready());
    let report = orchestrator.report();
    let state_of = |name: &str| {
        report
            .interfaces
            .iter()
            .find(|i| i.name == name)
            .map(|i| i.state)
    };
    assert_eq!(state_of("eth1"), Some(InterfaceState::Leased));
    assert_eq!(state_of("eth2"), Some(InterfaceState::Failed));
    assert!(report.degradations.iter().any(|d| d.component == "isolation"));
    assert_eq!(report.isolation.as_ref().unwrap().failed, 2);
}

#[tokio::test(start_paused = true)]
async fn waits_for_late_call_interface() {
    let harness = Harness::new(
        vec![
            docker_snapshot(&[]),
            docker_snapshot(&[]),
            docker_snapshot(&[]),
            docker_snapshot(&[link("eth1", false)]),
        ],
        FakeDhcp::new(lease_after(0), Answer::Never),
    );
    let config = BootstrapConfig::default().with_timeout_secs(5);

    let outcome = harness.orchestrator(config).run().await;

    assert!(outcome.is_ready());
    assert_eq!(harness.inspector.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn missing_call_interface_aborts_classification() {
    let harness = Harness::new(
        vec![docker_snapshot(&[])],
        FakeDhcp::new(lease_after(0), Answer::Never),
    );
    let config = BootstrapConfig::default().with_timeout_secs(2);

    let start = Instant::now();
    let outcome = harness.orchestrator(config).run().await;

    assert_eq!(aborted(&outcome), Some(AbortReason::ClassificationFailed));
    assert_eq!(outcome.exit_code(), 3);
    assert!(start.elapsed() < Duration::from_secs(3));
    assert!(harness.network.snapshot().is_empty());
}

#[tokio::test(start_paused = true)]
async fn admin_service_failure_is_not_fatal() {
    let mut harness = Harness::new(
        vec![docker_snapshot(&[link("eth1", false)])],
        FakeDhcp::new(lease_after(0), Answer::Never),
    );
    harness.admin = FakeAdmin::deaf();
    let config = BootstrapConfig::default().with_timeout_secs(2);
    let mut orchestrator = harness.orchestrator(config);

    let outcome = orchestrator.run().await;

    assert!(outcome.is_ready());
    assert_eq!(harness.agent.handoffs.load(Ordering::SeqCst), 1);
    assert!(orchestrator
        .report()
        .degradations
        .iter()
        .any(|d| d.component == "admin"));
}

#[tokio::test(start_paused = true)]
async fn failed_handoff_is_internal_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = ReportStore::new(dir.path().join("report.json"));

    let mut harness = Harness::new(
        vec![docker_snapshot(&[link("eth1", false)])],
        FakeDhcp::new(lease_after(0), Answer::Never),
    );
    harness.agent = FakeAgent::broken();

    let outcome = harness
        .orchestrator(BootstrapConfig::default())
        .with_report_store(store.clone())
        .run()
        .await;

    assert_eq!(aborted(&outcome), Some(AbortReason::Internal));
    assert_eq!(outcome.exit_code(), 70);

    let saved = store.load().unwrap();
    assert_eq!(saved.state, BootState::Aborted(AbortReason::Internal));
    assert_eq!(saved.outcome, Some(outcome));
}

#[tokio::test(start_paused = true)]
async fn report_is_saved_before_handoff() {
    let dir = tempfile::tempdir().unwrap();
    let store = ReportStore::new(dir.path().join("report.json"));
    let harness = Harness::new(
        vec![docker_snapshot(&[link("eth1", false)])],
        FakeDhcp::new(lease_after(0), Answer::Never),
    );

    let outcome = harness
        .orchestrator(BootstrapConfig::default())
        .with_report_store(store.clone())
        .run()
        .await;
    assert!(outcome.is_ready());

    let saved = store.load().unwrap();
    assert_eq!(saved.state, BootState::Ready);
    assert_eq!(saved.outcome, Some(BootstrapOutcome::Ready));
    assert_eq!(
        saved.leases[0].address,
        Some("10.20.0.5".parse::<IpAddr>().unwrap())
    );
    assert!(saved.finished_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn second_run_changes_nothing() {
    let harness = Harness::new(
        vec![docker_snapshot(&[link("eth1", true), link("eth2", false)])],
        FakeDhcp::new(lease_after(0), lease_after(0)),
    );

    assert!(harness.orchestrator(BootstrapConfig::default()).run().await.is_ready());
    let after_first = harness.network.snapshot();
    let applies = harness.network.applies.load(Ordering::SeqCst);

    let mut second = harness.orchestrator(BootstrapConfig::default());
    assert!(second.run().await.is_ready());

    assert_eq!(harness.network.snapshot(), after_first);
    assert_eq!(harness.network.applies.load(Ordering::SeqCst), applies);
    let isolation = second.report().isolation.clone().unwrap();
    assert_eq!(isolation.applied, 0);
    assert_eq!(isolation.unchanged, after_first.len());
}

#[tokio::test(start_paused = true)]
async fn transitions_are_published_in_order() {
    let harness = Harness::new(
        vec![docker_snapshot(&[link("eth1", false)])],
        FakeDhcp::new(lease_after(0), Answer::Never),
    );
    let mut orchestrator = harness.orchestrator(BootstrapConfig::default());
    let mut events = orchestrator.events().subscribe();

    orchestrator.run().await;

    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let BootEvent::Transition { to, .. } = event {
            states.push(to);
        }
    }
    assert_eq!(
        states,
        vec![
            BootState::Classifying,
            BootState::Isolating,
            BootState::Leasing,
            BootState::AdminUp,
            BootState::AgentHandoff,
            BootState::Ready,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn abort_logs_exactly_one_error() {
    let capture = LogCapture::default();
    let _guard = capture.install();

    let harness = Harness::new(
        vec![docker_snapshot(&[link("eth1", false)])],
        FakeDhcp::new(Answer::Never, Answer::Never),
    );
    let outcome = harness
        .orchestrator(BootstrapConfig::default().with_timeout_secs(2))
        .run()
        .await;

    assert_eq!(aborted(&outcome), Some(AbortReason::NoIpv4));
    let errors = capture.at(Level::ERROR);
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert!(errors[0].contains("reason=no_ipv4"), "{}", errors[0]);
}

#[tokio::test(start_paused = true)]
async fn ready_run_logs_no_error() {
    let capture = LogCapture::default();
    let _guard = capture.install();

    let harness = Harness::new(
        vec![docker_snapshot(&[link("eth1", false)])],
        FakeDhcp::new(lease_after(0), Answer::Never),
    );
    let outcome = harness.orchestrator(BootstrapConfig::default()).run().await;

    assert!(outcome.is_ready());
    assert!(capture.at(Level::ERROR).is_empty());
}

#[tokio::test(start_paused = true)]
async fn stuck_lease_hook_does_not_block_bootstrap() {
    let mut harness = Harness::new(
        vec![docker_snapshot(&[link("eth1", false)])],
        FakeDhcp::new(lease_after(0), Answer::Never),
    );
    harness.hooks.push(Arc::new(StuckHook));
    let mut orchestrator = harness.orchestrator(BootstrapConfig::default().with_timeout_secs(2));

    let outcome = tokio::time::timeout(Duration::from_secs(3600), orchestrator.run())
        .await
        .expect("bootstrap must finish despite a stuck hook");

    assert!(outcome.is_ready());
    assert_eq!(orchestrator.state(), BootState::Ready);
    assert_eq!(harness.agent.handoffs.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn hung_admin_start_degrades_within_timeout() {
    let mut harness = Harness::new(
        vec![docker_snapshot(&[link("eth1", false)])],
        FakeDhcp::new(lease_after(0), Answer::Never),
    );
    harness.admin = FakeAdmin::hung();
    let mut orchestrator = harness.orchestrator(BootstrapConfig::default().with_timeout_secs(2));

    let start = Instant::now();
    let outcome = tokio::time::timeout(Duration::from_secs(3600), orchestrator.run())
        .await
        .expect("bootstrap must finish despite a hung admin service");

    assert!(outcome.is_ready());
    assert!(start.elapsed() < Duration::from_secs(3));
    assert_eq!(harness.admin.starts.load(Ordering::SeqCst), 1);
    assert_eq!(harness.agent.handoffs.load(Ordering::SeqCst), 1);
    assert!(orchestrator
        .report()
        .degradations
        .iter()
        .any(|d| d.component == "admin"));
}
