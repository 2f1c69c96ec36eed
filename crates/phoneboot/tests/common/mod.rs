//! In-memory collaborators for bootstrap scenarios.
#![allow(dead_code)]

use std::collections::{BTreeSet, VecDeque};
use std::fmt::Write as _;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use phoneboot::admin::AdminService;
use phoneboot::agent::AgentLauncher;
use phoneboot::boot::{Collaborators, Orchestrator};
use phoneboot_common::{AddressFamily, BootError, BootResult, BootstrapConfig};
use phoneboot_network::{
    DhcpClient, IsolationRule, Lease, LeaseAcquirer, LeaseHook, LeaseOutcome, LinkInfo,
    LinkInspector, LinkSnapshot, RouteInfo, RuleApplier,
};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// A link that is up.
pub fn link(name: &str, ipv6_capable: bool) -> LinkInfo {
    LinkInfo {
        name: name.to_string(),
        up: true,
        loopback: false,
        kind: None,
        master: None,
        ipv6_capable,
    }
}

/// Docker's view right after `docker run`: `lo`, `eth0` with the default
/// route, plus `calls`.
pub fn docker_snapshot(calls: &[LinkInfo]) -> LinkSnapshot {
    let mut links = vec![
        LinkInfo {
            loopback: true,
            ..link("lo", true)
        },
        link("eth0", true),
    ];
    links.extend(calls.iter().cloned());
    LinkSnapshot {
        links,
        default_routes: vec![RouteInfo {
            dev: "eth0".to_string(),
            gateway: Some(Ipv4Addr::new(172, 17, 0, 1)),
            table: None,
        }],
    }
}

/// Returns queued snapshots in order, repeating the last one.
pub struct FakeInspector {
    snapshots: Mutex<VecDeque<LinkSnapshot>>,
    pub calls: AtomicUsize,
}

impl FakeInspector {
    pub fn new(snapshots: Vec<LinkSnapshot>) -> Arc<Self> {
        Arc::new(Self {
            snapshots: Mutex::new(snapshots.into()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl LinkInspector for FakeInspector {
    async fn snapshot(&self) -> BootResult<LinkSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut queue = self.snapshots.lock();
        let snapshot = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        snapshot.ok_or_else(|| BootError::Internal {
            message: "no snapshot".to_string(),
        })
    }
}

/// Network state as a set of rules in effect.
#[derive(Default)]
pub struct FakeNetwork {
    pub state: Mutex<BTreeSet<IsolationRule>>,
    pub applies: AtomicUsize,
    broken: Mutex<Vec<String>>,
}

impl FakeNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every rule mentioning `iface` fail.
    pub fn break_iface(&self, iface: &str) {
        self.broken.lock().push(iface.to_string());
    }

    fn is_broken(&self, rule: &IsolationRule) -> Option<String> {
        let text = rule.to_string();
        self.broken
            .lock()
            .iter()
            .find(|iface| text.split_whitespace().any(|w| w == iface.as_str()))
            .cloned()
    }

    pub fn snapshot(&self) -> BTreeSet<IsolationRule> {
        self.state.lock().clone()
    }
}

#[async_trait]
impl RuleApplier for FakeNetwork {
    async fn is_applied(&self, rule: &IsolationRule) -> BootResult<bool> {
        Ok(self.state.lock().contains(rule))
    }

    async fn apply(&self, rule: &IsolationRule) -> BootResult<()> {
        if let Some(iface) = self.is_broken(rule) {
            return Err(BootError::Isolation {
                iface,
                message: "Operation not permitted".to_string(),
            });
        }
        self.applies.fetch_add(1, Ordering::SeqCst);
        self.state.lock().insert(rule.clone());
        Ok(())
    }
}

/// How the fake DHCP server answers one family.
#[derive(Debug, Clone)]
pub enum Answer {
    /// Lease after a delay, offering these resolvers.
    Lease(Duration, Vec<IpAddr>),
    /// Never answer.
    Never,
    /// Fail immediately.
    Fail,
}

pub struct FakeDhcp {
    v4: Answer,
    v6: Answer,
    pub requests: Mutex<Vec<(String, AddressFamily)>>,
}

impl FakeDhcp {
    pub fn new(v4: Answer, v6: Answer) -> Arc<Self> {
        Arc::new(Self {
            v4,
            v6,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn families(&self) -> Vec<AddressFamily> {
        self.requests.lock().iter().map(|(_, f)| *f).collect()
    }
}

#[async_trait]
impl DhcpClient for FakeDhcp {
    async fn request(&self, iface: &str, family: AddressFamily) -> BootResult<Lease> {
        self.requests.lock().push((iface.to_string(), family));
        let answer = match family {
            AddressFamily::V4 => self.v4.clone(),
            AddressFamily::V6 => self.v6.clone(),
        };
        match answer {
            Answer::Lease(delay, dns) => {
                tokio::time::sleep(delay).await;
                Ok(Lease {
                    iface: iface.to_string(),
                    family,
                    address: match family {
                        AddressFamily::V4 => "10.20.0.5".parse().unwrap(),
                        AddressFamily::V6 => "2001:db8:20::5".parse().unwrap(),
                    },
                    expiry: None,
                    dns,
                    search: Vec::new(),
                })
            }
            Answer::Never => std::future::pending().await,
            Answer::Fail => Err(BootError::Lease {
                iface: iface.to_string(),
                family: family.to_string(),
                message: "no DHCPOFFER received".to_string(),
            }),
        }
    }
}

/// Admin service that listens after `start` unless told otherwise.
pub struct FakeAdmin {
    listens: bool,
    hangs: bool,
    started: Mutex<bool>,
    pub starts: AtomicUsize,
}

impl FakeAdmin {
    fn build(listens: bool, hangs: bool) -> Arc<Self> {
        Arc::new(Self {
            listens,
            hangs,
            started: Mutex::new(false),
            starts: AtomicUsize::new(0),
        })
    }

    pub fn working() -> Arc<Self> {
        Self::build(true, false)
    }

    pub fn deaf() -> Arc<Self> {
        Self::build(false, false)
    }

    /// `start` never returns, like a daemon that stays in the foreground.
    pub fn hung() -> Arc<Self> {
        Self::build(true, true)
    }
}

#[async_trait]
impl AdminService for FakeAdmin {
    fn name(&self) -> &str {
        "fake-sshd"
    }

    async fn start(&self) -> BootResult<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.hangs {
            std::future::pending::<()>().await;
        }
        *self.started.lock() = true;
        Ok(())
    }

    async fn is_listening(&self) -> BootResult<bool> {
        Ok(self.listens && *self.started.lock())
    }
}

/// Agent that records handoffs instead of replacing the process.
pub struct FakeAgent {
    fail: bool,
    pub handoffs: AtomicUsize,
}

impl FakeAgent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            handoffs: AtomicUsize::new(0),
        })
    }

    pub fn broken() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            handoffs: AtomicUsize::new(0),
        })
    }
}

impl AgentLauncher for FakeAgent {
    fn describe(&self) -> String {
        "pjsua --null-audio".to_string()
    }

    fn handoff(&self) -> BootResult<()> {
        self.handoffs.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(BootError::Internal {
                message: "failed to exec pjsua: No such file or directory".to_string(),
            });
        }
        Ok(())
    }
}

/// Lease hook that never returns.
pub struct StuckHook;

#[async_trait]
impl LeaseHook for StuckHook {
    fn name(&self) -> &str {
        "stuck"
    }

    async fn on_lease(&self, _lease: &Lease) -> BootResult<()> {
        std::future::pending().await
    }

    async fn on_settled(&self, _outcome: &LeaseOutcome) -> BootResult<()> {
        std::future::pending().await
    }
}

/// Level and formatted fields of every event seen by [`LogCapture`].
pub type CapturedEvents = Arc<Mutex<Vec<(Level, String)>>>;

/// Layer recording events for assertions.
#[derive(Clone, Default)]
pub struct LogCapture {
    pub events: CapturedEvents,
}

#[derive(Default)]
struct FieldText(String);

impl Visit for FieldText {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let _ = write!(self.0, "{}={:?} ", field.name(), value);
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut text = FieldText::default();
        event.record(&mut text);
        self.events.lock().push((*event.metadata().level(), text.0));
    }
}

impl LogCapture {
    /// Install as the default subscriber of the current thread.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    /// Events at `level`.
    pub fn at(&self, level: Level) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

/// A full set of fakes for one scenario.
pub struct Harness {
    pub inspector: Arc<FakeInspector>,
    pub network: Arc<FakeNetwork>,
    pub dhcp: Arc<FakeDhcp>,
    pub admin: Arc<FakeAdmin>,
    pub agent: Arc<FakeAgent>,
    pub hooks: Vec<Arc<dyn LeaseHook>>,
}

impl Harness {
    pub fn new(snapshots: Vec<LinkSnapshot>, dhcp: Arc<FakeDhcp>) -> Self {
        Self {
            inspector: FakeInspector::new(snapshots),
            network: FakeNetwork::new(),
            dhcp,
            admin: FakeAdmin::working(),
            agent: FakeAgent::new(),
            hooks: Vec::new(),
        }
    }

    pub fn orchestrator(&self, config: BootstrapConfig) -> Orchestrator {
        let mut leases = LeaseAcquirer::new(self.dhcp.clone());
        for hook in &self.hooks {
            leases = leases.with_hook(hook.clone());
        }
        Orchestrator::new(
            config,
            Collaborators {
                inspector: self.inspector.clone(),
                applier: self.network.clone(),
                leases,
                admin: self.admin.clone(),
                agent: self.agent.clone(),
            },
        )
    }
}
