//! Test helper utilities
//!
//! Scripted probe and activator collaborators plus store/orchestrator
//! builders shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vnm_common::events::EventBus;

use vnm_ingest::models::{NodeCandidate, NodeId, NodeRecord, NodeStatus, Protocol, ServiceData};
use vnm_ingest::services::{
    ActivationError, LaunchReport, NetworkProbe, PingReport, ProbeError, ProbeOrchestrator,
    ProbePolicy, ProbeTarget, ServiceActivator, ThroughputReport,
};
use vnm_ingest::store::{MemoryNodeStore, NodeStore};

/// How a scripted host answers
#[derive(Debug, Clone, Copy)]
pub struct HostScript {
    pub reachable: bool,
    pub mbps: f64,
    pub delay: Duration,
}

impl Default for HostScript {
    fn default() -> Self {
        Self {
            reachable: true,
            mbps: 50.0,
            delay: Duration::ZERO,
        }
    }
}

/// Network probe answering from a per-IP script
///
/// Unknown IPs use the default script. Tracks peak concurrency.
#[derive(Default)]
pub struct MockProbe {
    scripts: Mutex<HashMap<String, HostScript>>,
    default_script: Mutex<HostScript>,
    min_mbps: f64,
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl MockProbe {
    pub fn new() -> Self {
        Self {
            min_mbps: 5.0,
            ..Self::default()
        }
    }

    pub fn with_default(self, script: HostScript) -> Self {
        *self.default_script.lock().unwrap() = script;
        self
    }

    pub fn script(&self, ip: &str, script: HostScript) {
        self.scripts.lock().unwrap().insert(ip.to_string(), script);
    }

    pub fn unreachable(&self, ip: &str) {
        self.script(
            ip,
            HostScript {
                reachable: false,
                ..HostScript::default()
            },
        );
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, ip: &str) -> HostScript {
        self.scripts
            .lock()
            .unwrap()
            .get(ip)
            .copied()
            .unwrap_or_else(|| *self.default_script.lock().unwrap())
    }

    async fn enter(&self, delay: Duration) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Decrements the active counter even when the probe future is dropped
struct ActiveGuard<'a>(&'a MockProbe);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.leave();
    }
}

#[async_trait]
impl NetworkProbe for MockProbe {
    async fn ping(&self, target: &ProbeTarget, _timeout: Duration) -> Result<PingReport, ProbeError> {
        let script = self.lookup(&target.ip);
        let _guard = ActiveGuard(self);
        self.enter(script.delay).await;
        Ok(PingReport {
            success: script.reachable,
            latency_ms: script.reachable.then_some(20.0),
            packet_loss: if script.reachable { 0.0 } else { 100.0 },
        })
    }

    async fn throughput(
        &self,
        target: &ProbeTarget,
        _timeout: Duration,
    ) -> Result<ThroughputReport, ProbeError> {
        let script = self.lookup(&target.ip);
        let _guard = ActiveGuard(self);
        self.enter(script.delay).await;
        if !script.reachable {
            return Err(ProbeError::Execution("connection refused".to_string()));
        }
        Ok(ThroughputReport {
            success: script.mbps >= self.min_mbps,
            mbps: Some(script.mbps),
        })
    }
}

/// Activator granting a fixed SOCKS endpoint, or refusing every launch
pub struct MockActivator {
    pub refuse: bool,
    pub launches: AtomicUsize,
}

impl MockActivator {
    pub fn granting() -> Self {
        Self {
            refuse: false,
            launches: AtomicUsize::new(0),
        }
    }

    pub fn refusing() -> Self {
        Self {
            refuse: true,
            launches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ServiceActivator for MockActivator {
    async fn launch(&self, node: &NodeRecord) -> Result<LaunchReport, ActivationError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Ok(LaunchReport::Refused {
                reason: "no free interface".to_string(),
            });
        }
        Ok(LaunchReport::Launched(socks_grant(node.id)))
    }
}

pub fn socks_grant(node_id: NodeId) -> ServiceData {
    ServiceData {
        socks_ip: "10.8.0.1".to_string(),
        socks_port: 1080 + node_id as u16,
        socks_login: "proxy".to_string(),
        socks_password: "proxy-pass".to_string(),
        ovpn_config: None,
        ppp_interface: Some(format!("ppp{}", node_id)),
    }
}

pub fn candidate(ip: &str, login: &str, password: &str) -> NodeCandidate {
    NodeCandidate {
        ip: ip.to_string(),
        login: login.to_string(),
        password: password.to_string(),
        protocol: Protocol::Pptp,
        ..NodeCandidate::default()
    }
}

/// Stored node with a given status and last update
pub fn node(id: NodeId, ip: &str, status: NodeStatus, last_update: DateTime<Utc>) -> NodeRecord {
    let mut record = NodeRecord::from_candidate(id, candidate(ip, "admin", "admin"), last_update);
    record.status = status;
    if status == NodeStatus::Online {
        record.service = Some(socks_grant(id));
    }
    record
}

pub fn fast_policy() -> ProbePolicy {
    ProbePolicy {
        concurrency: 4,
        probe_timeout: Duration::from_secs(2),
        batch_timeout: Duration::from_secs(30),
    }
}

/// Orchestrator over an in-memory store with the given collaborators
pub struct Harness {
    pub store: Arc<MemoryNodeStore>,
    pub probe: Arc<MockProbe>,
    pub activator: Arc<MockActivator>,
    pub events: EventBus,
    pub orchestrator: ProbeOrchestrator,
}

impl Harness {
    pub fn new(probe: MockProbe, activator: MockActivator, policy: ProbePolicy) -> Self {
        let store = Arc::new(MemoryNodeStore::new());
        let probe = Arc::new(probe);
        let activator = Arc::new(activator);
        let events = EventBus::new(1024);
        let orchestrator = ProbeOrchestrator::new(
            store.clone() as Arc<dyn NodeStore>,
            probe.clone() as Arc<dyn NetworkProbe>,
            activator.clone() as Arc<dyn ServiceActivator>,
            events.clone(),
            policy,
        );
        Self {
            store,
            probe,
            activator,
            events,
            orchestrator,
        }
    }

    pub fn standard() -> Self {
        Self::new(MockProbe::new(), MockActivator::granting(), fast_policy())
    }

    pub async fn seed(&self, record: NodeRecord) {
        self.store.seed(record).await;
    }

    pub async fn status(&self, id: NodeId) -> NodeStatus {
        self.store.get(id).await.unwrap().unwrap().status
    }
}

/// File-backed SQLite database in a temp dir
pub async fn sqlite_pool() -> (tempfile::TempDir, sqlx::SqlitePool) {
    let dir = tempfile::tempdir().unwrap();
    let pool = vnm_common::db::init_database(&dir.path().join("vnm.db")).await.unwrap();
    (dir, pool)
}
