//! Bounded-concurrency probe orchestration
//!
//! A batch drains its node ids through `buffer_unordered(concurrency)`.
//! Each node runs its stages strictly in order (ping → speed → launch) and
//! commits every finished stage with compare-and-set before the next one
//! starts, so completed work survives a crash or a batch deadline.
//!
//! Guarantees per call:
//! - exactly one [`ProbeResult`] per distinct requested id
//! - a node is probed by at most one operation at a time (in-flight registry)
//! - nothing transient is ever persisted; "checking" exists only in memory
//! - protected nodes are only moved by explicit single-node requests

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vnm_common::events::{EventBus, NodeEvent};
use vnm_common::Result;

use crate::models::lifecycle::{admit, next_status, violates_protection};
use crate::models::{
    Admission, LifecycleEvent, NodeFilter, NodeId, NodeRecord, NodeStatus, ProbeKind, ProbeOutcome,
    ProbeResult, ProbeStage, ServiceData, StatusWrite, Trigger,
};
use crate::services::activator::{LaunchReport, ServiceActivator};
use crate::services::network_probe::{NetworkProbe, ProbeTarget};
use crate::store::NodeStore;

/// A status write that lost its race is retried this many times
const MAX_CAS_ATTEMPTS: usize = 3;

/// Concurrency and timeout policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbePolicy {
    pub concurrency: usize,
    pub probe_timeout: Duration,
    pub batch_timeout: Duration,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            concurrency: 8,
            probe_timeout: Duration::from_secs(12),
            batch_timeout: Duration::from_secs(300),
        }
    }
}

impl ProbePolicy {
    pub fn from_config(config: &vnm_common::config::ProbeConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            probe_timeout: Duration::from_secs(config.probe_timeout_secs.max(1)),
            batch_timeout: Duration::from_secs(config.batch_timeout_secs.max(1)),
        }
    }
}

/// Node ids with an operation in progress
///
/// Shared with the importer so credentials are never swapped under a
/// running probe.
#[derive(Default)]
pub struct InFlight {
    ids: Mutex<HashSet<NodeId>>,
}

impl InFlight {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<NodeId>> {
        // A panicked holder cannot leave the set half-updated
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// None when another operation already holds `id`
    pub fn try_claim(self: &Arc<Self>, id: NodeId) -> Option<InFlightGuard> {
        if self.lock().insert(id) {
            Some(InFlightGuard {
                registry: Arc::clone(self),
                id,
            })
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.lock().contains(&id)
    }
}

/// Releases the node when the operation ends, however it ends
pub struct InFlightGuard {
    registry: Arc<InFlight>,
    id: NodeId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
    }
}

/// Outcome of one probe stage before it is committed
#[derive(Debug, Default)]
struct Measurement {
    passed: bool,
    message: String,
    latency_ms: Option<f64>,
    packet_loss: Option<f64>,
    mbps: Option<f64>,
    service: Option<ServiceData>,
    /// Batch deadline or shutdown interrupted the probe
    abandoned: bool,
}

impl Measurement {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            ..Self::default()
        }
    }
}

/// Result of committing a stage
enum Commit {
    Written(NodeStatus),
    /// Protection forbids the move for this trigger
    Protected(NodeStatus),
    /// Status moved under us and the stage no longer applies
    Superseded(NodeStatus),
    Vanished,
}

/// Per-status node counts plus in-flight nodes
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    /// Nodes with a probe in progress (reported, never persisted)
    pub checking: usize,
}

#[derive(Clone)]
pub struct ProbeOrchestrator {
    nodes: Arc<dyn NodeStore>,
    probe: Arc<dyn NetworkProbe>,
    activator: Arc<dyn ServiceActivator>,
    events: EventBus,
    policy: ProbePolicy,
    in_flight: Arc<InFlight>,
    next_batch_id: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl ProbeOrchestrator {
    pub fn new(
        nodes: Arc<dyn NodeStore>,
        probe: Arc<dyn NetworkProbe>,
        activator: Arc<dyn ServiceActivator>,
        events: EventBus,
        policy: ProbePolicy,
    ) -> Self {
        Self {
            nodes,
            probe,
            activator,
            events,
            policy,
            in_flight: Arc::new(InFlight::default()),
            next_batch_id: Arc::new(AtomicU64::new(1)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelling `token` abandons in-flight probes like a batch deadline
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn policy(&self) -> &ProbePolicy {
        &self.policy
    }

    pub fn is_in_flight(&self, id: NodeId) -> bool {
        self.in_flight.contains(id)
    }

    /// Registry of nodes being probed
    pub fn in_flight(&self) -> Arc<InFlight> {
        Arc::clone(&self.in_flight)
    }

    /// Bulk probe; never moves a protected node
    pub async fn run_batch(&self, node_ids: &[NodeId], kind: ProbeKind) -> Vec<ProbeResult> {
        self.run(node_ids, kind, Trigger::Batch).await
    }

    /// Scheduled probe; never moves a protected node
    pub async fn run_automatic(&self, node_ids: &[NodeId], kind: ProbeKind) -> Vec<ProbeResult> {
        self.run(node_ids, kind, Trigger::Automatic).await
    }

    /// Explicit request on exactly one node
    pub async fn run_single(&self, node_id: NodeId, kind: ProbeKind) -> ProbeResult {
        let deadline = Instant::now() + self.policy.batch_timeout;
        self.process_node(node_id, kind, Trigger::Explicit, deadline).await
    }

    pub async fn ping(&self, node_id: NodeId) -> ProbeResult {
        self.run_single(node_id, ProbeKind::Ping).await
    }

    pub async fn speed(&self, node_id: NodeId) -> ProbeResult {
        self.run_single(node_id, ProbeKind::Speed).await
    }

    pub async fn launch(&self, node_id: NodeId) -> ProbeResult {
        self.run_single(node_id, ProbeKind::Launch).await
    }

    /// Ping, speed and launch in order, stopping at the first failure
    pub async fn pipeline(&self, node_id: NodeId) -> ProbeResult {
        self.run_single(node_id, ProbeKind::Full).await
    }

    pub async fn query(&self, filter: &NodeFilter) -> Result<Vec<NodeRecord>> {
        self.nodes.query(filter).await
    }

    pub async fn status_counts(&self) -> Result<StatusCounts> {
        let counts = self.nodes.count_by_status().await?;
        let by_status: BTreeMap<String, usize> = NodeStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), counts.get(s).copied().unwrap_or(0)))
            .collect();
        Ok(StatusCounts {
            total: by_status.values().sum(),
            by_status,
            checking: self.in_flight.len(),
        })
    }

    async fn run(&self, node_ids: &[NodeId], kind: ProbeKind, trigger: Trigger) -> Vec<ProbeResult> {
        let mut seen = HashSet::new();
        let ids: Vec<NodeId> = node_ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        let total = ids.len();
        let batch_id = self.next_batch_id.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + self.policy.batch_timeout;

        info!(batch_id, kind = %kind, trigger = ?trigger, total, "Probe batch started");
        self.events.emit_lossy(NodeEvent::BatchStarted {
            batch_id,
            probe_kind: kind.to_string(),
            total,
            timestamp: Utc::now(),
        });

        let completed = AtomicUsize::new(0);
        let mut results: Vec<(usize, ProbeResult)> = stream::iter(ids.into_iter().enumerate())
            .map(|(index, id)| {
                let completed = &completed;
                async move {
                    let result = self.process_node(id, kind, trigger, deadline).await;
                    let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    self.events.emit_lossy(NodeEvent::BatchProgress {
                        batch_id,
                        completed: done,
                        total,
                        timestamp: Utc::now(),
                    });
                    (index, result)
                }
            })
            .buffer_unordered(self.policy.concurrency.max(1))
            .collect()
            .await;
        results.sort_by_key(|(index, _)| *index);
        let results: Vec<ProbeResult> = results.into_iter().map(|(_, r)| r).collect();

        let succeeded = results.iter().filter(|r| r.success).count();
        let timed_out = results
            .iter()
            .any(|r| r.outcome == ProbeOutcome::Aborted || r.message.contains("deadline"));

        info!(batch_id, succeeded, failed = total - succeeded, timed_out, "Probe batch completed");
        self.events.emit_lossy(NodeEvent::BatchCompleted {
            batch_id,
            succeeded,
            failed: total - succeeded,
            timed_out,
            timestamp: Utc::now(),
        });

        results
    }

    fn interrupted(&self, deadline: Instant) -> bool {
        self.shutdown.is_cancelled() || Instant::now() >= deadline
    }

    async fn process_node(
        &self,
        node_id: NodeId,
        kind: ProbeKind,
        trigger: Trigger,
        deadline: Instant,
    ) -> ProbeResult {
        if self.interrupted(deadline) {
            return ProbeResult::new(
                node_id,
                kind,
                ProbeOutcome::Aborted,
                None,
                "Batch deadline reached before probe started",
            );
        }

        let _claim = match self.in_flight.try_claim(node_id) {
            Some(claim) => claim,
            None => {
                debug!(node_id, "Node busy, rejecting overlapping operation");
                return ProbeResult::busy(node_id, kind);
            }
        };

        match self.run_stages(node_id, kind, trigger, deadline).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(node_id, error = %e, "Store failure during probe");
                let status = self.nodes.get(node_id).await.ok().flatten().map(|n| n.status);
                ProbeResult::new(
                    node_id,
                    kind,
                    ProbeOutcome::StoreUnavailable,
                    status,
                    format!("Store unavailable: {}", e),
                )
            }
        }
    }

    async fn run_stages(
        &self,
        node_id: NodeId,
        kind: ProbeKind,
        trigger: Trigger,
        deadline: Instant,
    ) -> Result<ProbeResult> {
        let mut node = match self.nodes.get(node_id).await? {
            Some(node) => node,
            None => return Ok(ProbeResult::not_found(node_id, kind)),
        };
        let mut result = ProbeResult::new(node_id, kind, ProbeOutcome::Passed, Some(node.status), "");

        for &stage in kind.stages() {
            match admit(node_id, stage, node.status, trigger) {
                Admission::Allowed => {}
                Admission::Rejected(message) => {
                    debug!(node_id, stage = %stage, status = %node.status, "Stage rejected by guard");
                    return Ok(finish(result, ProbeOutcome::Rejected, node.status, message));
                }
                Admission::Skipped(message) => {
                    return Ok(finish(result, ProbeOutcome::Skipped, node.status, message));
                }
            }

            let measurement = self.measure(stage, &node, deadline).await;
            result.latency_ms = measurement.latency_ms.or(result.latency_ms);
            result.packet_loss = measurement.packet_loss.or(result.packet_loss);
            result.mbps = measurement.mbps.or(result.mbps);

            let passed = measurement.passed;
            let message = measurement.message.clone();
            let abandoned = measurement.abandoned;

            // An interrupted test proves nothing; protected nodes keep their status
            if abandoned {
                let current = match self.nodes.get(node_id).await? {
                    Some(current) => current.status,
                    None => return Ok(ProbeResult::not_found(node_id, kind)),
                };
                if current.is_protected() {
                    info!(node_id, stage = %stage, status = %current, "Probe interrupted, protected status left as is");
                    return Ok(finish(result, ProbeOutcome::Aborted, current, message));
                }
            }

            match self.commit(&node, stage, measurement, trigger).await? {
                Commit::Written(status) => node.status = status,
                Commit::Protected(status) => {
                    let message = format!("Node {} is {}; result not applied", node_id, status);
                    return Ok(finish(result, ProbeOutcome::Skipped, status, message));
                }
                Commit::Superseded(status) => {
                    let message = format!(
                        "Node {} changed to {} during {} test; result discarded",
                        node_id, status, stage
                    );
                    return Ok(finish(result, ProbeOutcome::Rejected, status, message));
                }
                Commit::Vanished => return Ok(ProbeResult::not_found(node_id, kind)),
            }

            if abandoned || !passed {
                return Ok(finish(result, ProbeOutcome::Failed, node.status, message));
            }
        }

        let message = format!("Node {} is {}", node_id, node.status);
        Ok(finish(result, ProbeOutcome::Passed, node.status, message))
    }

    /// Run one stage against the collaborators, bounded by probe timeout and deadline
    async fn measure(&self, stage: ProbeStage, node: &NodeRecord, deadline: Instant) -> Measurement {
        let probe_timeout = self.policy.probe_timeout;
        let attempt = timeout(probe_timeout, self.measure_stage(stage, node));

        tokio::select! {
            outcome = attempt => match outcome {
                Ok(measurement) => measurement,
                Err(_) => {
                    warn!(node_id = node.id, stage = %stage, timeout_secs = probe_timeout.as_secs(), "Probe timed out");
                    Measurement::failed(format!("{} test timed out after {}s", stage, probe_timeout.as_secs()))
                }
            },
            _ = sleep_until(deadline) => Measurement {
                abandoned: true,
                ..Measurement::failed(format!("Batch deadline reached during {} test", stage))
            },
            _ = self.shutdown.cancelled() => Measurement {
                abandoned: true,
                ..Measurement::failed(format!("Shutdown during {} test", stage))
            },
        }
    }

    async fn measure_stage(&self, stage: ProbeStage, node: &NodeRecord) -> Measurement {
        let target = ProbeTarget::from(node);
        let probe_timeout = self.policy.probe_timeout;

        match stage {
            ProbeStage::Ping => match self.probe.ping(&target, probe_timeout).await {
                Ok(report) => Measurement {
                    passed: report.success,
                    message: if report.success {
                        format!("Ping ok ({:.0}% loss)", report.packet_loss)
                    } else {
                        "Host unreachable".to_string()
                    },
                    latency_ms: report.latency_ms,
                    packet_loss: Some(report.packet_loss),
                    ..Measurement::default()
                },
                Err(e) => Measurement::failed(format!("Ping failed: {}", e)),
            },
            ProbeStage::Speed => match self.probe.throughput(&target, probe_timeout).await {
                Ok(report) => Measurement {
                    passed: report.success,
                    message: match report.mbps {
                        Some(mbps) if report.success => format!("Throughput {:.1} Mbps", mbps),
                        Some(mbps) => format!("Throughput too low: {:.1} Mbps", mbps),
                        None => "Throughput test failed".to_string(),
                    },
                    mbps: report.mbps,
                    ..Measurement::default()
                },
                Err(e) => Measurement::failed(format!("Speed test failed: {}", e)),
            },
            ProbeStage::Launch => match self.activator.launch(node).await {
                Ok(LaunchReport::Launched(service)) => Measurement {
                    passed: true,
                    message: format!("Service up on {}:{}", service.socks_ip, service.socks_port),
                    service: Some(service),
                    ..Measurement::default()
                },
                Ok(LaunchReport::Refused { reason }) => {
                    Measurement::failed(format!("Activation refused: {}", reason))
                }
                Err(e) => Measurement::failed(format!("Activation failed: {}", e)),
            },
        }
    }

    /// Write the stage result with compare-and-set
    ///
    /// Guard and protection are checked against the status the write is
    /// conditioned on; a lost race re-reads the node and re-checks both.
    async fn commit(
        &self,
        node: &NodeRecord,
        stage: ProbeStage,
        measurement: Measurement,
        trigger: Trigger,
    ) -> Result<Commit> {
        let event = LifecycleEvent::from_stage(stage, measurement.passed);
        let mut current = node.status;

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            if attempt > 1 && admit(node.id, stage, current, trigger) != Admission::Allowed {
                return Ok(Commit::Superseded(current));
            }
            let next = match next_status(current, event) {
                Some(next) => next,
                None => return Ok(Commit::Superseded(current)),
            };
            if violates_protection(current, next, trigger) {
                warn!(node_id = node.id, current = %current, next = %next, trigger = ?trigger, "Refusing to downgrade protected node");
                return Ok(Commit::Protected(current));
            }

            let mut write = StatusWrite::new(next, Utc::now());
            if event == LifecycleEvent::LaunchSucceeded {
                if let Some(service) = measurement.service.clone() {
                    write = write.with_service(service);
                }
            }

            if self.nodes.compare_and_set_status(node.id, current, write).await? {
                if next != current {
                    info!(node_id = node.id, from = %current, to = %next, "Node status changed");
                    self.events.emit_lossy(NodeEvent::NodeStatusChanged {
                        node_id: node.id,
                        old_status: current.to_string(),
                        new_status: next.to_string(),
                        timestamp: Utc::now(),
                    });
                }
                return Ok(Commit::Written(next));
            }

            debug!(node_id = node.id, attempt, expected = %current, "Status compare-and-set lost a race");
            current = match self.nodes.get(node.id).await? {
                Some(fresh) => fresh.status,
                None => return Ok(Commit::Vanished),
            };
        }

        Ok(Commit::Superseded(current))
    }
}

fn finish(
    mut result: ProbeResult,
    outcome: ProbeOutcome,
    status: NodeStatus,
    message: impl Into<String>,
) -> ProbeResult {
    result.outcome = outcome;
    result.success = outcome == ProbeOutcome::Passed;
    result.status = Some(status);
    result.message = message.into();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_guard_releases_on_drop() {
        let registry = Arc::new(InFlight::default());
        let guard = registry.try_claim(7).unwrap();
        assert!(registry.try_claim(7).is_none());
        assert!(registry.contains(7));
        drop(guard);
        assert!(!registry.contains(7));
        assert!(registry.try_claim(7).is_some());
    }

    #[test]
    fn test_policy_from_config_clamps_zero() {
        let config = vnm_common::config::ProbeConfig {
            concurrency: 0,
            probe_timeout_secs: 0,
            ..Default::default()
        };
        let policy = ProbePolicy::from_config(&config);
        assert_eq!(policy.concurrency, 1);
        assert_eq!(policy.probe_timeout, Duration::from_secs(1));
    }
}
