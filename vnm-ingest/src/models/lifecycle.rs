//! Node lifecycle state machine
//!
//! ```text
//! not_tested ─ping→ ping_ok ─speed→ speed_ok ─launch→ online
//!      └────ping→ ping_failed     │                  │
//!                                 └──explicit fail──→ offline
//! ```
//!
//! Legal moves live in one static `(current, event) -> next` table. Stage
//! guards decide whether a probe may run at all; the table decides where a
//! finished probe lands. Both are evaluated again against the persisted
//! status right before every compare-and-set write.

use serde::{Deserialize, Serialize};

use super::node::{NodeId, NodeStatus};
use super::probe::{ProbeStage, Trigger};

/// Completed probe stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    PingSucceeded,
    PingFailed,
    SpeedSucceeded,
    SpeedFailed,
    LaunchSucceeded,
    LaunchFailed,
}

impl LifecycleEvent {
    pub fn from_stage(stage: ProbeStage, passed: bool) -> Self {
        match (stage, passed) {
            (ProbeStage::Ping, true) => LifecycleEvent::PingSucceeded,
            (ProbeStage::Ping, false) => LifecycleEvent::PingFailed,
            (ProbeStage::Speed, true) => LifecycleEvent::SpeedSucceeded,
            (ProbeStage::Speed, false) => LifecycleEvent::SpeedFailed,
            (ProbeStage::Launch, true) => LifecycleEvent::LaunchSucceeded,
            (ProbeStage::Launch, false) => LifecycleEvent::LaunchFailed,
        }
    }
}

use LifecycleEvent as E;
use NodeStatus as S;

const TRANSITIONS: &[(NodeStatus, LifecycleEvent, NodeStatus)] = &[
    (S::NotTested, E::PingSucceeded, S::PingOk),
    (S::NotTested, E::PingFailed, S::PingFailed),
    (S::PingOk, E::PingSucceeded, S::PingOk),
    (S::PingOk, E::PingFailed, S::PingFailed),
    (S::PingFailed, E::PingSucceeded, S::PingOk),
    (S::PingFailed, E::PingFailed, S::PingFailed),
    (S::Offline, E::PingSucceeded, S::PingOk),
    (S::Offline, E::PingFailed, S::PingFailed),
    // Protected nodes: a passing re-test keeps validated state
    (S::SpeedOk, E::PingSucceeded, S::SpeedOk),
    (S::SpeedOk, E::PingFailed, S::Offline),
    (S::Online, E::PingSucceeded, S::Online),
    (S::Online, E::PingFailed, S::Offline),
    (S::PingOk, E::SpeedSucceeded, S::SpeedOk),
    (S::PingOk, E::SpeedFailed, S::PingFailed),
    (S::SpeedOk, E::SpeedSucceeded, S::SpeedOk),
    (S::SpeedOk, E::SpeedFailed, S::Offline),
    (S::Online, E::SpeedSucceeded, S::Online),
    (S::Online, E::SpeedFailed, S::Offline),
    (S::SpeedOk, E::LaunchSucceeded, S::Online),
    // Failed activation never costs a node its validated throughput
    (S::SpeedOk, E::LaunchFailed, S::SpeedOk),
];

/// Status after `event` on a node in `current`, if the move is legal
pub fn next_status(current: NodeStatus, event: LifecycleEvent) -> Option<NodeStatus> {
    TRANSITIONS
        .iter()
        .find(|(from, ev, _)| *from == current && *ev == event)
        .map(|(_, _, to)| *to)
}

/// True when writing `next` over `current` would break protected status
///
/// Moving a `speed_ok`/`online` node to an unprotected status is reserved
/// for explicit single-node requests.
pub fn violates_protection(current: NodeStatus, next: NodeStatus, trigger: Trigger) -> bool {
    current.is_protected() && !next.is_protected() && !trigger.may_touch_protected()
}

/// Guard verdict for running a stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Wrong status for the stage; caller-visible refusal
    Rejected(String),
    /// Protected node not touched by batch or automatic work
    Skipped(String),
}

/// Status a stage requires for non-explicit callers
pub fn required_status(stage: ProbeStage) -> Option<NodeStatus> {
    match stage {
        ProbeStage::Ping => None,
        ProbeStage::Speed => Some(NodeStatus::PingOk),
        ProbeStage::Launch => Some(NodeStatus::SpeedOk),
    }
}

/// Decide whether `stage` may run on a node currently in `current`
pub fn admit(node_id: NodeId, stage: ProbeStage, current: NodeStatus, trigger: Trigger) -> Admission {
    if current.is_protected() && !trigger.may_touch_protected() && stage != ProbeStage::Launch {
        return Admission::Skipped(format!(
            "Node {} is {}; only an explicit request may re-test it",
            node_id, current
        ));
    }

    match (stage, required_status(stage)) {
        (ProbeStage::Ping, _) | (_, None) => Admission::Allowed,
        (ProbeStage::Speed, Some(_)) if current.is_protected() => Admission::Allowed,
        (_, Some(required)) if required == current => Admission::Allowed,
        (_, Some(required)) => Admission::Rejected(format!(
            "Node status must be {} for {} test (current: {})",
            required, stage, current
        )),
    }
}
