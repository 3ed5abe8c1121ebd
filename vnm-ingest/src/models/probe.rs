//! Probe requests and per-node results

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::node::{NodeId, NodeStatus};

/// One step of the verification pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStage {
    Ping,
    Speed,
    Launch,
}

impl ProbeStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeStage::Ping => "ping",
            ProbeStage::Speed => "speed",
            ProbeStage::Launch => "launch",
        }
    }
}

impl fmt::Display for ProbeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a probe request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    Ping,
    Speed,
    Launch,
    /// Ping, then speed if ping passed
    PingSpeed,
    /// Ping, speed, launch; each only after the previous passed
    Full,
}

impl ProbeKind {
    /// Stages run in order for this kind
    pub fn stages(&self) -> &'static [ProbeStage] {
        match self {
            ProbeKind::Ping => &[ProbeStage::Ping],
            ProbeKind::Speed => &[ProbeStage::Speed],
            ProbeKind::Launch => &[ProbeStage::Launch],
            ProbeKind::PingSpeed => &[ProbeStage::Ping, ProbeStage::Speed],
            ProbeKind::Full => &[ProbeStage::Ping, ProbeStage::Speed, ProbeStage::Launch],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::Ping => "ping",
            ProbeKind::Speed => "speed",
            ProbeKind::Launch => "launch",
            ProbeKind::PingSpeed => "ping_speed",
            ProbeKind::Full => "full",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ping" => Ok(ProbeKind::Ping),
            "speed" => Ok(ProbeKind::Speed),
            "launch" => Ok(ProbeKind::Launch),
            "ping_speed" => Ok(ProbeKind::PingSpeed),
            "full" => Ok(ProbeKind::Full),
            other => Err(format!("Unknown probe kind: {}", other)),
        }
    }
}

/// Who asked for a probe
///
/// Only `Explicit` (a request naming exactly one node) may move a node out
/// of a protected status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Explicit,
    Batch,
    Automatic,
}

impl Trigger {
    pub fn may_touch_protected(&self) -> bool {
        matches!(self, Trigger::Explicit)
    }
}

/// How a per-node probe request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// Every requested stage passed
    Passed,
    /// A stage ran and failed (includes per-probe timeouts)
    Failed,
    /// Guard refused: node not in the status the stage requires
    Rejected,
    /// Protected node left untouched by batch or automatic work
    Skipped,
    NotFound,
    /// Another operation on the same node is in flight
    Busy,
    /// Batch deadline passed before this node's probe started
    Aborted,
    /// Store failed; the node keeps its last committed status
    StoreUnavailable,
}

/// One result per requested node id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub node_id: NodeId,
    pub kind: ProbeKind,
    pub success: bool,
    pub outcome: ProbeOutcome,
    /// Status after the request; None when the node was not found
    pub status: Option<NodeStatus>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packet_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mbps: Option<f64>,
}

impl ProbeResult {
    pub fn new(
        node_id: NodeId,
        kind: ProbeKind,
        outcome: ProbeOutcome,
        status: Option<NodeStatus>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            node_id,
            kind,
            success: outcome == ProbeOutcome::Passed,
            outcome,
            status,
            message: message.into(),
            latency_ms: None,
            packet_loss: None,
            mbps: None,
        }
    }

    pub fn not_found(node_id: NodeId, kind: ProbeKind) -> Self {
        Self::new(
            node_id,
            kind,
            ProbeOutcome::NotFound,
            None,
            format!("Node {} not found", node_id),
        )
    }

    pub fn busy(node_id: NodeId, kind: ProbeKind) -> Self {
        Self::new(
            node_id,
            kind,
            ProbeOutcome::Busy,
            None,
            format!("Node {} already has an operation in progress", node_id),
        )
    }
}
