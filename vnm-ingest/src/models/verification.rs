//! Verification queue entries
//!
//! A credential conflict against a recently updated node is never resolved
//! automatically; it is parked here for an operator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::node::{NodeCandidate, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Pending,
    Resolved,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Resolved => "resolved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(VerificationStatus::Pending),
            "resolved" => Some(VerificationStatus::Resolved),
            _ => None,
        }
    }
}

/// Unresolved conflict between a candidate and existing nodes on the same IP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationQueueEntry {
    /// Assigned by the queue; 0 until enqueued
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub candidate_node_data: NodeCandidate,
    /// Existing nodes sharing the IP with different credentials
    pub conflicting_node_ids: Vec<NodeId>,
    pub status: VerificationStatus,
}

impl VerificationQueueEntry {
    pub fn pending(candidate: NodeCandidate, conflicting_node_ids: Vec<NodeId>, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            timestamp: now,
            candidate_node_data: candidate,
            conflicting_node_ids,
            status: VerificationStatus::Pending,
        }
    }
}

/// Operator decision on a queued conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolveAction {
    /// Candidate credentials replace the first conflicting node's
    Accept,
    /// Candidate is discarded
    Reject,
}
