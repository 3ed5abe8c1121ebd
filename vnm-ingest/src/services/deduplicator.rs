//! Duplicate and credential-conflict resolution
//!
//! Pure with respect to the store: decisions are made against a snapshot of
//! the existing nodes on the candidates' IPs and returned as a plan. The
//! importer applies the plan.
//!
//! Per candidate, in paste order:
//! 1. Same `(ip, login, password)` as a stored node or an earlier candidate:
//!    duplicate.
//! 2. Same IP, different credentials, every stored node on that IP older
//!    than the freshness window: the oldest-id stale node takes over the new
//!    credentials.
//! 3. Same IP, different credentials, anything recent on that IP (including
//!    a candidate staged earlier in this paste): queued for an operator.
//! 4. New IP: staged for insertion.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};

use crate::models::{DedupKey, NodeCandidate, NodeId, NodeRecord, VerificationQueueEntry};

/// Import policy values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImportPolicy {
    /// Conflicting nodes last updated before `now - freshness_window` may be replaced
    pub freshness_window: Duration,
}

impl Default for ImportPolicy {
    fn default() -> Self {
        Self {
            freshness_window: vnm_common::time::days(28),
        }
    }
}

/// Decision for one candidate
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Add,
    Duplicate,
    Replace { node_id: NodeId },
    Queue { conflicting_node_ids: Vec<NodeId> },
}

/// A stale node taking over a candidate's credentials
///
/// The write is only valid while the stored node still matches `previous`.
#[derive(Debug, Clone, PartialEq)]
pub struct StaleReplacement {
    /// Stored node as the decision saw it
    pub previous: NodeRecord,
    /// Same node carrying the new credentials
    pub record: NodeRecord,
    pub candidate: NodeCandidate,
}

/// What the importer must write
#[derive(Debug, Clone, Default)]
pub struct DedupPlan {
    pub to_add: Vec<NodeCandidate>,
    pub to_replace: Vec<StaleReplacement>,
    pub queue_entries: Vec<VerificationQueueEntry>,
    pub skipped_duplicates: usize,
}

impl DedupPlan {
    pub fn added(&self) -> usize {
        self.to_add.len()
    }

    pub fn replaced_old(&self) -> usize {
        self.to_replace.len()
    }

    pub fn queued_for_verification(&self) -> usize {
        self.queue_entries.len()
    }
}

/// Resolve `candidates` against the stored nodes on their IPs
///
/// `existing` maps an IP to every stored node on it. IPs missing from the
/// map are treated as unknown to the store.
pub fn resolve(
    candidates: Vec<NodeCandidate>,
    existing: &HashMap<String, Vec<NodeRecord>>,
    policy: &ImportPolicy,
    now: DateTime<Utc>,
) -> DedupPlan {
    let mut plan = DedupPlan::default();
    // Working copy so replacements made earlier in the paste are visible
    let mut stored: HashMap<String, Vec<NodeRecord>> = existing.clone();
    let mut staged_ips: HashSet<String> = HashSet::new();
    let mut seen: HashSet<DedupKey> = HashSet::new();

    for candidate in candidates {
        let key = candidate.dedup_key();
        let on_ip = stored.get(&candidate.ip).map(Vec::as_slice).unwrap_or(&[]);

        let resolution = if seen.contains(&key) || on_ip.iter().any(|n| n.same_credentials(&candidate)) {
            Resolution::Duplicate
        } else if on_ip.is_empty() && !staged_ips.contains(&candidate.ip) {
            Resolution::Add
        } else {
            let all_stale = !staged_ips.contains(&candidate.ip)
                && on_ip.iter().all(|n| {
                    vnm_common::time::is_older_than(n.last_update, policy.freshness_window, now)
                });
            match on_ip.iter().map(|n| n.id).min() {
                Some(node_id) if all_stale => Resolution::Replace { node_id },
                _ => Resolution::Queue {
                    conflicting_node_ids: on_ip.iter().map(|n| n.id).collect(),
                },
            }
        };

        tracing::debug!(ip = %candidate.ip, resolution = ?resolution, "Resolved import candidate");

        match resolution {
            Resolution::Duplicate => plan.skipped_duplicates += 1,
            Resolution::Add => {
                staged_ips.insert(candidate.ip.clone());
                plan.to_add.push(candidate);
            }
            Resolution::Replace { node_id } => {
                if let Some(record) = stored
                    .get_mut(&candidate.ip)
                    .and_then(|nodes| nodes.iter_mut().find(|n| n.id == node_id))
                {
                    let previous = record.clone();
                    record.replace_with(&candidate, now);
                    plan.to_replace.push(StaleReplacement {
                        previous,
                        record: record.clone(),
                        candidate: candidate.clone(),
                    });
                }
            }
            Resolution::Queue { conflicting_node_ids } => {
                plan.queue_entries.push(VerificationQueueEntry::pending(
                    candidate,
                    conflicting_node_ids,
                    now,
                ));
            }
        }

        seen.insert(key);
    }

    plan
}
