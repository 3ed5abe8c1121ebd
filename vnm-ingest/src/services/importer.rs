//! Import entry point and conflict review
//!
//! `import` runs parser → deduplicator → store writes and always returns
//! full counts; format errors go to the error log, conflicts to the
//! verification queue. Imports are serialized so two overlapping pastes
//! cannot both add the same node.
//!
//! Stale replacements are conditional writes: a node that changed since it
//! was read, or that a probe currently holds, is re-decided and usually ends
//! up in the verification queue instead.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use vnm_common::events::{EventBus, NodeEvent};
use vnm_common::{Error, Result};

use crate::models::{
    ImportReport, NodeCandidate, NodeId, NodeRecord, Protocol, ResolveAction, VerificationQueueEntry,
    VerificationStatus,
};
use crate::parser::TextImportParser;
use crate::services::deduplicator::{resolve, ImportPolicy, StaleReplacement};
use crate::services::probe_orchestrator::InFlight;
use crate::store::Stores;

/// A replacement whose node keeps changing is queued after this many tries
const MAX_REPLACE_ATTEMPTS: usize = 3;

/// What became of a planned stale replacement
#[derive(Debug)]
enum Applied {
    Replaced,
    /// The node already carries the candidate's credentials
    Duplicate,
    Deferred(VerificationQueueEntry),
}

/// Result of an operator decision on a queued conflict
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReviewOutcome {
    pub entry: VerificationQueueEntry,
    /// Node written by an accept; None for reject
    pub node: Option<NodeRecord>,
}

#[derive(Clone)]
pub struct Importer {
    stores: Stores,
    events: EventBus,
    policy: ImportPolicy,
    import_lock: Arc<Mutex<()>>,
    in_flight: Arc<InFlight>,
}

impl Importer {
    pub fn new(stores: Stores, events: EventBus, policy: ImportPolicy) -> Self {
        Self {
            stores,
            events,
            policy,
            import_lock: Arc::new(Mutex::new(())),
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Share the orchestrator's in-flight registry
    pub fn with_in_flight(mut self, in_flight: Arc<InFlight>) -> Self {
        self.in_flight = in_flight;
        self
    }

    pub fn policy(&self) -> &ImportPolicy {
        &self.policy
    }

    /// Parse `raw_text`, deduplicate, persist, report
    pub async fn import(&self, raw_text: &str, protocol: Protocol) -> Result<ImportReport> {
        let _guard = self.import_lock.lock().await;
        let now = Utc::now();

        let outcome = TextImportParser::new(protocol).parse_at(raw_text, now);
        let candidate_count = outcome.candidates.len();
        let format_errors = outcome.errors.len();

        if !outcome.errors.is_empty() {
            self.stores.format_errors.append(&outcome.errors).await?;
        }

        let mut existing: HashMap<String, Vec<NodeRecord>> = HashMap::new();
        for candidate in &outcome.candidates {
            if !existing.contains_key(&candidate.ip) {
                let nodes = self.stores.nodes.get_by_ip(&candidate.ip).await?;
                existing.insert(candidate.ip.clone(), nodes);
            }
        }

        let plan = resolve(outcome.candidates, &existing, &self.policy, now);
        let mut report = ImportReport {
            total_processed: candidate_count + format_errors,
            added: plan.added(),
            skipped_duplicates: plan.skipped_duplicates,
            replaced_old: 0,
            queued_for_verification: plan.queued_for_verification(),
            format_errors,
        };

        for candidate in plan.to_add {
            let record = self.stores.nodes.insert(candidate, now).await?;
            debug!(node_id = record.id, ip = %record.ip, "Added node");
        }

        let mut queue_entries = plan.queue_entries;
        for replacement in plan.to_replace {
            match self.apply_replacement(replacement, now).await? {
                Applied::Replaced => report.replaced_old += 1,
                Applied::Duplicate => report.skipped_duplicates += 1,
                Applied::Deferred(entry) => {
                    report.queued_for_verification += 1;
                    queue_entries.push(entry);
                }
            }
        }

        for entry in queue_entries {
            let entry = self.stores.verification.enqueue(entry).await?;
            info!(
                entry_id = entry.id,
                ip = %entry.candidate_node_data.ip,
                conflicts = ?entry.conflicting_node_ids,
                "Queued credential conflict for verification"
            );
        }

        info!(
            protocol = %protocol,
            total = report.total_processed,
            added = report.added,
            duplicates = report.skipped_duplicates,
            replaced = report.replaced_old,
            queued = report.queued_for_verification,
            format_errors = report.format_errors,
            "Import completed"
        );

        self.events.emit_lossy(NodeEvent::ImportCompleted {
            total_processed: report.total_processed,
            added: report.added,
            skipped_duplicates: report.skipped_duplicates,
            replaced_old: report.replaced_old,
            queued_for_verification: report.queued_for_verification,
            format_errors: report.format_errors,
            timestamp: now,
        });

        Ok(report)
    }

    /// Write one stale replacement against the current row
    ///
    /// The write is conditioned on the status and `last_update` the decision
    /// was made on. On a miss the node is re-read: if it is no longer stale
    /// (or vanished) the candidate is queued for an operator.
    async fn apply_replacement(&self, replacement: StaleReplacement, now: DateTime<Utc>) -> Result<Applied> {
        let StaleReplacement {
            mut previous,
            mut record,
            candidate,
        } = replacement;
        let node_id = record.id;

        let _claim = match self.in_flight.try_claim(node_id) {
            Some(claim) => claim,
            None => {
                info!(node_id, ip = %candidate.ip, "Node is being probed, deferring credential replacement");
                return Ok(deferred(candidate, vec![node_id], now));
            }
        };

        for attempt in 1..=MAX_REPLACE_ATTEMPTS {
            if self
                .stores
                .nodes
                .replace_if_unchanged(&record, previous.status, previous.last_update)
                .await?
            {
                info!(node_id, ip = %record.ip, "Replaced stale credentials");
                return Ok(Applied::Replaced);
            }

            debug!(node_id, attempt, "Node changed since it was read, re-deciding replacement");
            let current = match self.stores.nodes.get(node_id).await? {
                Some(current) => current,
                None => return Ok(deferred(candidate, Vec::new(), now)),
            };
            if current.same_credentials(&candidate) {
                return Ok(Applied::Duplicate);
            }
            if !vnm_common::time::is_older_than(current.last_update, self.policy.freshness_window, now) {
                info!(
                    node_id,
                    status = %current.status,
                    "Node became fresh during import, queueing credential conflict"
                );
                return Ok(deferred(candidate, vec![node_id], now));
            }

            record = current.clone();
            record.replace_with(&candidate, now);
            previous = current;
        }

        warn!(node_id, "Node kept changing, queueing credential conflict");
        Ok(deferred(candidate, vec![node_id], now))
    }

    pub async fn pending_conflicts(&self) -> Result<Vec<VerificationQueueEntry>> {
        self.stores
            .verification
            .list(Some(VerificationStatus::Pending))
            .await
    }

    /// Apply an operator decision to a pending queue entry
    ///
    /// Accept hands the candidate's credentials to the first conflicting
    /// node that still exists (inserting the candidate when none does).
    /// Reject only closes the entry.
    pub async fn resolve_conflict(&self, entry_id: i64, action: ResolveAction) -> Result<ReviewOutcome> {
        let _guard = self.import_lock.lock().await;

        let mut entry = self
            .stores
            .verification
            .get(entry_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Verification entry {}", entry_id)))?;

        if entry.status != VerificationStatus::Pending {
            return Err(Error::InvalidInput(format!(
                "Verification entry {} is already resolved",
                entry_id
            )));
        }

        let node = match action {
            ResolveAction::Reject => None,
            ResolveAction::Accept => Some(self.accept(&entry).await?),
        };

        if !self.stores.verification.mark_resolved(entry_id).await? {
            warn!(entry_id, "Verification entry resolved concurrently");
        }
        entry.status = VerificationStatus::Resolved;

        info!(entry_id, action = ?action, "Resolved verification entry");
        Ok(ReviewOutcome { entry, node })
    }

    async fn accept(&self, entry: &VerificationQueueEntry) -> Result<NodeRecord> {
        let now = Utc::now();
        let candidate = &entry.candidate_node_data;

        for node_id in &entry.conflicting_node_ids {
            if let Some(current) = self.stores.nodes.get(*node_id).await? {
                let _claim = self.in_flight.try_claim(*node_id).ok_or_else(|| {
                    Error::InvalidInput(format!("Node {} is being tested; retry once it finishes", node_id))
                })?;

                let mut record = current.clone();
                record.replace_with(candidate, now);
                if !self
                    .stores
                    .nodes
                    .replace_if_unchanged(&record, current.status, current.last_update)
                    .await?
                {
                    return Err(Error::InvalidInput(format!(
                        "Node {} changed while resolving; retry",
                        node_id
                    )));
                }
                return Ok(record);
            }
        }

        // Conflict was with a node from the same paste, or the node is gone
        let existing = self.stores.nodes.get_by_ip(&candidate.ip).await?;
        if let Some(record) = existing.into_iter().find(|n| n.same_credentials(candidate)) {
            return Ok(record);
        }
        self.stores.nodes.insert(candidate.clone(), now).await
    }
}

fn deferred(candidate: NodeCandidate, conflicting_node_ids: Vec<NodeId>, now: DateTime<Utc>) -> Applied {
    Applied::Deferred(VerificationQueueEntry::pending(candidate, conflicting_node_ids, now))
}
