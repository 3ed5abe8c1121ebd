//! In-memory stores
//!
//! Each store keeps its data behind one tokio `RwLock`, so compare-and-set
//! is atomic with respect to every other write on the same store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use vnm_common::{Error, Result};

use super::{FormatErrorLog, NodeStore, VerificationQueue};
use crate::models::{
    FormatError, NodeCandidate, NodeFilter, NodeId, NodeRecord, NodeStatus, StatusWrite,
    VerificationQueueEntry, VerificationStatus,
};

#[derive(Default)]
struct NodeTable {
    next_id: NodeId,
    rows: BTreeMap<NodeId, NodeRecord>,
}

#[derive(Default)]
pub struct MemoryNodeStore {
    table: RwLock<NodeTable>,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully formed record, keeping its id (test seeding)
    pub async fn seed(&self, record: NodeRecord) {
        let mut table = self.table.write().await;
        table.next_id = table.next_id.max(record.id);
        table.rows.insert(record.id, record);
    }
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    async fn get(&self, id: NodeId) -> Result<Option<NodeRecord>> {
        Ok(self.table.read().await.rows.get(&id).cloned())
    }

    async fn get_by_ip(&self, ip: &str) -> Result<Vec<NodeRecord>> {
        let table = self.table.read().await;
        Ok(table.rows.values().filter(|n| n.ip == ip).cloned().collect())
    }

    async fn insert(&self, candidate: NodeCandidate, now: DateTime<Utc>) -> Result<NodeRecord> {
        let mut table = self.table.write().await;
        table.next_id += 1;
        let record = NodeRecord::from_candidate(table.next_id, candidate, now);
        table.rows.insert(record.id, record.clone());
        Ok(record)
    }

    async fn put(&self, record: &NodeRecord) -> Result<()> {
        let mut table = self.table.write().await;
        match table.rows.get_mut(&record.id) {
            Some(slot) => {
                *slot = record.clone();
                Ok(())
            }
            None => Err(Error::NotFound(format!("Node {}", record.id))),
        }
    }

    async fn replace_if_unchanged(
        &self,
        record: &NodeRecord,
        expected_status: NodeStatus,
        expected_last_update: DateTime<Utc>,
    ) -> Result<bool> {
        let mut table = self.table.write().await;
        match table.rows.get_mut(&record.id) {
            Some(slot) if slot.status == expected_status && slot.last_update == expected_last_update => {
                *slot = record.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn compare_and_set_status(
        &self,
        id: NodeId,
        expected: NodeStatus,
        write: StatusWrite,
    ) -> Result<bool> {
        let mut table = self.table.write().await;
        match table.rows.get_mut(&id) {
            Some(node) if node.status == expected => {
                node.status = write.status;
                node.last_update = write.at;
                if write.service.is_some() {
                    node.service = write.service;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn query(&self, filter: &NodeFilter) -> Result<Vec<NodeRecord>> {
        let table = self.table.read().await;
        let matching = table.rows.values().filter(|n| filter.matches(n)).cloned();
        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    async fn count_by_status(&self) -> Result<HashMap<NodeStatus, usize>> {
        let table = self.table.read().await;
        let mut counts = HashMap::new();
        for node in table.rows.values() {
            *counts.entry(node.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[derive(Default)]
pub struct MemoryFormatErrorLog {
    entries: RwLock<Vec<FormatError>>,
}

impl MemoryFormatErrorLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FormatErrorLog for MemoryFormatErrorLog {
    async fn append(&self, errors: &[FormatError]) -> Result<()> {
        self.entries.write().await.extend_from_slice(errors);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<FormatError>> {
        Ok(self.entries.read().await.clone())
    }

    async fn clear(&self) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }
}

#[derive(Default)]
pub struct MemoryVerificationQueue {
    entries: RwLock<BTreeMap<i64, VerificationQueueEntry>>,
}

impl MemoryVerificationQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VerificationQueue for MemoryVerificationQueue {
    async fn enqueue(&self, mut entry: VerificationQueueEntry) -> Result<VerificationQueueEntry> {
        let mut entries = self.entries.write().await;
        entry.id = entries.keys().next_back().copied().unwrap_or(0) + 1;
        entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn get(&self, id: i64) -> Result<Option<VerificationQueueEntry>> {
        Ok(self.entries.read().await.get(&id).cloned())
    }

    async fn list(&self, status: Option<VerificationStatus>) -> Result<Vec<VerificationQueueEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .values()
            .filter(|e| status.map_or(true, |s| e.status == s))
            .cloned()
            .collect())
    }

    async fn mark_resolved(&self, id: i64) -> Result<bool> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&id) {
            Some(entry) if entry.status == VerificationStatus::Pending => {
                entry.status = VerificationStatus::Resolved;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
