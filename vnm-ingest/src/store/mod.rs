//! Persistence seams
//!
//! The engine only talks to these traits. Two implementations ship:
//! SQLite for the service binary and an in-memory one for tests and
//! embedders.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use vnm_common::Result;

use crate::models::{
    FormatError, NodeCandidate, NodeFilter, NodeId, NodeRecord, NodeStatus, StatusWrite,
    VerificationQueueEntry, VerificationStatus,
};

pub use memory::{MemoryFormatErrorLog, MemoryNodeStore, MemoryVerificationQueue};
pub use sqlite::{SqliteFormatErrorLog, SqliteNodeStore, SqliteVerificationQueue};

#[async_trait]
pub trait NodeStore: Send + Sync {
    async fn get(&self, id: NodeId) -> Result<Option<NodeRecord>>;

    /// Every node on `ip`, in id order
    async fn get_by_ip(&self, ip: &str) -> Result<Vec<NodeRecord>>;

    /// Store a candidate as a new `not_tested` node
    async fn insert(&self, candidate: NodeCandidate, now: DateTime<Utc>) -> Result<NodeRecord>;

    /// Overwrite an existing node; `NotFound` when the id is unknown
    async fn put(&self, record: &NodeRecord) -> Result<()>;

    /// Overwrite a node only if its status and `last_update` still match
    /// what the caller read; false (and nothing written) otherwise
    async fn replace_if_unchanged(
        &self,
        record: &NodeRecord,
        expected_status: NodeStatus,
        expected_last_update: DateTime<Utc>,
    ) -> Result<bool>;

    /// Apply `write` only if the node's persisted status is still `expected`
    ///
    /// Returns false (and writes nothing) when the status moved or the node
    /// vanished.
    async fn compare_and_set_status(
        &self,
        id: NodeId,
        expected: NodeStatus,
        write: StatusWrite,
    ) -> Result<bool>;

    async fn query(&self, filter: &NodeFilter) -> Result<Vec<NodeRecord>>;

    /// Node count per status; statuses without nodes are absent
    async fn count_by_status(&self) -> Result<HashMap<NodeStatus, usize>>;
}

/// Append-only sink for unparsable import blocks
#[async_trait]
pub trait FormatErrorLog: Send + Sync {
    async fn append(&self, errors: &[FormatError]) -> Result<()>;

    /// Oldest first
    async fn list(&self) -> Result<Vec<FormatError>>;

    /// Remove every entry; returns how many were removed
    async fn clear(&self) -> Result<usize>;
}

#[async_trait]
pub trait VerificationQueue: Send + Sync {
    /// Store a pending entry and return it with its assigned id
    async fn enqueue(&self, entry: VerificationQueueEntry) -> Result<VerificationQueueEntry>;

    async fn get(&self, id: i64) -> Result<Option<VerificationQueueEntry>>;

    /// Entries in id order, optionally restricted to one status
    async fn list(&self, status: Option<VerificationStatus>) -> Result<Vec<VerificationQueueEntry>>;

    /// Flip a pending entry to resolved; false if it was not pending
    async fn mark_resolved(&self, id: i64) -> Result<bool>;
}

/// The three stores the engine is wired against
#[derive(Clone)]
pub struct Stores {
    pub nodes: Arc<dyn NodeStore>,
    pub format_errors: Arc<dyn FormatErrorLog>,
    pub verification: Arc<dyn VerificationQueue>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            nodes: Arc::new(MemoryNodeStore::new()),
            format_errors: Arc::new(MemoryFormatErrorLog::new()),
            verification: Arc::new(MemoryVerificationQueue::new()),
        }
    }

    pub fn sqlite(pool: SqlitePool) -> Self {
        Self {
            nodes: Arc::new(SqliteNodeStore::new(pool.clone())),
            format_errors: Arc::new(SqliteFormatErrorLog::new(pool.clone())),
            verification: Arc::new(SqliteVerificationQueue::new(pool)),
        }
    }
}
