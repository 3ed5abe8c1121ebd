//! SQLite stores
//!
//! Tables are created by `vnm_common::db::init_database`. Writes go through
//! [`retry_on_lock`] so concurrent probe workers ride out lock contention.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashMap;
use vnm_common::time::{from_storage, to_storage};
use vnm_common::{Error, Result};

use super::{FormatErrorLog, NodeStore, VerificationQueue};
use crate::models::{
    FormatError, NodeCandidate, NodeFilter, NodeId, NodeRecord, NodeStatus, Protocol, ServiceData,
    StatusWrite, VerificationQueueEntry, VerificationStatus,
};
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

const NODE_COLUMNS: &str = "id, ip, login, password, protocol, provider, country, state, city, \
     zipcode, comment, status, last_update, socks_ip, socks_port, socks_login, socks_password, \
     ovpn_config, ppp_interface";

fn node_from_row(row: &SqliteRow) -> Result<NodeRecord> {
    let status: String = row.try_get("status")?;
    let protocol: String = row.try_get("protocol")?;
    let last_update: String = row.try_get("last_update")?;

    let socks_ip: Option<String> = row.try_get("socks_ip")?;
    let service = match socks_ip {
        Some(socks_ip) => {
            let port: Option<i64> = row.try_get("socks_port")?;
            Some(ServiceData {
                socks_ip,
                socks_port: port.and_then(|p| u16::try_from(p).ok()).unwrap_or_default(),
                socks_login: row.try_get::<Option<String>, _>("socks_login")?.unwrap_or_default(),
                socks_password: row
                    .try_get::<Option<String>, _>("socks_password")?
                    .unwrap_or_default(),
                ovpn_config: row.try_get("ovpn_config")?,
                ppp_interface: row.try_get("ppp_interface")?,
            })
        }
        None => None,
    };

    Ok(NodeRecord {
        id: row.try_get("id")?,
        ip: row.try_get("ip")?,
        login: row.try_get("login")?,
        password: row.try_get("password")?,
        protocol: protocol.parse::<Protocol>().map_err(Error::Internal)?,
        provider: row.try_get("provider")?,
        country: row.try_get("country")?,
        state: row.try_get("state")?,
        city: row.try_get("city")?,
        zipcode: row.try_get("zipcode")?,
        comment: row.try_get("comment")?,
        status: status.parse::<NodeStatus>().map_err(Error::Internal)?,
        last_update: from_storage(&last_update)?,
        service,
    })
}

/// Node table on a shared pool
#[derive(Clone)]
pub struct SqliteNodeStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteNodeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    pub fn with_max_lock_wait(mut self, max_lock_wait_ms: u64) -> Self {
        self.max_lock_wait_ms = max_lock_wait_ms;
        self
    }

    /// Full-row update, optionally conditioned on the row's status and
    /// `last_update`; returns rows affected
    async fn write_row(
        &self,
        operation: &str,
        record: &NodeRecord,
        expected: Option<(NodeStatus, DateTime<Utc>)>,
    ) -> Result<u64> {
        let pool = &self.pool;
        let stamp = to_storage(record.last_update);
        let stamp = &stamp;
        let service = record.service.as_ref();
        let expected = expected.map(|(status, at)| (status.as_str(), to_storage(at)));
        let expected = &expected;

        let mut sql = String::from(
            r#"
            UPDATE nodes SET
                ip = ?, login = ?, password = ?, protocol = ?, provider = ?, country = ?,
                state = ?, city = ?, zipcode = ?, comment = ?, status = ?, last_update = ?,
                socks_ip = ?, socks_port = ?, socks_login = ?, socks_password = ?,
                ovpn_config = ?, ppp_interface = ?
            WHERE id = ?
            "#,
        );
        if expected.is_some() {
            sql.push_str(" AND status = ? AND last_update = ?");
        }
        let sql = &sql;

        retry_on_lock(operation, self.max_lock_wait_ms, move || async move {
            let mut query = sqlx::query(sql)
                .bind(&record.ip)
                .bind(&record.login)
                .bind(&record.password)
                .bind(record.protocol.as_str())
                .bind(&record.provider)
                .bind(&record.country)
                .bind(&record.state)
                .bind(&record.city)
                .bind(&record.zipcode)
                .bind(&record.comment)
                .bind(record.status.as_str())
                .bind(stamp)
                .bind(service.map(|s| s.socks_ip.as_str()))
                .bind(service.map(|s| i64::from(s.socks_port)))
                .bind(service.map(|s| s.socks_login.as_str()))
                .bind(service.map(|s| s.socks_password.as_str()))
                .bind(service.and_then(|s| s.ovpn_config.as_deref()))
                .bind(service.and_then(|s| s.ppp_interface.as_deref()))
                .bind(record.id);
            if let Some((status, at)) = expected {
                query = query.bind(*status).bind(at);
            }
            let result = query.execute(pool).await?;
            Ok::<_, Error>(result.rows_affected())
        })
        .await
    }
}

#[async_trait]
impl NodeStore for SqliteNodeStore {
    async fn get(&self, id: NodeId) -> Result<Option<NodeRecord>> {
        let sql = format!("SELECT {} FROM nodes WHERE id = ?", NODE_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(node_from_row).transpose()
    }

    async fn get_by_ip(&self, ip: &str) -> Result<Vec<NodeRecord>> {
        let sql = format!("SELECT {} FROM nodes WHERE ip = ? ORDER BY id", NODE_COLUMNS);
        let rows = sqlx::query(&sql).bind(ip).fetch_all(&self.pool).await?;
        rows.iter().map(node_from_row).collect()
    }

    async fn insert(&self, candidate: NodeCandidate, now: DateTime<Utc>) -> Result<NodeRecord> {
        let pool = &self.pool;
        let cand = &candidate;
        let stamp = to_storage(now);
        let stamp = &stamp;

        let id = retry_on_lock("insert node", self.max_lock_wait_ms, move || async move {
            let result = sqlx::query(
                r#"
                INSERT INTO nodes (ip, login, password, protocol, provider, country, state,
                                   city, zipcode, comment, status, last_update)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&cand.ip)
            .bind(&cand.login)
            .bind(&cand.password)
            .bind(cand.protocol.as_str())
            .bind(&cand.provider)
            .bind(&cand.country)
            .bind(&cand.state)
            .bind(&cand.city)
            .bind(&cand.zipcode)
            .bind(&cand.comment)
            .bind(NodeStatus::NotTested.as_str())
            .bind(stamp)
            .execute(pool)
            .await?;
            Ok::<_, Error>(result.last_insert_rowid())
        })
        .await?;

        Ok(NodeRecord::from_candidate(id, candidate, now))
    }

    async fn put(&self, record: &NodeRecord) -> Result<()> {
        if self.write_row("put node", record, None).await? == 0 {
            return Err(Error::NotFound(format!("Node {}", record.id)));
        }
        Ok(())
    }

    async fn replace_if_unchanged(
        &self,
        record: &NodeRecord,
        expected_status: NodeStatus,
        expected_last_update: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self
            .write_row(
                "replace node",
                record,
                Some((expected_status, expected_last_update)),
            )
            .await?;
        Ok(affected == 1)
    }

    async fn compare_and_set_status(
        &self,
        id: NodeId,
        expected: NodeStatus,
        write: StatusWrite,
    ) -> Result<bool> {
        let pool = &self.pool;
        let stamp = to_storage(write.at);
        let stamp = &stamp;
        let write = &write;

        let affected = retry_on_lock("compare-and-set status", self.max_lock_wait_ms, move || async move {
            let result = match &write.service {
                Some(service) => {
                    sqlx::query(
                        r#"
                        UPDATE nodes SET
                            status = ?, last_update = ?,
                            socks_ip = ?, socks_port = ?, socks_login = ?, socks_password = ?,
                            ovpn_config = ?, ppp_interface = ?
                        WHERE id = ? AND status = ?
                        "#,
                    )
                    .bind(write.status.as_str())
                    .bind(stamp)
                    .bind(&service.socks_ip)
                    .bind(i64::from(service.socks_port))
                    .bind(&service.socks_login)
                    .bind(&service.socks_password)
                    .bind(&service.ovpn_config)
                    .bind(&service.ppp_interface)
                    .bind(id)
                    .bind(expected.as_str())
                    .execute(pool)
                    .await?
                }
                None => {
                    sqlx::query(
                        "UPDATE nodes SET status = ?, last_update = ? WHERE id = ? AND status = ?",
                    )
                    .bind(write.status.as_str())
                    .bind(stamp)
                    .bind(id)
                    .bind(expected.as_str())
                    .execute(pool)
                    .await?
                }
            };
            Ok::<_, Error>(result.rows_affected())
        })
        .await?;

        Ok(affected == 1)
    }

    async fn query(&self, filter: &NodeFilter) -> Result<Vec<NodeRecord>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM nodes WHERE 1 = 1", NODE_COLUMNS));

        if !filter.statuses.is_empty() {
            builder.push(" AND status IN (");
            let mut separated = builder.separated(", ");
            for status in &filter.statuses {
                separated.push_bind(status.as_str());
            }
            separated.push_unseparated(")");
        }
        if let Some(ip) = &filter.ip {
            builder.push(" AND ip = ").push_bind(ip.clone());
        }
        if let Some(protocol) = filter.protocol {
            builder.push(" AND protocol = ").push_bind(protocol.as_str());
        }
        if let Some(before) = filter.updated_before {
            builder.push(" AND last_update < ").push_bind(to_storage(before));
        }
        builder.push(" ORDER BY id");
        if let Some(limit) = filter.limit {
            builder
                .push(" LIMIT ")
                .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(node_from_row).collect()
    }

    async fn count_by_status(&self) -> Result<HashMap<NodeStatus, usize>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM nodes GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = HashMap::new();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("n")?;
            let status = status.parse::<NodeStatus>().map_err(Error::Internal)?;
            counts.insert(status, usize::try_from(count).unwrap_or_default());
        }
        Ok(counts)
    }
}

#[derive(Clone)]
pub struct SqliteFormatErrorLog {
    pool: SqlitePool,
}

impl SqliteFormatErrorLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FormatErrorLog for SqliteFormatErrorLog {
    async fn append(&self, errors: &[FormatError]) -> Result<()> {
        if errors.is_empty() {
            return Ok(());
        }
        let pool = &self.pool;

        retry_on_lock("append format errors", DEFAULT_MAX_LOCK_WAIT_MS, move || async move {
            let mut tx = pool.begin().await?;
            for error in errors {
                sqlx::query("INSERT INTO format_errors (raw_block, reason, recorded_at) VALUES (?, ?, ?)")
                    .bind(&error.raw_line_or_block)
                    .bind(&error.reason)
                    .bind(to_storage(error.recorded_at))
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            Ok::<_, Error>(())
        })
        .await
    }

    async fn list(&self) -> Result<Vec<FormatError>> {
        let rows = sqlx::query("SELECT raw_block, reason, recorded_at FROM format_errors ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let recorded_at: String = row.try_get("recorded_at")?;
                Ok(FormatError {
                    raw_line_or_block: row.try_get("raw_block")?,
                    reason: row.try_get("reason")?,
                    recorded_at: from_storage(&recorded_at)?,
                })
            })
            .collect()
    }

    async fn clear(&self) -> Result<usize> {
        let pool = &self.pool;
        let removed = retry_on_lock("clear format errors", DEFAULT_MAX_LOCK_WAIT_MS, move || async move {
            Ok::<_, Error>(sqlx::query("DELETE FROM format_errors")
                .execute(pool)
                .await?
                .rows_affected())
        })
        .await?;
        Ok(usize::try_from(removed).unwrap_or_default())
    }
}

#[derive(Clone)]
pub struct SqliteVerificationQueue {
    pool: SqlitePool,
}

impl SqliteVerificationQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<VerificationQueueEntry> {
    let timestamp: String = row.try_get("timestamp")?;
    let candidate: String = row.try_get("candidate")?;
    let conflicting: String = row.try_get("conflicting_node_ids")?;
    let status: String = row.try_get("status")?;

    Ok(VerificationQueueEntry {
        id: row.try_get("id")?,
        timestamp: from_storage(&timestamp)?,
        candidate_node_data: serde_json::from_str(&candidate)
            .map_err(|e| Error::Internal(format!("Corrupt queued candidate: {}", e)))?,
        conflicting_node_ids: serde_json::from_str(&conflicting)
            .map_err(|e| Error::Internal(format!("Corrupt conflicting ids: {}", e)))?,
        status: VerificationStatus::parse(&status)
            .ok_or_else(|| Error::Internal(format!("Unknown queue status: {}", status)))?,
    })
}

#[async_trait]
impl VerificationQueue for SqliteVerificationQueue {
    async fn enqueue(&self, mut entry: VerificationQueueEntry) -> Result<VerificationQueueEntry> {
        let candidate = serde_json::to_string(&entry.candidate_node_data)
            .map_err(|e| Error::Internal(format!("Cannot encode candidate: {}", e)))?;
        let conflicting = serde_json::to_string(&entry.conflicting_node_ids)
            .map_err(|e| Error::Internal(format!("Cannot encode conflicting ids: {}", e)))?;
        let pool = &self.pool;
        let stamp = to_storage(entry.timestamp);
        let (candidate, conflicting, stamp) = (&candidate, &conflicting, &stamp);
        let status = entry.status.as_str();

        entry.id = retry_on_lock("enqueue conflict", DEFAULT_MAX_LOCK_WAIT_MS, move || async move {
            let result = sqlx::query(
                "INSERT INTO verification_queue (timestamp, candidate, conflicting_node_ids, status) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(stamp)
            .bind(candidate)
            .bind(conflicting)
            .bind(status)
            .execute(pool)
            .await?;
            Ok::<_, Error>(result.last_insert_rowid())
        })
        .await?;

        Ok(entry)
    }

    async fn get(&self, id: i64) -> Result<Option<VerificationQueueEntry>> {
        let row = sqlx::query(
            "SELECT id, timestamp, candidate, conflicting_node_ids, status FROM verification_queue WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn list(&self, status: Option<VerificationStatus>) -> Result<Vec<VerificationQueueEntry>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT id, timestamp, candidate, conflicting_node_ids, status \
                     FROM verification_queue WHERE status = ? ORDER BY id",
                )
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, timestamp, candidate, conflicting_node_ids, status \
                     FROM verification_queue ORDER BY id",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(entry_from_row).collect()
    }

    async fn mark_resolved(&self, id: i64) -> Result<bool> {
        let pool = &self.pool;
        let affected = retry_on_lock("resolve conflict", DEFAULT_MAX_LOCK_WAIT_MS, move || async move {
            Ok::<_, Error>(sqlx::query("UPDATE verification_queue SET status = ? WHERE id = ? AND status = ?")
                .bind(VerificationStatus::Resolved.as_str())
                .bind(id)
                .bind(VerificationStatus::Pending.as_str())
                .execute(pool)
                .await?
                .rows_affected())
        })
        .await?;
        Ok(affected == 1)
    }
}
