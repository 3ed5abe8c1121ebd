//! Scheduled re-check of stale, unprotected nodes
//!
//! On every tick the rechecker selects `not_tested`, `ping_failed` and
//! `offline` nodes untouched for `stale_after` and ping-tests them with the
//! automatic trigger. Protected nodes are never selected; the orchestrator's
//! compare-and-set guard covers nodes that became protected after selection.

use chrono::Utc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use vnm_common::Result;

use crate::models::{NodeFilter, NodeStatus, ProbeKind, ProbeResult};
use crate::services::probe_orchestrator::ProbeOrchestrator;

const RECHECK_STATUSES: [NodeStatus; 3] =
    [NodeStatus::NotTested, NodeStatus::PingFailed, NodeStatus::Offline];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecheckPolicy {
    pub interval: Duration,
    pub stale_after: Duration,
    /// Upper bound on nodes probed per tick
    pub max_per_tick: usize,
}

impl RecheckPolicy {
    pub fn from_config(config: &vnm_common::config::RecheckConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs.max(1)),
            stale_after: Duration::from_secs(config.stale_after_secs),
            max_per_tick: 500,
        }
    }
}

pub struct Rechecker {
    orchestrator: ProbeOrchestrator,
    policy: RecheckPolicy,
}

impl Rechecker {
    pub fn new(orchestrator: ProbeOrchestrator, policy: RecheckPolicy) -> Self {
        Self { orchestrator, policy }
    }

    /// One pass: select stale nodes and ping them
    pub async fn run_once(&self) -> Result<Vec<ProbeResult>> {
        let stale_after = chrono::Duration::from_std(self.policy.stale_after)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let filter = NodeFilter {
            statuses: RECHECK_STATUSES.to_vec(),
            updated_before: Some(Utc::now() - stale_after),
            limit: Some(self.policy.max_per_tick),
            ..NodeFilter::default()
        };

        let ids: Vec<_> = self
            .orchestrator
            .query(&filter)
            .await?
            .into_iter()
            .filter(|n| !n.status.is_protected())
            .map(|n| n.id)
            .collect();

        if ids.is_empty() {
            debug!("Recheck found no stale nodes");
            return Ok(Vec::new());
        }

        info!(nodes = ids.len(), "Re-checking stale nodes");
        Ok(self.orchestrator.run_automatic(&ids, ProbeKind::Ping).await)
    }

    /// Tick until `shutdown` is cancelled
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.policy.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(interval_secs = self.policy.interval.as_secs(), "Rechecker started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            error!(error = %e, "Recheck pass failed");
                        }
                    }
                }
            }

            info!("Rechecker stopped");
        })
    }
}
