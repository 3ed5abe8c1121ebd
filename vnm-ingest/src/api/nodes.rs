//! Node API handlers
//!
//! POST /nodes/import, GET /nodes, GET /nodes/stats, GET /nodes/:id,
//! POST /nodes/:id/test, POST /nodes/test

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    models::{ImportReport, NodeFilter, NodeId, NodeRecord, NodeStatus, ProbeKind, ProbeOutcome, ProbeResult, Protocol},
    services::StatusCounts,
    AppState,
};

/// Hard cap on ids in one batch request
pub const MAX_BATCH_IDS: usize = 10_000;

/// POST /nodes/import request
#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub text: String,
    /// Protocol stamped on every parsed node; service default when absent
    #[serde(default)]
    pub protocol: Option<Protocol>,
}

/// GET /nodes query string
#[derive(Debug, Default, Deserialize)]
pub struct NodeQuery {
    /// Comma-separated statuses, e.g. `ping_ok,speed_ok`
    pub status: Option<String>,
    pub ip: Option<String>,
    pub protocol: Option<Protocol>,
    pub limit: Option<usize>,
}

impl NodeQuery {
    fn into_filter(self) -> ApiResult<NodeFilter> {
        let statuses = match self.status.as_deref() {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.parse::<NodeStatus>().map_err(ApiError::BadRequest))
                .collect::<ApiResult<Vec<_>>>()?,
            None => Vec::new(),
        };

        Ok(NodeFilter {
            statuses,
            ip: self.ip,
            protocol: self.protocol,
            limit: self.limit,
            ..NodeFilter::default()
        })
    }
}

/// POST /nodes/:id/test request
#[derive(Debug, Deserialize)]
pub struct TestRequest {
    pub kind: ProbeKind,
}

/// POST /nodes/test request
#[derive(Debug, Deserialize)]
pub struct BatchTestRequest {
    pub ids: Vec<NodeId>,
    pub kind: ProbeKind,
}

/// POST /nodes/test response
#[derive(Debug, Serialize)]
pub struct BatchTestResponse {
    pub kind: ProbeKind,
    pub requested: usize,
    pub passed: usize,
    pub results: Vec<ProbeResult>,
}

/// POST /nodes/import
///
/// Parse pasted text and persist what survives deduplication.
pub async fn import_nodes(
    State(state): State<AppState>,
    Json(request): Json<ImportRequest>,
) -> ApiResult<Json<ImportReport>> {
    let protocol = request.protocol.unwrap_or(state.default_protocol);
    let report = state.importer.import(&request.text, protocol).await?;

    tracing::info!(
        added = report.added,
        duplicates = report.skipped_duplicates,
        replaced = report.replaced_old,
        queued = report.queued_for_verification,
        format_errors = report.format_errors,
        "Import request completed"
    );

    Ok(Json(report))
}

/// GET /nodes
pub async fn list_nodes(
    State(state): State<AppState>,
    Query(query): Query<NodeQuery>,
) -> ApiResult<Json<Vec<NodeRecord>>> {
    let filter = query.into_filter()?;
    Ok(Json(state.orchestrator.query(&filter).await?))
}

/// GET /nodes/stats
pub async fn node_stats(State(state): State<AppState>) -> ApiResult<Json<StatusCounts>> {
    Ok(Json(state.orchestrator.status_counts().await?))
}

/// GET /nodes/:id
pub async fn get_node(
    State(state): State<AppState>,
    Path(id): Path<NodeId>,
) -> ApiResult<Json<NodeRecord>> {
    state
        .stores
        .nodes
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Node {}", id)))
}

/// POST /nodes/:id/test
///
/// A single-node request is explicit: it may re-test protected nodes.
/// Guard refusals come back as a 200 result with outcome `rejected`.
pub async fn test_node(
    State(state): State<AppState>,
    Path(id): Path<NodeId>,
    Json(request): Json<TestRequest>,
) -> ApiResult<Json<ProbeResult>> {
    let result = state.orchestrator.run_single(id, request.kind).await;
    match result.outcome {
        ProbeOutcome::NotFound => Err(ApiError::NotFound(result.message)),
        ProbeOutcome::Busy => Err(ApiError::Conflict(result.message)),
        _ => Ok(Json(result)),
    }
}

/// POST /nodes/test
///
/// Always runs with the batch trigger, even for a single id.
pub async fn test_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchTestRequest>,
) -> ApiResult<Json<BatchTestResponse>> {
    if request.ids.len() > MAX_BATCH_IDS {
        return Err(ApiError::BadRequest(format!(
            "At most {} ids per batch, got {}",
            MAX_BATCH_IDS,
            request.ids.len()
        )));
    }

    let results = state.orchestrator.run_batch(&request.ids, request.kind).await;
    Ok(Json(BatchTestResponse {
        kind: request.kind,
        requested: request.ids.len(),
        passed: results.iter().filter(|r| r.success).count(),
        results,
    }))
}

/// Build node routes
pub fn node_routes() -> Router<AppState> {
    Router::new()
        .route("/nodes", get(list_nodes))
        .route("/nodes/import", post(import_nodes))
        .route("/nodes/stats", get(node_stats))
        .route("/nodes/test", post(test_batch))
        .route("/nodes/:id", get(get_node))
        .route("/nodes/:id/test", post(test_node))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_list_parsing() {
        let query = NodeQuery {
            status: Some("ping_ok, online".to_string()),
            ..NodeQuery::default()
        };
        let filter = query.into_filter().unwrap();
        assert_eq!(filter.statuses, vec![NodeStatus::PingOk, NodeStatus::Online]);
    }

    #[test]
    fn test_unknown_status_is_bad_request() {
        let query = NodeQuery {
            status: Some("checking".to_string()),
            ..NodeQuery::default()
        };
        assert!(matches!(query.into_filter(), Err(ApiError::BadRequest(_))));
    }
}
