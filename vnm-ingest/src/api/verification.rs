//! Verification queue handlers
//!
//! GET /verification-queue, POST /verification-queue/:id/resolve

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::{
    error::{ApiError, ApiResult},
    models::{ResolveAction, VerificationQueueEntry, VerificationStatus},
    services::ReviewOutcome,
    AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct QueueQuery {
    /// `pending` (default), `resolved`, or `all`
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub action: ResolveAction,
}

/// GET /verification-queue
pub async fn list_queue(
    State(state): State<AppState>,
    Query(query): Query<QueueQuery>,
) -> ApiResult<Json<Vec<VerificationQueueEntry>>> {
    let status = match query.status.as_deref() {
        None => Some(VerificationStatus::Pending),
        Some("all") => None,
        Some(raw) => Some(VerificationStatus::parse(raw).ok_or_else(|| {
            ApiError::BadRequest(format!("Unknown verification status: {}", raw))
        })?),
    };
    Ok(Json(state.stores.verification.list(status).await?))
}

/// POST /verification-queue/:id/resolve
pub async fn resolve_entry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<ResolveRequest>,
) -> ApiResult<Json<ReviewOutcome>> {
    match state.importer.resolve_conflict(id, request.action).await {
        Ok(outcome) => Ok(Json(outcome)),
        // Entry exists but was already decided
        Err(vnm_common::Error::InvalidInput(msg)) => Err(ApiError::Conflict(msg)),
        Err(e) => Err(e.into()),
    }
}

pub fn verification_routes() -> Router<AppState> {
    Router::new()
        .route("/verification-queue", get(list_queue))
        .route("/verification-queue/:id/resolve", post(resolve_entry))
}
