//! Format error log handlers
//!
//! GET /format-errors, DELETE /format-errors

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::{error::ApiResult, models::FormatError, AppState};

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub cleared: usize,
}

/// GET /format-errors
pub async fn list_format_errors(State(state): State<AppState>) -> ApiResult<Json<Vec<FormatError>>> {
    Ok(Json(state.stores.format_errors.list().await?))
}

/// DELETE /format-errors
pub async fn clear_format_errors(State(state): State<AppState>) -> ApiResult<Json<ClearResponse>> {
    let cleared = state.stores.format_errors.clear().await?;
    tracing::info!(cleared, "Format error log cleared");
    Ok(Json(ClearResponse { cleared }))
}

pub fn format_error_routes() -> Router<AppState> {
    Router::new().route(
        "/format-errors",
        get(list_format_errors).delete(clear_format_errors),
    )
}
