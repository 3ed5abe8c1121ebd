//! vnm-ingest library interface
//!
//! Node ingestion (parse, deduplicate, persist) and node lifecycle
//! (ping, throughput, activation) behind a small HTTP API.

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod parser;
pub mod services;
pub mod store;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use vnm_common::events::EventBus;

use crate::models::Protocol;
use crate::services::{Importer, ProbeOrchestrator};
use crate::store::Stores;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub importer: Importer,
    pub orchestrator: ProbeOrchestrator,
    pub events: EventBus,
    /// Protocol for imports that do not name one
    pub default_protocol: Protocol,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        stores: Stores,
        importer: Importer,
        orchestrator: ProbeOrchestrator,
        events: EventBus,
        default_protocol: Protocol,
    ) -> Self {
        Self {
            stores,
            importer,
            orchestrator,
            events,
            default_protocol,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::node_routes())
        .merge(api::format_error_routes())
        .merge(api::verification_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
