//! HTTP API handlers for vnm-ingest
//!
//! A thin JSON wrapper over the importer, the probe orchestrator and the
//! stores. All behavior lives in the services.

pub mod format_errors;
pub mod health;
pub mod nodes;
pub mod verification;

pub use format_errors::format_error_routes;
pub use health::health_routes;
pub use nodes::node_routes;
pub use verification::verification_routes;
