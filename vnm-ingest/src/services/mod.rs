//! Business logic services
//!
//! - Deduplication plan for parsed candidates
//! - Import pipeline (parse, dedup, persist, report)
//! - Probe collaborators (network probe, service activator)
//! - Bounded-concurrency probe orchestration and scheduled re-checks

pub mod activator;
pub mod deduplicator;
pub mod importer;
pub mod network_probe;
pub mod probe_orchestrator;
pub mod rechecker;

pub use activator::{ActivationError, CommandActivator, LaunchReport, ServiceActivator};
pub use deduplicator::{DedupPlan, ImportPolicy, Resolution, StaleReplacement};
pub use importer::{Importer, ReviewOutcome};
pub use network_probe::{CommandProbe, NetworkProbe, PingReport, ProbeError, ProbeTarget, ThroughputReport};
pub use probe_orchestrator::{InFlight, InFlightGuard, ProbeOrchestrator, ProbePolicy, StatusCounts};
pub use rechecker::{RecheckPolicy, Rechecker};
