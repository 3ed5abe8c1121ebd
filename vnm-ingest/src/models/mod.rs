//! Data models for the node ingestion and lifecycle engine
//!
//! - NodeRecord and its closed status set
//! - Import reports and format errors
//! - Verification queue entries for unresolved credential conflicts
//! - Lifecycle transition table and stage guards
//! - Probe requests and per-node results

pub mod import_report;
pub mod lifecycle;
pub mod node;
pub mod probe;
pub mod verification;

pub use import_report::{FormatError, ImportReport};
pub use lifecycle::{Admission, LifecycleEvent};
pub use node::{
    DedupKey, NodeCandidate, NodeFilter, NodeId, NodeRecord, NodeStatus, Protocol, ServiceData,
    StatusWrite,
};
pub use probe::{ProbeKind, ProbeOutcome, ProbeResult, ProbeStage, Trigger};
pub use verification::{ResolveAction, VerificationQueueEntry, VerificationStatus};
