//! Import results and format errors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A block of import text that could not be turned into a node
///
/// Recoverable: the import continues with the next block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatError {
    /// The offending line or block, as pasted (comments stripped)
    pub raw_line_or_block: String,

    /// Human-readable reason
    pub reason: String,

    /// When the error was recorded
    pub recorded_at: DateTime<Utc>,
}

impl FormatError {
    pub fn new(
        raw_line_or_block: impl Into<String>,
        reason: impl Into<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            raw_line_or_block: raw_line_or_block.into(),
            reason: reason.into(),
            recorded_at,
        }
    }
}

/// Per-import counts returned to the caller
///
/// Every examined block lands in exactly one bucket, so
/// `total_processed` equals the sum of the other five counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub total_processed: usize,
    pub added: usize,
    pub skipped_duplicates: usize,
    pub replaced_old: usize,
    pub queued_for_verification: usize,
    pub format_errors: usize,
}

impl ImportReport {
    /// Candidates that reached the store or the verification queue
    pub fn accepted(&self) -> usize {
        self.added + self.replaced_old
    }

    pub fn is_consistent(&self) -> bool {
        self.total_processed
            == self.added
                + self.skipped_duplicates
                + self.replaced_old
                + self.queued_for_verification
                + self.format_errors
    }
}
