use crate::capture::IndexEntry;
use serde::{Deserialize, Serialize};

/// Statistics about an indexing run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildReport {
    /// Files whose protocol chains were extracted
    pub indexed: usize,

    /// Files recorded as failed dissections
    pub failed: usize,

    /// Files already present in the index and not re-run
    pub skipped: usize,

    /// Files that never completed (stop or kill)
    pub cancelled: usize,

    /// Whether the run ended because of a stop request
    pub interrupted: bool,

    /// Time taken in milliseconds
    pub time_ms: u64,

    /// Per-file failure summaries
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl BuildReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entry(&mut self, file: &crate::CaptureFileRef, entry: &IndexEntry) {
        if entry.is_failed() {
            self.failed += 1;
            let reason = entry.error.as_deref().unwrap_or("dissection failed");
            self.errors.push(format!("{file}: {reason}"));
        } else {
            self.indexed += 1;
        }
    }

    pub fn processed(&self) -> usize {
        self.indexed + self.failed
    }
}
