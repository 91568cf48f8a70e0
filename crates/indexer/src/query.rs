//! Read-only queries over a loaded [`ProtocolIndex`].

use crate::capture::{CaptureFileRef, ProtocolCounts, ProtocolIndex};
use std::collections::BTreeSet;

impl ProtocolIndex {
    /// Sum of per-file counts for every protocol in the corpus.
    pub fn list_all_protocols(&self) -> ProtocolCounts {
        let mut totals = ProtocolCounts::new();
        for (_, entry) in self.entries() {
            for (protocol, count) in &entry.protocols {
                *totals.entry(protocol.clone()).or_insert(0) += count;
            }
        }
        totals
    }

    /// Every indexed file in path order, failed dissections included.
    pub fn list_all_files(&self) -> Vec<CaptureFileRef> {
        self.entries().map(|(file, _)| file.clone()).collect()
    }

    /// Files containing at least one of `protocols` with a nonzero count.
    pub fn list_files_with_protocols<S: AsRef<str>>(&self, protocols: &[S]) -> Vec<CaptureFileRef> {
        let wanted: BTreeSet<&str> = protocols.iter().map(AsRef::as_ref).collect();
        self.entries()
            .filter(|(_, entry)| {
                entry
                    .protocols
                    .iter()
                    .any(|(name, count)| *count > 0 && wanted.contains(name.as_str()))
            })
            .map(|(file, _)| file.clone())
            .collect()
    }
}

/// Split a `PROTO[,PROTO...]` argument into trimmed, non-empty names.
pub fn parse_protocol_set(raw: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(name.to_string()))
        .map(str::to_string)
        .collect()
}
