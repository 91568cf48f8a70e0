use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Identity of a capture file inside the index: its absolute path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaptureFileRef(PathBuf);

impl CaptureFileRef {
    /// Build a reference from any path, resolving relative paths against the current directory.
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        if path.is_absolute() {
            return Ok(Self(path.to_path_buf()));
        }
        Ok(Self(std::env::current_dir()?.join(path)))
    }

    pub(crate) fn from_canonical(path: PathBuf) -> Self {
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn file_name_lossy(&self) -> String {
        self.0
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "capture".to_string())
    }
}

impl fmt::Display for CaptureFileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl AsRef<Path> for CaptureFileRef {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// Protocol name -> number of occurrences.
pub type ProtocolCounts = BTreeMap<String, u64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Indexed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub status: EntryStatus,
    #[serde(default)]
    pub protocols: ProtocolCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IndexEntry {
    pub fn indexed(protocols: ProtocolCounts) -> Self {
        Self {
            status: EntryStatus::Indexed,
            protocols,
            error: None,
        }
    }

    /// A file whose dissection failed. It stays in the index with no protocols.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: EntryStatus::Failed,
            protocols: ProtocolCounts::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == EntryStatus::Failed
    }
}

/// Per-file protocol summary for the whole corpus.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolIndex {
    entries: BTreeMap<CaptureFileRef, IndexEntry>,
}

impl ProtocolIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, file: &CaptureFileRef) -> bool {
        self.entries.contains_key(file)
    }

    pub fn get(&self, file: &CaptureFileRef) -> Option<&IndexEntry> {
        self.entries.get(file)
    }

    pub fn insert(&mut self, file: CaptureFileRef, entry: IndexEntry) -> Option<IndexEntry> {
        self.entries.insert(file, entry)
    }

    /// Entries in path order.
    pub fn entries(&self) -> impl Iterator<Item = (&CaptureFileRef, &IndexEntry)> {
        self.entries.iter()
    }

    /// Drop failed entries so the next run dissects those files again.
    pub fn remove_failed(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_failed());
        before - self.entries.len()
    }

    pub fn failed_count(&self) -> usize {
        self.entries.values().filter(|entry| entry.is_failed()).count()
    }

    /// Keep only the files that have no entry yet, preserving their order.
    pub fn unindexed(&self, files: Vec<CaptureFileRef>) -> Vec<CaptureFileRef> {
        let total = files.len();
        let pending: Vec<_> = files
            .into_iter()
            .filter(|file| !self.contains(file))
            .collect();
        if pending.len() < total {
            log::info!(
                "Incremental: {} of {} files already indexed",
                total - pending.len(),
                total
            );
        }
        pending
    }
}
