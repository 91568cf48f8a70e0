use crate::capture::{CaptureFileRef, IndexEntry, ProtocolIndex};
use crate::index_lock::{acquire_index_write_lock, IndexWriteLock};
use crate::{CorpusError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

pub const INDEX_FORMAT: &str = "capdex-index";
pub const INDEX_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct IndexHeader {
    format: String,
    schema_version: u32,
}

#[derive(Serialize)]
struct EntryLineRef<'a> {
    path: &'a CaptureFileRef,
    #[serde(flatten)]
    entry: &'a IndexEntry,
}

#[derive(Deserialize)]
struct EntryLine {
    path: CaptureFileRef,
    #[serde(flatten)]
    entry: IndexEntry,
}

/// Persisted protocol index: a JSONL file with a versioned header line.
#[derive(Debug, Clone)]
pub struct IndexStore {
    path: PathBuf,
}

impl IndexStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the single-writer lock for this index file. Fails fast if another run holds it.
    pub async fn lock(&self) -> Result<IndexWriteLock> {
        acquire_index_write_lock(&self.path).await
    }

    /// Load the index. A missing file is an empty index.
    pub async fn load(&self) -> Result<ProtocolIndex> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No index at {}, starting empty", self.path.display());
                return Ok(ProtocolIndex::new());
            }
            Err(err) => return Err(err.into()),
        };
        let index = decode_index(&bytes)?;
        log::info!(
            "Loaded {} index entries from {}",
            index.len(),
            self.path.display()
        );
        Ok(index)
    }

    /// Replace the persisted index atomically (write temp, fsync, rename).
    pub async fn save(&self, index: &ProtocolIndex) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = encode_index(index)?;
        let tmp = tmp_path(&self.path);
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;

        log::debug!(
            "Saved {} index entries to {}",
            index.len(),
            self.path.display()
        );
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

pub fn encode_index(index: &ProtocolIndex) -> Result<Vec<u8>> {
    let mut out = serde_json::to_vec(&IndexHeader {
        format: INDEX_FORMAT.to_string(),
        schema_version: INDEX_SCHEMA_VERSION,
    })?;
    out.push(b'\n');
    for (path, entry) in index.entries() {
        serde_json::to_writer(&mut out, &EntryLineRef { path, entry })?;
        out.push(b'\n');
    }
    Ok(out)
}

pub fn decode_index(bytes: &[u8]) -> Result<ProtocolIndex> {
    let text = std::str::from_utf8(bytes).map_err(|err| CorpusError::CorruptIndex {
        line: 0,
        reason: format!("not UTF-8: {err}"),
    })?;

    let mut index = ProtocolIndex::new();
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty());

    let Some((line_no, header)) = lines.next() else {
        return Ok(index);
    };
    let header: IndexHeader =
        serde_json::from_str(header).map_err(|err| CorpusError::CorruptIndex {
            line: line_no,
            reason: format!("invalid header: {err}"),
        })?;
    if header.format != INDEX_FORMAT {
        return Err(CorpusError::CorruptIndex {
            line: line_no,
            reason: format!("unknown format {:?}", header.format),
        });
    }
    if header.schema_version != INDEX_SCHEMA_VERSION {
        return Err(CorpusError::UnsupportedSchema {
            found: header.schema_version,
            expected: INDEX_SCHEMA_VERSION,
        });
    }

    for (line_no, line) in lines {
        let parsed: EntryLine =
            serde_json::from_str(line).map_err(|err| CorpusError::CorruptIndex {
                line: line_no,
                reason: err.to_string(),
            })?;
        if !parsed.path.path().is_absolute() {
            return Err(CorpusError::CorruptIndex {
                line: line_no,
                reason: format!("relative path {}", parsed.path),
            });
        }
        index.insert(parsed.path, parsed.entry);
    }

    Ok(index)
}
