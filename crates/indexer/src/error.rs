use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CorpusError>;

#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Dissection engine {} is unusable: {reason}", binary.display())]
    ToolInvocation { binary: PathBuf, reason: String },

    #[error("Unsupported index schema version {found} (expected {expected})")]
    UnsupportedSchema { found: u32, expected: u32 },

    #[error("Corrupt index at line {line}: {reason}")]
    CorruptIndex { line: usize, reason: String },

    #[error("Index {} is locked by another run", .0.display())]
    IndexLocked(PathBuf),

    #[error("{0}")]
    Other(String),
}
