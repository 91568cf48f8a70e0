//! # Capdex Indexer
//!
//! Protocol indexing and regression checks for large capture corpora.
//!
//! ## Pipeline
//!
//! ```text
//! Corpus roots
//!     │
//!     ├──> Corpus Locator (recursive, deduplicated)
//!     │      └─> Capture files
//!     │
//!     ├──> Coordinator (bounded pool, completion order)
//!     │      └─> Dissection engine subprocess per file
//!     │
//!     └──> Index Builder | Validator | Comparator
//!            └─> Protocol index / reports
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use capdex_indexer::{
//!     CorpusLocator, DissectionEngine, IndexBuilder, IndexStore, RunContext,
//! };
//!
//! #[tokio::main]
//! async fn main() -> capdex_indexer::Result<()> {
//!     let store = IndexStore::new("corpus.idx");
//!     let _lock = store.lock().await?;
//!     let mut index = store.load().await?;
//!
//!     let files = index.unindexed(CorpusLocator::new(["/captures"]).locate());
//!     let engine = DissectionEngine::resolve(None, "tshark")?;
//!     let ctx = RunContext::new(4);
//!
//!     let report = IndexBuilder::new(engine, store)
//!         .run(&ctx, &mut index, files)
//!         .await?;
//!     println!("Indexed {} files ({} failed)", report.indexed, report.failed);
//!     Ok(())
//! }
//! ```

mod cancel;
mod capture;
mod comparator;
mod error;
mod index_lock;
mod indexer;
mod invoker;
mod limits;
mod locator;
mod pool;
mod query;
mod run;
mod stats;
mod store;
mod validator;

pub use cancel::{CancelState, CancelToken, DEFAULT_INTERRUPT_GRACE};
pub use capture::{CaptureFileRef, EntryStatus, IndexEntry, ProtocolCounts, ProtocolIndex};
pub use comparator::{
    compare_file, ComparisonReport, ComparisonResult, ComparisonStatus, DifferentialComparator,
};
pub use error::{CorpusError, Result};
pub use index_lock::IndexWriteLock;
pub use indexer::{extract_protocols, parse_protocol_chain, IndexBuilder};
pub use invoker::{DissectionEngine, Invocation, InvocationStatus, RetainedOutput, ToolMode};
pub use limits::{
    default_concurrency, resolve_concurrency, resolve_task_timeout, MAX_CONCURRENCY,
};
pub use locator::CorpusLocator;
pub use pool::{schedule, TaskFailure, TaskReport, TaskResult, TaskState, TaskStream};
pub use query::parse_protocol_set;
pub use run::{Progress, ProgressSnapshot, RunContext};
pub use stats::BuildReport;
pub use store::{decode_index, encode_index, IndexStore, INDEX_FORMAT, INDEX_SCHEMA_VERSION};
pub use validator::{dissect_file, DissectionResult, DissectionValidator, ValidationReport};
