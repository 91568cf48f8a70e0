use anyhow::{bail, Result};
use capdex_indexer::parse_protocol_set;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "capdex")]
#[command(about = "Protocol index and dissection regression runs for capture corpora", long_about = None)]
#[command(version)]
pub(crate) struct Cli {
    /// Protocol index file (created on the first indexing run)
    pub index_file: PathBuf,

    /// Capture files or directories to index
    pub paths: Vec<PathBuf>,

    /// Fully dissect the selected files instead of indexing
    #[arg(short = 'd', long)]
    pub dissect_files: bool,

    /// Process at most N files
    #[arg(short = 'm', long, value_name = "N")]
    pub max_files: Option<usize>,

    /// Directory containing the dissection engine (default: search PATH)
    #[arg(short = 'b', long, value_name = "DIR")]
    pub binary_dir: Option<PathBuf>,

    /// Directory containing a second engine build to compare against
    #[arg(short = 'c', long, value_name = "DIR")]
    pub compare_dir: Option<PathBuf>,

    /// Concurrent dissections (env: CAPDEX_CONCURRENCY; default: core count)
    #[arg(short = 'j', long = "jobs", value_name = "N")]
    pub jobs: Option<usize>,

    /// Shuffle the files before applying --max-files
    #[arg(short = 'r', long)]
    pub randomize: bool,

    /// Seed for --randomize
    #[arg(long, value_name = "N")]
    pub seed: Option<u64>,

    /// Print every protocol in the index with its total count
    #[arg(long)]
    pub list_all_proto: bool,

    /// Select every file in the index
    #[arg(long)]
    pub list_all_files: bool,

    /// Select files containing any of the given protocols
    #[arg(long, value_name = "PROTO[,PROTO...]")]
    pub list_all_proto_files: Option<String>,

    /// Re-run files whose earlier dissection failed
    #[arg(long)]
    pub retry_failed: bool,

    /// Per-invocation timeout in seconds, 0 disables it (env: CAPDEX_TASK_TIMEOUT_SECS)
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,

    /// A second interrupt within this window kills in-flight dissections
    #[arg(long, value_name = "MS", default_value_t = 1_000)]
    pub grace_ms: u64,

    /// Engine executable name
    #[arg(long, value_name = "NAME", default_value = "tshark")]
    pub engine: String,

    /// Save the index after every N results (0: only at the end)
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub checkpoint_every: usize,

    /// Keep mismatching comparator outputs in DIR
    #[arg(long, value_name = "DIR")]
    pub keep_dir: Option<PathBuf>,

    /// Print results as JSON (implies --quiet)
    #[arg(long)]
    pub json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log only warnings and errors
    #[arg(short, long)]
    pub quiet: bool,
}

/// Which files a query-driven workflow runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Selection {
    AllFiles,
    WithProtocols(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Action {
    ListProtocols,
    ListFiles(Selection),
    Dissect(Selection),
    Compare {
        selection: Selection,
        candidate_dir: PathBuf,
    },
    Index {
        roots: Vec<PathBuf>,
    },
}

impl Cli {
    fn selection(&self) -> Result<Option<Selection>> {
        match (&self.list_all_proto_files, self.list_all_files) {
            (Some(_), true) => {
                bail!("--list-all-files and --list-all-proto-files are mutually exclusive")
            }
            (Some(raw), false) => {
                let protocols = parse_protocol_set(raw);
                if protocols.is_empty() {
                    bail!("--list-all-proto-files needs at least one protocol name");
                }
                Ok(Some(Selection::WithProtocols(protocols)))
            }
            (None, true) => Ok(Some(Selection::AllFiles)),
            (None, false) => Ok(None),
        }
    }

    /// Check flag combinations and decide what to run.
    pub(crate) fn action(&self) -> Result<Action> {
        if self.dissect_files && self.compare_dir.is_some() {
            bail!("--dissect-files and --compare-dir are mutually exclusive");
        }

        let selection = self.selection()?;
        let queries_index =
            self.list_all_proto || selection.is_some() || self.dissect_files || self.compare_dir.is_some();
        if queries_index && !self.paths.is_empty() {
            bail!("capture paths are only accepted when indexing");
        }

        if self.list_all_proto {
            if selection.is_some() || self.dissect_files || self.compare_dir.is_some() {
                bail!("--list-all-proto cannot be combined with other query flags");
            }
            return Ok(Action::ListProtocols);
        }

        match (selection, &self.compare_dir) {
            (Some(selection), Some(dir)) => Ok(Action::Compare {
                selection,
                candidate_dir: dir.clone(),
            }),
            (Some(selection), None) if self.dissect_files => Ok(Action::Dissect(selection)),
            (Some(selection), None) => Ok(Action::ListFiles(selection)),
            (None, Some(_)) => {
                bail!("--compare-dir requires --list-all-files or --list-all-proto-files")
            }
            (None, None) if self.dissect_files => {
                bail!("--dissect-files requires --list-all-files or --list-all-proto-files")
            }
            (None, None) => {
                if self.paths.is_empty() {
                    bail!("nothing to do: give capture files or directories to index, or a query flag");
                }
                Ok(Action::Index {
                    roots: self.paths.clone(),
                })
            }
        }
    }
}
