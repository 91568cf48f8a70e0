use anyhow::{Context as AnyhowContext, Result};
use capdex_indexer::{
    resolve_concurrency, resolve_task_timeout, BuildReport, CancelState, CancelToken, CaptureFileRef,
    CorpusLocator, DifferentialComparator, DissectionEngine, DissectionValidator, IndexBuilder,
    IndexStore, ProtocolIndex, RunContext,
};
use clap::Parser;
use flags::{Action, Cli, Selection};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;

mod flags;
mod report;

/// Process outcome, mapped to the exit code by the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    /// Usage error, missing engine or nothing selected.
    Failure,
    /// The run was stopped by an interrupt; completed work was saved.
    Interrupted,
}

impl ExitStatus {
    pub const fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failure => 1,
            ExitStatus::Interrupted => 130,
        }
    }
}

fn print_stdout(text: &str) -> Result<()> {
    use std::io::Write;

    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.write_all(b"\n"))
        .and_then(|_| stdout.flush())
    {
        if err.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}

fn print_line(text: &str) {
    if let Err(err) = print_stdout(text) {
        log::debug!("Failed to write progress line: {err}");
    }
}

/// Print `value` as pretty JSON, or through `render` as text.
fn emit<T: Serialize>(json: bool, value: &T, render: impl FnOnce(&T) -> String) -> Result<()> {
    if json {
        print_stdout(&serde_json::to_string_pretty(value)?)
    } else {
        print_stdout(&render(value))
    }
}

pub async fn main_entry() -> Result<ExitStatus> {
    let mut cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // --help and --version also arrive here; only real usage errors fail.
            let failed = err.use_stderr();
            err.print()?;
            return Ok(if failed {
                ExitStatus::Failure
            } else {
                ExitStatus::Success
            });
        }
    };

    // Keep stdout clean for JSON parsing
    if cli.json {
        cli.quiet = true;
    }

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let action = cli.action()?;
    let store = IndexStore::new(&cli.index_file);

    match action {
        Action::ListProtocols => run_list_protocols(&cli, &store).await,
        Action::ListFiles(selection) => run_list_files(&cli, &store, &selection).await,
        Action::Dissect(selection) => run_dissect(&cli, &store, &selection).await,
        Action::Compare {
            selection,
            candidate_dir,
        } => run_compare(&cli, &store, &selection, &candidate_dir).await,
        Action::Index { roots } => run_index(&cli, &store, roots).await,
    }
}

fn resolve_engine(cli: &Cli, binary_dir: Option<&Path>) -> Result<DissectionEngine> {
    let engine = DissectionEngine::resolve(binary_dir, &cli.engine)
        .context("Dissection engine is not available")?;
    log::debug!("Using engine {}", engine.binary().display());
    Ok(engine.with_timeout(resolve_task_timeout(cli.timeout_secs)))
}

async fn load_index(store: &IndexStore) -> Result<ProtocolIndex> {
    store
        .load()
        .await
        .with_context(|| format!("Failed to load index {}", store.path().display()))
}

/// Shuffle (with `--randomize`) and then cap (with `--max-files`).
fn sample(cli: &Cli, mut files: Vec<CaptureFileRef>) -> Vec<CaptureFileRef> {
    if cli.randomize {
        let mut rng = match cli.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        files.shuffle(&mut rng);
    }
    if let Some(max) = cli.max_files {
        files.truncate(max);
    }
    files
}

fn select(index: &ProtocolIndex, selection: &Selection) -> Vec<CaptureFileRef> {
    match selection {
        Selection::AllFiles => index.list_all_files(),
        Selection::WithProtocols(protocols) => index.list_files_with_protocols(protocols.as_slice()),
    }
}

async fn selected_files(
    cli: &Cli,
    store: &IndexStore,
    selection: &Selection,
) -> Result<Vec<CaptureFileRef>> {
    let index = load_index(store).await?;
    Ok(sample(cli, select(&index, selection)))
}

fn run_context(cli: &Cli) -> RunContext {
    let cancel = CancelToken::new(Duration::from_millis(cli.grace_ms));
    RunContext::new(resolve_concurrency(cli.jobs)).with_cancel(cancel)
}

/// Translate Ctrl-C into cancellation requests for the duration of a run.
fn spawn_interrupt_listener(ctx: RunContext) -> JoinHandle<()> {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            let progress = ctx.progress().describe();
            match ctx.cancel().interrupt() {
                CancelState::Killed => {
                    log::warn!("Interrupted again: killing in-flight dissections ({progress})");
                }
                _ => log::warn!(
                    "Interrupted: finishing in-flight files ({progress}); interrupt again within {:?} to kill them",
                    ctx.cancel().grace()
                ),
            }
        }
    })
}

fn finished(interrupted: bool) -> ExitStatus {
    if interrupted {
        ExitStatus::Interrupted
    } else {
        ExitStatus::Success
    }
}

async fn run_list_protocols(cli: &Cli, store: &IndexStore) -> Result<ExitStatus> {
    let counts = load_index(store).await?.list_all_protocols();
    if counts.is_empty() {
        log::error!("No protocols in {}", store.path().display());
        return Ok(ExitStatus::Failure);
    }
    emit(cli.json, &counts, report::render_protocol_counts)?;
    Ok(ExitStatus::Success)
}

async fn run_list_files(cli: &Cli, store: &IndexStore, selection: &Selection) -> Result<ExitStatus> {
    let files = selected_files(cli, store, selection).await?;
    if files.is_empty() {
        log::error!("No files selected from {}", store.path().display());
        return Ok(ExitStatus::Failure);
    }
    emit(cli.json, &files, |files| report::render_file_list(files))?;
    Ok(ExitStatus::Success)
}

async fn run_dissect(cli: &Cli, store: &IndexStore, selection: &Selection) -> Result<ExitStatus> {
    let engine = resolve_engine(cli, cli.binary_dir.as_deref())?;
    let files = selected_files(cli, store, selection).await?;
    if files.is_empty() {
        log::error!("No files selected from {}", store.path().display());
        return Ok(ExitStatus::Failure);
    }

    let ctx = run_context(cli);
    let listener = spawn_interrupt_listener(ctx.clone());
    let json = cli.json;
    let report = DissectionValidator::new(engine)
        .run_with(&ctx, files, |result| {
            if !json {
                print_line(&report::dissection_line(result));
            }
        })
        .await;
    listener.abort();

    emit(cli.json, &report, report::render_validation_summary)?;
    Ok(finished(report.interrupted))
}

async fn run_compare(
    cli: &Cli,
    store: &IndexStore,
    selection: &Selection,
    candidate_dir: &Path,
) -> Result<ExitStatus> {
    let baseline = resolve_engine(cli, cli.binary_dir.as_deref())?;
    let candidate = resolve_engine(cli, Some(candidate_dir))?;
    let files = selected_files(cli, store, selection).await?;
    if files.is_empty() {
        log::error!("No files selected from {}", store.path().display());
        return Ok(ExitStatus::Failure);
    }

    let mut comparator = DifferentialComparator::new(baseline, candidate);
    if let Some(dir) = &cli.keep_dir {
        comparator = comparator.with_output_dir(dir);
    }

    let ctx = run_context(cli);
    let listener = spawn_interrupt_listener(ctx.clone());
    let json = cli.json;
    let report = comparator
        .run_with(&ctx, files, |result| {
            if !json {
                print_line(&report::comparison_line(result));
            }
        })
        .await;
    listener.abort();
    let report = report.with_context(|| match comparator.output_dir() {
        Some(dir) => format!("Failed to prepare output directory {}", dir.display()),
        None => "Failed to create a temporary output directory".to_string(),
    })?;

    emit(cli.json, &report, report::render_comparison_summary)?;
    Ok(finished(report.interrupted))
}

async fn run_index(cli: &Cli, store: &IndexStore, roots: Vec<PathBuf>) -> Result<ExitStatus> {
    let engine = resolve_engine(cli, cli.binary_dir.as_deref())?;
    let _lock = store.lock().await?;
    let mut index = load_index(store).await?;

    if cli.retry_failed {
        let retried = index.remove_failed();
        if retried > 0 {
            log::info!("Retrying {retried} previously failed files");
        }
    }

    let located = CorpusLocator::new(&roots).locate();
    if located.is_empty() {
        log::error!("No capture files found under the given paths");
        return Ok(ExitStatus::Failure);
    }
    let total = located.len();
    let pending = index.unindexed(located);
    let skipped = total - pending.len();
    let files = sample(cli, pending);

    if files.is_empty() {
        log::info!(
            "Index {} is up to date ({} files)",
            store.path().display(),
            index.len()
        );
        let report = BuildReport {
            skipped,
            ..Default::default()
        };
        emit(cli.json, &report, report::render_build_summary)?;
        return Ok(ExitStatus::Success);
    }

    let ctx = run_context(cli);
    let listener = spawn_interrupt_listener(ctx.clone());
    let json = cli.json;
    let result = IndexBuilder::new(engine, store.clone())
        .with_checkpoint_every(cli.checkpoint_every)
        .run_with(&ctx, &mut index, files, |file, entry| {
            if !json {
                print_line(&report::index_line(file, entry));
            }
        })
        .await;
    listener.abort();

    let mut report = result
        .with_context(|| format!("Failed to save index {}", store.path().display()))?;
    report.skipped = skipped;
    emit(cli.json, &report, report::render_build_summary)?;
    Ok(finished(report.interrupted))
}
