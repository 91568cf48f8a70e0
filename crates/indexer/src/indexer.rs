use crate::capture::{CaptureFileRef, IndexEntry, ProtocolCounts, ProtocolIndex};
use crate::invoker::{DissectionEngine, ToolMode};
use crate::pool::{schedule, TaskResult, TaskState};
use crate::run::RunContext;
use crate::stats::BuildReport;
use crate::store::IndexStore;
use crate::Result;
use std::time::Instant;

impl TaskResult for IndexEntry {
    fn succeeded(&self) -> bool {
        !self.is_failed()
    }
}

/// Count protocol names in `frame.protocols` output: one line per frame, names joined by `:`.
///
/// Every occurrence counts, so a protocol repeated inside one frame (tunnels) counts twice.
pub fn parse_protocol_chain(stdout: &[u8]) -> ProtocolCounts {
    let mut counts = ProtocolCounts::new();
    for line in String::from_utf8_lossy(stdout).lines() {
        for token in line.split(':').map(str::trim).filter(|t| !t.is_empty()) {
            *counts.entry(token.to_string()).or_insert(0) += 1;
        }
    }
    counts
}

/// Run the engine in protocol-chain mode for one file. Failures become failed entries.
pub async fn extract_protocols(engine: &DissectionEngine, file: &CaptureFileRef) -> IndexEntry {
    let invocation = engine.invoke(ToolMode::ProtocolChain, file).await;
    if invocation.succeeded() {
        let protocols = parse_protocol_chain(&invocation.stdout);
        log::debug!("{file}: {} distinct protocols", protocols.len());
        IndexEntry::indexed(protocols)
    } else {
        let summary = invocation.failure_summary();
        log::warn!("{file}: {summary}");
        IndexEntry::failed(summary)
    }
}

/// Builds and persists the protocol index.
///
/// The builder is the index's only writer: worker tasks return entries, and the builder
/// merges them into the in-memory index as they arrive and saves it at checkpoints and
/// at the end of the run, including after a stop or kill.
pub struct IndexBuilder {
    engine: DissectionEngine,
    store: IndexStore,
    checkpoint_every: usize,
}

impl IndexBuilder {
    pub fn new(engine: DissectionEngine, store: IndexStore) -> Self {
        Self {
            engine,
            store,
            checkpoint_every: 0,
        }
    }

    /// Save after every `n` merged results. Zero saves only at the end.
    pub fn with_checkpoint_every(mut self, n: usize) -> Self {
        self.checkpoint_every = n;
        self
    }

    pub async fn run(
        &self,
        ctx: &RunContext,
        index: &mut ProtocolIndex,
        files: Vec<CaptureFileRef>,
    ) -> Result<BuildReport> {
        self.run_with(ctx, index, files, |_, _| {}).await
    }

    /// Like [`run`](Self::run), calling `on_entry` for every merged result.
    pub async fn run_with<C>(
        &self,
        ctx: &RunContext,
        index: &mut ProtocolIndex,
        files: Vec<CaptureFileRef>,
        mut on_entry: C,
    ) -> Result<BuildReport>
    where
        C: FnMut(&CaptureFileRef, &IndexEntry),
    {
        let start = Instant::now();
        let mut stats = BuildReport::new();

        log::info!(
            "Indexing {} capture files with {} workers",
            files.len(),
            ctx.concurrency()
        );

        let engine = self.engine.clone();
        let mut stream = schedule(ctx, files, move |file: CaptureFileRef| {
            let engine = engine.clone();
            async move { extract_protocols(&engine, &file).await }
        });

        let mut since_checkpoint = 0usize;
        while let Some(report) = stream.next().await {
            let succeeded = report.state() == TaskState::Succeeded;
            let file = report.task;
            let entry = match report.outcome {
                Ok(entry) => entry,
                Err(failure) => {
                    log::warn!("{file}: {failure}");
                    IndexEntry::failed(failure.to_string())
                }
            };

            ctx.progress().record(&file, succeeded);
            stats.add_entry(&file, &entry);
            on_entry(&file, &entry);
            index.insert(file, entry);

            since_checkpoint += 1;
            if self.checkpoint_every > 0 && since_checkpoint >= self.checkpoint_every {
                self.store.save(index).await?;
                since_checkpoint = 0;
            }
        }

        let cancelled = stream.finish().await;
        stats.cancelled = cancelled.len();
        stats.interrupted = ctx.cancel().is_stop_requested();
        if stats.interrupted {
            log::warn!(
                "Indexing interrupted: {}; {} files left for the next run",
                ctx.progress().describe(),
                stats.cancelled
            );
        }

        self.store.save(index).await?;

        #[allow(clippy::cast_possible_truncation)]
        {
            stats.time_ms = start.elapsed().as_millis() as u64;
        }
        log::info!(
            "Indexing completed: {} indexed, {} failed in {}ms",
            stats.indexed,
            stats.failed,
            stats.time_ms
        );
        Ok(stats)
    }
}
