use crate::capture::CaptureFileRef;
use crate::invoker::{DissectionEngine, ToolMode};
use crate::pool::{schedule, TaskResult};
use crate::run::RunContext;
use crate::validator::file_size;
use crate::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt};

const COMPARE_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStatus {
    Matched,
    ExitMismatch,
    StdoutMismatch,
    StderrMismatch,
}

impl ComparisonStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ComparisonStatus::Matched => "matched",
            ComparisonStatus::ExitMismatch => "exit mismatch",
            ComparisonStatus::StdoutMismatch => "stdout mismatch",
            ComparisonStatus::StderrMismatch => "stderr mismatch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComparisonResult {
    pub file: CaptureFileRef,
    pub status: ComparisonStatus,
    pub size_bytes: u64,
    /// Both exit statuses, set on an exit mismatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Output files kept for inspection when the builds disagree.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retained: Vec<PathBuf>,
    /// Set when output could not be captured at all; such files count as exit mismatches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComparisonResult {
    pub fn matched(&self) -> bool {
        self.status == ComparisonStatus::Matched
    }

    fn unavailable(file: CaptureFileRef, size_bytes: u64, error: String) -> Self {
        Self {
            file,
            status: ComparisonStatus::ExitMismatch,
            size_bytes,
            detail: None,
            retained: Vec::new(),
            error: Some(error),
        }
    }
}

impl TaskResult for ComparisonResult {
    fn succeeded(&self) -> bool {
        self.matched()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ComparisonReport {
    /// Where mismatching outputs were kept. `None` when a run-owned temp directory
    /// was removed because nothing had to be retained.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    pub matched: usize,
    pub mismatched: usize,
    pub cancelled: usize,
    pub interrupted: bool,
    pub results: Vec<ComparisonResult>,
}

impl ComparisonReport {
    fn push(&mut self, result: ComparisonResult) {
        if result.matched() {
            self.matched += 1;
        } else {
            self.mismatched += 1;
        }
        self.results.push(result);
    }

    fn retained_any(&self) -> bool {
        self.results.iter().any(|r| !r.retained.is_empty())
    }

    pub fn mismatches(&self) -> impl Iterator<Item = &ComparisonResult> {
        self.results.iter().filter(|r| !r.matched())
    }
}

/// Dissect `file` with both builds and diff exit status, stdout and stderr byte for byte.
///
/// Outputs live in temp files under `out_dir`; they are deleted when the builds agree
/// and kept otherwise.
pub async fn compare_file(
    baseline: &DissectionEngine,
    candidate: &DissectionEngine,
    file: &CaptureFileRef,
    out_dir: &Path,
) -> ComparisonResult {
    let size_bytes = file_size(file).await;
    match compare_outputs(baseline, candidate, file, out_dir).await {
        Ok((status, detail, retained)) => {
            if status != ComparisonStatus::Matched {
                log::warn!("{file}: {}", status.as_str());
            }
            ComparisonResult {
                file: file.clone(),
                status,
                size_bytes,
                detail,
                retained,
                error: None,
            }
        }
        Err(err) => {
            log::warn!("{file}: could not capture output: {err}");
            ComparisonResult::unavailable(file.clone(), size_bytes, err.to_string())
        }
    }
}

async fn compare_outputs(
    baseline: &DissectionEngine,
    candidate: &DissectionEngine,
    file: &CaptureFileRef,
    out_dir: &Path,
) -> Result<(ComparisonStatus, Option<String>, Vec<PathBuf>)> {
    let base = baseline
        .invoke_retained(ToolMode::FullDissection, file, out_dir, "baseline")
        .await?;
    let cand = candidate
        .invoke_retained(ToolMode::FullDissection, file, out_dir, "candidate")
        .await?;

    let (status, detail) = if base.status != cand.status {
        (
            ComparisonStatus::ExitMismatch,
            Some(format!("baseline {}, candidate {}", base.status, cand.status)),
        )
    } else if !same_contents(base.stdout_path(), cand.stdout_path()).await? {
        (ComparisonStatus::StdoutMismatch, None)
    } else if !same_contents(base.stderr_path(), cand.stderr_path()).await? {
        (ComparisonStatus::StderrMismatch, None)
    } else {
        (ComparisonStatus::Matched, None)
    };

    if status == ComparisonStatus::Matched {
        return Ok((status, None, Vec::new()));
    }

    let mut retained = base.keep()?;
    retained.extend(cand.keep()?);
    Ok((status, detail, retained))
}

async fn fill<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Byte-for-byte equality, read in fixed-size chunks.
async fn same_contents(a: &Path, b: &Path) -> Result<bool> {
    let mut file_a = tokio::fs::File::open(a).await?;
    let mut file_b = tokio::fs::File::open(b).await?;
    if file_a.metadata().await?.len() != file_b.metadata().await?.len() {
        return Ok(false);
    }

    let mut buf_a = vec![0u8; COMPARE_CHUNK];
    let mut buf_b = vec![0u8; COMPARE_CHUNK];
    loop {
        let n_a = fill(&mut file_a, &mut buf_a).await?;
        let n_b = fill(&mut file_b, &mut buf_b).await?;
        if n_a != n_b || buf_a[..n_a] != buf_b[..n_b] {
            return Ok(false);
        }
        if n_a == 0 {
            return Ok(true);
        }
    }
}

#[allow(deprecated)]
fn persist_dir(temp: tempfile::TempDir) -> PathBuf {
    temp.into_path()
}

/// Golden-master regression test between two builds of the dissection engine.
pub struct DifferentialComparator {
    baseline: DissectionEngine,
    candidate: DissectionEngine,
    out_dir: Option<PathBuf>,
}

impl DifferentialComparator {
    /// Outputs go to a fresh `capdex-compare-*` directory under the system temp dir,
    /// which is removed again if nothing had to be retained.
    pub fn new(baseline: DissectionEngine, candidate: DissectionEngine) -> Self {
        Self {
            baseline,
            candidate,
            out_dir: None,
        }
    }

    /// Keep mismatching outputs in `dir` instead. The directory is never removed.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.out_dir = Some(dir.into());
        self
    }

    /// The caller-chosen output directory, if any.
    pub fn output_dir(&self) -> Option<&Path> {
        self.out_dir.as_deref()
    }

    pub async fn run(
        &self,
        ctx: &RunContext,
        files: Vec<CaptureFileRef>,
    ) -> Result<ComparisonReport> {
        self.run_with(ctx, files, |_| {}).await
    }

    pub async fn run_with<C>(
        &self,
        ctx: &RunContext,
        files: Vec<CaptureFileRef>,
        mut on_result: C,
    ) -> Result<ComparisonReport>
    where
        C: FnMut(&ComparisonResult),
    {
        let (out_dir, owned) = match &self.out_dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                (dir.clone(), None)
            }
            None => {
                let temp = tempfile::Builder::new()
                    .prefix("capdex-compare-")
                    .tempdir()?;
                (temp.path().to_path_buf(), Some(temp))
            }
        };
        log::info!(
            "Comparing {} against {} on {} files (outputs in {})",
            self.baseline.binary().display(),
            self.candidate.binary().display(),
            files.len(),
            out_dir.display()
        );

        let baseline = self.baseline.clone();
        let candidate = self.candidate.clone();
        let task_dir = out_dir.clone();
        let mut stream = schedule(ctx, files, move |file: CaptureFileRef| {
            let baseline = baseline.clone();
            let candidate = candidate.clone();
            let out_dir = task_dir.clone();
            async move { compare_file(&baseline, &candidate, &file, &out_dir).await }
        });

        let mut report = ComparisonReport::default();
        while let Some(task) = stream.next().await {
            let result = match task.outcome {
                Ok(result) => result,
                Err(failure) => ComparisonResult::unavailable(
                    task.task.clone(),
                    file_size(&task.task).await,
                    failure.to_string(),
                ),
            };
            ctx.progress().record(&result.file, result.matched());
            on_result(&result);
            report.push(result);
        }

        report.cancelled = stream.finish().await.len();
        report.interrupted = ctx.cancel().is_stop_requested();

        report.output_dir = match owned {
            None => Some(out_dir),
            Some(temp) if report.retained_any() => Some(persist_dir(temp)),
            // Dropping the TempDir removes it.
            Some(_) => None,
        };
        log::info!(
            "Comparison completed: {} matched, {} mismatched",
            report.matched,
            report.mismatched
        );
        Ok(report)
    }
}
