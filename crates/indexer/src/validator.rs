use crate::capture::CaptureFileRef;
use crate::invoker::{DissectionEngine, ToolMode};
use crate::pool::{schedule, TaskResult};
use crate::run::RunContext;
use serde::Serialize;

/// Outcome of one full dissection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DissectionResult {
    pub file: CaptureFileRef,
    pub succeeded: bool,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl TaskResult for DissectionResult {
    fn succeeded(&self) -> bool {
        self.succeeded
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub interrupted: bool,
    pub results: Vec<DissectionResult>,
}

impl ValidationReport {
    fn push(&mut self, result: DissectionResult) {
        if result.succeeded {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.results.push(result);
    }

    pub fn failures(&self) -> impl Iterator<Item = &DissectionResult> {
        self.results.iter().filter(|r| !r.succeeded)
    }
}

pub async fn dissect_file(engine: &DissectionEngine, file: &CaptureFileRef) -> DissectionResult {
    let size_bytes = file_size(file).await;
    let invocation = engine.invoke_quiet(ToolMode::FullDissection, file).await;
    let failure = (!invocation.succeeded()).then(|| invocation.failure_summary());
    if let Some(reason) = &failure {
        log::warn!("{file}: {reason}");
    }
    DissectionResult {
        file: file.clone(),
        succeeded: failure.is_none(),
        size_bytes,
        failure,
    }
}

pub(crate) async fn file_size(file: &CaptureFileRef) -> u64 {
    tokio::fs::metadata(file.path())
        .await
        .map(|meta| meta.len())
        .unwrap_or(0)
}

/// Fully dissects every file to find crashes and nonzero exits. Never touches the index.
pub struct DissectionValidator {
    engine: DissectionEngine,
}

impl DissectionValidator {
    pub fn new(engine: DissectionEngine) -> Self {
        Self { engine }
    }

    pub async fn run(&self, ctx: &RunContext, files: Vec<CaptureFileRef>) -> ValidationReport {
        self.run_with(ctx, files, |_| {}).await
    }

    pub async fn run_with<C>(
        &self,
        ctx: &RunContext,
        files: Vec<CaptureFileRef>,
        mut on_result: C,
    ) -> ValidationReport
    where
        C: FnMut(&DissectionResult),
    {
        log::info!(
            "Dissecting {} capture files with {} workers",
            files.len(),
            ctx.concurrency()
        );

        let engine = self.engine.clone();
        let mut stream = schedule(ctx, files, move |file: CaptureFileRef| {
            let engine = engine.clone();
            async move { dissect_file(&engine, &file).await }
        });

        let mut report = ValidationReport::default();
        while let Some(task) = stream.next().await {
            let result = match task.outcome {
                Ok(result) => result,
                Err(failure) => DissectionResult {
                    size_bytes: file_size(&task.task).await,
                    file: task.task,
                    succeeded: false,
                    failure: Some(failure.to_string()),
                },
            };
            ctx.progress().record(&result.file, result.succeeded);
            on_result(&result);
            report.push(result);
        }

        report.cancelled = stream.finish().await.len();
        report.interrupted = ctx.cancel().is_stop_requested();
        log::info!(
            "Dissection completed: {} succeeded, {} failed",
            report.succeeded,
            report.failed
        );
        report
    }
}
