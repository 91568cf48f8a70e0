use capdex_indexer::{
    BuildReport, CaptureFileRef, ComparisonReport, ComparisonResult, DissectionResult,
    IndexEntry, ProtocolCounts, ValidationReport,
};

pub fn render_protocol_counts(counts: &ProtocolCounts) -> String {
    let width = counts.keys().map(String::len).max().unwrap_or(0);
    counts
        .iter()
        .map(|(protocol, count)| format!("{protocol:<width$}  {count}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_file_list(files: &[CaptureFileRef]) -> String {
    files
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn index_line(file: &CaptureFileRef, entry: &IndexEntry) -> String {
    match &entry.error {
        Some(error) if entry.is_failed() => format!("failed   {file}: {error}"),
        _ if entry.is_failed() => format!("failed   {file}"),
        _ => format!("indexed  {file} ({} protocols)", entry.protocols.len()),
    }
}

pub fn dissection_line(result: &DissectionResult) -> String {
    let verdict = if result.succeeded { "pass" } else { "FAIL" };
    let mut line = format!("{verdict}  {:>12} bytes  {}", result.size_bytes, result.file);
    if let Some(failure) = &result.failure {
        line.push_str(&format!(": {failure}"));
    }
    line
}

pub fn comparison_line(result: &ComparisonResult) -> String {
    let mut line = format!(
        "{:<15}  {:>12} bytes  {}",
        result.status.as_str(),
        result.size_bytes,
        result.file
    );
    if let Some(detail) = result.detail.as_ref().or(result.error.as_ref()) {
        line.push_str(&format!(" ({detail})"));
    }
    line
}

fn interrupted_note(interrupted: bool, cancelled: usize) -> String {
    if interrupted {
        format!("; interrupted with {cancelled} files not run")
    } else {
        String::new()
    }
}

pub fn render_build_summary(report: &BuildReport) -> String {
    format!(
        "Indexed {} files, {} failed, {} already indexed in {}ms{}",
        report.indexed,
        report.failed,
        report.skipped,
        report.time_ms,
        interrupted_note(report.interrupted, report.cancelled)
    )
}

pub fn render_validation_summary(report: &ValidationReport) -> String {
    format!(
        "Dissected {} files: {} passed, {} failed{}",
        report.results.len(),
        report.succeeded,
        report.failed,
        interrupted_note(report.interrupted, report.cancelled)
    )
}

pub fn render_comparison_summary(report: &ComparisonReport) -> String {
    let mut out = format!(
        "Compared {} files: {} matched, {} mismatched{}",
        report.results.len(),
        report.matched,
        report.mismatched,
        interrupted_note(report.interrupted, report.cancelled)
    );
    if let Some(dir) = report.output_dir.as_ref().filter(|_| report.mismatched > 0) {
        out.push_str(&format!("\nMismatched outputs kept in {}", dir.display()));
    }
    out
}
