use std::time::Duration;

pub const MAX_CONCURRENCY: usize = 256;

const CONCURRENCY_ENV: &str = "CAPDEX_CONCURRENCY";
const TASK_TIMEOUT_ENV: &str = "CAPDEX_TASK_TIMEOUT_SECS";

/// One worker per host core.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn parse_concurrency(raw: Option<&str>, default_value: usize) -> usize {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default_value)
        .clamp(1, MAX_CONCURRENCY)
}

/// Flag value, else `CAPDEX_CONCURRENCY`, else the core count.
pub fn resolve_concurrency(flag: Option<usize>) -> usize {
    if let Some(value) = flag {
        return value.clamp(1, MAX_CONCURRENCY);
    }
    let raw = std::env::var(CONCURRENCY_ENV).ok();
    parse_concurrency(raw.as_deref(), default_concurrency())
}

fn parse_timeout_secs(raw: Option<&str>) -> Option<u64> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<u64>().ok())
}

/// Flag value, else `CAPDEX_TASK_TIMEOUT_SECS`. Zero means no timeout.
pub fn resolve_task_timeout(flag_secs: Option<u64>) -> Option<Duration> {
    let secs = flag_secs.or_else(|| {
        let raw = std::env::var(TASK_TIMEOUT_ENV).ok();
        parse_timeout_secs(raw.as_deref())
    })?;
    (secs > 0).then(|| Duration::from_secs(secs))
}
