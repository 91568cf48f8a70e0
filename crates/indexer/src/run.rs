use crate::cancel::CancelToken;
use crate::capture::CaptureFileRef;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Counters for the run in progress. Workers never touch it; the controller records
/// each result as it is collected.
#[derive(Debug)]
pub struct Progress {
    total: AtomicUsize,
    processed: AtomicUsize,
    failed: AtomicUsize,
    current: Mutex<Option<String>>,
    started: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    pub current: Option<String>,
    pub elapsed: Duration,
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "processed {}/{}", self.processed, self.total)?;
        if self.failed > 0 {
            write!(f, " ({} failed)", self.failed)?;
        }
        if let Some(current) = &self.current {
            write!(f, ", last {current}")?;
        }
        write!(f, ", elapsed {:.1}s", self.elapsed.as_secs_f64())
    }
}

impl Progress {
    pub fn new() -> Self {
        Self {
            total: AtomicUsize::new(0),
            processed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            current: Mutex::new(None),
            started: Instant::now(),
        }
    }

    /// Start counting a new batch of `total` tasks.
    pub fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
        self.processed.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn record(&self, file: &CaptureFileRef, succeeded: bool) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(file.to_string());
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            current: self
                .current
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            elapsed: self.started.elapsed(),
        }
    }

    pub fn describe(&self) -> String {
        self.snapshot().to_string()
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a workflow needs to know about the current run.
///
/// Cloning is cheap; clones share the cancellation token and progress counters.
#[derive(Clone)]
pub struct RunContext {
    concurrency: usize,
    cancel: CancelToken,
    progress: Arc<Progress>,
}

impl RunContext {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            cancel: CancelToken::default(),
            progress: Arc::new(Progress::new()),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn cancel(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }
}
