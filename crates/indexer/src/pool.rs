//! Bounded worker pool that yields per-file results in completion order.

use crate::run::RunContext;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinError, JoinHandle, JoinSet};

/// How a finished task ended. Tasks that never finished are returned by
/// [`TaskStream::finish`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Succeeded,
    Failed,
}

/// Implemented by per-task results so the pool can classify them.
pub trait TaskResult {
    fn succeeded(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFailure {
    Panicked(String),
    Aborted,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskFailure::Panicked(message) => write!(f, "task panicked: {message}"),
            TaskFailure::Aborted => write!(f, "task aborted"),
        }
    }
}

/// One finished task, tagged with the task it came from.
#[derive(Debug)]
pub struct TaskReport<T, R> {
    pub task: T,
    pub outcome: Result<R, TaskFailure>,
}

impl<T, R: TaskResult> TaskReport<T, R> {
    pub fn state(&self) -> TaskState {
        match &self.outcome {
            Ok(result) if result.succeeded() => TaskState::Succeeded,
            _ => TaskState::Failed,
        }
    }
}

/// Results of a [`schedule`] call, delivered as tasks complete.
pub struct TaskStream<T, R> {
    rx: mpsc::Receiver<TaskReport<T, R>>,
    driver: JoinHandle<Vec<T>>,
}

impl<T, R> TaskStream<T, R> {
    /// Next completed task, or `None` once every started task has been reported
    /// (or the run was killed).
    pub async fn next(&mut self) -> Option<TaskReport<T, R>> {
        self.rx.recv().await
    }

    /// Stop receiving and return the tasks that never produced a delivered result.
    pub async fn finish(self) -> Vec<T> {
        let Self { mut rx, driver } = self;
        rx.close();
        let mut cancelled = Vec::new();
        while let Some(report) = rx.recv().await {
            cancelled.push(report.task);
        }
        match driver.await {
            Ok(rest) => cancelled.extend(rest),
            Err(err) => log::error!("Scheduler task failed: {err}"),
        }
        cancelled
    }
}

/// Run `task_fn` over `tasks` with at most `ctx.concurrency()` tasks in flight.
///
/// A failure inside one task (including a panic) is reported for that task only. A
/// graceful stop prevents new tasks from starting; a kill aborts the in-flight ones.
pub fn schedule<T, R, F, Fut>(ctx: &RunContext, tasks: Vec<T>, task_fn: F) -> TaskStream<T, R>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let concurrency = ctx.concurrency();
    ctx.progress().set_total(tasks.len());
    log::debug!(
        "Scheduling {} tasks with concurrency {concurrency}",
        tasks.len()
    );

    let (tx, rx) = mpsc::channel(concurrency);
    let driver = tokio::spawn(drive(
        tasks,
        task_fn,
        concurrency,
        ctx.cancel().clone(),
        tx,
    ));
    TaskStream { rx, driver }
}

async fn drive<T, R, F, Fut>(
    tasks: Vec<T>,
    task_fn: F,
    concurrency: usize,
    cancel: crate::CancelToken,
    tx: mpsc::Sender<TaskReport<T, R>>,
) -> Vec<T>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let mut pending: VecDeque<(usize, T)> = tasks.into_iter().enumerate().collect();
    let mut running: HashMap<usize, T> = HashMap::new();
    let mut join = JoinSet::new();
    let mut undelivered: Vec<(usize, T)> = Vec::new();

    loop {
        while running.len() < concurrency && !cancel.is_stop_requested() {
            let Some((slot, task)) = pending.pop_front() else {
                break;
            };
            join.spawn(isolate(slot, task_fn(task.clone())));
            running.insert(slot, task);
        }
        if join.is_empty() {
            break;
        }

        tokio::select! {
            biased;
            () = cancel.killed() => {
                log::warn!("Killing {} in-flight tasks", running.len());
                join.shutdown().await;
                break;
            }
            joined = join.join_next() => {
                let Some(Ok((slot, outcome))) = joined else {
                    continue;
                };
                let Some(task) = running.remove(&slot) else {
                    continue;
                };
                if let Err(err) = tx.send(TaskReport { task, outcome }).await {
                    log::debug!("Result receiver closed; stopping scheduler");
                    undelivered.push((slot, err.0.task));
                    join.shutdown().await;
                    break;
                }
            }
        }
    }

    undelivered.extend(running);
    undelivered.extend(pending);
    undelivered.sort_by_key(|(slot, _)| *slot);
    undelivered.into_iter().map(|(_, task)| task).collect()
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run `work` on its own task so a panic is caught and attributed to `slot`. Aborting
/// the wrapper aborts the work too, which drops (and kills) any child process it owns.
async fn isolate<R, Fut>(slot: usize, work: Fut) -> (usize, Result<R, TaskFailure>)
where
    R: Send + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let handle = tokio::spawn(work);
    let _abort = AbortOnDrop(handle.abort_handle());
    let outcome = handle.await.map_err(failure_from_join);
    (slot, outcome)
}

fn failure_from_join(err: JoinError) -> TaskFailure {
    if !err.is_panic() {
        return TaskFailure::Aborted;
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    TaskFailure::Panicked(message)
}
