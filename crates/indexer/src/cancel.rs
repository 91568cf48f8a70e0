use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;

pub const DEFAULT_INTERRUPT_GRACE: Duration = Duration::from_millis(1_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelState {
    Running,
    /// Start no new tasks; let in-flight ones finish and persist what completed.
    StopRequested,
    /// Abort in-flight tasks and kill their subprocesses.
    Killed,
}

/// Two-stage cancellation shared by everything taking part in one run.
///
/// The first [`interrupt`](Self::interrupt) requests a graceful stop. A second interrupt
/// within the grace window escalates to a kill; a later one only re-arms the window.
#[derive(Clone)]
pub struct CancelToken {
    state: Arc<watch::Sender<CancelState>>,
    last_interrupt: Arc<Mutex<Option<Instant>>>,
    grace: Duration,
}

impl CancelToken {
    pub fn new(grace: Duration) -> Self {
        let (state, _) = watch::channel(CancelState::Running);
        Self {
            state: Arc::new(state),
            last_interrupt: Arc::new(Mutex::new(None)),
            grace,
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn state(&self) -> CancelState {
        *self.state.borrow()
    }

    pub fn is_stop_requested(&self) -> bool {
        self.state() != CancelState::Running
    }

    pub fn is_killed(&self) -> bool {
        self.state() == CancelState::Killed
    }

    pub fn request_stop(&self) {
        self.state.send_if_modified(|state| {
            if *state == CancelState::Running {
                *state = CancelState::StopRequested;
                true
            } else {
                false
            }
        });
    }

    pub fn kill(&self) {
        self.state.send_if_modified(|state| {
            if *state == CancelState::Killed {
                false
            } else {
                *state = CancelState::Killed;
                true
            }
        });
    }

    /// Record a user interrupt and return the resulting state.
    pub fn interrupt(&self) -> CancelState {
        self.interrupt_at(Instant::now())
    }

    fn interrupt_at(&self, now: Instant) -> CancelState {
        let mut last = self
            .last_interrupt
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let within_grace = last.is_some_and(|prev| now.saturating_duration_since(prev) <= self.grace);
        *last = Some(now);
        drop(last);

        if within_grace && self.is_stop_requested() {
            self.kill();
        } else {
            self.request_stop();
        }
        self.state()
    }

    /// Resolves once the token reaches [`CancelState::Killed`].
    pub async fn killed(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this only returns on a kill.
        let _ = rx.wait_for(|state| *state == CancelState::Killed).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new(DEFAULT_INTERRUPT_GRACE)
    }
}
