//! Serialized background work with coalescing.
//!
//! A [`SerialWorker`] runs a blocking job on a background runner and reports
//! the result back on its origin runner. At most one job runs at a time;
//! requests that arrive while a job is running collapse into one rerun.
//!
//! ```text
//!            work_now                 job finished
//!   Idle ───────────────▶ Working ─────────────────▶ Idle (on_finished)
//!                          │  ▲
//!                 work_now │  │ job finished (result discarded, rerun)
//!                          ▼  │
//!                         Pending
//!
//!   cancel from any state ▶ Cancelled (terminal, results discarded)
//! ```
//!
//! All calls to [`SerialWorker::work_now`] and [`SerialWorker::cancel`] must
//! happen on the origin runner's sequence.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::logging::targets;
use crate::sequence::SequenceChecker;
use crate::task_runner::SharedTaskRunner;

/// Lifecycle of a [`SerialWorker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialWorkerState {
    /// No job queued or running.
    Idle,
    /// A job is running on the background runner.
    Working,
    /// A job is running and another was requested.
    Pending,
    /// Cancelled; nothing further will be reported.
    Cancelled,
}

type Job<T> = Box<dyn Fn() -> T + Send + Sync>;
type Finished<T> = Box<dyn Fn(T) + Send + Sync>;

struct Inner<T> {
    name: String,
    state: Mutex<SerialWorkerState>,
    origin: SharedTaskRunner,
    background: SharedTaskRunner,
    work: Job<T>,
    on_finished: Finished<T>,
    checker: SequenceChecker,
}

/// Runs `work` on a background runner, one job at a time.
pub struct SerialWorker<T: Send + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + 'static> SerialWorker<T> {
    /// Create an idle worker.
    ///
    /// `work` runs on `background`; `on_finished` receives its result on
    /// `origin`.
    pub fn new<W, F>(
        name: impl Into<String>,
        origin: SharedTaskRunner,
        background: SharedTaskRunner,
        work: W,
        on_finished: F,
    ) -> Self
    where
        W: Fn() -> T + Send + Sync + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(SerialWorkerState::Idle),
                checker: SequenceChecker::for_runner(origin.clone()),
                origin,
                background,
                work: Box::new(work),
                on_finished: Box::new(on_finished),
            }),
        }
    }

    /// Request a run. Coalesces with a run already in flight.
    pub fn work_now(&self) {
        Inner::work_now(&self.inner);
    }

    /// Stop reporting results. A running job finishes but is discarded.
    pub fn cancel(&self) {
        self.inner.checker.debug_assert_valid();
        *self.inner.state.lock() = SerialWorkerState::Cancelled;
        tracing::debug!(target: targets::SERIAL_WORKER, worker = %self.inner.name, "cancelled");
    }

    /// Current state.
    pub fn state(&self) -> SerialWorkerState {
        *self.inner.state.lock()
    }
}

impl<T: Send + 'static> Inner<T> {
    fn work_now(this: &Arc<Self>) {
        this.checker.debug_assert_valid();
        let mut state = this.state.lock();
        match *state {
            SerialWorkerState::Idle => {
                *state = SerialWorkerState::Working;
                drop(state);
                Self::dispatch(this);
            }
            SerialWorkerState::Working => {
                *state = SerialWorkerState::Pending;
                tracing::trace!(target: targets::SERIAL_WORKER, worker = %this.name, "coalescing request");
            }
            SerialWorkerState::Pending | SerialWorkerState::Cancelled => {}
        }
    }

    fn dispatch(this: &Arc<Self>) {
        let job = this.clone();
        let posted = this.background.post(Box::new(move || {
            let result = (job.work)();
            let reply = job.clone();
            if !job.origin.post(Box::new(move || Self::on_work_done(&reply, result))) {
                tracing::debug!(target: targets::SERIAL_WORKER, worker = %job.name, "origin runner gone; result dropped");
            }
        }));
        if !posted {
            tracing::warn!(target: targets::SERIAL_WORKER, worker = %this.name, "background runner refused job");
            let mut state = this.state.lock();
            if *state != SerialWorkerState::Cancelled {
                *state = SerialWorkerState::Idle;
            }
        }
    }

    fn on_work_done(this: &Arc<Self>, result: T) {
        this.checker.debug_assert_valid();
        let mut state = this.state.lock();
        match *state {
            SerialWorkerState::Cancelled => {}
            SerialWorkerState::Working => {
                *state = SerialWorkerState::Idle;
                drop(state);
                (this.on_finished)(result);
            }
            SerialWorkerState::Pending => {
                *state = SerialWorkerState::Idle;
                drop(state);
                tracing::trace!(target: targets::SERIAL_WORKER, worker = %this.name, "rerunning coalesced request");
                Self::work_now(this);
            }
            SerialWorkerState::Idle => {
                debug_assert!(false, "serial worker finished while idle");
            }
        }
    }
}

impl<T: Send + 'static> std::fmt::Debug for SerialWorker<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialWorker")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}
