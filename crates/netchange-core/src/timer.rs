//! Restartable one-shot timer on top of a [`TaskRunner`].
//!
//! Starting the timer again before it fires replaces the pending firing.
//! Cancellation is generation based: each start or stop bumps a counter and a
//! delayed task that wakes up with a stale generation does nothing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::logging::targets;
use crate::task_runner::SharedTaskRunner;

struct TimerState {
    generation: AtomicU64,
    running: AtomicBool,
}

/// A timer that fires a closure once on a runner.
pub struct OneShotTimer {
    runner: SharedTaskRunner,
    state: Arc<TimerState>,
}

impl OneShotTimer {
    /// Create a stopped timer that fires on `runner`.
    pub fn new(runner: SharedTaskRunner) -> Self {
        Self {
            runner,
            state: Arc::new(TimerState {
                generation: AtomicU64::new(0),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Fire `task` after `delay`, replacing any pending firing.
    ///
    /// Returns `false` if the runner refused the delayed task.
    pub fn start<F>(&self, delay: Duration, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let generation = self.state.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.state.running.store(true, Ordering::Release);

        let state = self.state.clone();
        let posted = self.runner.post_delayed(
            delay,
            Box::new(move || {
                if state.generation.load(Ordering::Acquire) != generation {
                    return;
                }
                state.running.store(false, Ordering::Release);
                task();
            }),
        );

        if !posted {
            self.state.running.store(false, Ordering::Release);
            tracing::warn!(target: targets::TIMER, delay_ms = delay.as_millis() as u64, "timer could not be scheduled");
        } else {
            tracing::trace!(target: targets::TIMER, generation, delay_ms = delay.as_millis() as u64, "timer started");
        }
        posted
    }

    /// Cancel any pending firing.
    pub fn stop(&self) {
        self.state.generation.fetch_add(1, Ordering::AcqRel);
        self.state.running.store(false, Ordering::Release);
    }

    /// Whether a firing is pending.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }
}

impl Drop for OneShotTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for OneShotTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneShotTimer")
            .field("running", &self.is_running())
            .finish()
    }
}
