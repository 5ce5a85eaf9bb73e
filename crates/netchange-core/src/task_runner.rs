//! Explicit executors.
//!
//! Everything in netchange that needs to run "later" or "over there" is handed
//! a [`TaskRunner`] instead of reaching for an ambient event loop. The caller
//! decides where observers are called back, where the debounce timer fires and
//! where blocking reads happen.
//!
//! Four runners are provided:
//!
//! - [`SequencedTaskRunner`]: a dedicated thread that runs tasks one at a time,
//!   in post order, with support for delayed tasks.
//! - [`ManualTaskRunner`]: a single-threaded runner driven by the caller with a
//!   virtual clock. Tests use it to control time deterministically.
//! - [`InlineTaskRunner`]: runs every posted task synchronously on the posting
//!   thread. It cannot delay tasks.
//! - [`ThreadPoolRunner`]: a rayon pool for blocking work. Tasks posted to it
//!   are not ordered with respect to each other.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use netchange_core::task_runner::{SequencedTaskRunner, TaskRunnerExt};
//!
//! let runner = Arc::new(SequencedTaskRunner::new("netchange-observer").unwrap());
//! runner.post_task(|| println!("runs on the runner thread"));
//! runner.post_delayed_task(Duration::from_millis(50), || println!("50ms later"));
//! runner.stop_and_join();
//! ```

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::Mutex;
use rayon::{ThreadPool as RayonThreadPool, ThreadPoolBuilder};

use crate::delayed_queue::DelayedQueue;
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging::{panic_message, targets};
use crate::sequence::{SequenceId, SequenceScope, current_sequence};

/// A unit of work posted to a runner.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A runner shared between its owner and everything that posts to it.
pub type SharedTaskRunner = Arc<dyn TaskRunner>;

static GLOBAL_POOL: OnceLock<ThreadPoolRunner> = OnceLock::new();

/// Something that runs posted tasks.
pub trait TaskRunner: Send + Sync {
    /// Queue a task to run as soon as possible.
    ///
    /// Returns `false` if the runner no longer accepts tasks.
    fn post(&self, task: Task) -> bool;

    /// Queue a task to run after `delay` has elapsed.
    ///
    /// Returns `false` if the runner no longer accepts tasks or cannot delay.
    fn post_delayed(&self, delay: Duration, task: Task) -> bool;

    /// Whether the caller is currently running inside this runner's sequence.
    fn runs_tasks_in_current_sequence(&self) -> bool;

    /// Identity of the runner's sequence.
    fn sequence_id(&self) -> SequenceId;
}

/// Closure-friendly posting helpers for any runner.
pub trait TaskRunnerExt {
    /// Post a closure.
    fn post_task<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static;

    /// Post a closure after a delay.
    fn post_delayed_task<F>(&self, delay: Duration, task: F) -> bool
    where
        F: FnOnce() + Send + 'static;
}

impl<R: TaskRunner + ?Sized> TaskRunnerExt for R {
    fn post_task<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.post(Box::new(task))
    }

    fn post_delayed_task<F>(&self, delay: Duration, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_delayed(delay, Box::new(task))
    }
}

/// Run one task, containing any panic so the runner survives it.
fn run_task(runner: &str, task: Task) {
    let _span = tracing::trace_span!(target: targets::TASK_RUNNER, "run_task", runner).entered();
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        tracing::error!(
            target: targets::TASK_RUNNER,
            runner,
            "task panicked: {}",
            panic_message(payload.as_ref())
        );
    }
}

// ============================================================================
// SequencedTaskRunner
// ============================================================================

/// Configuration for a [`SequencedTaskRunner`].
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Name for the runner thread.
    pub name: String,
    /// Stack size for the runner thread in bytes. `None` uses the default.
    pub stack_size: Option<usize>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            name: "netchange-runner".to_string(),
            stack_size: None,
        }
    }
}

impl RunnerConfig {
    /// Create a configuration with the given thread name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

enum Message {
    Run(Task),
    RunDelayed { run_at: Instant, task: Task },
    Shutdown,
}

struct RunnerState {
    running: AtomicBool,
    pending_tasks: AtomicUsize,
}

/// A dedicated thread that runs tasks one at a time in post order.
///
/// Delayed tasks run in order of their due time; ties keep post order. Stopping
/// the runner finishes the immediate tasks already queued and drops delayed
/// tasks that have not come due.
pub struct SequencedTaskRunner {
    name: String,
    // Taken by `stop`, so every accepted post is queued ahead of `Shutdown`.
    sender: Mutex<Option<Sender<Message>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
    state: Arc<RunnerState>,
    sequence_id: SequenceId,
}

impl SequencedTaskRunner {
    /// Spawn a runner thread with the given name.
    pub fn new(name: impl Into<String>) -> RuntimeResult<Self> {
        Self::with_config(RunnerConfig::with_name(name))
    }

    /// Spawn a runner thread with a custom configuration.
    pub fn with_config(config: RunnerConfig) -> RuntimeResult<Self> {
        let (sender, receiver) = unbounded();
        let state = Arc::new(RunnerState {
            running: AtomicBool::new(true),
            pending_tasks: AtomicUsize::new(0),
        });
        let sequence_id = SequenceId::next();

        let mut builder = thread::Builder::new().name(config.name.clone());
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let thread_state = state.clone();
        let thread_name = config.name.clone();
        let handle = builder
            .spawn(move || {
                runner_loop(&thread_name, receiver, sequence_id, &thread_state);
                thread_state.running.store(false, Ordering::Release);
            })
            .map_err(|source| RuntimeError::ThreadSpawn {
                name: config.name.clone(),
                source,
            })?;
        let thread_id = handle.thread().id();

        tracing::debug!(
            target: targets::TASK_RUNNER,
            runner = %config.name,
            sequence = sequence_id.as_u64(),
            "sequenced runner started"
        );

        Ok(Self {
            name: config.name,
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
            thread_id,
            state,
            sequence_id,
        })
    }

    /// The runner's thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the runner still accepts tasks.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    /// Number of immediate tasks queued but not yet started.
    pub fn pending_tasks(&self) -> usize {
        self.state.pending_tasks.load(Ordering::Acquire)
    }

    /// Stop accepting tasks and ask the thread to exit. Non-blocking.
    pub fn stop(&self) {
        let mut sender = self.sender.lock();
        self.state.running.store(false, Ordering::Release);
        if let Some(sender) = sender.take() {
            let _ = sender.send(Message::Shutdown);
        }
    }

    /// Wait for the runner thread to exit.
    ///
    /// Returns `false` if already joined, if called from the runner's own
    /// thread, or if the thread panicked outside of a task.
    pub fn join(&self) -> bool {
        if thread::current().id() == self.thread_id {
            return false;
        }
        match self.handle.lock().take() {
            Some(handle) => handle.join().is_ok(),
            None => false,
        }
    }

    /// Stop the runner and wait for it to exit.
    pub fn stop_and_join(&self) -> bool {
        self.stop();
        self.join()
    }

    fn send(&self, message: Message) -> bool {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            tracing::trace!(target: targets::TASK_RUNNER, runner = %self.name, "post to stopped runner rejected");
            return false;
        };
        self.state.pending_tasks.fetch_add(1, Ordering::AcqRel);
        if sender.send(message).is_ok() {
            true
        } else {
            self.state.pending_tasks.fetch_sub(1, Ordering::AcqRel);
            tracing::trace!(target: targets::TASK_RUNNER, runner = %self.name, "runner thread gone; post dropped");
            false
        }
    }
}

impl TaskRunner for SequencedTaskRunner {
    fn post(&self, task: Task) -> bool {
        self.send(Message::Run(task))
    }

    fn post_delayed(&self, delay: Duration, task: Task) -> bool {
        if delay.is_zero() {
            return self.post(task);
        }
        self.send(Message::RunDelayed {
            run_at: Instant::now() + delay,
            task,
        })
    }

    fn runs_tasks_in_current_sequence(&self) -> bool {
        current_sequence() == Some(self.sequence_id)
    }

    fn sequence_id(&self) -> SequenceId {
        self.sequence_id
    }
}

impl Drop for SequencedTaskRunner {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

impl std::fmt::Debug for SequencedTaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequencedTaskRunner")
            .field("name", &self.name)
            .field("sequence_id", &self.sequence_id)
            .field("running", &self.is_running())
            .finish()
    }
}

fn runner_loop(name: &str, receiver: Receiver<Message>, sequence_id: SequenceId, state: &RunnerState) {
    let _scope = SequenceScope::enter(sequence_id);
    let mut delayed = DelayedQueue::new();

    loop {
        while let Some(task) = delayed.pop_due(Instant::now()) {
            run_task(name, task);
        }

        let message = match delayed.next_run_at() {
            Some(run_at) => {
                let timeout = run_at.saturating_duration_since(Instant::now());
                match receiver.recv_timeout(timeout) {
                    Ok(message) => message,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match receiver.recv() {
                Ok(message) => message,
                Err(_) => break,
            },
        };

        match message {
            Message::Run(task) => {
                state.pending_tasks.fetch_sub(1, Ordering::AcqRel);
                run_task(name, task);
            }
            Message::RunDelayed { run_at, task } => {
                state.pending_tasks.fetch_sub(1, Ordering::AcqRel);
                delayed.push(run_at, task);
            }
            Message::Shutdown => {
                while let Ok(message) = receiver.try_recv() {
                    if let Message::Run(task) = message {
                        state.pending_tasks.fetch_sub(1, Ordering::AcqRel);
                        run_task(name, task);
                    }
                }
                break;
            }
        }
    }

    if delayed.len() > 0 {
        tracing::debug!(
            target: targets::TASK_RUNNER,
            runner = name,
            dropped = delayed.len(),
            "dropping delayed tasks on shutdown"
        );
    }
    delayed.clear();
    tracing::debug!(target: targets::TASK_RUNNER, runner = name, "sequenced runner exited");
}

// ============================================================================
// ManualTaskRunner
// ============================================================================

struct ManualState {
    now: Instant,
    immediate: VecDeque<Task>,
    delayed: DelayedQueue,
}

/// A runner that only runs tasks when told to, against a virtual clock.
///
/// The thread that created the runner counts as being on its sequence, so
/// objects bound to it may be built and inspected directly from a test body.
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::time::Duration;
/// use netchange_core::task_runner::{ManualTaskRunner, TaskRunnerExt};
///
/// let runner = ManualTaskRunner::new();
/// let fired = Arc::new(AtomicUsize::new(0));
/// let counter = fired.clone();
/// runner.post_delayed_task(Duration::from_secs(1), move || {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// runner.run_until_idle();
/// assert_eq!(fired.load(Ordering::SeqCst), 0);
/// runner.fast_forward_by(Duration::from_secs(1));
/// assert_eq!(fired.load(Ordering::SeqCst), 1);
/// ```
pub struct ManualTaskRunner {
    state: Mutex<ManualState>,
    sequence_id: SequenceId,
    owner: ThreadId,
}

impl ManualTaskRunner {
    /// Create a runner owned by the calling thread.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ManualState {
                now: Instant::now(),
                immediate: VecDeque::new(),
                delayed: DelayedQueue::new(),
            }),
            sequence_id: SequenceId::next(),
            owner: thread::current().id(),
        })
    }

    /// The runner's virtual time.
    pub fn now(&self) -> Instant {
        self.state.lock().now
    }

    /// Number of tasks waiting, immediate and delayed.
    pub fn pending_task_count(&self) -> usize {
        let state = self.state.lock();
        state.immediate.len() + state.delayed.len()
    }

    /// Whether any task is waiting.
    pub fn has_pending_task(&self) -> bool {
        self.pending_task_count() > 0
    }

    /// Delay until the next task is due, zero if one is due now.
    pub fn next_pending_delay(&self) -> Option<Duration> {
        let state = self.state.lock();
        if !state.immediate.is_empty() {
            return Some(Duration::ZERO);
        }
        state
            .delayed
            .next_run_at()
            .map(|run_at| run_at.saturating_duration_since(state.now))
    }

    /// Run every task that is due at the current virtual time, including tasks
    /// those tasks post. Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = {
                let mut state = self.state.lock();
                let now = state.now;
                match state.immediate.pop_front() {
                    Some(task) => Some(task),
                    None => state.delayed.pop_due(now),
                }
            };
            let Some(task) = task else { break };
            let _scope = SequenceScope::enter(self.sequence_id);
            run_task("manual", task);
            ran += 1;
        }
        ran
    }

    /// Advance virtual time by `delta`, running tasks as they come due.
    /// Returns the number of tasks run.
    pub fn fast_forward_by(&self, delta: Duration) -> usize {
        let target = self.now() + delta;
        let mut ran = self.run_until_idle();
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.delayed.next_run_at() {
                    Some(run_at) if run_at <= target => {
                        state.now = state.now.max(run_at);
                        true
                    }
                    _ => false,
                }
            };
            if !next {
                break;
            }
            ran += self.run_until_idle();
        }
        self.state.lock().now = target;
        ran + self.run_until_idle()
    }

    /// Drop every waiting task without running it.
    pub fn clear_pending_tasks(&self) {
        let mut state = self.state.lock();
        state.immediate.clear();
        state.delayed.clear();
    }
}

impl TaskRunner for ManualTaskRunner {
    fn post(&self, task: Task) -> bool {
        self.state.lock().immediate.push_back(task);
        true
    }

    fn post_delayed(&self, delay: Duration, task: Task) -> bool {
        let mut state = self.state.lock();
        let run_at = state.now + delay;
        state.delayed.push(run_at, task);
        true
    }

    fn runs_tasks_in_current_sequence(&self) -> bool {
        match current_sequence() {
            Some(id) => id == self.sequence_id,
            None => thread::current().id() == self.owner,
        }
    }

    fn sequence_id(&self) -> SequenceId {
        self.sequence_id
    }
}

// ============================================================================
// InlineTaskRunner
// ============================================================================

/// Runs each posted task immediately on the posting thread.
///
/// Delayed posts are rejected. Useful for observers that only record what they
/// receive and for synchronous test harnesses.
pub struct InlineTaskRunner {
    sequence_id: SequenceId,
}

impl InlineTaskRunner {
    /// Create an inline runner.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sequence_id: SequenceId::next(),
        })
    }
}

impl TaskRunner for InlineTaskRunner {
    fn post(&self, task: Task) -> bool {
        let _scope = SequenceScope::enter(self.sequence_id);
        run_task("inline", task);
        true
    }

    fn post_delayed(&self, delay: Duration, _task: Task) -> bool {
        tracing::warn!(
            target: targets::TASK_RUNNER,
            delay_ms = delay.as_millis() as u64,
            "inline runner cannot delay tasks; task dropped"
        );
        false
    }

    fn runs_tasks_in_current_sequence(&self) -> bool {
        current_sequence() == Some(self.sequence_id)
    }

    fn sequence_id(&self) -> SequenceId {
        self.sequence_id
    }
}

// ============================================================================
// ThreadPoolRunner
// ============================================================================

/// Configuration for a [`ThreadPoolRunner`].
#[derive(Debug, Clone)]
pub struct ThreadPoolConfig {
    /// Number of worker threads. `None` means one per CPU core.
    pub num_threads: Option<usize>,
    /// Name prefix for worker threads.
    pub thread_name: String,
    /// Stack size for worker threads in bytes.
    pub stack_size: Option<usize>,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            thread_name: "netchange-pool".to_string(),
            stack_size: None,
        }
    }
}

impl ThreadPoolConfig {
    /// Create a configuration with a fixed thread count.
    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            num_threads: Some(num_threads),
            ..Default::default()
        }
    }
}

/// A rayon-backed pool for blocking work.
///
/// Tasks are unordered and may run concurrently. Delayed posts are timed on a
/// lazily spawned helper thread and then handed to the pool.
pub struct ThreadPoolRunner {
    pool: Arc<RayonThreadPool>,
    thread_name: String,
    active_tasks: Arc<AtomicUsize>,
    delay_runner: OnceLock<SequencedTaskRunner>,
    sequence_id: SequenceId,
}

impl ThreadPoolRunner {
    /// The process-wide pool, created with default settings on first use.
    pub fn global() -> RuntimeResult<&'static ThreadPoolRunner> {
        if let Some(pool) = GLOBAL_POOL.get() {
            return Ok(pool);
        }
        let pool = ThreadPoolRunner::new(ThreadPoolConfig::default())?;
        Ok(GLOBAL_POOL.get_or_init(|| pool))
    }

    /// Build a pool.
    pub fn new(config: ThreadPoolConfig) -> RuntimeResult<Self> {
        let prefix = config.thread_name.clone();
        let mut builder = ThreadPoolBuilder::new().thread_name(move |index| format!("{prefix}-{index}"));

        if let Some(num_threads) = config.num_threads {
            builder = builder.num_threads(num_threads);
        }

        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let pool = builder.build()?;

        Ok(Self {
            pool: Arc::new(pool),
            thread_name: config.thread_name,
            active_tasks: Arc::new(AtomicUsize::new(0)),
            delay_runner: OnceLock::new(),
            sequence_id: SequenceId::next(),
        })
    }

    /// Number of threads in the pool.
    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Number of tasks currently running.
    pub fn active_tasks(&self) -> usize {
        self.active_tasks.load(Ordering::Acquire)
    }

    fn spawn(pool: &RayonThreadPool, name: String, active: Arc<AtomicUsize>, task: Task) {
        pool.spawn(move || {
            active.fetch_add(1, Ordering::AcqRel);
            run_task(&name, task);
            active.fetch_sub(1, Ordering::AcqRel);
        });
    }

    fn delay_runner(&self) -> Option<&SequencedTaskRunner> {
        if let Some(runner) = self.delay_runner.get() {
            return Some(runner);
        }
        match SequencedTaskRunner::new(format!("{}-delay", self.thread_name)) {
            Ok(runner) => Some(self.delay_runner.get_or_init(|| runner)),
            Err(error) => {
                tracing::error!(target: targets::TASK_RUNNER, %error, "cannot time delayed pool task");
                None
            }
        }
    }
}

impl TaskRunner for ThreadPoolRunner {
    fn post(&self, task: Task) -> bool {
        Self::spawn(&self.pool, self.thread_name.clone(), self.active_tasks.clone(), task);
        true
    }

    fn post_delayed(&self, delay: Duration, task: Task) -> bool {
        let Some(timer) = self.delay_runner() else {
            return false;
        };
        let pool = self.pool.clone();
        let name = self.thread_name.clone();
        let active = self.active_tasks.clone();
        timer.post_delayed(delay, Box::new(move || Self::spawn(&pool, name, active, task)))
    }

    fn runs_tasks_in_current_sequence(&self) -> bool {
        false
    }

    fn sequence_id(&self) -> SequenceId {
        self.sequence_id
    }
}

static_assertions::assert_impl_all!(SequencedTaskRunner: Send, Sync);
static_assertions::assert_impl_all!(ManualTaskRunner: Send, Sync);
static_assertions::assert_impl_all!(ThreadPoolRunner: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crossbeam_channel::bounded;

    #[test]
    fn test_sequenced_runs_in_post_order() {
        let runner = SequencedTaskRunner::new("test-order").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..50 {
            let seen = seen.clone();
            assert!(runner.post_task(move || seen.lock().push(i)));
        }
        assert!(runner.stop_and_join());

        assert_eq!(*seen.lock(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_sequenced_runs_inside_its_sequence() {
        let runner = Arc::new(SequencedTaskRunner::new("test-sequence").unwrap());
        assert!(!runner.runs_tasks_in_current_sequence());

        let (tx, rx) = bounded(1);
        let inner = runner.clone();
        runner.post_task(move || {
            tx.send(inner.runs_tasks_in_current_sequence()).unwrap();
        });
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        runner.stop_and_join();
    }

    #[test]
    fn test_sequenced_delayed_task_runs_after_delay() {
        let runner = SequencedTaskRunner::new("test-delay").unwrap();
        let (tx, rx) = bounded(2);
        let started = Instant::now();

        let late = tx.clone();
        runner.post_delayed_task(Duration::from_millis(60), move || late.send("late").unwrap());
        runner.post_task(move || tx.send("now").unwrap());

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "now");
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "late");
        assert!(started.elapsed() >= Duration::from_millis(60));
        runner.stop_and_join();
    }

    #[test]
    fn test_sequenced_survives_panicking_task() {
        let runner = SequencedTaskRunner::new("test-panic").unwrap();
        let (tx, rx) = bounded(1);

        runner.post_task(|| panic!("boom"));
        runner.post_task(move || tx.send(()).unwrap());

        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        runner.stop_and_join();
    }

    #[test]
    fn test_sequenced_rejects_after_stop() {
        let runner = SequencedTaskRunner::new("test-stop").unwrap();
        runner.stop();
        assert!(!runner.is_running());
        assert!(!runner.post_task(|| {}));
        assert!(runner.join());
        assert!(!runner.join());
    }

    #[test]
    fn test_sequenced_accepted_posts_run_when_stop_races() {
        for _ in 0..20 {
            let runner = Arc::new(SequencedTaskRunner::new("test-stop-race").unwrap());
            let ran = Arc::new(AtomicUsize::new(0));

            let poster = {
                let runner = runner.clone();
                let ran = ran.clone();
                thread::spawn(move || {
                    let mut accepted = 0;
                    for _ in 0..1_000 {
                        let ran = ran.clone();
                        if runner.post_task(move || {
                            ran.fetch_add(1, Ordering::SeqCst);
                        }) {
                            accepted += 1;
                        }
                    }
                    accepted
                })
            };
            runner.stop();
            let accepted = poster.join().unwrap();
            assert!(runner.join());

            assert_eq!(ran.load(Ordering::SeqCst), accepted);
        }
    }

    #[test]
    fn test_manual_runs_only_when_pumped() {
        let runner = ManualTaskRunner::new();
        let count = Arc::new(AtomicUsize::new(0));

        let counter = count.clone();
        runner.post_task(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(runner.pending_task_count(), 1);

        assert_eq!(runner.run_until_idle(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!runner.has_pending_task());
    }

    #[test]
    fn test_manual_fast_forward_runs_due_tasks_in_time_order() {
        let runner = ManualTaskRunner::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for (label, ms) in [("c", 300), ("a", 100), ("b", 200)] {
            let seen = seen.clone();
            runner.post_delayed_task(Duration::from_millis(ms), move || seen.lock().push(label));
        }

        runner.fast_forward_by(Duration::from_millis(150));
        assert_eq!(*seen.lock(), vec!["a"]);
        assert_eq!(runner.next_pending_delay(), Some(Duration::from_millis(50)));

        runner.fast_forward_by(Duration::from_millis(150));
        assert_eq!(*seen.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_manual_tasks_posted_while_running_observe_virtual_time() {
        let runner = ManualTaskRunner::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let inner_runner = runner.clone();
        let inner_seen = seen.clone();
        runner.post_delayed_task(Duration::from_millis(100), move || {
            inner_seen.lock().push("outer");
            let seen = inner_seen.clone();
            inner_runner.post_delayed_task(Duration::from_millis(100), move || seen.lock().push("inner"));
        });

        runner.fast_forward_by(Duration::from_millis(150));
        assert_eq!(*seen.lock(), vec!["outer"]);
        runner.fast_forward_by(Duration::from_millis(50));
        assert_eq!(*seen.lock(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_manual_owner_thread_counts_as_sequence() {
        let runner = ManualTaskRunner::new();
        assert!(runner.runs_tasks_in_current_sequence());

        let remote = runner.clone();
        let elsewhere = std::thread::spawn(move || remote.runs_tasks_in_current_sequence())
            .join()
            .unwrap();
        assert!(!elsewhere);
    }

    #[test]
    fn test_inline_runs_synchronously_and_rejects_delays() {
        let runner = InlineTaskRunner::new();
        let count = Arc::new(AtomicUsize::new(0));

        let counter = count.clone();
        assert!(runner.post_task(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(!runner.post_delayed_task(Duration::from_millis(1), || {}));
    }

    #[test]
    fn test_pool_runs_tasks_and_delayed_tasks() {
        let pool = ThreadPoolRunner::new(ThreadPoolConfig::with_threads(2)).unwrap();
        assert_eq!(pool.num_threads(), 2);
        assert!(!pool.runs_tasks_in_current_sequence());

        let (tx, rx) = bounded(2);
        let delayed = tx.clone();
        pool.post_task(move || tx.send("now").unwrap());
        pool.post_delayed_task(Duration::from_millis(20), move || delayed.send("later").unwrap());

        let mut got = vec![
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        ];
        got.sort();
        assert_eq!(got, vec!["later", "now"]);
    }
}
