//! Sequence affinity tracking.
//!
//! A *sequence* is an ordered stream of tasks that never run concurrently with
//! each other. Every [`TaskRunner`](crate::TaskRunner) that guarantees ordering
//! owns a [`SequenceId`], and while one of its tasks runs that id is visible on
//! the executing thread through [`current_sequence`].
//!
//! [`SequenceChecker`] is the debug-only guard objects use to verify they are
//! only touched from the sequence that owns them:
//!
//! ```ignore
//! use netchange_core::sequence::SequenceChecker;
//!
//! struct Calculator {
//!     checker: SequenceChecker,
//! }
//!
//! impl Calculator {
//!     fn on_event(&self) {
//!         self.checker.debug_assert_valid();
//!         // ... mutate sequence-owned state ...
//!     }
//! }
//! ```

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::ThreadId;

use parking_lot::Mutex;

use crate::logging::targets;
use crate::task_runner::SharedTaskRunner;

static NEXT_SEQUENCE_ID: AtomicU64 = AtomicU64::new(1);

/// Flag to enable/disable sequence checks globally.
static SEQUENCE_CHECKS_ENABLED: AtomicBool = AtomicBool::new(cfg!(debug_assertions));

thread_local! {
    static CURRENT_SEQUENCE: Cell<Option<SequenceId>> = const { Cell::new(None) };
}

/// Identity of one ordered task stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SequenceId(u64);

impl SequenceId {
    /// Allocate a fresh, process-unique id.
    pub fn next() -> Self {
        Self(NEXT_SEQUENCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric value, useful in log fields.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// The sequence whose task is executing on this thread, if any.
#[inline]
pub fn current_sequence() -> Option<SequenceId> {
    CURRENT_SEQUENCE.with(Cell::get)
}

/// Enable or disable sequence checks.
///
/// Checks default to on in debug builds and off in release builds.
pub fn set_sequence_checks_enabled(enabled: bool) {
    SEQUENCE_CHECKS_ENABLED.store(enabled, Ordering::SeqCst);
}

/// Whether sequence checks are currently enabled.
#[inline]
pub fn are_sequence_checks_enabled() -> bool {
    SEQUENCE_CHECKS_ENABLED.load(Ordering::Relaxed)
}

/// Marks the current thread as running tasks of `id` until dropped.
///
/// Scopes nest: dropping restores whatever sequence was current before.
pub(crate) struct SequenceScope {
    previous: Option<SequenceId>,
}

impl SequenceScope {
    pub(crate) fn enter(id: SequenceId) -> Self {
        let previous = CURRENT_SEQUENCE.with(|current| current.replace(Some(id)));
        Self { previous }
    }
}

impl Drop for SequenceScope {
    fn drop(&mut self) {
        CURRENT_SEQUENCE.with(|current| current.set(self.previous));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Affinity {
    Sequence(SequenceId),
    Thread(ThreadId),
}

impl Affinity {
    fn current() -> Self {
        match current_sequence() {
            Some(id) => Affinity::Sequence(id),
            None => Affinity::Thread(std::thread::current().id()),
        }
    }
}

enum Binding {
    Detached,
    Affinity(Affinity),
    Runner(SharedTaskRunner),
}

/// Verifies that an object is used from a single sequence.
///
/// A checker is bound either to whatever sequence (or bare thread) created it,
/// to an explicit runner, or lazily to the first caller after [`detach`].
///
/// [`detach`]: SequenceChecker::detach
pub struct SequenceChecker {
    binding: Mutex<Binding>,
}

impl SequenceChecker {
    /// Bind to the calling sequence, or to the calling thread outside of any task.
    pub fn new() -> Self {
        Self {
            binding: Mutex::new(Binding::Affinity(Affinity::current())),
        }
    }

    /// Bind to whatever the given runner considers its own sequence.
    pub fn for_runner(runner: SharedTaskRunner) -> Self {
        Self {
            binding: Mutex::new(Binding::Runner(runner)),
        }
    }

    /// Create a checker that binds to its first caller.
    pub fn detached() -> Self {
        Self {
            binding: Mutex::new(Binding::Detached),
        }
    }

    /// Drop the current binding; the next call re-binds.
    pub fn detach(&self) {
        *self.binding.lock() = Binding::Detached;
    }

    /// Whether the caller is on the bound sequence.
    pub fn called_on_valid_sequence(&self) -> bool {
        let mut binding = self.binding.lock();
        match &*binding {
            Binding::Detached => {
                *binding = Binding::Affinity(Affinity::current());
                true
            }
            Binding::Affinity(affinity) => *affinity == Affinity::current(),
            Binding::Runner(runner) => runner.runs_tasks_in_current_sequence(),
        }
    }

    /// Panic if checks are enabled and the caller is on the wrong sequence.
    #[track_caller]
    #[inline]
    pub fn debug_assert_valid(&self) {
        if are_sequence_checks_enabled() && !self.called_on_valid_sequence() {
            let location = std::panic::Location::caller();
            tracing::error!(
                target: targets::SEQUENCE,
                file = location.file(),
                line = location.line(),
                "sequence-affine object used from the wrong sequence"
            );
            panic!(
                "sequence-affine object used from the wrong sequence at {}:{}",
                location.file(),
                location.line()
            );
        }
    }
}

impl Default for SequenceChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SequenceChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let binding = match &*self.binding.lock() {
            Binding::Detached => "detached".to_string(),
            Binding::Affinity(Affinity::Sequence(id)) => format!("sequence {}", id.as_u64()),
            Binding::Affinity(Affinity::Thread(id)) => format!("thread {id:?}"),
            Binding::Runner(runner) => format!("runner sequence {}", runner.sequence_id().as_u64()),
        };
        f.debug_struct("SequenceChecker").field("binding", &binding).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_ids_are_unique() {
        let a = SequenceId::next();
        let b = SequenceId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_scope_sets_and_restores() {
        assert_eq!(current_sequence(), None);
        let outer = SequenceId::next();
        let inner = SequenceId::next();
        {
            let _outer = SequenceScope::enter(outer);
            assert_eq!(current_sequence(), Some(outer));
            {
                let _inner = SequenceScope::enter(inner);
                assert_eq!(current_sequence(), Some(inner));
            }
            assert_eq!(current_sequence(), Some(outer));
        }
        assert_eq!(current_sequence(), None);
    }

    #[test]
    fn test_checker_binds_to_creating_thread() {
        let checker = std::sync::Arc::new(SequenceChecker::new());
        assert!(checker.called_on_valid_sequence());

        let remote = checker.clone();
        let valid_elsewhere = std::thread::spawn(move || remote.called_on_valid_sequence())
            .join()
            .unwrap();
        assert!(!valid_elsewhere);
    }

    #[test]
    fn test_checker_distinguishes_sequences_on_one_thread() {
        let id = SequenceId::next();
        let checker = {
            let _scope = SequenceScope::enter(id);
            SequenceChecker::new()
        };
        assert!(!checker.called_on_valid_sequence());
        let _scope = SequenceScope::enter(id);
        assert!(checker.called_on_valid_sequence());
    }

    #[test]
    fn test_detached_checker_rebinds() {
        let checker = std::sync::Arc::new(SequenceChecker::detached());
        let remote = checker.clone();
        std::thread::spawn(move || assert!(remote.called_on_valid_sequence()))
            .join()
            .unwrap();
        assert!(!checker.called_on_valid_sequence());

        checker.detach();
        assert!(checker.called_on_valid_sequence());
    }
}
