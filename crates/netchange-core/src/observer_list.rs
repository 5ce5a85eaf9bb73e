//! Thread-safe observer lists with per-observer delivery runners.
//!
//! Each registration pairs an observer with the [`TaskRunner`] it wants to be
//! called back on. [`ObserverList::notify`] never calls an observer directly:
//! it snapshots the registrations, releases the lock, and posts one delivery
//! task per observer to that observer's runner. Observers may therefore add or
//! remove registrations, including their own, from inside a callback.
//!
//! Delivery follows an existing-only policy. An observer removed before its
//! delivery task runs is skipped; an observer added after `notify` returned
//! does not see that notification.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use netchange_core::observer_list::ObserverList;
//! use netchange_core::task_runner::ManualTaskRunner;
//!
//! trait Ping: Send + Sync {
//!     fn ping(&self, value: u32);
//! }
//!
//! struct Counter(AtomicUsize);
//! impl Ping for Counter {
//!     fn ping(&self, value: u32) {
//!         self.0.fetch_add(value as usize, Ordering::SeqCst);
//!     }
//! }
//!
//! let runner = ManualTaskRunner::new();
//! let list: ObserverList<dyn Ping> = ObserverList::new();
//! let counter = Arc::new(Counter(AtomicUsize::new(0)));
//! list.add(counter.clone(), runner.clone());
//!
//! list.notify(|observer| observer.ping(3));
//! runner.run_until_idle();
//! assert_eq!(counter.0.load(Ordering::SeqCst), 3);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};

use crate::logging::targets;
use crate::task_runner::SharedTaskRunner;

new_key_type! {
    /// Identifies one registration in an [`ObserverList`].
    pub struct ObserverId;
}

struct Registration<O: ?Sized> {
    observer: Arc<O>,
    runner: SharedTaskRunner,
    live: Arc<AtomicBool>,
}

/// A list of observers of type `O`, usually a trait object.
pub struct ObserverList<O: ?Sized> {
    registrations: Mutex<SlotMap<ObserverId, Registration<O>>>,
    blocked: AtomicBool,
    notifications: AtomicU64,
}

fn same_observer<O: ?Sized>(registered: &Arc<O>, candidate: *const O) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(registered), candidate)
}

impl<O: ?Sized + Send + Sync + 'static> ObserverList<O> {
    /// Create an empty list.
    pub fn new() -> Self {
        Self {
            registrations: Mutex::new(SlotMap::with_key()),
            blocked: AtomicBool::new(false),
            notifications: AtomicU64::new(0),
        }
    }

    /// Register `observer` to be called back on `runner`.
    ///
    /// Registering the same observer twice is a programming error; debug
    /// builds panic.
    pub fn add(&self, observer: Arc<O>, runner: SharedTaskRunner) -> ObserverId {
        let mut registrations = self.registrations.lock();
        debug_assert!(
            !registrations
                .values()
                .any(|r| same_observer(&r.observer, Arc::as_ptr(&observer))),
            "observer registered twice"
        );
        let id = registrations.insert(Registration {
            observer,
            runner,
            live: Arc::new(AtomicBool::new(true)),
        });
        tracing::trace!(target: targets::OBSERVER, ?id, count = registrations.len(), "observer added");
        id
    }

    /// Remove `observer`. Deliveries already posted to it are skipped.
    ///
    /// Returns `false` if it was not registered.
    pub fn remove(&self, observer: &O) -> bool {
        let mut registrations = self.registrations.lock();
        let found = registrations
            .iter()
            .find(|(_, r)| same_observer(&r.observer, observer as *const O))
            .map(|(id, _)| id);
        match found.and_then(|id| registrations.remove(id).map(|r| (id, r))) {
            Some((id, registration)) => {
                registration.live.store(false, Ordering::Release);
                tracing::trace!(target: targets::OBSERVER, ?id, "observer removed");
                true
            }
            None => false,
        }
    }

    /// Remove a registration by id.
    pub fn remove_by_id(&self, id: ObserverId) -> bool {
        match self.registrations.lock().remove(id) {
            Some(registration) => {
                registration.live.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Whether `observer` is registered.
    pub fn has_observer(&self, observer: &O) -> bool {
        self.registrations
            .lock()
            .values()
            .any(|r| same_observer(&r.observer, observer as *const O))
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.registrations.lock().len()
    }

    /// Whether there are no registrations.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every registration.
    pub fn clear(&self) {
        let mut registrations = self.registrations.lock();
        for (_, registration) in registrations.drain() {
            registration.live.store(false, Ordering::Release);
        }
    }

    /// Suppress notifications while `blocked` is true.
    pub fn set_blocked(&self, blocked: bool) {
        self.blocked.store(blocked, Ordering::Release);
    }

    /// Whether notifications are suppressed.
    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::Acquire)
    }

    /// Number of notifications fanned out so far.
    pub fn notification_count(&self) -> u64 {
        self.notifications.load(Ordering::Relaxed)
    }

    /// Post `f` to every registered observer on its own runner.
    ///
    /// Returns the number of deliveries posted.
    pub fn notify<F>(&self, f: F) -> usize
    where
        F: Fn(&O) + Send + Sync + 'static,
    {
        if self.is_blocked() {
            return 0;
        }

        let snapshot: Vec<_> = self
            .registrations
            .lock()
            .values()
            .map(|r| (r.observer.clone(), r.runner.clone(), r.live.clone()))
            .collect();
        self.notifications.fetch_add(1, Ordering::Relaxed);

        let f = Arc::new(f);
        let mut posted = 0;
        for (observer, runner, live) in snapshot {
            let f = f.clone();
            let accepted = runner.post(Box::new(move || {
                if live.load(Ordering::Acquire) {
                    f(&*observer);
                }
            }));
            if accepted {
                posted += 1;
            } else {
                tracing::debug!(target: targets::OBSERVER, "observer runner rejected a delivery");
            }
        }
        tracing::trace!(target: targets::OBSERVER, posted, "notification fanned out");
        posted
    }
}

impl<O: ?Sized + Send + Sync + 'static> Default for ObserverList<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: ?Sized> std::fmt::Debug for ObserverList<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverList")
            .field("len", &self.registrations.lock().len())
            .field("blocked", &self.blocked.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_runner::{InlineTaskRunner, ManualTaskRunner, SequencedTaskRunner, TaskRunnerExt};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    trait Sink: Send + Sync {
        fn receive(&self, value: i32);
    }

    #[derive(Default)]
    struct Recorder {
        values: Mutex<Vec<i32>>,
    }

    impl Sink for Recorder {
        fn receive(&self, value: i32) {
            self.values.lock().push(value);
        }
    }

    #[test]
    fn test_notify_delivers_on_observer_runner() {
        let runner = ManualTaskRunner::new();
        let list: ObserverList<dyn Sink> = ObserverList::new();
        let recorder = Arc::new(Recorder::default());
        list.add(recorder.clone(), runner.clone());

        assert_eq!(list.notify(|o| o.receive(42)), 1);
        assert!(recorder.values.lock().is_empty());

        runner.run_until_idle();
        assert_eq!(*recorder.values.lock(), vec![42]);
    }

    #[test]
    fn test_each_observer_uses_its_own_runner() {
        let manual = ManualTaskRunner::new();
        let inline = InlineTaskRunner::new();
        let list: ObserverList<dyn Sink> = ObserverList::new();
        let deferred = Arc::new(Recorder::default());
        let immediate = Arc::new(Recorder::default());
        list.add(deferred.clone(), manual.clone());
        list.add(immediate.clone(), inline);

        list.notify(|o| o.receive(7));
        assert_eq!(*immediate.values.lock(), vec![7]);
        assert!(deferred.values.lock().is_empty());

        manual.run_until_idle();
        assert_eq!(*deferred.values.lock(), vec![7]);
    }

    #[test]
    fn test_removed_before_delivery_is_skipped() {
        let runner = ManualTaskRunner::new();
        let list: ObserverList<dyn Sink> = ObserverList::new();
        let recorder = Arc::new(Recorder::default());
        list.add(recorder.clone(), runner.clone());

        list.notify(|o| o.receive(1));
        assert!(list.remove(&*recorder));
        runner.run_until_idle();

        assert!(recorder.values.lock().is_empty());
        assert!(!list.remove(&*recorder));
    }

    #[test]
    fn test_added_after_notify_misses_it() {
        let runner = ManualTaskRunner::new();
        let list: ObserverList<dyn Sink> = ObserverList::new();
        let early = Arc::new(Recorder::default());
        let late = Arc::new(Recorder::default());
        list.add(early.clone(), runner.clone());

        list.notify(|o| o.receive(5));
        list.add(late.clone(), runner.clone());
        runner.run_until_idle();

        assert_eq!(*early.values.lock(), vec![5]);
        assert!(late.values.lock().is_empty());
    }

    #[test]
    fn test_observer_can_remove_itself_during_callback() {
        struct SelfRemoving {
            list: Arc<ObserverList<dyn Sink>>,
            me: Mutex<Option<Arc<SelfRemoving>>>,
            calls: AtomicUsize,
        }

        impl Sink for SelfRemoving {
            fn receive(&self, _value: i32) {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if let Some(me) = self.me.lock().take() {
                    self.list.remove(&*me);
                }
            }
        }

        let runner = InlineTaskRunner::new();
        let list: Arc<ObserverList<dyn Sink>> = Arc::new(ObserverList::new());
        let observer = Arc::new(SelfRemoving {
            list: list.clone(),
            me: Mutex::new(None),
            calls: AtomicUsize::new(0),
        });
        *observer.me.lock() = Some(observer.clone());
        list.add(observer.clone(), runner);

        list.notify(|o| o.receive(1));
        list.notify(|o| o.receive(2));

        assert_eq!(observer.calls.load(Ordering::SeqCst), 1);
        assert!(list.is_empty());
    }

    #[test]
    fn test_blocked_list_posts_nothing() {
        let runner = ManualTaskRunner::new();
        let list: ObserverList<dyn Sink> = ObserverList::new();
        list.add(Arc::new(Recorder::default()), runner.clone());

        list.set_blocked(true);
        assert_eq!(list.notify(|o| o.receive(1)), 0);
        assert!(!runner.has_pending_task());

        list.set_blocked(false);
        assert_eq!(list.notify(|o| o.receive(1)), 1);
        assert_eq!(list.notification_count(), 1);
    }

    #[test]
    fn test_remove_by_id_and_clear() {
        let runner = ManualTaskRunner::new();
        let list: ObserverList<dyn Sink> = ObserverList::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let id = list.add(a.clone(), runner.clone());
        list.add(b.clone(), runner.clone());

        assert!(list.remove_by_id(id));
        assert!(!list.has_observer(&*a));
        assert!(list.has_observer(&*b));

        list.clear();
        assert!(list.is_empty());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "observer registered twice")]
    fn test_double_add_panics_in_debug() {
        let runner = ManualTaskRunner::new();
        let list: ObserverList<dyn Sink> = ObserverList::new();
        let recorder = Arc::new(Recorder::default());
        list.add(recorder.clone(), runner.clone());
        list.add(recorder, runner);
    }

    #[test]
    fn test_concurrent_notify_and_remove() {
        let runner = Arc::new(SequencedTaskRunner::new("observer-race").unwrap());
        let list: Arc<ObserverList<dyn Sink>> = Arc::new(ObserverList::new());
        let recorders: Vec<_> = (0..8).map(|_| Arc::new(Recorder::default())).collect();
        for recorder in &recorders {
            list.add(recorder.clone(), runner.clone());
        }

        let notifier = {
            let list = list.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    list.notify(move |o| o.receive(i));
                }
            })
        };
        for recorder in recorders.iter().step_by(2) {
            list.remove(&**recorder);
        }
        notifier.join().unwrap();

        let (tx, rx) = crossbeam_channel::bounded(1);
        runner.post_task(move || tx.send(()).unwrap());
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        for recorder in recorders.iter().skip(1).step_by(2) {
            assert_eq!(recorder.values.lock().len(), 200);
        }
        runner.stop_and_join();
    }
}
