//! Interface watching shared by the desktop signal sources.
//!
//! The watcher caches the last derived address set, connection type and
//! subtype. OS callbacks only trigger a fresh snapshot; an event reaches the
//! sink only when the derived values actually changed, and never while the
//! cache lock is held.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use netchange_core::{SequencedTaskRunner, TaskRunnerExt};
use parking_lot::Mutex;
use tokio::sync::watch;

use super::interfaces::{
    InterfaceFilter, InterfaceSnapshot, connection_subtype_from_interfaces,
    connection_type_from_interfaces, list_interfaces,
};
use super::{PlatformSignalSource, SignalSink};
use crate::error::{NotifierError, NotifierResult};
use crate::logging::targets;
use crate::types::{ConnectionSubtype, ConnectionType};

/// Produces an interface snapshot. Replaceable for tests.
pub type SnapshotFn = Arc<dyn Fn() -> Vec<InterfaceSnapshot> + Send + Sync>;

/// Registers a change callback with the OS. Returns a guard that keeps the
/// registration alive.
type RegisterFn = Arc<dyn Fn(Box<dyn Fn() + Send + Sync>) -> NotifierResult<Box<dyn Send>> + Send + Sync>;

/// When the first snapshot is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialReadPolicy {
    /// Inside `start`, before it returns.
    Synchronous,
    /// On the watcher's own sequence; queries wait on the [`ReadyGate`].
    Deferred,
}

/// Becomes ready once, after the first snapshot.
#[derive(Debug, Clone)]
pub struct ReadyGate {
    tx: Arc<watch::Sender<bool>>,
}

impl ReadyGate {
    /// A gate that is not ready yet.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Open the gate. Idempotent.
    pub fn mark_ready(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the gate is open.
    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the gate is open.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Block the calling thread until the gate is open.
    pub fn wait_blocking(&self) {
        if !self.is_ready() {
            pollster::block_on(self.wait());
        }
    }
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct Derived {
    addresses: BTreeSet<IpAddr>,
    connection_type: ConnectionType,
    subtype: ConnectionSubtype,
    // Set once any snapshot has been stored since `start`.
    seeded: bool,
}

#[derive(Default)]
struct Registration {
    guard: Option<Box<dyn Send>>,
    stopped: bool,
}

struct Retry {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

struct Inner {
    name: &'static str,
    filter: InterfaceFilter,
    retry_interval: Duration,
    policy: InitialReadPolicy,
    snapshot: SnapshotFn,
    register: RegisterFn,
    derived: Mutex<Derived>,
    ready: ReadyGate,
    sink: Mutex<Option<Arc<dyn SignalSink>>>,
    registration: Mutex<Registration>,
    retry: Mutex<Option<Retry>>,
    initial_reader: Mutex<Option<SequencedTaskRunner>>,
}

/// Watches interfaces through `netwatcher` and snapshots them with `netdev`.
pub struct InterfaceWatcher {
    inner: Arc<Inner>,
}

impl InterfaceWatcher {
    /// Watcher backed by the OS.
    pub fn new(
        name: &'static str,
        filter: InterfaceFilter,
        retry_interval: Duration,
        policy: InitialReadPolicy,
    ) -> Self {
        Self::with_hooks(name, filter, retry_interval, policy, Arc::new(list_interfaces), Arc::new(register_netwatcher))
    }

    /// Watcher with an injected snapshot function and no OS registration.
    ///
    /// Call [`refresh`](Self::refresh) to simulate an OS callback.
    pub fn with_snapshot(
        name: &'static str,
        filter: InterfaceFilter,
        policy: InitialReadPolicy,
        snapshot: SnapshotFn,
    ) -> Self {
        Self::with_hooks(
            name,
            filter,
            Duration::from_millis(10),
            policy,
            snapshot,
            Arc::new(|_callback| Ok(Box::new(()) as Box<dyn Send>)),
        )
    }

    fn with_hooks(
        name: &'static str,
        filter: InterfaceFilter,
        retry_interval: Duration,
        policy: InitialReadPolicy,
        snapshot: SnapshotFn,
        register: RegisterFn,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                filter,
                retry_interval,
                policy,
                snapshot,
                register,
                derived: Mutex::new(Derived::default()),
                ready: ReadyGate::new(),
                sink: Mutex::new(None),
                registration: Mutex::new(Registration::default()),
                retry: Mutex::new(None),
                initial_reader: Mutex::new(None),
            }),
        }
    }

    /// Gate that opens after the first snapshot.
    pub fn ready_gate(&self) -> &ReadyGate {
        &self.inner.ready
    }

    /// Resolve once the first snapshot has been taken.
    pub async fn wait_ready(&self) {
        self.inner.ready.wait().await;
    }

    /// Whether OS registration has succeeded.
    pub fn is_registered(&self) -> bool {
        self.inner.registration.lock().guard.is_some()
    }

    /// Take a fresh snapshot and report what changed.
    pub fn refresh(&self) {
        self.inner.refresh();
    }

    /// Addresses on usable interfaces, as last derived.
    pub fn current_addresses(&self) -> BTreeSet<IpAddr> {
        self.wait_if_deferred();
        self.inner.derived.lock().addresses.clone()
    }

    fn wait_if_deferred(&self) {
        if self.inner.policy == InitialReadPolicy::Deferred {
            self.inner.ready.wait_blocking();
        }
    }
}

impl Inner {
    fn derive(&self) -> Derived {
        let interfaces = (self.snapshot)();
        let connection_type = connection_type_from_interfaces(&interfaces, &self.filter);
        let subtype = if connection_type == ConnectionType::None {
            ConnectionSubtype::None
        } else {
            connection_subtype_from_interfaces(&interfaces, &self.filter)
        };
        let addresses = interfaces
            .iter()
            .filter(|iface| self.filter.is_usable(iface))
            .flat_map(|iface| iface.addresses.iter().copied())
            .collect();
        Derived {
            addresses,
            connection_type,
            subtype,
            seeded: false,
        }
    }

    fn initial_read(&self) {
        let derived = self.derive();
        tracing::debug!(
            target: targets::PLATFORM,
            source = self.name,
            connection_type = %derived.connection_type,
            addresses = derived.addresses.len(),
            "initial interface snapshot"
        );
        {
            let mut current = self.derived.lock();
            if current.seeded {
                tracing::trace!(target: targets::PLATFORM, source = self.name, "initial snapshot superseded by refresh");
            } else {
                *current = Derived { seeded: true, ..derived };
            }
        }
        self.ready.mark_ready();
    }

    fn refresh(&self) {
        let fresh = self.derive();
        let (ip_changed, type_changed, subtype_changed) = {
            let mut derived = self.derived.lock();
            let ip_changed = derived.addresses != fresh.addresses;
            let type_changed = derived.connection_type != fresh.connection_type;
            let subtype_changed = type_changed || derived.subtype != fresh.subtype;
            *derived = Derived {
                addresses: fresh.addresses,
                connection_type: fresh.connection_type,
                subtype: fresh.subtype,
                seeded: true,
            };
            (ip_changed, type_changed, subtype_changed)
        };
        self.ready.mark_ready();

        let Some(sink) = self.sink.lock().clone() else {
            return;
        };
        if ip_changed {
            tracing::debug!(target: targets::PLATFORM, source = self.name, "ip addresses changed");
            sink.on_ip_address_changed();
        }
        if type_changed {
            tracing::debug!(
                target: targets::PLATFORM,
                source = self.name,
                connection_type = %fresh.connection_type,
                "connection type changed"
            );
            sink.on_connection_type_changed(fresh.connection_type);
        }
        if subtype_changed {
            sink.on_connection_subtype_changed(fresh.connection_type, fresh.subtype);
        }
    }

    fn try_register(this: &Arc<Self>) -> NotifierResult<()> {
        let weak: Weak<Self> = Arc::downgrade(this);
        let guard = (this.register)(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.refresh();
            }
        }))?;
        let mut slot = this.registration.lock();
        if slot.stopped {
            drop(slot);
            drop(guard);
            tracing::debug!(target: targets::PLATFORM, source = this.name, "stopped while registering; registration released");
            return Ok(());
        }
        slot.guard = Some(guard);
        drop(slot);
        tracing::debug!(target: targets::PLATFORM, source = this.name, "registered for interface changes");
        Ok(())
    }

    fn spawn_retry(this: &Arc<Self>) -> NotifierResult<()> {
        let (stop_tx, stop_rx): (Sender<()>, Receiver<()>) = crossbeam_channel::bounded(1);
        let weak = Arc::downgrade(this);
        let interval = this.retry_interval;
        let name = this.name;
        let thread = std::thread::Builder::new()
            .name(format!("{name}-register"))
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                    }
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    match Self::try_register(&inner) {
                        Ok(()) => {
                            // Changes during the outage were missed.
                            inner.refresh();
                            return;
                        }
                        Err(err) => {
                            tracing::warn!(target: targets::PLATFORM, source = name, %err, "registration retry failed");
                        }
                    }
                }
            })
            .map_err(|source| netchange_core::RuntimeError::ThreadSpawn {
                name: format!("{name}-register"),
                source,
            })?;
        *this.retry.lock() = Some(Retry { stop: stop_tx, thread });
        Ok(())
    }
}

impl PlatformSignalSource for InterfaceWatcher {
    fn name(&self) -> &'static str {
        self.inner.name
    }

    fn start(&self, sink: Arc<dyn SignalSink>) -> NotifierResult<()> {
        self.inner.registration.lock().stopped = false;
        self.inner.derived.lock().seeded = false;
        *self.inner.sink.lock() = Some(sink);

        match self.inner.policy {
            InitialReadPolicy::Synchronous => self.inner.initial_read(),
            InitialReadPolicy::Deferred => {
                let reader = SequencedTaskRunner::new(format!("{}-initial-read", self.inner.name))?;
                let inner = self.inner.clone();
                reader.post_task(move || inner.initial_read());
                *self.inner.initial_reader.lock() = Some(reader);
            }
        }

        if let Err(err) = Inner::try_register(&self.inner) {
            tracing::warn!(
                target: targets::PLATFORM,
                source = self.inner.name,
                %err,
                retry_ms = self.inner.retry_interval.as_millis() as u64,
                "registration failed; retrying"
            );
            Inner::spawn_retry(&self.inner)?;
        }
        Ok(())
    }

    fn stop(&self) {
        self.inner.sink.lock().take();
        let guard = {
            let mut slot = self.inner.registration.lock();
            slot.stopped = true;
            slot.guard.take()
        };
        drop(guard);
        if let Some(retry) = self.inner.retry.lock().take() {
            let _ = retry.stop.send(());
            if retry.thread.join().is_err() {
                tracing::warn!(target: targets::PLATFORM, source = self.inner.name, "registration thread panicked");
            }
        }
        if let Some(reader) = self.inner.initial_reader.lock().take() {
            reader.stop_and_join();
        }
    }

    fn current_connection_type(&self) -> ConnectionType {
        self.wait_if_deferred();
        self.inner.derived.lock().connection_type
    }

    fn current_connection_subtype(&self) -> ConnectionSubtype {
        self.wait_if_deferred();
        self.inner.derived.lock().subtype
    }

    fn current_max_bandwidth_and_connection_type(&self) -> (f64, ConnectionType) {
        self.wait_if_deferred();
        let derived = self.inner.derived.lock();
        (derived.subtype.max_bandwidth_mbps(), derived.connection_type)
    }
}

impl Drop for InterfaceWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for InterfaceWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceWatcher")
            .field("name", &self.inner.name)
            .field("policy", &self.inner.policy)
            .field("ready", &self.inner.ready.is_ready())
            .field("registered", &self.is_registered())
            .field("derived", &*self.inner.derived.lock())
            .finish()
    }
}

fn register_netwatcher(callback: Box<dyn Fn() + Send + Sync>) -> NotifierResult<Box<dyn Send>> {
    let handle = netwatcher::watch_interfaces(move |update| {
        for ifindex in &update.diff.added {
            let name = update.interfaces.get(ifindex).map(|i| i.name.clone());
            tracing::trace!(target: targets::PLATFORM, ifindex, ?name, "interface added");
        }
        for ifindex in &update.diff.removed {
            tracing::trace!(target: targets::PLATFORM, ifindex, "interface removed");
        }
        callback();
    })
    .map_err(|e| NotifierError::Registration(e.to_string()))?;
    Ok(Box::new(handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PlatformRules;
    use crate::types::{NetworkChangeType, NetworkHandle};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct SinkLog {
        events: Mutex<Vec<String>>,
    }

    impl SignalSink for SinkLog {
        fn on_ip_address_changed(&self) {
            self.events.lock().push("ip".into());
        }
        fn on_connection_type_changed(&self, connection_type: ConnectionType) {
            self.events.lock().push(format!("type {connection_type}"));
        }
        fn on_connection_subtype_changed(&self, _connection_type: ConnectionType, subtype: ConnectionSubtype) {
            self.events.lock().push(format!("subtype {subtype:?}"));
        }
        fn on_dns_changed(&self) {
            self.events.lock().push("dns".into());
        }
        fn on_connection_changed(&self, network: NetworkHandle, change: NetworkChangeType) {
            self.events.lock().push(format!("{change:?} {network}"));
        }
    }

    fn scripted() -> (Arc<Mutex<Vec<InterfaceSnapshot>>>, SnapshotFn) {
        let current = Arc::new(Mutex::new(Vec::new()));
        let source = current.clone();
        (current, Arc::new(move || source.lock().clone()))
    }

    fn eth(addr: &str) -> InterfaceSnapshot {
        InterfaceSnapshot::new("eth0", 2, ConnectionType::Ethernet).with_address(addr.parse().unwrap())
    }

    fn filter() -> InterfaceFilter {
        InterfaceFilter::new(PlatformRules::Linux, BTreeSet::new())
    }

    #[test]
    fn test_initial_snapshot_is_silent() {
        let (current, snapshot) = scripted();
        current.lock().push(eth("192.0.2.1"));
        let watcher = InterfaceWatcher::with_snapshot("test", filter(), InitialReadPolicy::Synchronous, snapshot);
        let sink = Arc::new(SinkLog::default());

        watcher.start(sink.clone()).unwrap();
        assert!(watcher.ready_gate().is_ready());
        assert!(watcher.is_registered());
        assert_eq!(watcher.current_connection_type(), ConnectionType::Ethernet);
        assert!(sink.events.lock().is_empty());
    }

    #[test]
    fn test_only_real_changes_are_reported() {
        let (current, snapshot) = scripted();
        current.lock().push(eth("192.0.2.1"));
        let watcher = InterfaceWatcher::with_snapshot("test", filter(), InitialReadPolicy::Synchronous, snapshot);
        let sink = Arc::new(SinkLog::default());
        watcher.start(sink.clone()).unwrap();

        watcher.refresh();
        assert!(sink.events.lock().is_empty());

        *current.lock() = vec![eth("192.0.2.2")];
        watcher.refresh();
        assert_eq!(*sink.events.lock(), vec!["ip"]);

        current.lock().clear();
        watcher.refresh();
        assert_eq!(
            *sink.events.lock(),
            vec!["ip", "ip", "type CONNECTION_NONE", "subtype None"]
        );
        assert_eq!(watcher.current_max_bandwidth_and_connection_type(), (0.0, ConnectionType::None));
    }

    #[test]
    fn test_deferred_read_blocks_queries_until_ready() {
        let (current, snapshot) = scripted();
        current.lock().push(
            InterfaceSnapshot::new("wlan0", 3, ConnectionType::Wifi).with_address("192.0.2.9".parse().unwrap()),
        );
        let watcher = InterfaceWatcher::with_snapshot("deferred", filter(), InitialReadPolicy::Deferred, snapshot);
        watcher.start(Arc::new(SinkLog::default())).unwrap();

        assert_eq!(watcher.current_connection_type(), ConnectionType::Wifi);
        assert!(watcher.ready_gate().is_ready());
        pollster::block_on(watcher.wait_ready());
        watcher.stop();
    }

    #[test]
    fn test_failed_registration_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let (_current, snapshot) = scripted();
        let register: RegisterFn = Arc::new(move |_callback| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(NotifierError::Registration("busy".into()))
            } else {
                Ok(Box::new(()) as Box<dyn Send>)
            }
        });
        let watcher = InterfaceWatcher::with_hooks(
            "retry",
            filter(),
            Duration::from_millis(5),
            InitialReadPolicy::Synchronous,
            snapshot,
            register,
        );

        watcher.start(Arc::new(SinkLog::default())).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !watcher.is_registered() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(watcher.is_registered());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        watcher.stop();
    }

    struct DropCount(Arc<AtomicUsize>);

    impl Drop for DropCount {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_retry_finishing_after_stop_is_released() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicUsize::new(0));
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (proceed_tx, proceed_rx) = crossbeam_channel::bounded::<()>(1);

        let counter = attempts.clone();
        let drops = released.clone();
        let register: RegisterFn = Arc::new(move |_callback| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(NotifierError::Registration("busy".into()));
            }
            entered_tx.send(()).unwrap();
            proceed_rx.recv().unwrap();
            Ok(Box::new(DropCount(drops.clone())) as Box<dyn Send>)
        });
        let (_current, snapshot) = scripted();
        let watcher = InterfaceWatcher::with_hooks(
            "retry-stop",
            filter(),
            Duration::from_millis(5),
            InitialReadPolicy::Synchronous,
            snapshot,
            register,
        );
        watcher.start(Arc::new(SinkLog::default())).unwrap();
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Let the pending registration finish only once stop has begun.
        let inner = watcher.inner.clone();
        let releaser = std::thread::spawn(move || {
            while !inner.registration.lock().stopped {
                std::thread::sleep(Duration::from_millis(1));
            }
            proceed_tx.send(()).unwrap();
        });
        watcher.stop();
        releaser.join().unwrap();

        assert!(!watcher.is_registered());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_deferred_initial_read_does_not_clobber_refresh() {
        let (current, _) = scripted();
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (proceed_tx, proceed_rx) = crossbeam_channel::bounded::<()>(1);
        let calls = AtomicUsize::new(0);
        let latest = current.clone();
        let snapshot: SnapshotFn = Arc::new(move || {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                entered_tx.send(()).unwrap();
                proceed_rx.recv().unwrap();
                vec![eth("192.0.2.1")]
            } else {
                latest.lock().clone()
            }
        });
        let watcher = InterfaceWatcher::with_snapshot("deferred-race", filter(), InitialReadPolicy::Deferred, snapshot);
        watcher.start(Arc::new(SinkLog::default())).unwrap();
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        *current.lock() = vec![eth("192.0.2.2")];
        watcher.refresh();
        proceed_tx.send(()).unwrap();
        watcher.stop();

        assert_eq!(watcher.current_addresses(), BTreeSet::from(["192.0.2.2".parse().unwrap()]));
    }

    #[test]
    fn test_stop_silences_sink() {
        let (current, snapshot) = scripted();
        let watcher = InterfaceWatcher::with_snapshot("test", filter(), InitialReadPolicy::Synchronous, snapshot);
        let sink = Arc::new(SinkLog::default());
        watcher.start(sink.clone()).unwrap();
        watcher.stop();

        current.lock().push(eth("192.0.2.1"));
        watcher.refresh();
        assert!(sink.events.lock().is_empty());
    }
}
