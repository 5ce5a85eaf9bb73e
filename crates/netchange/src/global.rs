//! Process-wide access to the installed notifier.
//!
//! At most one [`NetworkChangeNotifier`] is installed at a time; a
//! [`NotifierHandle`](crate::NotifierHandle) installs it and removes it on
//! drop. The free functions here forward to it and fall back to neutral
//! values when nothing is installed, so callers on platforms without change
//! detection keep working:
//!
//! | query | without a notifier |
//! |---|---|
//! | [`connection_type`] | `Unknown` |
//! | [`connection_subtype`] | `Unknown` |
//! | [`max_bandwidth_and_connection_type`] | `(+inf, Unknown)` |
//! | [`are_network_handles_supported`] | `false` |
//! | [`connected_networks`] | empty |
//! | [`network_connection_type`] | `Unknown` |
//! | [`default_network`] | [`NetworkHandle::INVALID`] |
//! | [`is_offline`] | `false` |
//! | [`dns_config`] | `DnsConfig::default()` |
//!
//! Observers added while nothing is installed are dropped, not buffered.

use std::sync::Arc;

use netchange_core::SharedTaskRunner;
use parking_lot::RwLock;

use crate::dns_config::DnsConfig;
use crate::error::{NotifierError, NotifierResult};
use crate::histogram::DataReceived;
use crate::logging::targets;
use crate::notifier::NetworkChangeNotifier;
use crate::observer::{
    ConnectionTypeObserver, DnsObserver, IpAddressObserver, MaxBandwidthObserver,
    NetworkChangeObserver, NetworkObserver,
};
use crate::types::{ConnectionSubtype, ConnectionType, NetworkChangeType, NetworkHandle, NetworkList};

static CURRENT: RwLock<Option<Arc<NetworkChangeNotifier>>> = RwLock::new(None);

pub(crate) fn install(notifier: Arc<NetworkChangeNotifier>) -> NotifierResult<()> {
    let mut current = CURRENT.write();
    if current.is_some() {
        return Err(NotifierError::AlreadyInitialized);
    }
    *current = Some(notifier);
    Ok(())
}

/// Remove `notifier` if it is the installed one.
pub(crate) fn uninstall(notifier: &Arc<NetworkChangeNotifier>) {
    let mut current = CURRENT.write();
    if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, notifier)) {
        *current = None;
    }
}

/// The installed notifier, if any.
pub fn current() -> Option<Arc<NetworkChangeNotifier>> {
    CURRENT.read().clone()
}

pub fn has_network_change_notifier() -> bool {
    CURRENT.read().is_some()
}

fn with_current<R>(default: R, f: impl FnOnce(&NetworkChangeNotifier) -> R) -> R {
    match current() {
        Some(notifier) => f(&notifier),
        None => default,
    }
}

// Queries

pub fn connection_type() -> ConnectionType {
    with_current(ConnectionType::Unknown, |n| n.connection_type())
}

pub fn connection_subtype() -> ConnectionSubtype {
    with_current(ConnectionSubtype::Unknown, |n| n.connection_subtype())
}

pub fn max_bandwidth_and_connection_type() -> (f64, ConnectionType) {
    with_current(
        (ConnectionSubtype::Unknown.max_bandwidth_mbps(), ConnectionType::Unknown),
        |n| n.max_bandwidth_and_connection_type(),
    )
}

pub fn are_network_handles_supported() -> bool {
    with_current(false, |n| n.are_network_handles_supported())
}

pub fn connected_networks() -> NetworkList {
    with_current(NetworkList::new(), |n| n.connected_networks())
}

pub fn network_connection_type(network: NetworkHandle) -> ConnectionType {
    with_current(ConnectionType::Unknown, |n| n.network_connection_type(network))
}

pub fn default_network() -> NetworkHandle {
    with_current(NetworkHandle::INVALID, |n| n.default_network())
}

pub fn is_offline() -> bool {
    with_current(false, |n| n.is_offline())
}

pub fn dns_config() -> DnsConfig {
    with_current(DnsConfig::default(), |n| n.dns_config())
}

// Registration

pub fn add_ip_address_observer(observer: Arc<dyn IpAddressObserver>, runner: SharedTaskRunner) {
    with_current((), |n| n.add_ip_address_observer(observer, runner));
}

pub fn remove_ip_address_observer(observer: &(dyn IpAddressObserver + 'static)) -> bool {
    with_current(false, |n| n.remove_ip_address_observer(observer))
}

pub fn add_connection_type_observer(observer: Arc<dyn ConnectionTypeObserver>, runner: SharedTaskRunner) {
    with_current((), |n| n.add_connection_type_observer(observer, runner));
}

pub fn remove_connection_type_observer(observer: &(dyn ConnectionTypeObserver + 'static)) -> bool {
    with_current(false, |n| n.remove_connection_type_observer(observer))
}

pub fn add_dns_observer(observer: Arc<dyn DnsObserver>, runner: SharedTaskRunner) {
    with_current((), |n| n.add_dns_observer(observer, runner));
}

pub fn remove_dns_observer(observer: &(dyn DnsObserver + 'static)) -> bool {
    with_current(false, |n| n.remove_dns_observer(observer))
}

pub fn add_network_change_observer(observer: Arc<dyn NetworkChangeObserver>, runner: SharedTaskRunner) {
    with_current((), |n| n.add_network_change_observer(observer, runner));
}

pub fn remove_network_change_observer(observer: &(dyn NetworkChangeObserver + 'static)) -> bool {
    with_current(false, |n| n.remove_network_change_observer(observer))
}

pub fn add_max_bandwidth_observer(observer: Arc<dyn MaxBandwidthObserver>, runner: SharedTaskRunner) {
    with_current((), |n| n.add_max_bandwidth_observer(observer, runner));
}

pub fn remove_max_bandwidth_observer(observer: &(dyn MaxBandwidthObserver + 'static)) -> bool {
    with_current(false, |n| n.remove_max_bandwidth_observer(observer))
}

pub fn add_network_observer(observer: Arc<dyn NetworkObserver>, runner: SharedTaskRunner) {
    with_current((), |n| n.add_network_observer(observer, runner));
}

pub fn remove_network_observer(observer: &(dyn NetworkObserver + 'static)) -> bool {
    with_current(false, |n| n.remove_network_observer(observer))
}

// Publishing

pub fn notify_observers_of_ip_address_change() {
    with_current((), |n| n.notify_observers_of_ip_address_change());
}

pub fn notify_observers_of_connection_type_change() {
    with_current((), |n| n.notify_observers_of_connection_type_change());
}

pub fn notify_observers_of_network_change(connection_type: ConnectionType) {
    with_current((), |n| n.notify_observers_of_network_change(connection_type));
}

pub fn notify_observers_of_max_bandwidth_change(max_bandwidth_mbps: f64, connection_type: ConnectionType) {
    with_current((), |n| {
        n.notify_observers_of_max_bandwidth_change(max_bandwidth_mbps, connection_type)
    });
}

pub fn notify_observers_of_dns_change() {
    with_current((), |n| n.notify_observers_of_dns_change());
}

pub fn notify_observers_of_initial_dns_config_read() {
    with_current((), |n| n.notify_observers_of_initial_dns_config_read());
}

pub fn notify_observers_of_specific_network_change(change: NetworkChangeType, network: NetworkHandle) {
    with_current((), |n| n.notify_observers_of_specific_network_change(change, network));
}

pub fn notify_observers_of_ip_address_change_for_tests() {
    with_current((), |n| n.notify_observers_of_ip_address_change_for_tests());
}

pub fn notify_observers_of_connection_type_change_for_tests(connection_type: ConnectionType) {
    with_current((), |n| n.notify_observers_of_connection_type_change_for_tests(connection_type));
}

pub fn notify_observers_of_network_change_for_tests(connection_type: ConnectionType) {
    with_current((), |n| n.notify_observers_of_network_change_for_tests(connection_type));
}

pub fn notify_observers_of_max_bandwidth_change_for_tests(max_bandwidth_mbps: f64, connection_type: ConnectionType) {
    with_current((), |n| {
        n.notify_observers_of_max_bandwidth_change_for_tests(max_bandwidth_mbps, connection_type)
    });
}

pub fn notify_observers_of_dns_change_for_tests() {
    with_current((), |n| n.notify_observers_of_dns_change_for_tests());
}

pub fn notify_observers_of_specific_network_change_for_tests(change: NetworkChangeType, network: NetworkHandle) {
    with_current((), |n| n.notify_observers_of_specific_network_change_for_tests(change, network));
}

/// Set the test-notifications-only gate on the installed notifier.
pub fn set_test_notifications_only(enabled: bool) {
    with_current((), |n| n.set_test_notifications_only(enabled));
}

// DNS

pub fn set_dns_config(config: DnsConfig) {
    with_current((), |n| n.set_dns_config(config));
}

pub fn clear_dns_config_for_testing() {
    with_current((), |n| n.clear_dns_config_for_testing());
}

// Statistics

pub fn init_histogram_watcher(runner: SharedTaskRunner) -> NotifierResult<()> {
    with_current(Ok(()), |n| n.init_histogram_watcher(runner))
}

pub fn shutdown_histogram_watcher() {
    with_current((), |n| n.shutdown_histogram_watcher());
}

pub fn finalizing_metrics_log_record() {
    with_current((), |n| n.finalizing_metrics_log_record());
}

pub fn notify_data_received(data: &DataReceived) {
    with_current((), |n| n.notify_data_received(data));
}

/// Hides the installed notifier for its lifetime.
///
/// While alive, every function in this module behaves as if no notifier
/// exists. The notifier is reinstalled on drop.
#[must_use = "the notifier is restored when the guard is dropped"]
pub struct DisableForTest {
    hidden: Option<Arc<NetworkChangeNotifier>>,
}

impl DisableForTest {
    pub fn new() -> Self {
        let hidden = CURRENT.write().take();
        debug_assert!(hidden.is_some(), "no notifier to disable");
        tracing::debug!(target: targets::NOTIFIER, "notifier hidden for test");
        Self { hidden }
    }
}

impl Default for DisableForTest {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DisableForTest {
    fn drop(&mut self) {
        let mut current = CURRENT.write();
        debug_assert!(current.is_none(), "a notifier was installed while disabled");
        if current.is_none() {
            *current = self.hidden.take();
        }
    }
}

impl std::fmt::Debug for DisableForTest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisableForTest")
            .field("hidden", &self.hidden.is_some())
            .finish()
    }
}
