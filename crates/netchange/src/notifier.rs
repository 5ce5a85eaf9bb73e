//! The notifier instance and its owning handle.
//!
//! A [`NetworkChangeNotifier`] ties together a platform signal source, the
//! six observer channels, the debounce calculator, the last known DNS
//! configuration and the optional collaborators (DNS reader, statistics).
//! [`NotifierHandle`] owns it: creating a handle installs the notifier as
//! the process-wide instance used by [`crate::global`], and dropping the
//! handle tears it down again.

use std::ops::Deref;
use std::sync::{Arc, Weak};

use netchange_core::{SequencedTaskRunner, SharedTaskRunner};
use parking_lot::Mutex;

use crate::calculator::NetworkChangeCalculator;
use crate::config::NotifierConfig;
use crate::dns::{DnsConfigReader, DnsConfigService};
use crate::dns_config::DnsConfig;
use crate::error::{NotifierError, NotifierResult};
use crate::global;
use crate::histogram::{DataReceived, HistogramWatcher};
use crate::hub::ObserverChannels;
use crate::logging::targets;
use crate::observer::{
    ConnectionTypeObserver, DnsObserver, IpAddressObserver, MaxBandwidthObserver,
    NetworkChangeObserver, NetworkObserver,
};
use crate::platform::{PlatformSignalSource, SignalSink, create_platform_source};
use crate::types::{ConnectionSubtype, ConnectionType, NetworkChangeType, NetworkHandle, NetworkList};

/// Outcome of storing a DNS configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DnsUpdate {
    /// First configuration since startup (or since the last clear).
    Initial,
    /// Replaced a different configuration.
    Changed,
    /// Same as the stored configuration.
    Unchanged,
}

#[derive(Debug, Default)]
struct NetworkStateInner {
    dns_config: DnsConfig,
    set: bool,
}

/// Last known DNS configuration. Safe to read from any thread.
#[derive(Debug, Default)]
pub(crate) struct NetworkState {
    inner: Mutex<NetworkStateInner>,
}

impl NetworkState {
    pub(crate) fn dns_config(&self) -> DnsConfig {
        self.inner.lock().dns_config.clone()
    }

    pub(crate) fn set_dns_config(&self, config: DnsConfig) -> DnsUpdate {
        let mut inner = self.inner.lock();
        let update = if !inner.set {
            DnsUpdate::Initial
        } else if inner.dns_config == config {
            DnsUpdate::Unchanged
        } else {
            DnsUpdate::Changed
        };
        inner.dns_config = config;
        inner.set = true;
        update
    }

    pub(crate) fn clear_for_testing(&self) {
        self.inner.lock().set = false;
    }
}

/// A live notifier.
///
/// Obtained through a [`NotifierHandle`]; most code reaches it through the
/// free functions in [`crate::global`] instead.
pub struct NetworkChangeNotifier {
    source: Arc<dyn PlatformSignalSource>,
    channels: Arc<ObserverChannels>,
    state: NetworkState,
    calculator: Mutex<Option<Arc<NetworkChangeCalculator>>>,
    histogram: Mutex<Option<Arc<HistogramWatcher>>>,
    dns_service: Mutex<Option<DnsConfigService>>,
    runner: SharedTaskRunner,
    config: NotifierConfig,
    weak_self: Weak<NetworkChangeNotifier>,
}

impl NetworkChangeNotifier {
    /// Create the notifier for this platform.
    ///
    /// Spawns a `netchange-notifier` runner for the calculator and, on unix,
    /// a single-thread `netchange-dns` pool that reads `/etc/resolv.conf`.
    pub fn create(config: NotifierConfig) -> NotifierResult<NotifierHandle> {
        if global::has_network_change_notifier() {
            return Err(NotifierError::AlreadyInitialized);
        }
        let source = create_platform_source(&config)?;
        let runner = Arc::new(SequencedTaskRunner::new("netchange-notifier")?);
        let mut handle = match Self::create_with_source(source, config, runner.clone()) {
            Ok(handle) => handle,
            Err(err) => {
                runner.stop_and_join();
                return Err(err);
            }
        };
        handle.owned_runners.push(runner);

        #[cfg(unix)]
        {
            use netchange_core::{ThreadPoolConfig, ThreadPoolRunner};

            let dns_pool = ThreadPoolRunner::new(ThreadPoolConfig {
                thread_name: "netchange-dns".to_string(),
                ..ThreadPoolConfig::with_threads(1)
            })?;
            handle.attach_dns_service(Arc::new(crate::dns::ResolvConfReader::new()), Arc::new(dns_pool));
        }

        Ok(handle)
    }

    /// Create a notifier around `source`, delivering internal work on
    /// `runner`.
    ///
    /// Fails if another notifier is installed, or if the source's invalid
    /// network handle differs from [`NetworkHandle::INVALID`].
    pub fn create_with_source(
        source: Arc<dyn PlatformSignalSource>,
        config: NotifierConfig,
        runner: SharedTaskRunner,
    ) -> NotifierResult<NotifierHandle> {
        let platform_invalid = source.invalid_network_handle();
        if platform_invalid != NetworkHandle::INVALID {
            return Err(NotifierError::SentinelMismatch {
                platform: platform_invalid,
                expected: NetworkHandle::INVALID,
            });
        }

        let channels = Arc::new(ObserverChannels::new(config.test_notifications_only));
        let publish_to = Arc::downgrade(&channels);
        let calculator = NetworkChangeCalculator::new(
            config.calculator,
            runner.clone(),
            Box::new(move |connection_type| {
                if let Some(channels) = publish_to.upgrade() {
                    channels.publish_network_changed(connection_type);
                }
            }),
        );

        let notifier = Arc::new_cyclic(|weak_self| Self {
            source,
            channels,
            state: NetworkState::default(),
            calculator: Mutex::new(Some(calculator.clone())),
            histogram: Mutex::new(None),
            dns_service: Mutex::new(None),
            runner: runner.clone(),
            config,
            weak_self: weak_self.clone(),
        });

        global::install(notifier.clone())?;

        notifier.channels.ip_address.add(calculator.clone(), runner.clone());
        notifier.channels.connection_type.add(calculator, runner);

        let sink: Arc<dyn SignalSink> = notifier.channels.clone();
        if let Err(err) = notifier.source.start(sink) {
            tracing::error!(target: targets::NOTIFIER, source = notifier.source.name(), %err, "platform source failed to start");
            notifier.shutdown();
            global::uninstall(&notifier);
            return Err(err);
        }

        tracing::info!(
            target: targets::NOTIFIER,
            source = notifier.source.name(),
            connection_type = %notifier.connection_type(),
            "network change notifier started"
        );
        Ok(NotifierHandle {
            notifier,
            owned_runners: Vec::new(),
        })
    }

    /// Configuration the notifier was created with.
    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    /// The runner internal work (the calculator) runs on.
    pub fn runner(&self) -> &SharedTaskRunner {
        &self.runner
    }

    /// The platform signal source.
    pub fn source(&self) -> &Arc<dyn PlatformSignalSource> {
        &self.source
    }

    // Queries

    pub fn connection_type(&self) -> ConnectionType {
        self.source.current_connection_type()
    }

    pub fn connection_subtype(&self) -> ConnectionSubtype {
        self.source.current_connection_subtype()
    }

    pub fn max_bandwidth_and_connection_type(&self) -> (f64, ConnectionType) {
        self.source.current_max_bandwidth_and_connection_type()
    }

    pub fn are_network_handles_supported(&self) -> bool {
        self.source.are_network_handles_supported()
    }

    /// Connected networks. Only meaningful where handles are supported.
    pub fn connected_networks(&self) -> NetworkList {
        debug_assert!(self.are_network_handles_supported(), "network handles are not supported");
        self.source.connected_networks()
    }

    pub fn network_connection_type(&self, network: NetworkHandle) -> ConnectionType {
        debug_assert!(self.are_network_handles_supported(), "network handles are not supported");
        self.source.network_connection_type(network)
    }

    pub fn default_network(&self) -> NetworkHandle {
        debug_assert!(self.are_network_handles_supported(), "network handles are not supported");
        self.source.default_network()
    }

    pub fn is_offline(&self) -> bool {
        self.connection_type() == ConnectionType::None
    }

    pub fn dns_config(&self) -> DnsConfig {
        self.state.dns_config()
    }

    // Registration

    pub fn add_ip_address_observer(&self, observer: Arc<dyn IpAddressObserver>, runner: SharedTaskRunner) {
        self.channels.ip_address.add(observer, runner);
    }

    pub fn remove_ip_address_observer(&self, observer: &(dyn IpAddressObserver + 'static)) -> bool {
        self.channels.ip_address.remove(observer)
    }

    pub fn add_connection_type_observer(&self, observer: Arc<dyn ConnectionTypeObserver>, runner: SharedTaskRunner) {
        self.channels.connection_type.add(observer, runner);
    }

    pub fn remove_connection_type_observer(&self, observer: &(dyn ConnectionTypeObserver + 'static)) -> bool {
        self.channels.connection_type.remove(observer)
    }

    pub fn add_dns_observer(&self, observer: Arc<dyn DnsObserver>, runner: SharedTaskRunner) {
        self.channels.dns.add(observer, runner);
    }

    pub fn remove_dns_observer(&self, observer: &(dyn DnsObserver + 'static)) -> bool {
        self.channels.dns.remove(observer)
    }

    pub fn add_network_change_observer(&self, observer: Arc<dyn NetworkChangeObserver>, runner: SharedTaskRunner) {
        self.channels.network_change.add(observer, runner);
    }

    pub fn remove_network_change_observer(&self, observer: &(dyn NetworkChangeObserver + 'static)) -> bool {
        self.channels.network_change.remove(observer)
    }

    pub fn add_max_bandwidth_observer(&self, observer: Arc<dyn MaxBandwidthObserver>, runner: SharedTaskRunner) {
        self.channels.max_bandwidth.add(observer, runner);
    }

    pub fn remove_max_bandwidth_observer(&self, observer: &(dyn MaxBandwidthObserver + 'static)) -> bool {
        self.channels.max_bandwidth.remove(observer)
    }

    /// Register for per-network events. Requires network handle support.
    pub fn add_network_observer(&self, observer: Arc<dyn NetworkObserver>, runner: SharedTaskRunner) {
        debug_assert!(self.are_network_handles_supported(), "network handles are not supported");
        self.channels.network.add(observer, runner);
    }

    pub fn remove_network_observer(&self, observer: &(dyn NetworkObserver + 'static)) -> bool {
        self.channels.network.remove(observer)
    }

    // Publishing, subject to the test-notifications-only gate

    pub fn notify_observers_of_ip_address_change(&self) {
        self.channels.on_ip_address_changed();
    }

    /// Publish the current connection type.
    pub fn notify_observers_of_connection_type_change(&self) {
        self.channels.on_connection_type_changed(self.connection_type());
    }

    pub fn notify_observers_of_network_change(&self, connection_type: ConnectionType) {
        self.channels.publish_network_changed(connection_type);
    }

    pub fn notify_observers_of_max_bandwidth_change(&self, max_bandwidth_mbps: f64, connection_type: ConnectionType) {
        self.channels
            .publish_max_bandwidth_changed(max_bandwidth_mbps, connection_type);
    }

    pub fn notify_observers_of_dns_change(&self) {
        self.channels.publish_dns_changed();
    }

    pub fn notify_observers_of_initial_dns_config_read(&self) {
        self.channels.publish_initial_dns_config_read();
    }

    pub fn notify_observers_of_specific_network_change(&self, change: NetworkChangeType, network: NetworkHandle) {
        self.channels.on_connection_changed(network, change);
    }

    // Publishing that bypasses the gate

    pub fn notify_observers_of_ip_address_change_for_tests(&self) {
        self.channels.deliver_ip_address_changed();
    }

    pub fn notify_observers_of_connection_type_change_for_tests(&self, connection_type: ConnectionType) {
        self.channels.deliver_connection_type_changed(connection_type);
    }

    pub fn notify_observers_of_network_change_for_tests(&self, connection_type: ConnectionType) {
        self.channels.deliver_network_changed(connection_type);
    }

    pub fn notify_observers_of_max_bandwidth_change_for_tests(&self, max_bandwidth_mbps: f64, connection_type: ConnectionType) {
        self.channels
            .deliver_max_bandwidth_changed(max_bandwidth_mbps, connection_type);
    }

    pub fn notify_observers_of_dns_change_for_tests(&self) {
        self.channels.deliver_dns_changed();
    }

    pub fn notify_observers_of_specific_network_change_for_tests(&self, change: NetworkChangeType, network: NetworkHandle) {
        self.channels.deliver_specific_network_change(change, network);
    }

    /// While set, only the `*_for_tests` paths reach observers.
    pub fn set_test_notifications_only(&self, enabled: bool) {
        self.channels.set_test_notifications_only(enabled);
    }

    pub fn test_notifications_only(&self) -> bool {
        self.channels.test_notifications_only()
    }

    // DNS

    /// Store `config` and tell DNS observers.
    ///
    /// The first configuration is announced as the initial read; later ones
    /// as changes. Storing the configuration already held announces nothing.
    pub fn set_dns_config(&self, config: DnsConfig) {
        match self.state.set_dns_config(config) {
            DnsUpdate::Initial => {
                tracing::debug!(target: targets::DNS, "initial dns configuration stored");
                self.notify_observers_of_initial_dns_config_read();
            }
            DnsUpdate::Changed => {
                tracing::debug!(target: targets::DNS, "dns configuration changed");
                self.notify_observers_of_dns_change();
            }
            DnsUpdate::Unchanged => {}
        }
    }

    /// Forget that a configuration was ever stored, so the next one is
    /// announced as the initial read.
    pub fn clear_dns_config_for_testing(&self) {
        self.state.clear_for_testing();
    }

    /// Read the system DNS configuration through `reader` on `background`
    /// and store every new result. Replaces any previous reader.
    pub fn attach_dns_service(&self, reader: Arc<dyn DnsConfigReader>, background: SharedTaskRunner) {
        let weak = self.weak_self.clone();
        let service = DnsConfigService::new(
            reader,
            self.runner.clone(),
            background,
            Arc::new(move |config| {
                if let Some(notifier) = weak.upgrade() {
                    notifier.set_dns_config(config);
                }
            }),
        );
        service.refresh_config();
        if let Some(previous) = self.dns_service.lock().replace(service) {
            previous.cancel();
        }
    }

    /// Re-read the DNS configuration, if a reader is attached.
    pub fn refresh_dns_config(&self) {
        if let Some(service) = self.dns_service.lock().as_ref() {
            service.refresh_config();
        }
    }

    // Statistics

    /// Start recording statistics, with observer callbacks on `runner`.
    ///
    /// Does nothing if already recording.
    pub fn init_histogram_watcher(&self, runner: SharedTaskRunner) -> NotifierResult<()> {
        let mut slot = self.histogram.lock();
        if slot.is_some() {
            return Ok(());
        }
        let weak = self.weak_self.clone();
        let watcher = Arc::new(HistogramWatcher::new(Arc::new(move || {
            weak.upgrade()
                .map_or(ConnectionType::Unknown, |notifier| notifier.connection_type())
        }))?);
        self.channels.connection_type.add(watcher.clone(), runner.clone());
        self.channels.ip_address.add(watcher.clone(), runner.clone());
        self.channels.dns.add(watcher.clone(), runner.clone());
        self.channels.network_change.add(watcher.clone(), runner);
        *slot = Some(watcher);
        Ok(())
    }

    /// Stop recording statistics.
    pub fn shutdown_histogram_watcher(&self) {
        if let Some(watcher) = self.histogram.lock().take() {
            self.channels.connection_type.remove(&*watcher);
            self.channels.ip_address.remove(&*watcher);
            self.channels.dns.remove(&*watcher);
            self.channels.network_change.remove(&*watcher);
        }
    }

    /// The statistics recorder, if running.
    pub fn histogram_watcher(&self) -> Option<Arc<HistogramWatcher>> {
        self.histogram.lock().clone()
    }

    /// Flush per-connection statistics ahead of a metrics snapshot.
    pub fn finalizing_metrics_log_record(&self) {
        if let Some(watcher) = self.histogram_watcher() {
            watcher.finalizing_metrics_log_record();
        }
    }

    /// Account for received response data in the statistics.
    pub fn notify_data_received(&self, data: &DataReceived) {
        if let Some(watcher) = self.histogram_watcher() {
            watcher.notify_data_received(data);
        }
    }

    /// Tear down collaborators, calculator first.
    fn shutdown(&self) {
        if let Some(calculator) = self.calculator.lock().take() {
            self.channels.ip_address.remove(&*calculator);
            self.channels.connection_type.remove(&*calculator);
            calculator.shutdown();
        }
        self.shutdown_histogram_watcher();
        if let Some(service) = self.dns_service.lock().take() {
            service.cancel();
        }
        self.source.stop();
        self.channels.clear();
    }
}

impl std::fmt::Debug for NetworkChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkChangeNotifier")
            .field("source", &self.source.name())
            .field("channels", &self.channels)
            .field("calculator", &*self.calculator.lock())
            .field("histogram", &self.histogram.lock().is_some())
            .field("dns_service", &self.dns_service.lock().is_some())
            .finish_non_exhaustive()
    }
}

/// Owns the installed notifier; dropping it tears the notifier down.
pub struct NotifierHandle {
    notifier: Arc<NetworkChangeNotifier>,
    owned_runners: Vec<Arc<SequencedTaskRunner>>,
}

impl NotifierHandle {
    /// Shared reference to the notifier.
    pub fn notifier(&self) -> &Arc<NetworkChangeNotifier> {
        &self.notifier
    }
}

impl Deref for NotifierHandle {
    type Target = NetworkChangeNotifier;

    fn deref(&self) -> &Self::Target {
        &self.notifier
    }
}

impl Drop for NotifierHandle {
    fn drop(&mut self) {
        self.notifier.shutdown();
        global::uninstall(&self.notifier);
        for runner in self.owned_runners.drain(..) {
            runner.stop_and_join();
        }
        tracing::info!(target: targets::NOTIFIER, source = self.notifier.source.name(), "network change notifier stopped");
    }
}

impl std::fmt::Debug for NotifierHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifierHandle")
            .field("notifier", &self.notifier)
            .field("owned_runners", &self.owned_runners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_state_reports_initial_then_changes() {
        let state = NetworkState::default();
        let a = DnsConfig {
            nameservers: vec!["192.0.2.53:53".parse().unwrap()],
            ..Default::default()
        };
        let b = DnsConfig {
            rotate: true,
            ..a.clone()
        };

        assert_eq!(state.set_dns_config(a.clone()), DnsUpdate::Initial);
        assert_eq!(state.set_dns_config(a.clone()), DnsUpdate::Unchanged);
        assert_eq!(state.set_dns_config(b.clone()), DnsUpdate::Changed);
        assert_eq!(state.dns_config(), b);

        state.clear_for_testing();
        assert_eq!(state.set_dns_config(b), DnsUpdate::Initial);
    }
}
