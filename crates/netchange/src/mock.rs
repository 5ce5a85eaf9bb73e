//! Fully controllable notifier for tests.
//!
//! [`MockNetworkChangeNotifier`] installs a real notifier around a
//! [`MockSignalSource`] whose state the test sets directly. Pair it with a
//! `ManualTaskRunner` to step deliveries and debounce timers
//! deterministically.

use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::Arc;

use netchange_core::SharedTaskRunner;
use parking_lot::Mutex;

use crate::calculator::NetworkChangeCalculatorParams;
use crate::config::NotifierConfig;
use crate::error::NotifierResult;
use crate::notifier::{NetworkChangeNotifier, NotifierHandle};
use crate::platform::{PlatformSignalSource, SignalSink};
use crate::types::{ConnectionSubtype, ConnectionType, NetworkChangeType, NetworkHandle, NetworkList};

#[derive(Debug)]
struct MockState {
    connection_type: ConnectionType,
    subtype: ConnectionSubtype,
    handles_supported: bool,
    networks: BTreeMap<NetworkHandle, ConnectionType>,
    default_network: NetworkHandle,
}

/// A signal source that reports whatever it is told.
///
/// It never emits anything on its own.
#[derive(Debug)]
pub struct MockSignalSource {
    state: Mutex<MockState>,
    invalid_handle: NetworkHandle,
}

impl MockSignalSource {
    pub fn new() -> Self {
        Self::with_invalid_handle(NetworkHandle::INVALID)
    }

    /// A source claiming `invalid_handle` as its "no network" value.
    pub fn with_invalid_handle(invalid_handle: NetworkHandle) -> Self {
        Self {
            state: Mutex::new(MockState {
                connection_type: ConnectionType::Unknown,
                subtype: ConnectionSubtype::Unknown,
                handles_supported: false,
                networks: BTreeMap::new(),
                default_network: NetworkHandle::INVALID,
            }),
            invalid_handle,
        }
    }

    pub fn set_connection_type(&self, connection_type: ConnectionType) {
        self.state.lock().connection_type = connection_type;
    }

    pub fn set_connection_subtype(&self, subtype: ConnectionSubtype) {
        self.state.lock().subtype = subtype;
    }

    pub fn set_network_handles_supported(&self, supported: bool) {
        self.state.lock().handles_supported = supported;
    }

    /// Replace the connected networks; each gets type `Unknown`.
    pub fn set_connected_networks_list(&self, networks: &[NetworkHandle]) {
        self.state.lock().networks = networks
            .iter()
            .map(|&network| (network, ConnectionType::Unknown))
            .collect();
    }

    pub fn set_network_connection_type(&self, network: NetworkHandle, connection_type: ConnectionType) {
        self.state.lock().networks.insert(network, connection_type);
    }

    pub fn set_default_network(&self, network: NetworkHandle) {
        self.state.lock().default_network = network;
    }
}

impl Default for MockSignalSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformSignalSource for MockSignalSource {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn start(&self, _sink: Arc<dyn SignalSink>) -> NotifierResult<()> {
        Ok(())
    }

    fn stop(&self) {}

    fn current_connection_type(&self) -> ConnectionType {
        self.state.lock().connection_type
    }

    fn current_connection_subtype(&self) -> ConnectionSubtype {
        self.state.lock().subtype
    }

    fn current_max_bandwidth_and_connection_type(&self) -> (f64, ConnectionType) {
        let state = self.state.lock();
        let subtype = if state.connection_type == ConnectionType::None {
            ConnectionSubtype::None
        } else {
            state.subtype
        };
        (subtype.max_bandwidth_mbps(), state.connection_type)
    }

    fn are_network_handles_supported(&self) -> bool {
        self.state.lock().handles_supported
    }

    fn connected_networks(&self) -> NetworkList {
        self.state.lock().networks.keys().copied().collect()
    }

    fn network_connection_type(&self, network: NetworkHandle) -> ConnectionType {
        self.state
            .lock()
            .networks
            .get(&network)
            .copied()
            .unwrap_or(ConnectionType::Unknown)
    }

    fn default_network(&self) -> NetworkHandle {
        self.state.lock().default_network
    }

    fn invalid_network_handle(&self) -> NetworkHandle {
        self.invalid_handle
    }
}

/// An installed notifier driven entirely by the test.
///
/// Debounce delays are zero unless a config says otherwise, so a single
/// `run_until_idle` on the runner settles every change.
pub struct MockNetworkChangeNotifier {
    source: Arc<MockSignalSource>,
    handle: NotifierHandle,
}

impl MockNetworkChangeNotifier {
    pub fn new(runner: SharedTaskRunner) -> NotifierResult<Self> {
        Self::with_config(
            runner,
            NotifierConfig::default().with_calculator(NetworkChangeCalculatorParams::zero()),
        )
    }

    pub fn with_config(runner: SharedTaskRunner, config: NotifierConfig) -> NotifierResult<Self> {
        let source = Arc::new(MockSignalSource::new());
        let handle = NetworkChangeNotifier::create_with_source(source.clone(), config, runner)?;
        Ok(Self { source, handle })
    }

    /// The mock source, for setting state without notifying.
    pub fn source(&self) -> &Arc<MockSignalSource> {
        &self.source
    }

    pub fn handle(&self) -> &NotifierHandle {
        &self.handle
    }

    pub fn set_connection_type(&self, connection_type: ConnectionType) {
        self.source.set_connection_type(connection_type);
    }

    /// Set the type and deliver it to connection-type observers, bypassing
    /// the test-notifications-only gate. The calculator sees it too.
    pub fn set_connection_type_and_notify_observers(&self, connection_type: ConnectionType) {
        self.source.set_connection_type(connection_type);
        self.handle
            .notify_observers_of_connection_type_change_for_tests(connection_type);
    }

    pub fn set_connection_subtype(&self, subtype: ConnectionSubtype) {
        self.source.set_connection_subtype(subtype);
    }

    pub fn set_network_handles_supported(&self, supported: bool) {
        self.source.set_network_handles_supported(supported);
    }

    pub fn set_connected_networks_list(&self, networks: &[NetworkHandle]) {
        self.source.set_connected_networks_list(networks);
    }

    pub fn set_default_network(&self, network: NetworkHandle) {
        self.source.set_default_network(network);
    }

    pub fn notify_network_connected(&self, network: NetworkHandle) {
        self.handle
            .notify_observers_of_specific_network_change_for_tests(NetworkChangeType::Connected, network);
    }

    pub fn notify_network_soon_to_disconnect(&self, network: NetworkHandle) {
        self.handle.notify_observers_of_specific_network_change_for_tests(
            NetworkChangeType::SoonToDisconnect,
            network,
        );
    }

    pub fn notify_network_disconnected(&self, network: NetworkHandle) {
        self.handle
            .notify_observers_of_specific_network_change_for_tests(NetworkChangeType::Disconnected, network);
    }

    pub fn notify_network_made_default(&self, network: NetworkHandle) {
        self.handle
            .notify_observers_of_specific_network_change_for_tests(NetworkChangeType::MadeDefault, network);
    }
}

impl Deref for MockNetworkChangeNotifier {
    type Target = NetworkChangeNotifier;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl std::fmt::Debug for MockNetworkChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockNetworkChangeNotifier")
            .field("source", &self.source)
            .field("handle", &self.handle)
            .finish()
    }
}

impl NetworkChangeNotifier {
    /// Install a [`MockNetworkChangeNotifier`] delivering on `runner`.
    pub fn create_mock(runner: SharedTaskRunner) -> NotifierResult<MockNetworkChangeNotifier> {
        MockNetworkChangeNotifier::new(runner)
    }
}
