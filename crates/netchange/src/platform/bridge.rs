//! Signal source for hosts that push network events themselves.
//!
//! Mobile embedders forward their platform callbacks (default network
//! changed, network connected, losing, lost) into a [`BridgeSignalSource`].
//! The bridge keeps the multi-network view and suppresses events that do not
//! change it.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{PlatformSignalSource, SignalSink};
use crate::error::NotifierResult;
use crate::logging::targets;
use crate::types::{
    ConnectionSubtype, ConnectionType, NetworkChangeType, NetworkHandle, NetworkList,
};

#[derive(Debug)]
struct BridgeState {
    connection_type: ConnectionType,
    subtype: ConnectionSubtype,
    default_network: NetworkHandle,
    networks: BTreeMap<NetworkHandle, ConnectionType>,
}

/// A source driven by explicit `notify_*` calls, with network handles.
pub struct BridgeSignalSource {
    invalid_handle: NetworkHandle,
    state: Mutex<BridgeState>,
    sink: Mutex<Option<Arc<dyn SignalSink>>>,
}

impl BridgeSignalSource {
    /// Bridge whose host uses the standard invalid handle.
    pub fn new() -> Self {
        Self::with_invalid_handle(NetworkHandle::INVALID)
    }

    /// Bridge whose host reports `invalid_handle` for "no network".
    pub fn with_invalid_handle(invalid_handle: NetworkHandle) -> Self {
        Self {
            invalid_handle,
            state: Mutex::new(BridgeState {
                connection_type: ConnectionType::Unknown,
                subtype: ConnectionSubtype::Unknown,
                default_network: NetworkHandle::INVALID,
                networks: BTreeMap::new(),
            }),
            sink: Mutex::new(None),
        }
    }

    fn sink(&self) -> Option<Arc<dyn SignalSink>> {
        self.sink.lock().clone()
    }

    /// The host's default network now has `connection_type`.
    pub fn notify_connection_type_changed(&self, connection_type: ConnectionType, default_network: NetworkHandle) {
        let subtype = {
            let mut state = self.state.lock();
            state.default_network = default_network;
            if state.connection_type == connection_type {
                return;
            }
            state.connection_type = connection_type;
            if connection_type == ConnectionType::None {
                state.subtype = ConnectionSubtype::None;
            } else if state.subtype == ConnectionSubtype::None {
                // Back online; the host reports the technology separately.
                state.subtype = ConnectionSubtype::Unknown;
            }
            state.subtype
        };
        tracing::debug!(target: targets::PLATFORM, source = "bridge", %connection_type, "connection type changed");
        if let Some(sink) = self.sink() {
            sink.on_ip_address_changed();
            sink.on_connection_type_changed(connection_type);
            sink.on_connection_subtype_changed(connection_type, subtype);
        }
    }

    /// The link technology of the default network changed.
    pub fn notify_connection_subtype_changed(&self, subtype: ConnectionSubtype) {
        let connection_type = {
            let mut state = self.state.lock();
            if state.subtype == subtype {
                return;
            }
            state.subtype = subtype;
            state.connection_type
        };
        if let Some(sink) = self.sink() {
            sink.on_connection_subtype_changed(connection_type, subtype);
        }
    }

    /// A network became available.
    pub fn notify_network_connected(&self, network: NetworkHandle, connection_type: ConnectionType) {
        let known = self.state.lock().networks.insert(network, connection_type).is_some();
        if known {
            return;
        }
        self.emit(network, NetworkChangeType::Connected);
    }

    /// A network is about to be lost.
    pub fn notify_network_soon_to_disconnect(&self, network: NetworkHandle) {
        if self.state.lock().networks.contains_key(&network) {
            self.emit(network, NetworkChangeType::SoonToDisconnect);
        }
    }

    /// A network was lost.
    pub fn notify_network_disconnected(&self, network: NetworkHandle) {
        let removed = {
            let mut state = self.state.lock();
            if state.default_network == network {
                state.default_network = NetworkHandle::INVALID;
            }
            state.networks.remove(&network).is_some()
        };
        if removed {
            self.emit(network, NetworkChangeType::Disconnected);
        }
    }

    /// Disconnect every known network not in `active`.
    ///
    /// Used after a period in which disconnect callbacks may have been
    /// missed.
    pub fn purge_active_network_list(&self, active: &[NetworkHandle]) {
        let stale: Vec<NetworkHandle> = self
            .state
            .lock()
            .networks
            .keys()
            .filter(|network| !active.contains(network))
            .copied()
            .collect();
        for network in stale {
            self.notify_network_disconnected(network);
        }
    }

    /// `network` became the default network.
    pub fn notify_default_network_changed(&self, network: NetworkHandle) {
        {
            let mut state = self.state.lock();
            if state.default_network == network {
                return;
            }
            state.default_network = network;
        }
        if network.is_valid() {
            self.emit(network, NetworkChangeType::MadeDefault);
        }
    }

    fn emit(&self, network: NetworkHandle, change: NetworkChangeType) {
        tracing::debug!(target: targets::PLATFORM, source = "bridge", %network, ?change, "network lifecycle");
        if let Some(sink) = self.sink() {
            sink.on_connection_changed(network, change);
        }
    }
}

impl Default for BridgeSignalSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformSignalSource for BridgeSignalSource {
    fn name(&self) -> &'static str {
        "bridge"
    }

    fn start(&self, sink: Arc<dyn SignalSink>) -> NotifierResult<()> {
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    fn stop(&self) {
        self.sink.lock().take();
    }

    fn current_connection_type(&self) -> ConnectionType {
        self.state.lock().connection_type
    }

    fn current_connection_subtype(&self) -> ConnectionSubtype {
        self.state.lock().subtype
    }

    fn current_max_bandwidth_and_connection_type(&self) -> (f64, ConnectionType) {
        let state = self.state.lock();
        (state.subtype.max_bandwidth_mbps(), state.connection_type)
    }

    fn are_network_handles_supported(&self) -> bool {
        true
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

impl std::fmt::Debug for BridgeSignalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeSignalSource")
            .field("invalid_handle", &self.invalid_handle)
            .field("state", &*self.state.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
        fn on_dns_changed(&self) {}
        fn on_connection_changed(&self, network: NetworkHandle, change: NetworkChangeType) {
            self.events.lock().push(format!("{change:?} {network}"));
        }
    }

    fn started() -> (BridgeSignalSource, Arc<SinkLog>) {
        let bridge = BridgeSignalSource::new();
        let sink = Arc::new(SinkLog::default());
        bridge.start(sink.clone()).unwrap();
        (bridge, sink)
    }

    #[test]
    fn test_type_change_emits_ip_type_and_subtype() {
        let (bridge, sink) = started();
        bridge.notify_connection_type_changed(ConnectionType::Cellular4G, NetworkHandle(100));
        bridge.notify_connection_type_changed(ConnectionType::Cellular4G, NetworkHandle(100));

        assert_eq!(
            *sink.events.lock(),
            vec!["ip", "type CONNECTION_4G", "subtype Unknown"]
        );
        assert_eq!(bridge.default_network(), NetworkHandle(100));
    }

    #[test]
    fn test_subtype_change_only_when_different() {
        let (bridge, sink) = started();
        bridge.notify_connection_subtype_changed(ConnectionSubtype::Lte);
        bridge.notify_connection_subtype_changed(ConnectionSubtype::Lte);
        assert_eq!(*sink.events.lock(), vec!["subtype Lte"]);
        assert_eq!(bridge.current_max_bandwidth_and_connection_type().0, 100.0);
    }

    #[test]
    fn test_network_lifecycle_and_purge() {
        let (bridge, sink) = started();
        bridge.notify_network_connected(NetworkHandle(1), ConnectionType::Wifi);
        bridge.notify_network_connected(NetworkHandle(2), ConnectionType::Cellular4G);
        bridge.notify_default_network_changed(NetworkHandle(1));
        bridge.notify_network_soon_to_disconnect(NetworkHandle(2));

        assert_eq!(bridge.connected_networks(), vec![NetworkHandle(1), NetworkHandle(2)]);
        assert_eq!(bridge.network_connection_type(NetworkHandle(2)), ConnectionType::Cellular4G);

        bridge.purge_active_network_list(&[NetworkHandle(1)]);
        assert_eq!(bridge.connected_networks(), vec![NetworkHandle(1)]);
        assert_eq!(bridge.network_connection_type(NetworkHandle(2)), ConnectionType::Unknown);

        assert_eq!(
            *sink.events.lock(),
            vec!["Connected 1", "Connected 2", "MadeDefault 1", "SoonToDisconnect 2", "Disconnected 2"]
        );
    }

    #[test]
    fn test_losing_default_network_clears_it() {
        let (bridge, _sink) = started();
        bridge.notify_network_connected(NetworkHandle(5), ConnectionType::Wifi);
        bridge.notify_default_network_changed(NetworkHandle(5));
        bridge.notify_network_disconnected(NetworkHandle(5));
        assert_eq!(bridge.default_network(), NetworkHandle::INVALID);
    }

    #[test]
    fn test_custom_invalid_handle_is_reported() {
        let bridge = BridgeSignalSource::with_invalid_handle(NetworkHandle(0));
        assert_eq!(bridge.invalid_network_handle(), NetworkHandle(0));
        assert!(bridge.are_network_handles_supported());
    }
}
