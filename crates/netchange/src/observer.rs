//! Observer traits, one per notification channel.
//!
//! Observers are registered as `Arc<dyn Trait>` together with the runner
//! they want to be called back on. Every callback for one observer runs on
//! that runner, in publish order.

use crate::types::{ConnectionType, NetworkHandle};

/// Told when any local IP address is added, removed or changed.
pub trait IpAddressObserver: Send + Sync {
    fn on_ip_address_changed(&self);
}

/// Told when the derived primary connection type changes.
pub trait ConnectionTypeObserver: Send + Sync {
    fn on_connection_type_changed(&self, connection_type: ConnectionType);
}

/// Told when the system DNS configuration changes.
pub trait DnsObserver: Send + Sync {
    /// A configuration replaced a previously known one.
    fn on_dns_changed(&self);

    /// The first configuration since startup was read.
    fn on_initial_dns_config_read(&self) {}
}

/// Told once per debounced network change.
///
/// Coming online is delivered as `None` followed by the new type.
pub trait NetworkChangeObserver: Send + Sync {
    fn on_network_changed(&self, connection_type: ConnectionType);
}

/// Told when the theoretical downlink ceiling changes.
pub trait MaxBandwidthObserver: Send + Sync {
    fn on_max_bandwidth_changed(&self, max_bandwidth_mbps: f64, connection_type: ConnectionType);
}

/// Told about the lifecycle of individual networks.
///
/// Only delivered on platforms that support network handles.
pub trait NetworkObserver: Send + Sync {
    fn on_network_connected(&self, network: NetworkHandle);
    fn on_network_disconnected(&self, network: NetworkHandle);
    fn on_network_soon_to_disconnect(&self, network: NetworkHandle);
    fn on_network_made_default(&self, network: NetworkHandle);
}
