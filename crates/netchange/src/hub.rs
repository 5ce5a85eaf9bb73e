//! The six observer channels and the gated ingestion sink.

use std::sync::atomic::{AtomicBool, Ordering};

use netchange_core::ObserverList;

use crate::logging::targets;
use crate::observer::{
    ConnectionTypeObserver, DnsObserver, IpAddressObserver, MaxBandwidthObserver,
    NetworkChangeObserver, NetworkObserver,
};
use crate::platform::SignalSink;
use crate::types::{ConnectionSubtype, ConnectionType, NetworkChangeType, NetworkHandle};

/// Fan-out channels owned by one notifier.
///
/// The `deliver_*` methods always fan out. The [`SignalSink`] implementation,
/// used by platform sources and the calculator, is gated: while
/// test-notifications-only is set it drops everything.
pub struct ObserverChannels {
    pub(crate) ip_address: ObserverList<dyn IpAddressObserver>,
    pub(crate) connection_type: ObserverList<dyn ConnectionTypeObserver>,
    pub(crate) dns: ObserverList<dyn DnsObserver>,
    pub(crate) network_change: ObserverList<dyn NetworkChangeObserver>,
    pub(crate) max_bandwidth: ObserverList<dyn MaxBandwidthObserver>,
    pub(crate) network: ObserverList<dyn NetworkObserver>,
    test_notifications_only: AtomicBool,
}

impl ObserverChannels {
    pub(crate) fn new(test_notifications_only: bool) -> Self {
        Self {
            ip_address: ObserverList::new(),
            connection_type: ObserverList::new(),
            dns: ObserverList::new(),
            network_change: ObserverList::new(),
            max_bandwidth: ObserverList::new(),
            network: ObserverList::new(),
            test_notifications_only: AtomicBool::new(test_notifications_only),
        }
    }

    pub(crate) fn set_test_notifications_only(&self, enabled: bool) {
        self.test_notifications_only.store(enabled, Ordering::Release);
    }

    pub(crate) fn test_notifications_only(&self) -> bool {
        self.test_notifications_only.load(Ordering::Acquire)
    }

    fn gate_open(&self, channel: &'static str) -> bool {
        let open = !self.test_notifications_only();
        if !open {
            tracing::trace!(target: targets::NOTIFIER, channel, "suppressed by test-notifications-only");
        }
        open
    }

    #[tracing::instrument(level = "trace", target = "netchange::notifier", skip(self))]
    pub(crate) fn deliver_ip_address_changed(&self) {
        self.ip_address.notify(|o| o.on_ip_address_changed());
    }

    #[tracing::instrument(level = "trace", target = "netchange::notifier", skip(self))]
    pub(crate) fn deliver_connection_type_changed(&self, connection_type: ConnectionType) {
        self.connection_type
            .notify(move |o| o.on_connection_type_changed(connection_type));
    }

    #[tracing::instrument(level = "trace", target = "netchange::notifier", skip(self))]
    pub(crate) fn deliver_network_changed(&self, connection_type: ConnectionType) {
        self.network_change
            .notify(move |o| o.on_network_changed(connection_type));
    }

    #[tracing::instrument(level = "trace", target = "netchange::notifier", skip(self))]
    pub(crate) fn deliver_max_bandwidth_changed(&self, max_bandwidth_mbps: f64, connection_type: ConnectionType) {
        self.max_bandwidth
            .notify(move |o| o.on_max_bandwidth_changed(max_bandwidth_mbps, connection_type));
    }

    #[tracing::instrument(level = "trace", target = "netchange::notifier", skip(self))]
    pub(crate) fn deliver_dns_changed(&self) {
        self.dns.notify(|o| o.on_dns_changed());
    }

    #[tracing::instrument(level = "trace", target = "netchange::notifier", skip(self))]
    pub(crate) fn deliver_initial_dns_config_read(&self) {
        self.dns.notify(|o| o.on_initial_dns_config_read());
    }

    #[tracing::instrument(level = "trace", target = "netchange::notifier", skip(self))]
    pub(crate) fn deliver_specific_network_change(&self, change: NetworkChangeType, network: NetworkHandle) {
        match change {
            NetworkChangeType::Connected => self.network.notify(move |o| o.on_network_connected(network)),
            NetworkChangeType::Disconnected => self.network.notify(move |o| o.on_network_disconnected(network)),
            NetworkChangeType::SoonToDisconnect => {
                self.network.notify(move |o| o.on_network_soon_to_disconnect(network))
            }
            NetworkChangeType::MadeDefault => self.network.notify(move |o| o.on_network_made_default(network)),
        };
    }

    /// Gated network-change publish, used by the calculator.
    pub(crate) fn publish_network_changed(&self, connection_type: ConnectionType) {
        if self.gate_open("network_change") {
            self.deliver_network_changed(connection_type);
        }
    }

    /// Gated DNS publish.
    pub(crate) fn publish_dns_changed(&self) {
        if self.gate_open("dns") {
            self.deliver_dns_changed();
        }
    }

    /// Gated initial-DNS-read publish.
    pub(crate) fn publish_initial_dns_config_read(&self) {
        if self.gate_open("dns") {
            self.deliver_initial_dns_config_read();
        }
    }

    /// Gated max-bandwidth publish.
    pub(crate) fn publish_max_bandwidth_changed(&self, max_bandwidth_mbps: f64, connection_type: ConnectionType) {
        if self.gate_open("max_bandwidth") {
            self.deliver_max_bandwidth_changed(max_bandwidth_mbps, connection_type);
        }
    }

    /// Drop every registration on every channel.
    pub(crate) fn clear(&self) {
        self.ip_address.clear();
        self.connection_type.clear();
        self.dns.clear();
        self.network_change.clear();
        self.max_bandwidth.clear();
        self.network.clear();
    }
}

impl SignalSink for ObserverChannels {
    fn on_ip_address_changed(&self) {
        if self.gate_open("ip_address") {
            self.deliver_ip_address_changed();
        }
    }

    fn on_connection_type_changed(&self, connection_type: ConnectionType) {
        if self.gate_open("connection_type") {
            self.deliver_connection_type_changed(connection_type);
        }
    }

    fn on_connection_subtype_changed(&self, connection_type: ConnectionType, subtype: ConnectionSubtype) {
        let mbps = if connection_type == ConnectionType::None {
            ConnectionSubtype::None.max_bandwidth_mbps()
        } else {
            subtype.max_bandwidth_mbps()
        };
        self.publish_max_bandwidth_changed(mbps, connection_type);
    }

    fn on_dns_changed(&self) {
        self.publish_dns_changed();
    }

    fn on_connection_changed(&self, network: NetworkHandle, change: NetworkChangeType) {
        if self.gate_open("network") {
            self.deliver_specific_network_change(change, network);
        }
    }
}

impl std::fmt::Debug for ObserverChannels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverChannels")
            .field("ip_address", &self.ip_address.len())
            .field("connection_type", &self.connection_type.len())
            .field("dns", &self.dns.len())
            .field("network_change", &self.network_change.len())
            .field("max_bandwidth", &self.max_bandwidth.len())
            .field("network", &self.network.len())
            .field("test_notifications_only", &self.test_notifications_only())
            .finish()
    }
}
