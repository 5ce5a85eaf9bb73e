//! Shared test observers.

#![allow(dead_code)]

use parking_lot::Mutex;

use netchange::prelude::*;

/// Records every callback it receives as a short string.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.events.lock())
    }

    fn push(&self, event: String) {
        self.events.lock().push(event);
    }
}

impl IpAddressObserver for Recorder {
    fn on_ip_address_changed(&self) {
        self.push("ip".into());
    }
}

impl ConnectionTypeObserver for Recorder {
    fn on_connection_type_changed(&self, connection_type: ConnectionType) {
        self.push(format!("type {connection_type}"));
    }
}

impl NetworkChangeObserver for Recorder {
    fn on_network_changed(&self, connection_type: ConnectionType) {
        self.push(format!("network {connection_type}"));
    }
}

impl MaxBandwidthObserver for Recorder {
    fn on_max_bandwidth_changed(&self, max_bandwidth_mbps: f64, connection_type: ConnectionType) {
        self.push(format!("bandwidth {max_bandwidth_mbps} {connection_type}"));
    }
}

impl DnsObserver for Recorder {
    fn on_dns_changed(&self) {
        self.push("dns".into());
    }

    fn on_initial_dns_config_read(&self) {
        self.push("dns initial".into());
    }
}

impl NetworkObserver for Recorder {
    fn on_network_connected(&self, network: NetworkHandle) {
        self.push(format!("connected {network}"));
    }

    fn on_network_disconnected(&self, network: NetworkHandle) {
        self.push(format!("disconnected {network}"));
    }

    fn on_network_soon_to_disconnect(&self, network: NetworkHandle) {
        self.push(format!("soon {network}"));
    }

    fn on_network_made_default(&self, network: NetworkHandle) {
        self.push(format!("default {network}"));
    }
}
