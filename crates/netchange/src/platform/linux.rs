//! Linux signal source (netlink through `netwatcher`).

use std::path::Path;
use std::sync::Arc;

use super::interfaces::{InterfaceFilter, PlatformRules};
use super::watcher::{InitialReadPolicy, InterfaceWatcher};
use super::{PlatformSignalSource, SignalSink};
use crate::config::NotifierConfig;
use crate::error::NotifierResult;
use crate::types::{ConnectionSubtype, ConnectionType};

const SYS_CLASS_NET: &str = "/sys/class/net";

/// Interface watching on Linux, honouring the configured ignore list.
#[derive(Debug)]
pub struct LinuxSignalSource {
    watcher: InterfaceWatcher,
}

impl LinuxSignalSource {
    pub fn new(config: &NotifierConfig) -> NotifierResult<Self> {
        let filter = InterfaceFilter::new(PlatformRules::Linux, config.ignored_interfaces.clone());
        Ok(Self {
            watcher: InterfaceWatcher::new(
                "linux",
                filter,
                config.registration_retry_interval,
                InitialReadPolicy::Synchronous,
            ),
        })
    }

    /// The underlying watcher.
    pub fn watcher(&self) -> &InterfaceWatcher {
        &self.watcher
    }
}

impl PlatformSignalSource for LinuxSignalSource {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn start(&self, sink: Arc<dyn SignalSink>) -> NotifierResult<()> {
        self.watcher.start(sink)
    }

    fn stop(&self) {
        self.watcher.stop();
    }

    fn current_connection_type(&self) -> ConnectionType {
        self.watcher.current_connection_type()
    }

    fn current_connection_subtype(&self) -> ConnectionSubtype {
        self.watcher.current_connection_subtype()
    }

    fn current_max_bandwidth_and_connection_type(&self) -> (f64, ConnectionType) {
        self.watcher.current_max_bandwidth_and_connection_type()
    }
}

/// Classify a link from sysfs: a `wireless` directory means WiFi, anything
/// else is Ethernet with its subtype taken from the negotiated speed.
pub(crate) fn link_kind(name: &str) -> (ConnectionType, ConnectionSubtype) {
    link_kind_in(Path::new(SYS_CLASS_NET), name)
}

fn link_kind_in(root: &Path, name: &str) -> (ConnectionType, ConnectionSubtype) {
    let dir = root.join(name);
    if dir.join("wireless").exists() || dir.join("phy80211").exists() {
        return (ConnectionType::Wifi, ConnectionSubtype::Unknown);
    }
    let subtype = std::fs::read_to_string(dir.join("speed"))
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .and_then(ConnectionSubtype::from_ethernet_speed_mbps)
        .unwrap_or(ConnectionSubtype::Unknown);
    (ConnectionType::Ethernet, subtype)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysfs_classification() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("wlan0/wireless")).unwrap();
        std::fs::create_dir_all(root.path().join("eth0")).unwrap();
        std::fs::write(root.path().join("eth0/speed"), "1000\n").unwrap();
        std::fs::create_dir_all(root.path().join("eth1")).unwrap();
        std::fs::write(root.path().join("eth1/speed"), "-1\n").unwrap();

        assert_eq!(
            link_kind_in(root.path(), "wlan0"),
            (ConnectionType::Wifi, ConnectionSubtype::Unknown)
        );
        assert_eq!(
            link_kind_in(root.path(), "eth0"),
            (ConnectionType::Ethernet, ConnectionSubtype::GigabitEthernet)
        );
        assert_eq!(
            link_kind_in(root.path(), "eth1"),
            (ConnectionType::Ethernet, ConnectionSubtype::Unknown)
        );
    }
}
