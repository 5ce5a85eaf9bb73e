//! Interface snapshots and connection-type derivation.

use std::collections::BTreeSet;
use std::net::IpAddr;

use crate::types::{ConnectionSubtype, ConnectionType};

/// One network interface as seen at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSnapshot {
    /// Interface name (e.g., "eth0", "en0", "Wi-Fi").
    pub name: String,
    /// Interface index.
    pub index: u32,
    /// Human-readable description (Windows only, empty elsewhere).
    pub description: String,
    /// Assigned addresses.
    pub addresses: BTreeSet<IpAddr>,
    /// Whether the interface is up.
    pub is_up: bool,
    /// Whether this is the loopback interface.
    pub is_loopback: bool,
    /// Whether this is a tunnel.
    pub is_tunnel: bool,
    /// Connection type this interface would provide.
    pub connection_type: ConnectionType,
    /// Link technology, when known.
    pub subtype: ConnectionSubtype,
}

impl InterfaceSnapshot {
    /// A bare interface of the given type with no addresses.
    pub fn new(name: impl Into<String>, index: u32, connection_type: ConnectionType) -> Self {
        Self {
            name: name.into(),
            index,
            description: String::new(),
            addresses: BTreeSet::new(),
            is_up: true,
            is_loopback: false,
            is_tunnel: false,
            connection_type,
            subtype: ConnectionSubtype::Unknown,
        }
    }

    /// Builder-style address assignment.
    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.addresses.insert(address);
        self
    }
}

/// Interface-name conventions that differ per OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformRules {
    Linux,
    Windows,
    MacOs,
    Other,
}

impl PlatformRules {
    /// Rules for the platform this was compiled for.
    pub const fn current() -> Self {
        if cfg!(target_os = "linux") {
            PlatformRules::Linux
        } else if cfg!(windows) {
            PlatformRules::Windows
        } else if cfg!(target_os = "macos") {
            PlatformRules::MacOs
        } else {
            PlatformRules::Other
        }
    }
}

/// Decides which interfaces take part in connection-type derivation.
#[derive(Debug, Clone)]
pub struct InterfaceFilter {
    rules: PlatformRules,
    ignored: BTreeSet<String>,
}

impl InterfaceFilter {
    /// Filter with `rules` and an explicit ignore list.
    pub fn new(rules: PlatformRules, ignored: BTreeSet<String>) -> Self {
        Self { rules, ignored }
    }

    /// Whether `iface` is never considered.
    pub fn is_ignored(&self, iface: &InterfaceSnapshot) -> bool {
        if self.ignored.contains(&iface.name) {
            return true;
        }
        // VMware host-only and NAT adapters are internal.
        if iface.name.to_ascii_lowercase().contains("vmnet")
            || iface.description.to_ascii_lowercase().contains("vmnet")
        {
            return true;
        }
        match self.rules {
            PlatformRules::Windows => {
                iface.description == "Teredo Tunneling Pseudo-Interface"
                    || iface.name == "Teredo Tunneling Pseudo-Interface"
            }
            PlatformRules::MacOs => iface.name.starts_with("utun") || iface.name.starts_with("awdl"),
            // Tunnel links (tun, wg, ...) ride on another interface.
            PlatformRules::Linux => iface.is_tunnel,
            PlatformRules::Other => false,
        }
    }

    /// Whether `iface` carries traffic and is not ignored.
    pub fn is_usable(&self, iface: &InterfaceSnapshot) -> bool {
        iface.is_up && !iface.is_loopback && !iface.addresses.is_empty() && !self.is_ignored(iface)
    }
}

impl Default for InterfaceFilter {
    fn default() -> Self {
        Self::new(PlatformRules::current(), BTreeSet::new())
    }
}

/// Derive the primary connection type from a snapshot.
///
/// The first usable interface decides; if usable interfaces disagree the
/// result is `Unknown`, and with none at all it is `None`.
pub fn connection_type_from_interfaces(interfaces: &[InterfaceSnapshot], filter: &InterfaceFilter) -> ConnectionType {
    let mut usable = interfaces.iter().filter(|iface| filter.is_usable(iface));
    let Some(first) = usable.next() else {
        return ConnectionType::None;
    };
    if usable.all(|iface| iface.connection_type == first.connection_type) {
        first.connection_type
    } else {
        ConnectionType::Unknown
    }
}

/// Derive the link technology from a snapshot.
///
/// Only a single usable interface with a known subtype is specific enough.
pub fn connection_subtype_from_interfaces(interfaces: &[InterfaceSnapshot], filter: &InterfaceFilter) -> ConnectionSubtype {
    let usable: Vec<_> = interfaces.iter().filter(|iface| filter.is_usable(iface)).collect();
    match usable.as_slice() {
        [] => ConnectionSubtype::None,
        [only] => only.subtype,
        _ => ConnectionSubtype::Unknown,
    }
}

/// Snapshot every interface on the system.
pub fn list_interfaces() -> Vec<InterfaceSnapshot> {
    netdev::get_interfaces()
        .into_iter()
        .map(|iface| {
            let mut addresses: BTreeSet<IpAddr> = iface.ipv4.iter().map(|net| IpAddr::V4(net.addr())).collect();
            addresses.extend(iface.ipv6.iter().map(|net| IpAddr::V6(net.addr())));

            let is_loopback = iface.is_loopback();
            let is_tunnel = iface.is_tun();
            let (connection_type, subtype) = if is_loopback || is_tunnel {
                (ConnectionType::Unknown, ConnectionSubtype::Unknown)
            } else {
                link_kind(&iface)
            };

            InterfaceSnapshot {
                name: iface.name.clone(),
                index: iface.index,
                description: iface.description.clone().unwrap_or_default(),
                addresses,
                is_up: iface.is_up(),
                is_loopback,
                is_tunnel,
                connection_type,
                subtype,
            }
        })
        .collect()
}

#[cfg(target_os = "linux")]
fn link_kind(iface: &netdev::Interface) -> (ConnectionType, ConnectionSubtype) {
    super::linux::link_kind(&iface.name)
}

#[cfg(not(target_os = "linux"))]
fn link_kind(iface: &netdev::Interface) -> (ConnectionType, ConnectionSubtype) {
    use netdev::interface::InterfaceType;

    match iface.if_type {
        InterfaceType::Wireless80211 => (ConnectionType::Wifi, ConnectionSubtype::Unknown),
        InterfaceType::Ethernet | InterfaceType::GigabitEthernet | InterfaceType::FastEthernetT => {
            (ConnectionType::Ethernet, ConnectionSubtype::Unknown)
        }
        _ => (ConnectionType::Unknown, ConnectionSubtype::Unknown),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn up(name: &str, connection_type: ConnectionType) -> InterfaceSnapshot {
        InterfaceSnapshot::new(name, 1, connection_type).with_address("192.0.2.10".parse().unwrap())
    }

    fn filter(rules: PlatformRules) -> InterfaceFilter {
        InterfaceFilter::new(rules, BTreeSet::new())
    }

    #[test]
    fn test_no_usable_interfaces_is_offline() {
        let mut lo = up("lo", ConnectionType::Unknown);
        lo.is_loopback = true;
        let mut down = up("eth0", ConnectionType::Ethernet);
        down.is_up = false;
        let bare = InterfaceSnapshot::new("eth1", 3, ConnectionType::Ethernet);

        let f = filter(PlatformRules::Linux);
        assert_eq!(connection_type_from_interfaces(&[lo, down, bare], &f), ConnectionType::None);
        assert_eq!(connection_type_from_interfaces(&[], &f), ConnectionType::None);
    }

    #[test]
    fn test_agreeing_and_disagreeing_interfaces() {
        let f = filter(PlatformRules::Linux);
        let same = [up("eth0", ConnectionType::Ethernet), up("eth1", ConnectionType::Ethernet)];
        assert_eq!(connection_type_from_interfaces(&same, &f), ConnectionType::Ethernet);

        let mixed = [up("eth0", ConnectionType::Ethernet), up("wlan0", ConnectionType::Wifi)];
        assert_eq!(connection_type_from_interfaces(&mixed, &f), ConnectionType::Unknown);
    }

    #[test]
    fn test_vmnet_is_always_ignored() {
        let ifaces = [up("wlan0", ConnectionType::Wifi), up("VMnet8", ConnectionType::Ethernet)];
        for rules in [PlatformRules::Linux, PlatformRules::Windows, PlatformRules::MacOs, PlatformRules::Other] {
            assert_eq!(connection_type_from_interfaces(&ifaces, &filter(rules)), ConnectionType::Wifi);
        }
    }

    #[test]
    fn test_platform_specific_ignores() {
        let mut teredo = up("Teredo Tunneling Pseudo-Interface", ConnectionType::Unknown);
        teredo.description = "Teredo Tunneling Pseudo-Interface".into();
        let windows = [up("Ethernet", ConnectionType::Ethernet), teredo.clone()];
        assert_eq!(
            connection_type_from_interfaces(&windows, &filter(PlatformRules::Windows)),
            ConnectionType::Ethernet
        );
        assert_eq!(
            connection_type_from_interfaces(&windows, &filter(PlatformRules::Linux)),
            ConnectionType::Unknown
        );

        let mac = [
            up("en0", ConnectionType::Wifi),
            up("utun3", ConnectionType::Unknown),
            up("awdl0", ConnectionType::Unknown),
        ];
        assert_eq!(connection_type_from_interfaces(&mac, &filter(PlatformRules::MacOs)), ConnectionType::Wifi);
    }

    #[test]
    fn test_linux_tunnel_does_not_mask_ethernet() {
        let mut tun = up("tun0", ConnectionType::Unknown);
        tun.is_tunnel = true;
        let mut wg = up("wg0", ConnectionType::Unknown);
        wg.is_tunnel = true;
        let ifaces = [up("eth0", ConnectionType::Ethernet), tun, wg];

        let f = filter(PlatformRules::Linux);
        assert!(!f.is_usable(&ifaces[1]));
        assert_eq!(connection_type_from_interfaces(&ifaces, &f), ConnectionType::Ethernet);

        // A tunnel alone is not a connection.
        assert_eq!(connection_type_from_interfaces(&ifaces[1..], &f), ConnectionType::None);
    }

    #[test]
    fn test_configured_ignore_list() {
        let f = InterfaceFilter::new(PlatformRules::Linux, BTreeSet::from(["docker0".to_string()]));
        let ifaces = [up("eth0", ConnectionType::Ethernet), up("docker0", ConnectionType::Ethernet)];
        assert!(f.is_ignored(&ifaces[1]));
        assert_eq!(connection_subtype_from_interfaces(&ifaces, &f), ConnectionSubtype::Unknown);

        let mut eth = ifaces[0].clone();
        eth.subtype = ConnectionSubtype::GigabitEthernet;
        assert_eq!(
            connection_subtype_from_interfaces(&[eth, ifaces[1].clone()], &f),
            ConnectionSubtype::GigabitEthernet
        );
    }

    #[test]
    fn test_offline_subtype_is_none() {
        assert_eq!(
            connection_subtype_from_interfaces(&[], &InterfaceFilter::default()),
            ConnectionSubtype::None
        );
    }
}
