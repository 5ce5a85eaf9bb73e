//! Data model shared by the notifier, its observers and platform sources.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse category of the primary network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionType {
    /// The type could not be determined.
    #[default]
    Unknown,
    /// Wired Ethernet.
    Ethernet,
    /// 802.11 wireless.
    Wifi,
    /// Second-generation cellular.
    Cellular2G,
    /// Third-generation cellular.
    Cellular3G,
    /// Fourth-generation cellular.
    Cellular4G,
    /// No connectivity.
    None,
    /// Bluetooth tethering.
    Bluetooth,
}

impl ConnectionType {
    /// Every variant, in declaration order.
    pub const ALL: [ConnectionType; 8] = [
        ConnectionType::Unknown,
        ConnectionType::Ethernet,
        ConnectionType::Wifi,
        ConnectionType::Cellular2G,
        ConnectionType::Cellular3G,
        ConnectionType::Cellular4G,
        ConnectionType::None,
        ConnectionType::Bluetooth,
    ];

    /// Stable name used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionType::Unknown => "CONNECTION_UNKNOWN",
            ConnectionType::Ethernet => "CONNECTION_ETHERNET",
            ConnectionType::Wifi => "CONNECTION_WIFI",
            ConnectionType::Cellular2G => "CONNECTION_2G",
            ConnectionType::Cellular3G => "CONNECTION_3G",
            ConnectionType::Cellular4G => "CONNECTION_4G",
            ConnectionType::None => "CONNECTION_NONE",
            ConnectionType::Bluetooth => "CONNECTION_BLUETOOTH",
        }
    }

    /// Whether this is one of the cellular generations.
    pub fn is_cellular(self) -> bool {
        matches!(
            self,
            ConnectionType::Cellular2G | ConnectionType::Cellular3G | ConnectionType::Cellular4G
        )
    }

    /// Whether this type means "offline".
    pub fn is_none(self) -> bool {
        self == ConnectionType::None
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finer-grained link technology, used only to bound bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionSubtype {
    #[default]
    Unknown,
    None,
    Other,
    Gsm,
    Iden,
    Cdma,
    OneXRtt,
    Gprs,
    Edge,
    Umts,
    EvdoRev0,
    EvdoRevA,
    Hspa,
    EvdoRevB,
    Hsdpa,
    Hsupa,
    Ehrpd,
    HspaPlus,
    Lte,
    LteAdvanced,
    Bluetooth1_2,
    Bluetooth2_1,
    Bluetooth3_0,
    Bluetooth4_0,
    Ethernet,
    FastEthernet,
    GigabitEthernet,
    TenGigabitEthernet,
    WifiB,
    WifiG,
    WifiN,
    WifiAc,
    WifiAd,
}

impl ConnectionSubtype {
    /// Every variant, in declaration order.
    pub const ALL: [ConnectionSubtype; 33] = [
        ConnectionSubtype::Unknown,
        ConnectionSubtype::None,
        ConnectionSubtype::Other,
        ConnectionSubtype::Gsm,
        ConnectionSubtype::Iden,
        ConnectionSubtype::Cdma,
        ConnectionSubtype::OneXRtt,
        ConnectionSubtype::Gprs,
        ConnectionSubtype::Edge,
        ConnectionSubtype::Umts,
        ConnectionSubtype::EvdoRev0,
        ConnectionSubtype::EvdoRevA,
        ConnectionSubtype::Hspa,
        ConnectionSubtype::EvdoRevB,
        ConnectionSubtype::Hsdpa,
        ConnectionSubtype::Hsupa,
        ConnectionSubtype::Ehrpd,
        ConnectionSubtype::HspaPlus,
        ConnectionSubtype::Lte,
        ConnectionSubtype::LteAdvanced,
        ConnectionSubtype::Bluetooth1_2,
        ConnectionSubtype::Bluetooth2_1,
        ConnectionSubtype::Bluetooth3_0,
        ConnectionSubtype::Bluetooth4_0,
        ConnectionSubtype::Ethernet,
        ConnectionSubtype::FastEthernet,
        ConnectionSubtype::GigabitEthernet,
        ConnectionSubtype::TenGigabitEthernet,
        ConnectionSubtype::WifiB,
        ConnectionSubtype::WifiG,
        ConnectionSubtype::WifiN,
        ConnectionSubtype::WifiAc,
        ConnectionSubtype::WifiAd,
    ];

    /// Theoretical maximum downlink bandwidth in Mbps.
    ///
    /// `Unknown` and `Other` are unbounded; `None` is zero.
    pub fn max_bandwidth_mbps(self) -> f64 {
        match self {
            ConnectionSubtype::Unknown | ConnectionSubtype::Other => f64::INFINITY,
            ConnectionSubtype::None => 0.0,

            ConnectionSubtype::Gsm => 0.01,
            ConnectionSubtype::Iden => 0.064,
            ConnectionSubtype::Cdma => 0.115,
            ConnectionSubtype::OneXRtt => 0.153,
            ConnectionSubtype::Gprs => 0.237,
            ConnectionSubtype::Edge => 0.384,
            ConnectionSubtype::Umts => 2.0,
            ConnectionSubtype::EvdoRev0 => 2.46,
            ConnectionSubtype::EvdoRevA => 3.1,
            ConnectionSubtype::Hspa => 3.6,
            ConnectionSubtype::EvdoRevB => 14.7,
            ConnectionSubtype::Hsdpa => 14.3,
            ConnectionSubtype::Hsupa => 14.4,
            ConnectionSubtype::Ehrpd => 21.0,
            ConnectionSubtype::HspaPlus => 42.0,
            ConnectionSubtype::Lte => 100.0,
            ConnectionSubtype::LteAdvanced => 100.0,

            ConnectionSubtype::Bluetooth1_2 => 1.0,
            ConnectionSubtype::Bluetooth2_1 => 3.0,
            ConnectionSubtype::Bluetooth3_0 => 24.0,
            ConnectionSubtype::Bluetooth4_0 => 1.0,

            ConnectionSubtype::Ethernet => 10.0,
            ConnectionSubtype::FastEthernet => 100.0,
            ConnectionSubtype::GigabitEthernet => 1000.0,
            ConnectionSubtype::TenGigabitEthernet => 10000.0,

            ConnectionSubtype::WifiB => 11.0,
            ConnectionSubtype::WifiG => 54.0,
            ConnectionSubtype::WifiN => 600.0,
            ConnectionSubtype::WifiAc => 1300.0,
            ConnectionSubtype::WifiAd => 7000.0,
        }
    }

    /// Ethernet subtype for a negotiated link speed in Mbps, if it is one of
    /// the standard rates.
    pub fn from_ethernet_speed_mbps(speed: u64) -> Option<Self> {
        match speed {
            10 => Some(ConnectionSubtype::Ethernet),
            100 => Some(ConnectionSubtype::FastEthernet),
            1000 => Some(ConnectionSubtype::GigabitEthernet),
            10000 => Some(ConnectionSubtype::TenGigabitEthernet),
            _ => None,
        }
    }
}

/// Opaque identifier of one network on multi-network platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetworkHandle(pub i64);

impl NetworkHandle {
    /// The reserved "no network" value.
    pub const INVALID: NetworkHandle = NetworkHandle(-1);

    /// Whether this is a real network.
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl Default for NetworkHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for NetworkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle transition of a specific network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkChangeType {
    Connected,
    SoonToDisconnect,
    Disconnected,
    MadeDefault,
}

/// Handles of all currently connected networks.
pub type NetworkList = Vec<NetworkHandle>;

/// Name of a connection type as used in logs and metrics.
pub fn connection_type_to_string(connection_type: ConnectionType) -> &'static str {
    connection_type.as_str()
}

/// Whether `connection_type` is a cellular generation.
pub fn is_connection_cellular(connection_type: ConnectionType) -> bool {
    connection_type.is_cellular()
}
