//! Platform signal sources.
//!
//! A [`PlatformSignalSource`] turns OS notifications into calls on a
//! [`SignalSink`] and answers the notifier's current-state queries. The
//! desktop sources share one [`InterfaceWatcher`]; hosts that push network
//! events themselves (mobile bridges) use [`BridgeSignalSource`].

use std::sync::Arc;

use crate::config::NotifierConfig;
use crate::error::NotifierResult;
use crate::types::{
    ConnectionSubtype, ConnectionType, NetworkChangeType, NetworkHandle, NetworkList,
};

mod bridge;
pub mod interfaces;
mod watcher;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(windows)]
mod windows;

pub use bridge::BridgeSignalSource;
pub use interfaces::{
    InterfaceFilter, InterfaceSnapshot, PlatformRules, connection_subtype_from_interfaces,
    connection_type_from_interfaces, list_interfaces,
};
pub use watcher::{InitialReadPolicy, InterfaceWatcher, ReadyGate, SnapshotFn};

#[cfg(target_os = "linux")]
pub use linux::LinuxSignalSource;
#[cfg(target_os = "macos")]
pub use macos::MacSignalSource;
#[cfg(windows)]
pub use windows::WindowsSignalSource;

/// Receives raw events from a platform source.
///
/// Implementations must not block; sources call these from their own
/// background threads.
pub trait SignalSink: Send + Sync {
    /// Some local address was added, removed or changed.
    fn on_ip_address_changed(&self);

    /// The derived primary connection type changed.
    fn on_connection_type_changed(&self, connection_type: ConnectionType);

    /// The link technology changed; publishes the new bandwidth ceiling.
    fn on_connection_subtype_changed(&self, connection_type: ConnectionType, subtype: ConnectionSubtype);

    /// The OS reported a DNS configuration change.
    fn on_dns_changed(&self);

    /// A specific network changed state.
    fn on_connection_changed(&self, network: NetworkHandle, change: NetworkChangeType);
}

/// One OS binding.
///
/// Construction must not start listening. [`start`](Self::start) performs
/// OS registration and returns once the initial state is known or known to
/// be pending behind the source's ready gate.
pub trait PlatformSignalSource: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Register with the OS and begin reporting to `sink`.
    ///
    /// Transient registration failures are retried internally and do not
    /// produce an error.
    fn start(&self, sink: Arc<dyn SignalSink>) -> NotifierResult<()>;

    /// Stop reporting. Idempotent.
    fn stop(&self);

    /// Current primary connection type.
    fn current_connection_type(&self) -> ConnectionType;

    /// Current link technology.
    fn current_connection_subtype(&self) -> ConnectionSubtype {
        ConnectionSubtype::Unknown
    }

    /// Current bandwidth ceiling and the type it applies to.
    fn current_max_bandwidth_and_connection_type(&self) -> (f64, ConnectionType) {
        let connection_type = self.current_connection_type();
        let subtype = if connection_type == ConnectionType::None {
            ConnectionSubtype::None
        } else {
            ConnectionSubtype::Unknown
        };
        (subtype.max_bandwidth_mbps(), connection_type)
    }

    /// Whether per-network handles are available.
    fn are_network_handles_supported(&self) -> bool {
        false
    }

    /// Handles of connected networks.
    fn connected_networks(&self) -> NetworkList {
        NetworkList::new()
    }

    /// Connection type of one network.
    fn network_connection_type(&self, _network: NetworkHandle) -> ConnectionType {
        ConnectionType::Unknown
    }

    /// Handle of the default network.
    fn default_network(&self) -> NetworkHandle {
        NetworkHandle::INVALID
    }

    /// The value this binding uses for "no network".
    ///
    /// Must equal [`NetworkHandle::INVALID`]; the notifier refuses to start
    /// otherwise.
    fn invalid_network_handle(&self) -> NetworkHandle {
        NetworkHandle::INVALID
    }
}

/// Create the source for the platform this was compiled for.
#[cfg(target_os = "linux")]
pub fn create_platform_source(config: &NotifierConfig) -> NotifierResult<Arc<dyn PlatformSignalSource>> {
    Ok(Arc::new(LinuxSignalSource::new(config)?))
}

/// Create the source for the platform this was compiled for.
#[cfg(target_os = "macos")]
pub fn create_platform_source(config: &NotifierConfig) -> NotifierResult<Arc<dyn PlatformSignalSource>> {
    Ok(Arc::new(MacSignalSource::new(config)?))
}

/// Create the source for the platform this was compiled for.
#[cfg(windows)]
pub fn create_platform_source(config: &NotifierConfig) -> NotifierResult<Arc<dyn PlatformSignalSource>> {
    Ok(Arc::new(WindowsSignalSource::new(config)?))
}

/// Create the source for the platform this was compiled for.
///
/// Other platforms must supply their own source, usually a
/// [`BridgeSignalSource`].
#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
pub fn create_platform_source(_config: &NotifierConfig) -> NotifierResult<Arc<dyn PlatformSignalSource>> {
    Err(crate::error::NotifierError::UnsupportedPlatform(std::env::consts::OS))
}
