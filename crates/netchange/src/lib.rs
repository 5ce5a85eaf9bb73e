//! Network change notifications.
//!
//! This crate watches the operating system for network changes and tells
//! interested code about them:
//!
//! - **IP address changes**: any local address added, removed or changed
//! - **Connection type changes**: WiFi, Ethernet, cellular, none, ...
//! - **Network changes**: a debounced, two-phase signal (`None` then the new
//!   type) suited to tearing down and rebuilding per-network state
//! - **Max bandwidth changes**: theoretical downlink ceiling of the link
//! - **DNS changes**: the system resolver configuration was re-read
//! - **Per-network lifecycle**: connect, disconnect, made default (where the
//!   platform supports network handles)
//!
//! Every observer is registered together with the runner it wants to be
//! called on, so publishing never blocks on slow observers.
//!
//! # Getting Started
//!
//! ```ignore
//! use std::sync::Arc;
//! use netchange::prelude::*;
//!
//! struct LogChanges;
//!
//! impl NetworkChangeObserver for LogChanges {
//!     fn on_network_changed(&self, connection_type: ConnectionType) {
//!         println!("network changed: {connection_type}");
//!     }
//! }
//!
//! let notifier = NetworkChangeNotifier::create(NotifierConfig::default())?;
//! let runner = Arc::new(SequencedTaskRunner::new("observers")?);
//! netchange::global::add_network_change_observer(Arc::new(LogChanges), runner);
//!
//! println!("currently {}", netchange::global::connection_type());
//! ```
//!
//! # Testing
//!
//! [`MockNetworkChangeNotifier`] installs a notifier whose state the test
//! controls; with a `ManualTaskRunner` every delivery and debounce timer is
//! stepped explicitly.

pub mod calculator;
pub mod config;
pub mod dns;
pub mod dns_config;
pub mod error;
pub mod global;
pub mod histogram;
mod hub;
pub mod logging;
pub mod mock;
pub mod notifier;
pub mod observer;
pub mod platform;
pub mod types;

pub use calculator::{NetworkChangeCalculator, NetworkChangeCalculatorParams};
pub use config::NotifierConfig;
pub use dns::{DnsConfigReader, DnsConfigService, ResolvConfReader};
pub use dns_config::{DnsConfig, DnsHosts};
pub use error::{NotifierError, NotifierResult};
pub use global::DisableForTest;
pub use histogram::{DataReceived, HistogramWatcher};
pub use mock::{MockNetworkChangeNotifier, MockSignalSource};
pub use notifier::{NetworkChangeNotifier, NotifierHandle};
pub use observer::{
    ConnectionTypeObserver, DnsObserver, IpAddressObserver, MaxBandwidthObserver,
    NetworkChangeObserver, NetworkObserver,
};
pub use platform::{BridgeSignalSource, PlatformSignalSource, SignalSink, create_platform_source};
pub use types::{
    ConnectionSubtype, ConnectionType, NetworkChangeType, NetworkHandle, NetworkList,
    connection_type_to_string, is_connection_cellular,
};

/// Commonly used items.
pub mod prelude {
    pub use crate::config::NotifierConfig;
    pub use crate::notifier::{NetworkChangeNotifier, NotifierHandle};
    pub use crate::observer::{
        ConnectionTypeObserver, DnsObserver, IpAddressObserver, MaxBandwidthObserver,
        NetworkChangeObserver, NetworkObserver,
    };
    pub use crate::types::{ConnectionSubtype, ConnectionType, NetworkHandle};
    pub use netchange_core::prelude::*;
}

static_assertions::assert_impl_all!(NetworkChangeNotifier: Send, Sync);
static_assertions::assert_impl_all!(NotifierHandle: Send, Sync);
static_assertions::assert_impl_all!(HistogramWatcher: Send, Sync);
static_assertions::assert_impl_all!(DnsConfigService: Send, Sync);
static_assertions::assert_impl_all!(BridgeSignalSource: Send, Sync);
