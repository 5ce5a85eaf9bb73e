//! macOS signal source (SCDynamicStore through `netwatcher`).
//!
//! The first snapshot is taken off the calling thread; queries block on the
//! watcher's ready gate until it lands.

use std::sync::Arc;

use super::interfaces::{InterfaceFilter, PlatformRules};
use super::watcher::{InitialReadPolicy, InterfaceWatcher};
use super::{PlatformSignalSource, SignalSink};
use crate::config::NotifierConfig;
use crate::error::NotifierResult;
use crate::types::{ConnectionSubtype, ConnectionType};

#[derive(Debug)]
pub struct MacSignalSource {
    watcher: InterfaceWatcher,
}

impl MacSignalSource {
    pub fn new(config: &NotifierConfig) -> NotifierResult<Self> {
        let filter = InterfaceFilter::new(PlatformRules::MacOs, config.ignored_interfaces.clone());
        Ok(Self {
            watcher: InterfaceWatcher::new(
                "macos",
                filter,
                config.registration_retry_interval,
                InitialReadPolicy::Deferred,
            ),
        })
    }

    /// Resolve once the initial reachability snapshot is known.
    pub async fn wait_ready(&self) {
        self.watcher.wait_ready().await;
    }
}

impl PlatformSignalSource for MacSignalSource {
    fn name(&self) -> &'static str {
        "macos"
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
