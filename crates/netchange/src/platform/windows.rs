//! Windows signal source (IP Helper through `netwatcher`).
//!
//! `NotifyAddrChange`-style registration can fail transiently; the watcher
//! retries on the configured interval until it succeeds.

use std::sync::Arc;

use super::interfaces::{InterfaceFilter, PlatformRules};
use super::watcher::{InitialReadPolicy, InterfaceWatcher};
use super::{PlatformSignalSource, SignalSink};
use crate::config::NotifierConfig;
use crate::error::NotifierResult;
use crate::types::{ConnectionSubtype, ConnectionType};

#[derive(Debug)]
pub struct WindowsSignalSource {
    watcher: InterfaceWatcher,
}

impl WindowsSignalSource {
    pub fn new(config: &NotifierConfig) -> NotifierResult<Self> {
        let filter = InterfaceFilter::new(PlatformRules::Windows, config.ignored_interfaces.clone());
        Ok(Self {
            watcher: InterfaceWatcher::new(
                "windows",
                filter,
                config.registration_retry_interval,
                InitialReadPolicy::Synchronous,
            ),
        })
    }
}

impl PlatformSignalSource for WindowsSignalSource {
    fn name(&self) -> &'static str {
        "windows"
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
