//! DNS configuration collaborator.
//!
//! [`DnsConfigService`] reads the system resolver configuration and hosts
//! entries through a [`DnsConfigReader`], one read of each kind at a time,
//! and hands every distinct merged result to a single callback. The notifier
//! uses [`NetworkChangeNotifier::set_dns_config`] as that callback.
//!
//! [`NetworkChangeNotifier::set_dns_config`]: crate::NetworkChangeNotifier::set_dns_config

use std::sync::{Arc, Weak};

use netchange_core::{SequenceChecker, SerialWorker, SharedTaskRunner, TaskRunnerExt};
use parking_lot::Mutex;

use crate::dns_config::{DnsConfig, DnsHosts};
use crate::error::NotifierResult;
use crate::logging::targets;

mod resolv;

pub use resolv::ResolvConfReader;

/// Blocking reader for the system DNS configuration.
pub trait DnsConfigReader: Send + Sync {
    /// Read resolver settings. `hosts` in the result is ignored.
    fn read_config(&self) -> NotifierResult<DnsConfig>;

    /// Read hosts-file entries.
    fn read_hosts(&self) -> NotifierResult<DnsHosts>;
}

/// Receives each newly read configuration.
pub type DnsConfigCallback = Arc<dyn Fn(DnsConfig) + Send + Sync>;

#[derive(Debug)]
struct ServiceState {
    config: DnsConfig,
    have_config: bool,
    have_hosts: bool,
    need_update: bool,
    withdrawn: bool,
}

struct ServiceInner {
    config_worker: SerialWorker<NotifierResult<DnsConfig>>,
    hosts_worker: SerialWorker<NotifierResult<DnsHosts>>,
    state: Mutex<ServiceState>,
    origin: SharedTaskRunner,
    callback: DnsConfigCallback,
    checker: SequenceChecker,
}

/// Drives a [`DnsConfigReader`] and reports merged configurations.
///
/// Reads run on `background`; merging and the callback run on `origin`. The
/// public methods may be called from any thread.
pub struct DnsConfigService {
    inner: Arc<ServiceInner>,
}

impl DnsConfigService {
    pub fn new(
        reader: Arc<dyn DnsConfigReader>,
        origin: SharedTaskRunner,
        background: SharedTaskRunner,
        callback: DnsConfigCallback,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<ServiceInner>| {
            let config_reader = reader.clone();
            let config_done = weak.clone();
            let hosts_done = weak.clone();
            ServiceInner {
                config_worker: SerialWorker::new(
                    "dns-config",
                    origin.clone(),
                    background.clone(),
                    move || config_reader.read_config(),
                    move |result| {
                        if let Some(inner) = config_done.upgrade() {
                            inner.on_config_read(result);
                        }
                    },
                ),
                hosts_worker: SerialWorker::new(
                    "dns-hosts",
                    origin.clone(),
                    background,
                    move || reader.read_hosts(),
                    move |result| {
                        if let Some(inner) = hosts_done.upgrade() {
                            inner.on_hosts_read(result);
                        }
                    },
                ),
                state: Mutex::new(ServiceState {
                    config: DnsConfig::default(),
                    have_config: false,
                    have_hosts: false,
                    need_update: true,
                    withdrawn: false,
                }),
                checker: SequenceChecker::for_runner(origin.clone()),
                origin,
                callback,
            }
        });
        Self { inner }
    }

    /// Re-read both the resolver settings and the hosts entries.
    pub fn refresh_config(&self) {
        self.post(|inner| {
            inner.config_worker.work_now();
            inner.hosts_worker.work_now();
        });
    }

    /// The resolver settings may have changed.
    pub fn on_config_changed(&self) {
        self.post(|inner| inner.config_worker.work_now());
    }

    /// The hosts entries may have changed.
    pub fn on_hosts_changed(&self) {
        self.post(|inner| inner.hosts_worker.work_now());
    }

    /// Stop reading and reporting.
    pub fn cancel(&self) {
        self.post(|inner| {
            inner.config_worker.cancel();
            inner.hosts_worker.cancel();
        });
    }

    fn post(&self, f: impl FnOnce(&ServiceInner) + Send + 'static) {
        let inner = self.inner.clone();
        if !self.inner.origin.post_task(move || f(&inner)) {
            tracing::debug!(target: targets::DNS, "origin runner gone; dns request dropped");
        }
    }
}

impl ServiceInner {
    fn on_config_read(&self, result: NotifierResult<DnsConfig>) {
        self.checker.debug_assert_valid();
        match result {
            Ok(config) => {
                let mut state = self.state.lock();
                if !config.equals_ignoring_hosts(&state.config) {
                    let hosts = std::mem::take(&mut state.config.hosts);
                    state.config = DnsConfig { hosts, ..config.copy_ignoring_hosts() };
                    state.need_update = true;
                }
                state.have_config = true;
                drop(state);
                self.complete();
            }
            Err(err) => {
                tracing::warn!(target: targets::DNS, %err, "dns config read failed; withdrawing configuration");
                let mut state = self.state.lock();
                let hosts = std::mem::take(&mut state.config.hosts);
                state.config = DnsConfig { hosts, ..DnsConfig::default() };
                state.have_config = false;
                drop(state);
                self.withdraw();
            }
        }
    }

    fn on_hosts_read(&self, result: NotifierResult<DnsHosts>) {
        self.checker.debug_assert_valid();
        match result {
            Ok(hosts) => {
                let mut state = self.state.lock();
                if hosts != state.config.hosts {
                    state.config.hosts = hosts;
                    state.need_update = true;
                }
                state.have_hosts = true;
                drop(state);
                self.complete();
            }
            Err(err) => {
                tracing::warn!(target: targets::DNS, %err, "hosts read failed; withdrawing configuration");
                let mut state = self.state.lock();
                state.config.hosts.clear();
                state.have_hosts = false;
                drop(state);
                self.withdraw();
            }
        }
    }

    fn complete(&self) {
        let config = {
            let mut state = self.state.lock();
            if !(state.have_config && state.have_hosts && state.need_update) {
                return;
            }
            state.need_update = false;
            state.withdrawn = false;
            state.config.clone()
        };
        tracing::debug!(target: targets::DNS, config = %config.to_json(), "dns configuration read");
        (self.callback)(config);
    }

    fn withdraw(&self) {
        {
            let mut state = self.state.lock();
            state.need_update = true;
            if state.withdrawn {
                return;
            }
            state.withdrawn = true;
        }
        (self.callback)(DnsConfig::default());
    }
}

impl std::fmt::Debug for DnsConfigService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsConfigService")
            .field("config_worker", &self.inner.config_worker)
            .field("hosts_worker", &self.inner.hosts_worker)
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}
