//! Debounce state machine that turns raw signals into network changes.
//!
//! Platform sources report IP-address and connection-type changes almost
//! simultaneously and in either order. The calculator waits for a quiet
//! period before announcing one coherent "network changed" event. Coming
//! online is announced in two phases, `None` first and then the new type, so
//! consumers can drop per-network state before building new state.
//!
//! ```text
//!  ip changed ─────┐
//!                  ├──▶ restart timer(delay) ──▶ notify() ──▶ publish(None)?, publish(type)
//!  type changed ───┘        (last writer wins)
//! ```

use std::sync::{Arc, Weak};
use std::time::Duration;

use netchange_core::{OneShotTimer, SequenceChecker, SharedTaskRunner};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::duration_ms;
use crate::logging::targets;
use crate::observer::{ConnectionTypeObserver, IpAddressObserver};
use crate::types::ConnectionType;

/// Per-platform debounce delays.
///
/// The offline delays apply while the last announced type is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkChangeCalculatorParams {
    /// Delay after an IP-address change while offline.
    #[serde(with = "duration_ms", rename = "ip_address_offline_delay_ms")]
    pub ip_address_offline_delay: Duration,
    /// Delay after an IP-address change while online.
    #[serde(with = "duration_ms", rename = "ip_address_online_delay_ms")]
    pub ip_address_online_delay: Duration,
    /// Delay after a connection-type change while offline.
    #[serde(with = "duration_ms", rename = "connection_type_offline_delay_ms")]
    pub connection_type_offline_delay: Duration,
    /// Delay after a connection-type change while online.
    #[serde(with = "duration_ms", rename = "connection_type_online_delay_ms")]
    pub connection_type_online_delay: Duration,
}

impl NetworkChangeCalculatorParams {
    /// All four delays set to zero.
    pub const fn zero() -> Self {
        Self {
            ip_address_offline_delay: Duration::ZERO,
            ip_address_online_delay: Duration::ZERO,
            connection_type_offline_delay: Duration::ZERO,
            connection_type_online_delay: Duration::ZERO,
        }
    }

    /// Delays tuned for netlink signalling.
    pub const fn linux() -> Self {
        Self {
            ip_address_offline_delay: Duration::from_millis(2000),
            ip_address_online_delay: Duration::from_millis(2000),
            connection_type_offline_delay: Duration::from_millis(1500),
            connection_type_online_delay: Duration::from_millis(500),
        }
    }

    /// Delays tuned for IP Helper signalling.
    pub const fn windows() -> Self {
        Self {
            ip_address_offline_delay: Duration::from_millis(1500),
            ip_address_online_delay: Duration::from_millis(1500),
            connection_type_offline_delay: Duration::from_millis(1500),
            connection_type_online_delay: Duration::from_millis(500),
        }
    }

    /// Delays tuned for SCDynamicStore signalling.
    pub const fn macos() -> Self {
        Self {
            ip_address_offline_delay: Duration::from_millis(500),
            ip_address_online_delay: Duration::from_millis(500),
            connection_type_offline_delay: Duration::from_millis(1000),
            connection_type_online_delay: Duration::from_millis(500),
        }
    }

    /// Delays for the platform this was compiled for.
    pub const fn for_platform() -> Self {
        if cfg!(target_os = "linux") {
            Self::linux()
        } else if cfg!(windows) {
            Self::windows()
        } else if cfg!(target_os = "macos") {
            Self::macos()
        } else {
            Self::zero()
        }
    }
}

impl Default for NetworkChangeCalculatorParams {
    fn default() -> Self {
        Self::for_platform()
    }
}

/// Callback receiving each announced network change.
pub type PublishNetworkChange = Box<dyn Fn(ConnectionType) + Send + Sync>;

#[derive(Debug)]
struct CalculatorState {
    have_announced: bool,
    last_announced_connection_type: ConnectionType,
    pending_connection_type: ConnectionType,
}

/// Coalesces IP-address and connection-type signals into network changes.
///
/// All inputs and the timer run on the runner given at construction.
pub struct NetworkChangeCalculator {
    params: NetworkChangeCalculatorParams,
    state: Mutex<CalculatorState>,
    timer: OneShotTimer,
    publish: PublishNetworkChange,
    checker: SequenceChecker,
    weak_self: Weak<NetworkChangeCalculator>,
}

impl NetworkChangeCalculator {
    /// Create a calculator that fires on `runner` and reports through
    /// `publish`.
    pub fn new(
        params: NetworkChangeCalculatorParams,
        runner: SharedTaskRunner,
        publish: PublishNetworkChange,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            params,
            state: Mutex::new(CalculatorState {
                have_announced: false,
                last_announced_connection_type: ConnectionType::None,
                pending_connection_type: ConnectionType::None,
            }),
            timer: OneShotTimer::new(runner.clone()),
            publish,
            checker: SequenceChecker::for_runner(runner),
            weak_self: weak_self.clone(),
        })
    }

    /// Debounce delays in use.
    pub fn params(&self) -> &NetworkChangeCalculatorParams {
        &self.params
    }

    /// Whether an announcement is scheduled.
    pub fn is_pending(&self) -> bool {
        self.timer.is_running()
    }

    /// Cancel any scheduled announcement.
    pub fn shutdown(&self) {
        self.timer.stop();
    }

    fn is_offline(&self) -> bool {
        self.state.lock().last_announced_connection_type == ConnectionType::None
    }

    fn schedule(&self, delay: Duration) {
        let weak = self.weak_self.clone();
        self.timer.start(delay, move || {
            if let Some(calculator) = weak.upgrade() {
                calculator.notify();
            }
        });
    }

    fn notify(&self) {
        self.checker.debug_assert_valid();
        let announce = {
            let mut state = self.state.lock();
            if state.have_announced
                && state.last_announced_connection_type == ConnectionType::None
                && state.pending_connection_type == ConnectionType::None
            {
                tracing::debug!(target: targets::CALCULATOR, "still offline; suppressed");
                return;
            }
            state.have_announced = true;
            state.last_announced_connection_type = state.pending_connection_type;
            state.pending_connection_type
        };

        tracing::debug!(target: targets::CALCULATOR, connection_type = %announce, "announcing network change");
        if announce != ConnectionType::None {
            (self.publish)(ConnectionType::None);
        }
        (self.publish)(announce);
    }
}

impl IpAddressObserver for NetworkChangeCalculator {
    fn on_ip_address_changed(&self) {
        self.checker.debug_assert_valid();
        let delay = if self.is_offline() {
            self.params.ip_address_offline_delay
        } else {
            self.params.ip_address_online_delay
        };
        tracing::trace!(target: targets::CALCULATOR, delay_ms = delay.as_millis() as u64, "ip address changed");
        self.schedule(delay);
    }
}

impl ConnectionTypeObserver for NetworkChangeCalculator {
    fn on_connection_type_changed(&self, connection_type: ConnectionType) {
        self.checker.debug_assert_valid();
        let delay = {
            let mut state = self.state.lock();
            state.pending_connection_type = connection_type;
            if state.last_announced_connection_type == ConnectionType::None {
                self.params.connection_type_offline_delay
            } else {
                self.params.connection_type_online_delay
            }
        };
        tracing::trace!(
            target: targets::CALCULATOR,
            %connection_type,
            delay_ms = delay.as_millis() as u64,
            "connection type changed"
        );
        self.schedule(delay);
    }
}

impl std::fmt::Debug for NetworkChangeCalculator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkChangeCalculator")
            .field("params", &self.params)
            .field("state", &*self.state.lock())
            .field("pending", &self.timer.is_running())
            .finish()
    }
}
