//! Notifier configuration.
//!
//! Everything has a per-platform default, so an empty TOML document is a
//! valid configuration:
//!
//! ```toml
//! ignored_interfaces = ["docker0", "virbr0"]
//! registration_retry_interval_ms = 500
//! test_notifications_only = false
//!
//! [calculator]
//! ip_address_offline_delay_ms = 2000
//! ip_address_online_delay_ms = 2000
//! connection_type_offline_delay_ms = 1500
//! connection_type_online_delay_ms = 500
//! ```

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::calculator::NetworkChangeCalculatorParams;
use crate::error::{NotifierError, NotifierResult};
use crate::logging::targets;

/// Default interval between attempts to register for OS notifications.
pub const DEFAULT_REGISTRATION_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Settings for a [`NetworkChangeNotifier`](crate::NetworkChangeNotifier) and
/// its platform source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Interface names never considered when deriving the connection type.
    pub ignored_interfaces: BTreeSet<String>,
    /// How long to wait before retrying a failed OS registration.
    #[serde(with = "duration_ms", rename = "registration_retry_interval_ms")]
    pub registration_retry_interval: Duration,
    /// Start with only the `*_for_tests` publish paths enabled.
    pub test_notifications_only: bool,
    /// Debounce delays for the network-change calculator.
    pub calculator: NetworkChangeCalculatorParams,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            ignored_interfaces: BTreeSet::new(),
            registration_retry_interval: DEFAULT_REGISTRATION_RETRY_INTERVAL,
            test_notifications_only: false,
            calculator: NetworkChangeCalculatorParams::for_platform(),
        }
    }
}

impl NotifierConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> NotifierResult<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> NotifierResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| NotifierError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(target: targets::CONFIG, path = %path.display(), ?config, "loaded notifier config");
        Ok(config)
    }

    /// Render as a TOML document.
    pub fn to_toml_string(&self) -> NotifierResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Use `params` for the calculator.
    pub fn with_calculator(mut self, params: NetworkChangeCalculatorParams) -> Self {
        self.calculator = params;
        self
    }

    /// Ignore the interface called `name`.
    pub fn ignore_interface(mut self, name: impl Into<String>) -> Self {
        self.ignored_interfaces.insert(name.into());
        self
    }

    /// Set the registration retry interval.
    pub fn with_registration_retry_interval(mut self, interval: Duration) -> Self {
        self.registration_retry_interval = interval;
        self
    }

    /// Start with real broadcasts gated off.
    pub fn with_test_notifications_only(mut self, enabled: bool) -> Self {
        self.test_notifications_only = enabled;
        self
    }
}

/// Serde adapter storing a [`Duration`] as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
