//! DNS configuration value type.

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Hosts-file entries: lowercase hostname to its addresses.
pub type DnsHosts = BTreeMap<String, BTreeSet<IpAddr>>;

/// Resolver configuration as read from the system.
///
/// A config without nameservers is invalid; it is what gets published when
/// the system configuration could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    /// Nameserver endpoints in preference order.
    pub nameservers: Vec<SocketAddr>,
    /// Search-domain suffixes.
    pub search: Vec<String>,
    /// Hosts-file entries.
    pub hosts: DnsHosts,
    /// Minimum number of dots for a name to be tried as absolute first.
    pub ndots: u32,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Number of attempts per nameserver.
    pub attempts: u32,
    /// Round-robin among nameservers.
    pub rotate: bool,
    /// The system config carried options this type does not model.
    pub unhandled_options: bool,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            nameservers: Vec::new(),
            search: Vec::new(),
            hosts: DnsHosts::new(),
            ndots: 1,
            timeout: Duration::from_secs(1),
            attempts: 2,
            rotate: false,
            unhandled_options: false,
        }
    }
}

impl DnsConfig {
    /// Whether the config can be used to resolve anything.
    pub fn is_valid(&self) -> bool {
        !self.nameservers.is_empty()
    }

    /// Equality on everything except `hosts`.
    pub fn equals_ignoring_hosts(&self, other: &DnsConfig) -> bool {
        self.nameservers == other.nameservers
            && self.search == other.search
            && self.ndots == other.ndots
            && self.timeout == other.timeout
            && self.attempts == other.attempts
            && self.rotate == other.rotate
            && self.unhandled_options == other.unhandled_options
    }

    /// Copy every field except `hosts`, which is left empty.
    pub fn copy_ignoring_hosts(&self) -> DnsConfig {
        DnsConfig {
            hosts: DnsHosts::new(),
            ..self.clone()
        }
    }

    /// JSON rendering for logs.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DnsConfig {
        DnsConfig {
            nameservers: vec!["192.0.2.53:53".parse().unwrap()],
            search: vec!["example.test".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_validity_requires_nameserver() {
        assert!(!DnsConfig::default().is_valid());
        assert!(config().is_valid());
    }

    #[test]
    fn test_equals_ignoring_hosts() {
        let a = config();
        let mut b = config();
        b.hosts
            .entry("printer.local".to_string())
            .or_default()
            .insert("192.0.2.7".parse().unwrap());

        assert_ne!(a, b);
        assert!(a.equals_ignoring_hosts(&b));
        assert_eq!(b.copy_ignoring_hosts(), a);

        b.rotate = true;
        assert!(!a.equals_ignoring_hosts(&b));
    }

    #[test]
    fn test_json_rendering() {
        let json = config().to_json();
        assert_eq!(json["nameservers"][0], "192.0.2.53:53");
        assert_eq!(json["ndots"], 1);
    }
}
