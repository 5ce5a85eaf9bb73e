//! `resolv.conf` reader for unix systems.
//!
//! Parsing is left to the `resolv-conf` crate. Hosts files are not read;
//! embedders that need them supply their own [`DnsConfigReader`].

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::DnsConfigReader;
use crate::dns_config::{DnsConfig, DnsHosts};
use crate::error::{NotifierError, NotifierResult};

const DNS_PORT: u16 = 53;

/// Reads resolver settings from `resolv.conf`.
#[derive(Debug, Clone)]
pub struct ResolvConfReader {
    resolv_conf: PathBuf,
}

impl ResolvConfReader {
    pub const DEFAULT_RESOLV_CONF: &'static str = "/etc/resolv.conf";

    pub fn new() -> Self {
        Self::with_path(Self::DEFAULT_RESOLV_CONF)
    }

    pub fn with_path(resolv_conf: impl Into<PathBuf>) -> Self {
        Self {
            resolv_conf: resolv_conf.into(),
        }
    }

    pub fn resolv_conf_path(&self) -> &Path {
        &self.resolv_conf
    }
}

impl Default for ResolvConfReader {
    fn default() -> Self {
        Self::new()
    }
}

impl DnsConfigReader for ResolvConfReader {
    fn read_config(&self) -> NotifierResult<DnsConfig> {
        let text = std::fs::read(&self.resolv_conf)
            .map_err(|e| NotifierError::DnsRead(format!("{}: {e}", self.resolv_conf.display())))?;
        parse_resolv_conf(&text)
    }

    fn read_hosts(&self) -> NotifierResult<DnsHosts> {
        Ok(DnsHosts::new())
    }
}

fn parse_resolv_conf(text: &[u8]) -> NotifierResult<DnsConfig> {
    let parsed = resolv_conf::Config::parse(text).map_err(|e| NotifierError::DnsRead(e.to_string()))?;

    let nameservers = parsed
        .nameservers
        .iter()
        .cloned()
        .map(|addr| SocketAddr::new(IpAddr::from(addr), DNS_PORT))
        .collect();
    let search = parsed.get_search().cloned().unwrap_or_default();

    Ok(DnsConfig {
        nameservers,
        search,
        ndots: parsed.ndots,
        timeout: Duration::from_secs(u64::from(parsed.timeout)),
        attempts: parsed.attempts,
        rotate: parsed.rotate,
        ..DnsConfig::default()
    })
}
