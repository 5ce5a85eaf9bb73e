//! Tracing targets for the notifier.
//!
//! The library never installs a subscriber. Filter on these targets, for
//! example `RUST_LOG=netchange::calculator=debug`.

/// Target names for log filtering.
pub mod targets {
    /// Crate-wide target.
    pub const NETCHANGE: &str = "netchange";
    /// Notifier construction, teardown and fan-out.
    pub const NOTIFIER: &str = "netchange::notifier";
    /// Debounce decisions.
    pub const CALCULATOR: &str = "netchange::calculator";
    /// Platform signal sources and interface snapshots.
    pub const PLATFORM: &str = "netchange::platform";
    /// DNS config collaborator.
    pub const DNS: &str = "netchange::dns";
    /// Metrics collection.
    pub const HISTOGRAM: &str = "netchange::histogram";
    /// Configuration loading.
    pub const CONFIG: &str = "netchange::config";
}
