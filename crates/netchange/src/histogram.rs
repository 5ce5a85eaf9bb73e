//! Aggregate network-change statistics.
//!
//! [`HistogramWatcher`] is an ordinary observer of four channels that feeds
//! a private `prometheus` registry: time between changes of each kind, time
//! spent on each connection type, traffic seen per type, and how much data
//! arrives while the notifier believes the machine is offline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, Histogram, HistogramOpts, HistogramVec, Registry, TextEncoder, exponential_buckets};
use url::{Host, Url};

use crate::error::NotifierResult;
use crate::logging::targets;
use crate::observer::{ConnectionTypeObserver, DnsObserver, IpAddressObserver, NetworkChangeObserver};
use crate::types::ConnectionType;

/// Time source; tests substitute a manual clock.
pub type Clock = Arc<dyn Fn() -> Instant + Send + Sync>;

/// Reads the current connection type when offline traffic needs checking.
pub type ConnectionTypeProbe = Arc<dyn Fn() -> ConnectionType + Send + Sync>;

const LABEL: &str = "connection_type";

/// Transfers smaller than this are too short for a meaningful rate.
const MIN_BYTES_FOR_RATE: u64 = 10_000;
const MIN_DURATION_FOR_RATE: Duration = Duration::from_millis(1);
const OFFLINE_PACKET_WINDOW: Duration = Duration::from_secs(5);
const INITIAL_POLLING_INTERVAL: Duration = Duration::from_secs(1);

/// One chunk of response data, as reported by the network stack.
#[derive(Debug, Clone)]
pub struct DataReceived {
    /// URL of the request the data belongs to.
    pub url: Url,
    /// When the request was created.
    pub request_created: Instant,
    /// Bytes in this chunk.
    pub bytes_read: u64,
}

struct Metrics {
    registry: Registry,
    ip_address_change: Histogram,
    connection_type_change_to_ip_address_change: Histogram,
    ip_address_change_to_connection_type_change: Histogram,
    dns_config_change: Histogram,
    first_read: HistogramVec,
    fastest_rtt: HistogramVec,
    peak_kbps: HistogramVec,
    time_on: HistogramVec,
    transferred_kilobytes: HistogramVec,
    online_change: Histogram,
    offline_change: Histogram,
    offline_packets_before_online: Histogram,
    offline_data_until_online: Histogram,
    network_online_change: Histogram,
    network_offline_change: Histogram,
    offline_data_received: Histogram,
    polling_offline_data_received: Histogram,
}

impl Metrics {
    fn new() -> NotifierResult<Self> {
        let registry = Registry::new();

        // 1 ms up to roughly 9 hours.
        let times = exponential_buckets(0.001, 2.0, 25)?;
        // 1 up to roughly 1M.
        let counts = exponential_buckets(1.0, 2.0, 21)?;

        let histogram = |name: &str, help: &str, buckets: &[f64]| -> NotifierResult<Histogram> {
            let metric = Histogram::with_opts(HistogramOpts::new(name, help).buckets(buckets.to_vec()))?;
            registry.register(Box::new(metric.clone()))?;
            Ok(metric)
        };
        let per_type = |name: &str, help: &str, buckets: &[f64]| -> NotifierResult<HistogramVec> {
            let metric = HistogramVec::new(HistogramOpts::new(name, help).buckets(buckets.to_vec()), &[LABEL])?;
            registry.register(Box::new(metric.clone()))?;
            Ok(metric)
        };

        Ok(Self {
            ip_address_change: histogram(
                "netchange_ip_address_change_seconds",
                "Time between IP address changes",
                &times,
            )?,
            connection_type_change_to_ip_address_change: histogram(
                "netchange_connection_type_change_to_ip_address_change_seconds",
                "Time from a connection type change to the next IP address change",
                &times,
            )?,
            ip_address_change_to_connection_type_change: histogram(
                "netchange_ip_address_change_to_connection_type_change_seconds",
                "Time from an IP address change to the next connection type change",
                &times,
            )?,
            dns_config_change: histogram(
                "netchange_dns_config_change_seconds",
                "Time between DNS configuration changes",
                &times,
            )?,
            first_read: per_type(
                "netchange_first_read_seconds",
                "Time from a connection type change to the first byte read",
                &times,
            )?,
            fastest_rtt: per_type(
                "netchange_fastest_rtt_seconds",
                "Fastest request round trip seen on a connection type",
                &times,
            )?,
            peak_kbps: per_type(
                "netchange_peak_kbps",
                "Peak transfer rate seen on a connection type",
                &counts,
            )?,
            time_on: per_type(
                "netchange_time_on_seconds",
                "Time spent on a connection type",
                &times,
            )?,
            transferred_kilobytes: per_type(
                "netchange_transferred_kilobytes",
                "Kilobytes read while on a connection type",
                &counts,
            )?,
            online_change: histogram(
                "netchange_online_change_seconds",
                "Time spent in the previous state before a change to an online type",
                &times,
            )?,
            offline_change: histogram(
                "netchange_offline_change_seconds",
                "Time spent in the previous state before going offline",
                &times,
            )?,
            offline_packets_before_online: histogram(
                "netchange_offline_packets_before_online",
                "Data chunks received while offline, when the last one came shortly before going online",
                &counts,
            )?,
            offline_data_until_online: histogram(
                "netchange_offline_data_until_online_seconds",
                "Time from the last data received while offline to going online",
                &times,
            )?,
            network_online_change: histogram(
                "netchange_network_online_change_seconds",
                "Time between announced network changes, ending online",
                &times,
            )?,
            network_offline_change: histogram(
                "netchange_network_offline_change_seconds",
                "Time between announced network changes, ending offline",
                &times,
            )?,
            offline_data_received: histogram(
                "netchange_offline_data_received_seconds",
                "Time since going offline at which data was received",
                &times,
            )?,
            polling_offline_data_received: histogram(
                "netchange_polling_offline_data_received_seconds",
                "Like offline_data_received, when a fresh type query also reports offline",
                &times,
            )?,
            registry,
        })
    }
}

#[derive(Debug)]
struct WatcherState {
    last_ip_address_change: Instant,
    last_connection_change: Instant,
    last_dns_change: Instant,
    last_network_change: Instant,
    last_offline_packet: Option<Instant>,
    last_polled: Instant,
    polling_interval: Duration,
    last_connection_type: ConnectionType,
    last_polled_connection_type: ConnectionType,
    offline_packets: u64,
    bytes_read: u64,
    fastest_rtt: Duration,
    first_byte: Duration,
    peak_kbps: u64,
    segment_start: Instant,
    segment_bytes: u64,
}

fn since_last(last: &mut Instant, now: Instant) -> Duration {
    let delta = now.saturating_duration_since(*last);
    *last = now;
    delta
}

fn is_localhost(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.');
            domain.eq_ignore_ascii_case("localhost") || domain.to_ascii_lowercase().ends_with(".localhost")
        }
        Some(Host::Ipv4(addr)) => addr.is_loopback(),
        Some(Host::Ipv6(addr)) => addr.is_loopback(),
        None => false,
    }
}

/// Records statistics about network changes and traffic.
pub struct HistogramWatcher {
    metrics: Metrics,
    state: Mutex<WatcherState>,
    clock: Clock,
    probe: ConnectionTypeProbe,
}

impl HistogramWatcher {
    /// Watcher on the system clock.
    pub fn new(probe: ConnectionTypeProbe) -> NotifierResult<Self> {
        Self::with_clock(Arc::new(Instant::now), probe)
    }

    /// Watcher on a caller-supplied clock.
    pub fn with_clock(clock: Clock, probe: ConnectionTypeProbe) -> NotifierResult<Self> {
        let now = clock();
        Ok(Self {
            metrics: Metrics::new()?,
            state: Mutex::new(WatcherState {
                last_ip_address_change: now,
                last_connection_change: now,
                last_dns_change: now,
                last_network_change: now,
                last_offline_packet: None,
                last_polled: now,
                polling_interval: INITIAL_POLLING_INTERVAL,
                last_connection_type: ConnectionType::Unknown,
                last_polled_connection_type: ConnectionType::Unknown,
                offline_packets: 0,
                bytes_read: 0,
                fastest_rtt: Duration::ZERO,
                first_byte: Duration::ZERO,
                peak_kbps: 0,
                segment_start: now,
                segment_bytes: 0,
            }),
            clock,
            probe,
        })
    }

    /// Account for a chunk of response data.
    ///
    /// Loopback and non-HTTP(S) traffic is ignored.
    pub fn notify_data_received(&self, data: &DataReceived) {
        if is_localhost(&data.url) || !matches!(data.url.scheme(), "http" | "https") {
            return;
        }

        let now = (self.clock)();
        let request_duration = now.saturating_duration_since(data.request_created);
        let mut state = self.state.lock();

        if state.bytes_read == 0 {
            state.first_byte = now.saturating_duration_since(state.last_connection_change);
            state.fastest_rtt = request_duration;
        }
        state.bytes_read += data.bytes_read;
        state.segment_bytes += data.bytes_read;
        if request_duration < state.fastest_rtt {
            state.fastest_rtt = request_duration;
        }
        if data.bytes_read > MIN_BYTES_FOR_RATE
            && request_duration > MIN_DURATION_FOR_RATE
            && data.request_created > state.last_connection_change
        {
            let millis = request_duration.as_millis().max(1) as u64;
            let kbps = data.bytes_read * 8 / millis;
            state.peak_kbps = state.peak_kbps.max(kbps);
        }

        if state.last_connection_type != ConnectionType::None {
            return;
        }

        let offline_for = now.saturating_duration_since(state.last_connection_change);
        self.metrics.offline_data_received.observe(offline_for.as_secs_f64());
        state.offline_packets += 1;
        state.last_offline_packet = Some(now);

        if now.saturating_duration_since(state.last_polled) > state.polling_interval {
            state.polling_interval *= 2;
            state.last_polled = now;
            drop(state);
            let polled = (self.probe)();
            state = self.state.lock();
            state.last_polled_connection_type = polled;
        }
        if state.last_polled_connection_type == ConnectionType::None {
            self.metrics
                .polling_offline_data_received
                .observe(offline_for.as_secs_f64());
        }
    }

    /// Flush the time and traffic accumulated on the current connection type.
    ///
    /// Called before a metrics snapshot is taken, so long-lived connections
    /// show up without waiting for the next type change.
    pub fn finalizing_metrics_log_record(&self) {
        let now = (self.clock)();
        let mut state = self.state.lock();
        let label = state.last_connection_type.as_str();
        let duration = since_last(&mut state.segment_start, now);
        let kilobytes = std::mem::take(&mut state.segment_bytes) / 1000;
        self.metrics
            .time_on
            .with_label_values(&[label])
            .observe(duration.as_secs_f64());
        self.metrics
            .transferred_kilobytes
            .with_label_values(&[label])
            .observe(kilobytes as f64);
        tracing::debug!(target: targets::HISTOGRAM, connection_type = label, ?duration, kilobytes, "flushed connection metrics");
    }

    /// Snapshot of every metric family.
    pub fn gather(&self) -> Vec<MetricFamily> {
        self.metrics.registry.gather()
    }

    /// Prometheus text rendering of [`gather`](Self::gather).
    pub fn render_text(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(err) = TextEncoder::new().encode(&self.gather(), &mut buffer) {
            tracing::warn!(target: targets::HISTOGRAM, %err, "failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl IpAddressObserver for HistogramWatcher {
    fn on_ip_address_changed(&self) {
        let now = (self.clock)();
        let mut state = self.state.lock();
        let interval = since_last(&mut state.last_ip_address_change, now);
        self.metrics.ip_address_change.observe(interval.as_secs_f64());
        let after_type_change = state
            .last_ip_address_change
            .saturating_duration_since(state.last_connection_change);
        self.metrics
            .connection_type_change_to_ip_address_change
            .observe(after_type_change.as_secs_f64());
    }
}

impl ConnectionTypeObserver for HistogramWatcher {
    fn on_connection_type_changed(&self, connection_type: ConnectionType) {
        let now = (self.clock)();
        let mut state = self.state.lock();
        let previous = state.last_connection_type;
        let label = previous.as_str();
        let state_duration = since_last(&mut state.last_connection_change, now);
        let segment_duration = since_last(&mut state.segment_start, now);
        let kilobytes = std::mem::take(&mut state.segment_bytes) / 1000;

        if state.bytes_read > 0 {
            self.metrics
                .first_read
                .with_label_values(&[label])
                .observe(state.first_byte.as_secs_f64());
            self.metrics
                .fastest_rtt
                .with_label_values(&[label])
                .observe(state.fastest_rtt.as_secs_f64());
        }
        if state.peak_kbps > 0 {
            self.metrics
                .peak_kbps
                .with_label_values(&[label])
                .observe(state.peak_kbps as f64);
        }
        self.metrics
            .time_on
            .with_label_values(&[label])
            .observe(segment_duration.as_secs_f64());
        self.metrics
            .transferred_kilobytes
            .with_label_values(&[label])
            .observe(kilobytes as f64);

        if connection_type != ConnectionType::None {
            self.metrics.online_change.observe(state_duration.as_secs_f64());
            if state.offline_packets > 0 {
                if let Some(last_packet) = state.last_offline_packet {
                    let since_packet = now.saturating_duration_since(last_packet);
                    if since_packet < OFFLINE_PACKET_WINDOW {
                        self.metrics
                            .offline_packets_before_online
                            .observe(state.offline_packets as f64);
                    }
                    self.metrics
                        .offline_data_until_online
                        .observe(since_packet.as_secs_f64());
                }
            }
        } else {
            self.metrics.offline_change.observe(state_duration.as_secs_f64());
        }

        let since_ip_change = now.saturating_duration_since(state.last_ip_address_change);
        self.metrics
            .ip_address_change_to_connection_type_change
            .observe(since_ip_change.as_secs_f64());

        tracing::trace!(
            target: targets::HISTOGRAM,
            from = label,
            to = %connection_type,
            ?state_duration,
            "connection type segment closed"
        );

        state.offline_packets = 0;
        state.bytes_read = 0;
        state.peak_kbps = 0;
        state.last_connection_type = connection_type;
        state.polling_interval = INITIAL_POLLING_INTERVAL;
    }
}

impl DnsObserver for HistogramWatcher {
    fn on_dns_changed(&self) {
        let now = (self.clock)();
        let interval = since_last(&mut self.state.lock().last_dns_change, now);
        self.metrics.dns_config_change.observe(interval.as_secs_f64());
    }
}

impl NetworkChangeObserver for HistogramWatcher {
    fn on_network_changed(&self, connection_type: ConnectionType) {
        let now = (self.clock)();
        let interval = since_last(&mut self.state.lock().last_network_change, now);
        if connection_type != ConnectionType::None {
            self.metrics.network_online_change.observe(interval.as_secs_f64());
        } else {
            self.metrics.network_offline_change.observe(interval.as_secs_f64());
        }
    }
}

impl std::fmt::Debug for HistogramWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistogramWatcher")
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestClock {
        now: Mutex<Instant>,
    }

    impl TestClock {
        fn advance(&self, delta: Duration) {
            *self.now.lock() += delta;
        }

        fn now(&self) -> Instant {
            *self.now.lock()
        }
    }

    fn watcher(probe: ConnectionType) -> (Arc<TestClock>, HistogramWatcher) {
        let clock = Arc::new(TestClock { now: Mutex::new(Instant::now()) });
        let source = clock.clone();
        let watcher = HistogramWatcher::with_clock(Arc::new(move || source.now()), Arc::new(move || probe)).unwrap();
        (clock, watcher)
    }

    fn data(url: &str, created: Instant, bytes_read: u64) -> DataReceived {
        DataReceived {
            url: Url::parse(url).unwrap(),
            request_created: created,
            bytes_read,
        }
    }

    fn count(vec: &HistogramVec, connection_type: ConnectionType) -> u64 {
        vec.with_label_values(&[connection_type.as_str()]).get_sample_count()
    }

    #[test]
    fn test_ignores_local_and_non_http_traffic() {
        let (clock, watcher) = watcher(ConnectionType::Wifi);
        let created = clock.now();
        clock.advance(Duration::from_millis(20));
        watcher.notify_data_received(&data("http://localhost:8080/", created, 50_000));
        watcher.notify_data_received(&data("https://127.0.0.1/", created, 50_000));
        watcher.notify_data_received(&data("ftp://example.test/file", created, 50_000));
        assert_eq!(watcher.state.lock().bytes_read, 0);

        watcher.notify_data_received(&data("https://example.test/", created, 500));
        assert_eq!(watcher.state.lock().bytes_read, 500);
    }

    #[test]
    fn test_connection_segment_metrics() {
        let (clock, watcher) = watcher(ConnectionType::Wifi);
        watcher.on_connection_type_changed(ConnectionType::Wifi);

        clock.advance(Duration::from_millis(10));
        let created = clock.now();
        clock.advance(Duration::from_millis(100));
        watcher.notify_data_received(&data("https://example.test/a", created, 200_000));
        {
            let state = watcher.state.lock();
            assert_eq!(state.fastest_rtt, Duration::from_millis(100));
            assert_eq!(state.first_byte, Duration::from_millis(110));
            assert_eq!(state.peak_kbps, 16_000);
        }

        clock.advance(Duration::from_secs(30));
        watcher.on_connection_type_changed(ConnectionType::Ethernet);

        let m = &watcher.metrics;
        assert_eq!(count(&m.first_read, ConnectionType::Wifi), 1);
        assert_eq!(count(&m.fastest_rtt, ConnectionType::Wifi), 1);
        assert_eq!(count(&m.peak_kbps, ConnectionType::Wifi), 1);
        assert_eq!(
            m.transferred_kilobytes
                .with_label_values(&[ConnectionType::Wifi.as_str()])
                .get_sample_sum(),
            200.0
        );
        assert_eq!(m.online_change.get_sample_count(), 2);

        let state = watcher.state.lock();
        assert_eq!(state.bytes_read, 0);
        assert_eq!(state.peak_kbps, 0);
        assert_eq!(state.last_connection_type, ConnectionType::Ethernet);
    }

    #[test]
    fn test_no_read_metrics_without_traffic() {
        let (clock, watcher) = watcher(ConnectionType::Wifi);
        clock.advance(Duration::from_secs(1));
        watcher.on_connection_type_changed(ConnectionType::None);

        let m = &watcher.metrics;
        assert_eq!(count(&m.first_read, ConnectionType::Unknown), 0);
        assert_eq!(count(&m.peak_kbps, ConnectionType::Unknown), 0);
        assert_eq!(count(&m.time_on, ConnectionType::Unknown), 1);
        assert_eq!(m.offline_change.get_sample_count(), 1);
    }

    #[test]
    fn test_offline_traffic_and_polling_backoff() {
        let (clock, watcher) = watcher(ConnectionType::None);
        watcher.on_connection_type_changed(ConnectionType::None);

        clock.advance(Duration::from_millis(1500));
        let created = clock.now();
        watcher.notify_data_received(&data("https://example.test/", created, 10));
        {
            let state = watcher.state.lock();
            assert_eq!(state.offline_packets, 1);
            assert_eq!(state.polling_interval, Duration::from_secs(2));
            assert_eq!(state.last_polled_connection_type, ConnectionType::None);
        }
        assert_eq!(watcher.metrics.offline_data_received.get_sample_count(), 1);
        assert_eq!(watcher.metrics.polling_offline_data_received.get_sample_count(), 1);

        // Within the doubled interval: no new poll.
        clock.advance(Duration::from_millis(500));
        watcher.notify_data_received(&data("https://example.test/", clock.now(), 10));
        assert_eq!(watcher.state.lock().polling_interval, Duration::from_secs(2));

        clock.advance(Duration::from_secs(1));
        watcher.on_connection_type_changed(ConnectionType::Wifi);
        let m = &watcher.metrics;
        assert_eq!(m.offline_packets_before_online.get_sample_count(), 1);
        assert_eq!(m.offline_packets_before_online.get_sample_sum(), 2.0);
        assert_eq!(m.offline_data_until_online.get_sample_count(), 1);
        assert_eq!(watcher.state.lock().polling_interval, INITIAL_POLLING_INTERVAL);
    }

    #[test]
    fn test_interval_metrics_and_gather() {
        let (clock, watcher) = watcher(ConnectionType::Wifi);
        clock.advance(Duration::from_secs(2));
        watcher.on_ip_address_changed();
        watcher.on_dns_changed();
        watcher.on_network_changed(ConnectionType::None);
        watcher.on_network_changed(ConnectionType::Wifi);

        let m = &watcher.metrics;
        assert_eq!(m.ip_address_change.get_sample_sum(), 2.0);
        assert_eq!(m.dns_config_change.get_sample_count(), 1);
        assert_eq!(m.network_offline_change.get_sample_count(), 1);
        assert_eq!(m.network_online_change.get_sample_count(), 1);

        watcher.finalizing_metrics_log_record();
        let names: Vec<String> = watcher.gather().iter().map(|f| f.get_name().to_string()).collect();
        assert!(names.contains(&"netchange_ip_address_change_seconds".to_string()));
        assert!(names.contains(&"netchange_time_on_seconds".to_string()));
        assert!(watcher.render_text().contains("netchange_dns_config_change_seconds"));
    }
}
