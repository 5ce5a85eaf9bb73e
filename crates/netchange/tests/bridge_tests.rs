//! Host-driven bridge source feeding a real notifier.

mod common;

use std::sync::Arc;

use netchange::prelude::*;
use netchange::{BridgeSignalSource, NetworkChangeCalculatorParams, global};
use serial_test::serial;

use common::Recorder;

fn config() -> NotifierConfig {
    NotifierConfig::default().with_calculator(NetworkChangeCalculatorParams::zero())
}

#[test]
#[serial]
fn test_bridge_events_reach_every_channel() {
    let runner = ManualTaskRunner::new();
    let bridge = Arc::new(BridgeSignalSource::new());
    let _handle = NetworkChangeNotifier::create_with_source(bridge.clone(), config(), runner.clone()).unwrap();

    let recorder = Arc::new(Recorder::default());
    global::add_ip_address_observer(recorder.clone(), runner.clone());
    global::add_connection_type_observer(recorder.clone(), runner.clone());
    global::add_max_bandwidth_observer(recorder.clone(), runner.clone());
    global::add_network_change_observer(recorder.clone(), runner.clone());
    global::add_network_observer(recorder.clone(), runner.clone());

    bridge.notify_network_connected(NetworkHandle(100), ConnectionType::Wifi);
    bridge.notify_connection_type_changed(ConnectionType::Wifi, NetworkHandle(100));
    bridge.notify_default_network_changed(NetworkHandle(100));
    runner.run_until_idle();

    let events = recorder.take();
    assert_eq!(events[0], "connected 100");
    assert!(events.contains(&"ip".to_string()));
    assert!(events.contains(&"type CONNECTION_WIFI".to_string()));
    assert!(events.contains(&"bandwidth inf CONNECTION_WIFI".to_string()));
    let network: Vec<_> = events.iter().filter(|e| e.starts_with("network")).collect();
    assert_eq!(network, ["network CONNECTION_NONE", "network CONNECTION_WIFI"]);

    assert_eq!(global::connection_type(), ConnectionType::Wifi);
    assert_eq!(global::default_network(), NetworkHandle(100));
    assert_eq!(global::connected_networks(), vec![NetworkHandle(100)]);
}

#[test]
#[serial]
fn test_bridge_going_offline() {
    let runner = ManualTaskRunner::new();
    let bridge = Arc::new(BridgeSignalSource::new());
    let _handle = NetworkChangeNotifier::create_with_source(bridge.clone(), config(), runner.clone()).unwrap();

    bridge.notify_connection_type_changed(ConnectionType::Cellular4G, NetworkHandle(7));
    bridge.notify_connection_subtype_changed(ConnectionSubtype::Lte);
    runner.run_until_idle();

    let recorder = Arc::new(Recorder::default());
    global::add_max_bandwidth_observer(recorder.clone(), runner.clone());
    global::add_network_change_observer(recorder.clone(), runner.clone());

    bridge.notify_connection_type_changed(ConnectionType::None, NetworkHandle::INVALID);
    runner.run_until_idle();

    assert_eq!(
        recorder.events(),
        vec!["bandwidth 0 CONNECTION_NONE", "network CONNECTION_NONE"]
    );
    assert!(global::is_offline());
    assert_eq!(global::max_bandwidth_and_connection_type(), (0.0, ConnectionType::None));
}

#[test]
#[serial]
fn test_stopped_bridge_is_silent() {
    let runner = ManualTaskRunner::new();
    let bridge = Arc::new(BridgeSignalSource::new());
    let handle = NetworkChangeNotifier::create_with_source(bridge.clone(), config(), runner.clone()).unwrap();
    let recorder = Arc::new(Recorder::default());
    handle.add_ip_address_observer(recorder.clone(), runner.clone());

    drop(handle);
    bridge.notify_connection_type_changed(ConnectionType::Ethernet, NetworkHandle(1));
    runner.run_until_idle();

    assert!(recorder.events().is_empty());
    assert!(!global::has_network_change_notifier());
}

#[test]
#[serial]
fn test_bridge_bandwidth_after_reconnect() {
    let runner = ManualTaskRunner::new();
    let bridge = Arc::new(BridgeSignalSource::new());
    let _handle = NetworkChangeNotifier::create_with_source(bridge.clone(), config(), runner.clone()).unwrap();
    let recorder = Arc::new(Recorder::default());
    global::add_max_bandwidth_observer(recorder.clone(), runner.clone());

    bridge.notify_connection_type_changed(ConnectionType::Wifi, NetworkHandle(3));
    bridge.notify_connection_type_changed(ConnectionType::None, NetworkHandle::INVALID);
    bridge.notify_connection_type_changed(ConnectionType::Wifi, NetworkHandle(4));
    runner.run_until_idle();

    assert_eq!(
        recorder.events(),
        vec![
            "bandwidth inf CONNECTION_WIFI",
            "bandwidth 0 CONNECTION_NONE",
            "bandwidth inf CONNECTION_WIFI",
        ]
    );
    assert_eq!(global::connection_subtype(), ConnectionSubtype::Unknown);
    assert_eq!(global::max_bandwidth_and_connection_type(), (f64::INFINITY, ConnectionType::Wifi));
}
