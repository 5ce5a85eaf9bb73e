//! DNS reader attached to a notifier.

mod common;

use std::sync::Arc;

use netchange::prelude::*;
use netchange::{DnsConfig, DnsConfigReader, DnsHosts, NotifierError, NotifierResult, ResolvConfReader, global};
use parking_lot::Mutex;
use serial_test::serial;

use common::Recorder;

#[derive(Default)]
struct FlakyReader {
    fail: Mutex<bool>,
}

impl DnsConfigReader for FlakyReader {
    fn read_config(&self) -> NotifierResult<DnsConfig> {
        if *self.fail.lock() {
            return Err(NotifierError::DnsRead("resolver unavailable".into()));
        }
        Ok(DnsConfig {
            nameservers: vec!["192.0.2.53:53".parse().unwrap()],
            ..Default::default()
        })
    }

    fn read_hosts(&self) -> NotifierResult<DnsHosts> {
        Ok(DnsHosts::new())
    }
}

#[test]
#[serial]
fn test_attached_reader_feeds_notifier() {
    let runner = ManualTaskRunner::new();
    let mock = NetworkChangeNotifier::create_mock(runner.clone()).unwrap();
    let recorder = Arc::new(Recorder::default());
    mock.add_dns_observer(recorder.clone(), runner.clone());

    let reader = Arc::new(FlakyReader::default());
    mock.attach_dns_service(reader.clone(), runner.clone());
    runner.run_until_idle();

    assert!(global::dns_config().is_valid());
    assert_eq!(recorder.take(), vec!["dns initial"]);

    // A failed read withdraws the configuration.
    *reader.fail.lock() = true;
    mock.refresh_dns_config();
    runner.run_until_idle();
    assert!(!global::dns_config().is_valid());
    assert_eq!(recorder.take(), vec!["dns"]);

    *reader.fail.lock() = false;
    mock.refresh_dns_config();
    runner.run_until_idle();
    assert!(global::dns_config().is_valid());
    assert_eq!(recorder.take(), vec!["dns"]);
}

#[test]
#[serial]
fn test_resolv_conf_reader_through_notifier() {
    let dir = tempfile::tempdir().unwrap();
    let resolv = dir.path().join("resolv.conf");
    std::fs::write(&resolv, "nameserver 203.0.113.53\nsearch example.test\n").unwrap();

    let runner = ManualTaskRunner::new();
    let _mock = NetworkChangeNotifier::create_mock(runner.clone()).unwrap();
    global::current()
        .unwrap()
        .attach_dns_service(Arc::new(ResolvConfReader::with_path(&resolv)), runner.clone());
    runner.run_until_idle();

    let config = global::dns_config();
    assert_eq!(config.nameservers, vec!["203.0.113.53:53".parse().unwrap()]);
    assert_eq!(config.search, vec!["example.test"]);
    assert!(config.hosts.is_empty());
}
