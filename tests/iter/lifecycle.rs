//! Opening, timing out and closing iterators.

use std::time::{Duration, Instant};

use natscale::broker::InMemoryBroker;
use natscale::{ConfigError, OpenError, TaskIter};

use crate::support::{self, broker_with};

#[test]
fn open_then_close_is_bounded() {
    let broker = InMemoryBroker::new();
    let config = support::config().timeout_secs(30.0).fetch_timeout_secs(30.0);

    let start = Instant::now();
    let tasks = TaskIter::with_connector(config, broker.clone()).unwrap();
    let stats = tasks.close();

    assert!(start.elapsed() < Duration::from_secs(3));
    assert_eq!(stats.delivered, 0);
    assert_eq!(broker.open_connections(), 0);
}

#[test]
fn drop_releases_connection() {
    let broker = broker_with(&[1]);
    {
        let mut tasks = TaskIter::with_connector(support::config(), broker.clone()).unwrap();
        tasks.next().unwrap();
        assert_eq!(broker.open_connections(), 1);
    }
    assert_eq!(broker.open_connections(), 0);
}

#[test]
fn silent_upstream_ends_after_pull_timeout() {
    let broker = InMemoryBroker::new();
    let config = support::config().timeout_secs(0.3);

    let start = Instant::now();
    let count = TaskIter::with_connector(config, broker).unwrap().count();
    let elapsed = start.elapsed();

    assert_eq!(count, 0);
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(3));
}

#[test]
fn exhausted_iterator_stays_exhausted() {
    let broker = broker_with(&[1]);
    let mut tasks = TaskIter::with_connector(support::config(), broker.clone()).unwrap();
    assert!(tasks.next().is_some());
    assert!(tasks.next().is_none());

    // Published after the end: not picked up, the loop is gone.
    broker.publish("hpc.tasks.late", br#"{"id": 2}"#.to_vec());
    assert!(tasks.next().is_none());
    assert_eq!(tasks.pulled(), 1);
    assert_eq!(broker.open_connections(), 0);
}

#[test]
fn connect_failure_ends_iteration_without_error() {
    let broker = broker_with(&[1]);
    broker.fail_connect(true);
    let config = support::config().timeout_secs(5.0);

    let start = Instant::now();
    let mut tasks = TaskIter::with_connector(config, broker).unwrap();
    assert!(tasks.next().is_none());
    // The loop closed the channel, so the consumer does not sit out the timeout.
    assert!(start.elapsed() < Duration::from_secs(5));

    let stats = tasks.close();
    assert!(stats.setup_error.unwrap().contains("refused"));
}

#[test]
fn subscribe_failure_releases_connection() {
    let broker = broker_with(&[1]);
    broker.fail_subscribe(true);

    let mut tasks = TaskIter::with_connector(support::config(), broker.clone()).unwrap();
    assert!(tasks.next().is_none());
    let stats = tasks.close();
    assert!(stats.setup_error.is_some());
    assert_eq!(broker.open_connections(), 0);
}

#[test]
fn invalid_config_is_rejected_before_starting() {
    let broker = InMemoryBroker::new();
    let mut config = support::config();
    config.subject = String::new();

    let err = TaskIter::with_connector(config, broker.clone()).unwrap_err();
    assert!(matches!(
        err,
        OpenError::Config(ConfigError::Invalid { field: "subject", .. })
    ));
    assert_eq!(broker.fetch_count(), 0);
}

#[test]
fn huge_timeouts_are_rejected_instead_of_overflowing() {
    let broker = broker_with(&[1]);
    for secs in [1e19, 1e20] {
        let err = TaskIter::with_connector(support::config().timeout_secs(secs), broker.clone())
            .unwrap_err();
        assert!(matches!(
            err,
            OpenError::Config(ConfigError::Invalid { field: "timeout", .. })
        ));
    }
    assert_eq!(broker.open_connections(), 0);
}

#[test]
fn iterators_do_not_share_state() {
    let broker = broker_with(&[1, 2]);
    let a = TaskIter::with_connector(support::config().durable("worker_a"), broker.clone()).unwrap();
    let b = TaskIter::with_connector(support::config().durable("worker_b"), broker.clone()).unwrap();

    let first = std::thread::spawn(move || a.map(|d| d.message().id()).collect::<Vec<_>>());
    let second = std::thread::spawn(move || b.map(|d| d.message().id()).collect::<Vec<_>>());

    assert_eq!(first.join().unwrap(), vec![1, 2]);
    assert_eq!(second.join().unwrap(), vec![1, 2]);
    assert_eq!(broker.open_connections(), 0);
}
