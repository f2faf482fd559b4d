//! Fetch loop behavior as seen from the consumer.

use std::thread;
use std::time::Duration;

use natscale::TaskIter;

use crate::support::{self, broker_with};

#[test]
fn undecodable_payloads_are_skipped() {
    let broker = natscale::broker::InMemoryBroker::new();
    broker.publish("hpc.tasks.a", b"garbage".to_vec());
    broker.publish("hpc.tasks.a", br#"{"id": 1}"#.to_vec());
    broker.publish("hpc.tasks.a", br#"{"name": "no id"}"#.to_vec());
    broker.publish("hpc.tasks.a", br#"{"id": 2}"#.to_vec());

    let mut tasks = TaskIter::with_connector(support::config(), broker.clone()).unwrap();
    let ids: Vec<i64> = tasks.by_ref().map(|d| d.message().id()).collect();
    let stats = tasks.close();

    assert_eq!(ids, vec![1, 2]);
    assert_eq!(stats.decode_failures, 2);
    assert_eq!(stats.delivered, 2);
}

#[test]
fn transport_errors_are_invisible_to_the_consumer() {
    let broker = broker_with(&[1, 2]);
    broker.inject_transport_errors(3);

    let mut tasks = TaskIter::with_connector(support::config(), broker.clone()).unwrap();
    let ids: Vec<i64> = tasks.by_ref().map(|d| d.message().id()).collect();
    let stats = tasks.close();

    assert_eq!(ids, vec![1, 2]);
    assert_eq!(stats.transport_errors, 3);
}

#[test]
fn upstream_timeouts_are_retried() {
    let broker = natscale::broker::InMemoryBroker::new();
    let publisher = {
        let broker = broker.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            broker.publish("hpc.tasks.late", br#"{"id": 9}"#.to_vec());
        })
    };

    let config = support::config().timeout_secs(2.0);
    let mut tasks = TaskIter::with_connector(config, broker).unwrap();
    assert_eq!(tasks.next().unwrap().message().id(), 9);
    publisher.join().unwrap();

    drop(tasks.next());
    let stats = tasks.close();
    assert!(stats.fetch_timeouts >= 1);
}

#[test]
fn fetches_at_most_one_message_ahead() {
    let broker = broker_with(&[1, 2, 3, 4]);
    let mut tasks = TaskIter::with_connector(support::config(), broker.clone()).unwrap();

    // Nothing pulled yet: exactly one message waits in the slot.
    thread::sleep(Duration::from_millis(200));
    assert_eq!(broker.delivered_count(), 1);

    // One pull releases the slot, so one more is fetched and no further.
    let _first = tasks.next().unwrap();
    thread::sleep(Duration::from_millis(200));
    assert_eq!(broker.delivered_count(), 2);

    let _second = tasks.next().unwrap();
    thread::sleep(Duration::from_millis(200));
    assert_eq!(broker.delivered_count(), 3);
}

#[test]
fn messages_outside_the_subject_are_ignored() {
    let broker = natscale::broker::InMemoryBroker::new();
    broker.publish("hpc.tasks.a", br#"{"id": 1}"#.to_vec());
    broker.publish("billing.invoices", br#"{"id": 2}"#.to_vec());
    broker.publish("hpc.tasks.b", br#"{"id": 3}"#.to_vec());

    let ids: Vec<i64> = TaskIter::with_connector(support::config(), broker.clone())
        .unwrap()
        .map(|d| d.message().id())
        .collect();
    assert_eq!(ids, vec![1, 3]);
    assert_eq!(broker.streams()["NATSCALE"], vec!["hpc.tasks.*".to_string()]);
}
