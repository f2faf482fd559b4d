//! Auto-ack mode: each message is acked when the next one is pulled.

use std::thread;
use std::time::Duration;

use natscale::{Delivery, TaskIter};

use crate::support::{self, broker_with, ACK_WAIT};

// ============================================================================
// Scenario: ids 1,2,3 with auto_ack, ack deferred by one pull
// ============================================================================

#[test]
fn ack_is_deferred_by_one_pull() {
    let broker = broker_with(&[1, 2, 3]);
    let config = support::config().auto_ack(true);
    let mut tasks = TaskIter::with_connector(config, broker.clone()).unwrap();
    assert!(tasks.is_auto_ack());

    let first = tasks.next().unwrap();
    assert!(matches!(first, Delivery::Auto(ref m) if m.id() == 1));
    thread::sleep(Duration::from_millis(100));
    assert!(broker.acknowledged().is_empty());
    assert_eq!(tasks.pending_ack(), Some(1));

    let second = tasks.next().unwrap();
    assert_eq!(second.message().id(), 2);
    assert!(broker.wait_for_acks(1, ACK_WAIT));
    assert_eq!(broker.acknowledged_ids(), vec![1]);

    let third = tasks.next().unwrap();
    assert_eq!(third.message().id(), 3);
    assert!(broker.wait_for_acks(2, ACK_WAIT));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(broker.acknowledged_ids(), vec![1, 2]);
    assert_eq!(tasks.pending_ack(), Some(3));

    // Upstream is silent: iteration ends and the tail ack is never sent.
    assert!(tasks.next().is_none());
    assert!(tasks.next().is_none());
    let stats = tasks.close();
    assert_eq!(stats.delivered, 3);
    assert_eq!(broker.acknowledged_ids(), vec![1, 2]);
}

#[test]
fn yields_bare_messages() {
    let broker = broker_with(&[1, 2, 3]);
    let ids: Vec<i64> = TaskIter::with_connector(support::config().auto_ack(true), broker)
        .unwrap()
        .map(|delivery| match delivery {
            Delivery::Auto(message) => message.id(),
            Delivery::Manual(..) => panic!("auto mode yielded an ack handle"),
        })
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[test]
fn flush_on_close_sends_the_tail_ack() {
    let broker = broker_with(&[1, 2]);
    let config = support::config().auto_ack(true).flush_on_close(true);
    let mut tasks = TaskIter::with_connector(config, broker.clone()).unwrap();

    assert_eq!(tasks.next().unwrap().message().id(), 1);
    assert_eq!(tasks.next().unwrap().message().id(), 2);
    tasks.close();

    // The flush is drained before the connection closes.
    assert_eq!(broker.acknowledged_ids(), vec![1, 2]);
}

#[test]
fn dropping_mid_stream_keeps_tail_unacked() {
    let broker = broker_with(&[1, 2, 3]);
    {
        let mut tasks =
            TaskIter::with_connector(support::config().auto_ack(true), broker.clone()).unwrap();
        tasks.next().unwrap();
        tasks.next().unwrap();
    }
    assert_eq!(broker.acknowledged_ids(), vec![1]);
    assert_eq!(broker.open_connections(), 0);
}
