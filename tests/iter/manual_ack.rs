//! Manual-ack mode: every delivery carries its own handle.

use std::time::{Duration, Instant};

use natscale::{Config, Delivery, TaskIter};

use crate::support::{self, broker_with, ACK_WAIT};

// ============================================================================
// Scenario: ids 1,2,3 then silence, timeout 3s
// ============================================================================

#[test]
fn delivers_in_order_then_ends_within_timeout() {
    support::init_tracing();
    let broker = broker_with(&[1, 2, 3]);
    let config = Config::new("hpc.tasks.*")
        .timeout_secs(3.0)
        .fetch_timeout_secs(0.1)
        .auto_ack(false);

    let mut ids = Vec::new();
    let mut last_yield = Instant::now();
    for delivery in TaskIter::with_connector(config, broker.clone()).unwrap() {
        let Delivery::Manual(message, ack) = delivery else {
            panic!("manual mode yielded an auto delivery");
        };
        assert_eq!(ack.message_id(), message.id());
        ids.push(message.id());
        assert!(ack.ack());
        last_yield = Instant::now();
    }

    let silent_for = last_yield.elapsed();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(silent_for >= Duration::from_secs(3));
    assert!(silent_for < Duration::from_secs(5));
    assert_eq!(broker.acknowledged_ids(), vec![1, 2, 3]);
}

// ============================================================================
// Manual mode never acks on its own
// ============================================================================

#[test]
fn unacked_messages_stay_unacked() {
    let broker = broker_with(&[1, 2, 3]);
    let mut tasks = TaskIter::with_connector(support::config(), broker.clone()).unwrap();

    let handles: Vec<_> = tasks
        .by_ref()
        .map(|delivery| delivery.into_parts().1.unwrap())
        .collect();
    assert_eq!(handles.len(), 3);

    let stats = tasks.close();
    assert_eq!(stats.delivered, 3);
    assert!(broker.acknowledged().is_empty());
}

#[test]
fn each_handle_acks_its_own_message_once() {
    let broker = broker_with(&[10, 20, 30]);
    let mut tasks = TaskIter::with_connector(support::config(), broker.clone()).unwrap();

    let (first, first_ack) = tasks.next().unwrap().into_parts();
    let (second, second_ack) = tasks.next().unwrap().into_parts();
    let (first_ack, second_ack) = (first_ack.unwrap(), second_ack.unwrap());
    assert_eq!((first.id(), second.id()), (10, 20));

    // Out of order, and twice.
    assert!(second_ack.ack());
    assert!(!second_ack.ack());
    assert!(broker.wait_for_acks(1, ACK_WAIT));
    assert_eq!(broker.acknowledged_ids(), vec![20]);

    assert!(first_ack.ack());
    assert!(broker.wait_for_acks(2, ACK_WAIT));
    assert_eq!(broker.acknowledged_ids(), vec![20, 10]);

    tasks.close();
    assert_eq!(broker.acknowledged_ids(), vec![20, 10]);
}

#[test]
fn ack_after_close_is_a_no_op() {
    let broker = broker_with(&[1]);
    let mut tasks = TaskIter::with_connector(support::config(), broker.clone()).unwrap();
    let (_, ack) = tasks.next().unwrap().into_parts();
    let ack = ack.unwrap();

    tasks.close();
    assert!(!ack.ack());
    assert!(ack.is_dispatched());
    assert!(broker.acknowledged().is_empty());
}

#[test]
fn extra_fields_pass_through() {
    let broker = natscale::broker::InMemoryBroker::new();
    broker.publish(
        "hpc.tasks.render",
        br#"{"id": 4, "frame": 120, "scene": {"name": "intro"}}"#.to_vec(),
    );
    let mut tasks = TaskIter::with_connector(support::config(), broker).unwrap();

    let message = tasks.next().unwrap().into_message();
    assert_eq!(message.id(), 4);
    assert_eq!(message.get("frame"), Some(&serde_json::json!(120)));
    assert_eq!(
        message.get("scene"),
        Some(&serde_json::json!({"name": "intro"}))
    );
}
