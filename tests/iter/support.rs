//! Shared helpers for the iterator tests.

#![allow(dead_code)]

use std::time::Duration;

use natscale::broker::InMemoryBroker;
use natscale::{Config, Message};

pub const SUBJECT: &str = "hpc.tasks.*";

/// How long tests wait for asynchronous acks to land.
pub const ACK_WAIT: Duration = Duration::from_secs(2);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config with short timeouts so tests end quickly.
pub fn config() -> Config {
    init_tracing();
    Config::new(SUBJECT)
        .timeout_secs(0.5)
        .fetch_timeout_secs(0.05)
        .error_backoff_secs(0.01)
        .shutdown_grace_secs(1.0)
}

/// Broker preloaded with `{"id": n, "step": "run"}` for every `n` in `ids`.
pub fn broker_with(ids: &[i64]) -> InMemoryBroker {
    let broker = InMemoryBroker::new();
    for id in ids {
        broker.publish_message("hpc.tasks.sim", &Message::new(*id).with_field("step", "run"));
    }
    broker
}
