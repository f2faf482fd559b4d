//! Pull tasks from `hpc.tasks.*` and acknowledge each one after processing.
//!
//! Needs a NATS server with JetStream enabled on 127.0.0.1:4222.

use std::thread;
use std::time::Duration;

use natscale::{Config, TaskIter};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::new("hpc.tasks.*")
        .server("nats://127.0.0.1:4222")
        .timeout_secs(3.0)
        .retry(4)
        .auto_ack(false);

    for delivery in TaskIter::open(config)? {
        let (task, ack) = delivery.into_parts();
        println!("{} --> {}", task.id(), task);
        thread::sleep(Duration::from_secs(1));
        if let Some(ack) = ack {
            ack.ack();
        }
    }

    println!("all done");
    Ok(())
}
