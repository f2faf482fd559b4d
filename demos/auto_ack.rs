//! Pull tasks from `hpc.tasks.*`; each is acknowledged when the next is pulled.
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

    let config = Config::from_json(
        r#"{"subject": "hpc.tasks.*", "timeout": 60, "auto_ack": true, "flush_on_close": true}"#,
    )?;

    let mut tasks = TaskIter::open(config)?;
    for delivery in tasks.by_ref() {
        let task = delivery.into_message();
        println!("{} --> {}", task.id(), task);
        thread::sleep(Duration::from_secs(3));
    }

    let stats = tasks.close();
    println!(
        "delivered {} tasks ({} fetch timeouts, {} undecodable)",
        stats.delivered, stats.fetch_timeouts, stats.decode_failures
    );
    Ok(())
}
