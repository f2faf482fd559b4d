//! Background fetch loop.
//!
//! The loop runs on a dedicated single-worker tokio runtime owned by the
//! [`FetchWorker`]. It connects, makes sure the stream exists, binds the
//! durable pull consumer and then fetches one message at a time, handing each
//! decoded message and its ack capability to the rendezvous channel. The next
//! fetch only starts once the consumer has released the previous handoff.
//!
//! ## Example
//!
//! ```ignore
//! use natscale::{Config, FetchWorker};
//! use natscale::broker::InMemoryBroker;
//! use std::time::Duration;
//!
//! let worker = FetchWorker::spawn(Config::new("hpc.tasks.*"), InMemoryBroker::new())?;
//! let (message, ack) = worker.channel().get(Duration::from_secs(3))?;
//! worker.channel().mark_consumed();
//! worker.dispatcher().dispatch(ack, message.id());
//!
//! let stats = worker.stop(Duration::from_secs(5));
//! println!("delivered {} messages", stats.delivered);
//! ```

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::broker::{AckCapability, Connection, Connector, RawMessage, SubscribeOptions, Subscription};
use crate::channel::Rendezvous;
use crate::config::Config;
use crate::dispatch::AckDispatcher;
use crate::error::BrokerError;
use crate::message::Message;

/// What travels through the rendezvous channel.
pub type Handoff = (Message, AckCapability);

/// Statistics from the fetch loop.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    /// Fetch calls made, successful or not
    pub fetches: usize,
    /// Messages handed to and released by the consumer
    pub delivered: usize,
    pub fetch_timeouts: usize,
    pub decode_failures: usize,
    pub transport_errors: usize,
    /// Set when connecting or subscribing failed and the loop gave up
    pub setup_error: Option<String>,
}

/// Owns the background runtime and the fetch loop running on it.
pub struct FetchWorker {
    runtime: Option<Runtime>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<WorkerStats>>,
    channel: Arc<Rendezvous<Handoff>>,
    dispatcher: AckDispatcher,
}

impl FetchWorker {
    /// Start the runtime and the fetch loop.
    ///
    /// `config` is expected to be validated already.
    pub fn spawn<C: Connector>(config: Config, connector: C) -> io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("natscale-fetch")
            .enable_all()
            .build()?;

        let cancel = CancellationToken::new();
        let channel = Arc::new(Rendezvous::new());
        let dispatcher = AckDispatcher::new(runtime.handle().clone());

        let span = info_span!(
            "fetch_loop",
            subject = %config.subject,
            stream = %config.stream_name,
            durable = %config.durable_name,
        );
        let handle = runtime.spawn(
            run(
                config,
                connector,
                Arc::clone(&channel),
                dispatcher.clone(),
                cancel.clone(),
            )
            .instrument(span),
        );

        Ok(Self {
            runtime: Some(runtime),
            cancel,
            handle: Some(handle),
            channel,
            dispatcher,
        })
    }

    pub fn channel(&self) -> &Arc<Rendezvous<Handoff>> {
        &self.channel
    }

    pub fn dispatcher(&self) -> &AckDispatcher {
        &self.dispatcher
    }

    /// Signal the loop to stop without waiting.
    pub fn signal_stop(&self) {
        self.cancel.cancel();
        self.channel.close();
    }

    /// Stop the loop and shut the runtime down.
    ///
    /// Acks already dispatched get up to `grace` to complete before the
    /// connection is closed. Returns the loop statistics.
    pub fn stop(mut self, grace: Duration) -> WorkerStats {
        self.signal_stop();
        let (Some(runtime), Some(handle)) = (self.runtime.take(), self.handle.take()) else {
            return WorkerStats::default();
        };

        let joined = runtime
            .block_on(async move { tokio::time::timeout(grace.saturating_mul(2), handle).await });
        let stats = match joined {
            Ok(Ok(stats)) => stats,
            Ok(Err(err)) => {
                error!(error = %err, "fetch loop panicked");
                WorkerStats::default()
            }
            Err(_) => {
                warn!(grace_secs = grace.as_secs_f64(), "fetch loop did not stop in time");
                WorkerStats::default()
            }
        };
        runtime.shutdown_timeout(grace);
        stats
    }
}

impl Drop for FetchWorker {
    fn drop(&mut self) {
        self.signal_stop();
        // Don't block on drop - let the runtime wind down on its own
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

async fn run<C: Connector>(
    config: Config,
    connector: C,
    channel: Arc<Rendezvous<Handoff>>,
    dispatcher: AckDispatcher,
    cancel: CancellationToken,
) -> WorkerStats {
    let mut stats = WorkerStats::default();

    let connected = tokio::select! {
        _ = cancel.cancelled() => None,
        result = connector.connect(&config.nats_server) => Some(result),
    };
    let connection = match connected {
        Some(Ok(connection)) => connection,
        Some(Err(err)) => {
            error!(server = %config.nats_server, error = %err, "failed to connect");
            stats.setup_error = Some(err.to_string());
            channel.close();
            return stats;
        }
        None => return stats,
    };
    info!(server = %config.nats_server, "connected");

    if let Err(err) = consume(&connection, &config, &channel, &cancel, &mut stats).await {
        error!(error = %err, "subscription setup failed, fetch loop aborted");
        stats.setup_error = Some(err.to_string());
    }
    channel.close();

    if !dispatcher.drain(config.shutdown_grace_duration()).await {
        warn!(
            in_flight = dispatcher.in_flight(),
            "acks still in flight when closing the connection"
        );
    }
    connection.close().await;
    info!(
        delivered = stats.delivered,
        fetches = stats.fetches,
        "fetch loop stopped"
    );
    stats
}

/// Subscribe and run the fetch loop until cancelled or the channel closes.
///
/// Only setup failures are returned; everything after that is retried.
async fn consume<N: Connection>(
    connection: &N,
    config: &Config,
    channel: &Rendezvous<Handoff>,
    cancel: &CancellationToken,
    stats: &mut WorkerStats,
) -> Result<(), BrokerError> {
    let subjects = vec![config.subject.clone()];
    // Binding to an existing stream may still work.
    if let Err(err) = connection.ensure_stream(&config.stream_name, &subjects).await {
        warn!(
            stream = %config.stream_name,
            error = %err,
            "could not create stream, trying to bind to an existing one"
        );
    }

    let options = SubscribeOptions {
        subject: config.subject.clone(),
        durable_name: config.durable_name.clone(),
        ack_wait: config.ack_wait_duration(),
    };
    let mut subscription = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        result = connection.pull_subscribe(&config.stream_name, &options) => result?,
    };
    info!("pull subscription ready");

    let fetch_wait = config.fetch_wait();
    let backoff = config.error_backoff_duration();

    loop {
        let fetched = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            result = subscription.fetch(1, fetch_wait) => result,
        };
        stats.fetches += 1;

        match fetched {
            Ok(messages) => {
                for raw in messages {
                    let message = match Message::decode(raw.payload()) {
                        Ok(message) => message,
                        Err(err) => {
                            stats.decode_failures += 1;
                            warn!(
                                error = %err,
                                payload = %String::from_utf8_lossy(raw.payload()),
                                "skipping undecodable message"
                            );
                            continue;
                        }
                    };

                    let id = message.id();
                    debug!(id, "fetched");
                    if channel.put((message, raw.into_ack())).await.is_err() {
                        debug!(id, "channel closed, message left unacked");
                        return Ok(());
                    }
                    stats.delivered += 1;
                }
            }
            Err(BrokerError::Timeout) => {
                stats.fetch_timeouts += 1;
                warn!(
                    timeout_secs = fetch_wait.as_secs_f64(),
                    "no message from upstream within fetch timeout"
                );
            }
            Err(err) => {
                stats.transport_errors += 1;
                error!(error = %err, "fetch failed");
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = sleep(backoff) => {}
                }
            }
        }

        if channel.is_closed() {
            return Ok(());
        }
    }
}
