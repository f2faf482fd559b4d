//! The blocking task iterator.
//!
//! ## Quick Start
//!
//! ```ignore
//! use natscale::{Config, Delivery, TaskIter};
//!
//! let config = Config::new("hpc.tasks.*").timeout_secs(3.0);
//! for delivery in TaskIter::open(config)? {
//!     let (message, ack) = delivery.into_parts();
//!     println!("{}", message);
//!     if let Some(ack) = ack {
//!         ack.ack();
//!     }
//! }
//! ```
//!
//! In auto-ack mode a message is acknowledged when the *next* one is pulled,
//! i.e. once the consumer demonstrably moved past it. A crash in between
//! leads to a redelivery, never to a lost message. The last message of a run
//! is therefore not acknowledged unless `flush_on_close` is set.

use std::fmt;
use std::iter::FusedIterator;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::broker::Connector;
use crate::channel::RecvError;
use crate::config::Config;
use crate::dispatch::AckHandle;
use crate::error::OpenError;
use crate::message::Message;
use crate::worker::{FetchWorker, WorkerStats};

/// One item of a [`TaskIter`].
#[derive(Debug)]
pub enum Delivery {
    /// Auto-ack mode: acknowledged on the next pull
    Auto(Message),
    /// Manual mode: acknowledge with the handle
    Manual(Message, AckHandle),
}

impl Delivery {
    pub fn message(&self) -> &Message {
        match self {
            Delivery::Auto(message) | Delivery::Manual(message, _) => message,
        }
    }

    pub fn into_message(self) -> Message {
        self.into_parts().0
    }

    /// Split into the message and, in manual mode, its ack handle.
    pub fn into_parts(self) -> (Message, Option<AckHandle>) {
        match self {
            Delivery::Auto(message) => (message, None),
            Delivery::Manual(message, handle) => (message, Some(handle)),
        }
    }
}

/// Pull-based iterator over a durable subscription.
///
/// Yields [`Delivery::Auto`] or [`Delivery::Manual`] depending on
/// `Config::auto_ack`. Iteration ends (and stays ended) when no message arrives
/// within `Config::timeout` or when the background loop gives up; the loop is
/// stopped and the connection closed at that point. Dropping the iterator does
/// the same early; [`close`](Self::close) also returns the loop's statistics.
///
/// If the loop cannot connect or bind the subscription, the next pull ends
/// iteration right away instead of first waiting out `Config::timeout`. The
/// failure is not raised; it is reported in [`WorkerStats::setup_error`].
///
/// Opening, iterating and closing are blocking operations and must not be
/// called from inside an async runtime.
pub struct TaskIter {
    worker: Option<FetchWorker>,
    auto_ack: bool,
    pull_timeout: Duration,
    flush_on_close: bool,
    shutdown_grace: Duration,
    last_pending: Option<AckHandle>,
    pulled: usize,
    finished: bool,
    stats: Option<WorkerStats>,
}

impl TaskIter {
    /// Connect to the NATS server named in `config`.
    #[cfg(feature = "nats")]
    pub fn open(config: Config) -> Result<Self, OpenError> {
        Self::with_connector(config, crate::broker::NatsConnector::with_name("natscale"))
    }

    /// Start iterating with any broker implementation.
    pub fn with_connector<C: Connector>(config: Config, connector: C) -> Result<Self, OpenError> {
        config.validate()?;
        info!(
            server = %config.nats_server,
            subject = %config.subject,
            auto_ack = config.auto_ack,
            "starting task iterator"
        );

        let auto_ack = config.auto_ack;
        let pull_timeout = config.pull_timeout();
        let flush_on_close = config.flush_on_close;
        let shutdown_grace = config.shutdown_grace_duration();
        let worker = FetchWorker::spawn(config, connector)?;

        Ok(Self {
            worker: Some(worker),
            auto_ack,
            pull_timeout,
            flush_on_close,
            shutdown_grace,
            last_pending: None,
            pulled: 0,
            finished: false,
            stats: None,
        })
    }

    pub fn is_auto_ack(&self) -> bool {
        self.auto_ack
    }

    /// Messages yielded so far.
    pub fn pulled(&self) -> usize {
        self.pulled
    }

    /// `id` of the message whose auto-ack is still deferred.
    pub fn pending_ack(&self) -> Option<i64> {
        self.last_pending.as_ref().map(AckHandle::message_id)
    }

    /// Stop the background loop, close the connection and return its statistics.
    ///
    /// The loop is already stopped once iteration has ended; this then only
    /// returns the statistics.
    pub fn close(mut self) -> WorkerStats {
        self.shutdown();
        self.stats.take().unwrap_or_default()
    }

    fn shutdown(&mut self) {
        self.finished = true;
        let Some(worker) = self.worker.take() else {
            return;
        };

        if let Some(pending) = self.last_pending.take() {
            if self.flush_on_close {
                debug!(id = pending.message_id(), "flushing last pending ack");
                pending.ack();
            } else {
                // Left for the broker to redeliver.
                debug!(id = pending.message_id(), "last auto-ack not sent");
            }
        }

        let stats = worker.stop(self.shutdown_grace);
        info!(pulled = self.pulled, delivered = stats.delivered, "task iterator closed");
        self.stats = Some(stats);
    }

    fn pull(&mut self) -> Option<Delivery> {
        let worker = self.worker.as_ref()?;
        let (message, capability) = match worker.channel().get(self.pull_timeout) {
            Ok(handoff) => handoff,
            Err(RecvError::Timeout) => {
                warn!(
                    timeout_secs = self.pull_timeout.as_secs_f64(),
                    "no task within timeout, stopping iteration"
                );
                return None;
            }
            Err(RecvError::Closed) => {
                warn!("fetch loop stopped, ending iteration");
                return None;
            }
        };

        let handle = worker.dispatcher().wrap(capability, message.id());
        let delivery = if self.auto_ack {
            // The consumer asked for the next message, so it is done with the last one.
            if let Some(previous) = self.last_pending.replace(handle) {
                previous.ack();
            }
            Delivery::Auto(message)
        } else {
            Delivery::Manual(message, handle)
        };

        worker.channel().mark_consumed();
        self.pulled += 1;
        debug!(id = delivery.message().id(), "yielding task");
        Some(delivery)
    }
}

impl Iterator for TaskIter {
    type Item = Delivery;

    fn next(&mut self) -> Option<Delivery> {
        if self.finished {
            return None;
        }
        let delivery = self.pull();
        if delivery.is_none() {
            self.shutdown();
        }
        delivery
    }
}

impl FusedIterator for TaskIter {}

impl fmt::Debug for TaskIter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskIter")
            .field("auto_ack", &self.auto_ack)
            .field("pull_timeout", &self.pull_timeout)
            .field("pulled", &self.pulled)
            .field("pending_ack", &self.pending_ack())
            .field("finished", &self.finished)
            .finish()
    }
}

impl Drop for TaskIter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
