//! Broker seam - the async collaborator the fetch loop talks to.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐ connect ┌──────────────┐ pull_subscribe ┌──────────────┐
//! │  Connector   │────────▶│  Connection  │───────────────▶│ Subscription │
//! └──────────────┘         │ ensure_stream│                │ fetch(1, t)  │
//!                          │ close        │                └──────┬───────┘
//!                          └──────────────┘                       │
//!                                                                  ▼
//!                                                         ┌──────────────┐
//!                                                         │  RawMessage  │
//!                                                         │ payload      │
//!                                                         │ into_ack     │
//!                                                         └──────────────┘
//! ```
//!
//! Implementations:
//! - `NatsConnector` - NATS JetStream via `async-nats` (feature `nats`)
//! - `InMemoryBroker` - in-process broker for tests and single-process use
//!
//! All methods return `Send` futures: they run on the iterator's background
//! runtime, never on the consumer's thread.

mod in_memory;
#[cfg(feature = "nats")]
mod nats;

use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::BrokerError;

pub use in_memory::{InMemoryBroker, InMemoryConnection, InMemoryMessage, InMemorySubscription};
#[cfg(feature = "nats")]
pub use nats::{NatsConnection, NatsConnector, NatsMessage, NatsSubscription};

/// A pending acknowledgment.
///
/// Nothing reaches the broker until the future is polled, and polling
/// consumes it, so an `AckCapability` can be used at most once. The future
/// must be driven on the runtime that owns the subscription.
pub type AckCapability = BoxFuture<'static, Result<(), BrokerError>>;

/// Options for creating or binding a durable pull consumer.
#[derive(Clone, Debug, PartialEq)]
pub struct SubscribeOptions {
    pub subject: String,
    pub durable_name: String,
    /// How long the broker waits for an ack before redelivering
    pub ack_wait: Option<Duration>,
}

/// Opens connections to a broker.
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    fn connect(
        &self,
        server: &str,
    ) -> impl Future<Output = Result<Self::Connection, BrokerError>> + Send;
}

/// An established broker connection.
pub trait Connection: Send + Sync + 'static {
    type Subscription: Subscription;

    /// Make sure `name` exists and captures `subjects`. Succeeds if it already exists.
    fn ensure_stream(
        &self,
        name: &str,
        subjects: &[String],
    ) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Bind a durable pull consumer.
    fn pull_subscribe(
        &self,
        stream: &str,
        options: &SubscribeOptions,
    ) -> impl Future<Output = Result<Self::Subscription, BrokerError>> + Send;

    /// Flush and close. Acks issued afterwards may fail.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// A pull subscription.
pub trait Subscription: Send + 'static {
    type Message: RawMessage;

    /// Request up to `batch` messages, waiting at most `timeout`.
    ///
    /// Returns `BrokerError::Timeout` when nothing arrived in time.
    fn fetch(
        &mut self,
        batch: usize,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<Self::Message>, BrokerError>> + Send;
}

/// A message as delivered by the broker, before decoding.
pub trait RawMessage: Send + 'static {
    fn payload(&self) -> &[u8];

    /// Give up the message, keeping only the ability to acknowledge it.
    fn into_ack(self) -> AckCapability;
}
