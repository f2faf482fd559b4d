//! NATS JetStream implementation of the broker seam.
//!
//! Requires the `nats` feature (on by default). Streams are created on demand
//! and consumers are durable, explicit-ack pull consumers.

use std::time::Duration;

use async_nats::jetstream::{self, consumer::pull, consumer::AckPolicy, Context};
use futures::StreamExt;
use tracing::debug;

use super::{AckCapability, Connection, Connector, RawMessage, SubscribeOptions, Subscription};
use crate::error::BrokerError;

/// Connects to a NATS server and opens a JetStream context.
#[derive(Clone, Debug, Default)]
pub struct NatsConnector {
    /// Connection name reported to the server
    pub name: Option<String>,
}

impl NatsConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

impl Connector for NatsConnector {
    type Connection = NatsConnection;

    async fn connect(&self, server: &str) -> Result<NatsConnection, BrokerError> {
        let mut options = async_nats::ConnectOptions::new();
        if let Some(name) = &self.name {
            options = options.name(name.clone());
        }
        let client = options
            .connect(server)
            .await
            .map_err(|e| BrokerError::ConnectionFailed(format!("{}: {}", server, e)))?;
        let context = jetstream::new(client.clone());
        Ok(NatsConnection { client, context })
    }
}

/// A live NATS connection with its JetStream context.
pub struct NatsConnection {
    client: async_nats::Client,
    context: Context,
}

impl Connection for NatsConnection {
    type Subscription = NatsSubscription;

    async fn ensure_stream(&self, name: &str, subjects: &[String]) -> Result<(), BrokerError> {
        self.context
            .get_or_create_stream(jetstream::stream::Config {
                name: name.to_string(),
                subjects: subjects.to_vec(),
                ..Default::default()
            })
            .await
            .map(|_| ())
            .map_err(|e| BrokerError::Setup(format!("stream {}: {}", name, e)))
    }

    async fn pull_subscribe(
        &self,
        stream: &str,
        options: &SubscribeOptions,
    ) -> Result<NatsSubscription, BrokerError> {
        let stream = self
            .context
            .get_stream(stream)
            .await
            .map_err(|e| BrokerError::Setup(format!("stream {}: {}", stream, e)))?;

        let mut config = pull::Config {
            durable_name: Some(options.durable_name.clone()),
            filter_subject: options.subject.clone(),
            ack_policy: AckPolicy::Explicit,
            ..Default::default()
        };
        if let Some(ack_wait) = options.ack_wait {
            config.ack_wait = ack_wait;
        }

        let consumer = stream
            .get_or_create_consumer(&options.durable_name, config)
            .await
            .map_err(|e| {
                BrokerError::Setup(format!("consumer {}: {}", options.durable_name, e))
            })?;
        Ok(NatsSubscription { consumer })
    }

    async fn close(self) {
        if let Err(err) = self.client.flush().await {
            debug!(error = %err, "flush before close failed");
        }
    }
}

/// Durable pull consumer.
pub struct NatsSubscription {
    consumer: jetstream::consumer::Consumer<pull::Config>,
}

impl Subscription for NatsSubscription {
    type Message = NatsMessage;

    async fn fetch(
        &mut self,
        batch: usize,
        timeout: Duration,
    ) -> Result<Vec<NatsMessage>, BrokerError> {
        let mut messages = self
            .consumer
            .fetch()
            .max_messages(batch.max(1))
            .expires(timeout)
            .messages()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;

        let mut fetched = Vec::new();
        while let Some(message) = messages.next().await {
            let message = message.map_err(|e| BrokerError::Transport(e.to_string()))?;
            fetched.push(NatsMessage { inner: message });
        }

        if fetched.is_empty() {
            Err(BrokerError::Timeout)
        } else {
            Ok(fetched)
        }
    }
}

/// A JetStream message awaiting acknowledgment.
pub struct NatsMessage {
    inner: jetstream::Message,
}

impl RawMessage for NatsMessage {
    fn payload(&self) -> &[u8] {
        &self.inner.payload
    }

    fn into_ack(self) -> AckCapability {
        Box::pin(async move {
            self.inner
                .ack()
                .await
                .map_err(|e| BrokerError::Transport(e.to_string()))
        })
    }
}
