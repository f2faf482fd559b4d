//! In-memory broker for testing and single-process scenarios.
//!
//! This module provides a thread-safe broker that implements the whole
//! broker seam, useful for:
//! - Unit and integration testing without a NATS server
//! - Single-process applications
//! - Observing acknowledgments and injecting faults

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::time::sleep;

use super::{AckCapability, Connection, Connector, RawMessage, SubscribeOptions, Subscription};
use crate::error::BrokerError;
use crate::message::Message;

const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// In-memory broker.
///
/// Features:
/// - Thread-safe (handles share state via `Clone`)
/// - Messages are stored in an append-only log
/// - Each durable consumer tracks its own read position, so a new
///   subscription with the same durable name resumes where the last one stopped
/// - Acknowledged sequence numbers are recorded in order
/// - Fetched-but-unacknowledged messages are not redelivered
///
/// ## Example
///
/// ```
/// use natscale::broker::InMemoryBroker;
///
/// let broker = InMemoryBroker::new();
/// broker.publish("hpc.tasks.a", br#"{"id": 1}"#.to_vec());
/// assert_eq!(broker.len(), 1);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<State>>,
    acks: Arc<AckLog>,
}

#[derive(Default)]
struct State {
    log: Vec<Stored>,
    streams: HashMap<String, Vec<String>>,
    positions: HashMap<String, usize>,
    fetches: usize,
    delivered: usize,
    transport_faults: usize,
    fail_connect: bool,
    fail_subscribe: bool,
    fail_stream_setup: bool,
    open_connections: usize,
}

struct Stored {
    seq: u64,
    subject: String,
    payload: Vec<u8>,
}

#[derive(Default)]
struct AckLog {
    acked: Mutex<Vec<(u64, Vec<u8>)>>,
    changed: Condvar,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acked(&self) -> MutexGuard<'_, Vec<(u64, Vec<u8>)>> {
        self.acks.acked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a message. Returns its sequence number (starting at 1).
    pub fn publish(&self, subject: impl Into<String>, payload: Vec<u8>) -> u64 {
        let mut state = self.state();
        let seq = state.log.len() as u64 + 1;
        state.log.push(Stored {
            seq,
            subject: subject.into(),
            payload,
        });
        seq
    }

    /// Encode and append a message.
    pub fn publish_message(&self, subject: impl Into<String>, message: &Message) -> u64 {
        self.publish(subject, message.encode())
    }

    /// Total number of messages in the log.
    pub fn len(&self) -> usize {
        self.state().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().log.is_empty()
    }

    /// Streams created so far, with their subjects.
    pub fn streams(&self) -> HashMap<String, Vec<String>> {
        self.state().streams.clone()
    }

    /// Number of fetch calls served, including ones that timed out.
    pub fn fetch_count(&self) -> usize {
        self.state().fetches
    }

    /// Number of messages handed out by fetch.
    pub fn delivered_count(&self) -> usize {
        self.state().delivered
    }

    /// Connections that have been opened and not yet closed.
    pub fn open_connections(&self) -> usize {
        self.state().open_connections
    }

    /// Current read position of a durable consumer.
    pub fn position(&self, durable: &str) -> usize {
        self.state().positions.get(durable).copied().unwrap_or(0)
    }

    /// Make the next `count` fetches fail with a transport error.
    pub fn inject_transport_errors(&self, count: usize) {
        self.state().transport_faults = count;
    }

    /// Make every connect attempt fail.
    pub fn fail_connect(&self, fail: bool) {
        self.state().fail_connect = fail;
    }

    /// Make every subscribe attempt fail.
    pub fn fail_subscribe(&self, fail: bool) {
        self.state().fail_subscribe = fail;
    }

    /// Make every `ensure_stream` call fail, as on a server without JetStream.
    pub fn fail_stream_setup(&self, fail: bool) {
        self.state().fail_stream_setup = fail;
    }

    /// Acknowledged sequence numbers, in ack order.
    pub fn acknowledged(&self) -> Vec<u64> {
        self.acked().iter().map(|(seq, _)| *seq).collect()
    }

    /// `id`s of acknowledged messages, in ack order. Undecodable payloads are skipped.
    pub fn acknowledged_ids(&self) -> Vec<i64> {
        self.acked()
            .iter()
            .filter_map(|(_, payload)| Message::decode(payload).ok())
            .map(|msg| msg.id())
            .collect()
    }

    /// Block until at least `count` acks were recorded or `timeout` elapsed.
    ///
    /// Returns whether the count was reached.
    pub fn wait_for_acks(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut acked = self.acked();
        while acked.len() < count {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            acked = self
                .acks
                .changed
                .wait_timeout(acked, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    fn record_ack(&self, seq: u64, payload: Vec<u8>) {
        self.acked().push((seq, payload));
        self.acks.changed.notify_all();
    }

    /// Take the next message for `durable` matching `filter`, if any.
    fn next_for(&self, durable: &str, filter: &str) -> Option<(u64, Vec<u8>)> {
        let mut state = self.state();
        let start = state.positions.get(durable).copied().unwrap_or(0);
        let found = state.log[start.min(state.log.len())..]
            .iter()
            .position(|stored| subject_matches(filter, &stored.subject))
            .map(|offset| start + offset)?;
        state.positions.insert(durable.to_string(), found + 1);
        state.delivered += 1;
        let stored = &state.log[found];
        Some((stored.seq, stored.payload.clone()))
    }
}

impl Connector for InMemoryBroker {
    type Connection = InMemoryConnection;

    async fn connect(&self, server: &str) -> Result<InMemoryConnection, BrokerError> {
        let mut state = self.state();
        if state.fail_connect {
            return Err(BrokerError::ConnectionFailed(format!(
                "{} refused the connection",
                server
            )));
        }
        state.open_connections += 1;
        Ok(InMemoryConnection {
            broker: self.clone(),
            open: Arc::new(AtomicBool::new(true)),
        })
    }
}

/// Connection handle returned by [`InMemoryBroker`].
pub struct InMemoryConnection {
    broker: InMemoryBroker,
    open: Arc<AtomicBool>,
}

impl Connection for InMemoryConnection {
    type Subscription = InMemorySubscription;

    async fn ensure_stream(&self, name: &str, subjects: &[String]) -> Result<(), BrokerError> {
        let mut state = self.broker.state();
        if state.fail_stream_setup {
            return Err(BrokerError::Setup(format!("stream {} could not be created", name)));
        }
        state
            .streams
            .entry(name.to_string())
            .or_insert_with(|| subjects.to_vec());
        Ok(())
    }

    async fn pull_subscribe(
        &self,
        stream: &str,
        options: &SubscribeOptions,
    ) -> Result<InMemorySubscription, BrokerError> {
        let state = self.broker.state();
        if state.fail_subscribe {
            return Err(BrokerError::Setup(format!(
                "consumer {} could not be created",
                options.durable_name
            )));
        }
        if !state.streams.contains_key(stream) {
            return Err(BrokerError::Setup(format!("stream {} not found", stream)));
        }
        Ok(InMemorySubscription {
            broker: self.broker.clone(),
            durable: options.durable_name.clone(),
            filter: options.subject.clone(),
            open: Arc::clone(&self.open),
        })
    }

    async fn close(self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.broker.state().open_connections -= 1;
        }
    }
}

/// Durable pull subscription on an [`InMemoryBroker`].
pub struct InMemorySubscription {
    broker: InMemoryBroker,
    durable: String,
    filter: String,
    open: Arc<AtomicBool>,
}

impl Subscription for InMemorySubscription {
    type Message = InMemoryMessage;

    async fn fetch(
        &mut self,
        batch: usize,
        timeout: Duration,
    ) -> Result<Vec<InMemoryMessage>, BrokerError> {
        {
            let mut state = self.broker.state();
            state.fetches += 1;
            if state.transport_faults > 0 {
                state.transport_faults -= 1;
                return Err(BrokerError::Transport("injected fault".into()));
            }
        }

        let deadline = Instant::now().checked_add(timeout);
        loop {
            if !self.open.load(Ordering::SeqCst) {
                return Err(BrokerError::Closed);
            }

            let mut messages = Vec::new();
            while messages.len() < batch.max(1) {
                let Some((seq, payload)) = self.broker.next_for(&self.durable, &self.filter) else {
                    break;
                };
                messages.push(InMemoryMessage {
                    seq,
                    payload,
                    broker: self.broker.clone(),
                    open: Arc::clone(&self.open),
                });
            }
            if !messages.is_empty() {
                return Ok(messages);
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(BrokerError::Timeout);
            }

            // Small sleep to avoid busy-waiting
            sleep(POLL_INTERVAL).await;
        }
    }
}

/// Message fetched from an [`InMemoryBroker`].
pub struct InMemoryMessage {
    seq: u64,
    payload: Vec<u8>,
    broker: InMemoryBroker,
    open: Arc<AtomicBool>,
}

impl InMemoryMessage {
    pub fn sequence(&self) -> u64 {
        self.seq
    }
}

impl RawMessage for InMemoryMessage {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn into_ack(self) -> AckCapability {
        Box::pin(async move {
            if !self.open.load(Ordering::SeqCst) {
                return Err(BrokerError::Closed);
            }
            self.broker.record_ack(self.seq, self.payload);
            Ok(())
        })
    }
}

/// NATS subject matching: `*` matches one token, a trailing `>` matches one or more.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern = pattern.split('.');
    let mut subject = subject.split('.');
    loop {
        match (pattern.next(), subject.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
