//! Blocking, one-at-a-time consumption of a JetStream pull subscription.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────── background runtime ────────────────────────┐
//! │  fetch loop: connect → ensure_stream → pull_subscribe              │
//! │      loop { fetch(1) → decode → put((Message, AckCapability)) }    │
//! │  ack tasks spawned by the AckDispatcher                            │
//! └───────────────────────────────┬────────────────────────────────────┘
//!                                 │ Rendezvous (capacity one)
//! ┌───────────────────────────────▼────────────────────────────────────┐
//! │  TaskIter (caller's thread)                                        │
//! │      get(timeout) → ack previous (auto) → mark_consumed → yield    │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The broker is only ever asked for the next message after the consumer
//! took and released the previous one, and acknowledgments always run on
//! the background runtime.

pub mod broker;
mod channel;
mod config;
mod dispatch;
mod error;
mod iter;
mod message;
mod worker;

pub use channel::{Closed, Rendezvous, RecvError};
pub use config::{Config, DEFAULT_DURABLE, DEFAULT_SERVER, DEFAULT_STREAM};
pub use dispatch::{AckDispatcher, AckHandle};
pub use error::{BrokerError, ConfigError, DecodeError, OpenError};
pub use iter::{Delivery, TaskIter};
pub use message::Message;
pub use worker::{FetchWorker, Handoff, WorkerStats};
