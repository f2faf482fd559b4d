//! Task iterator integration tests.
//!
//! Drives `TaskIter` end to end against the in-memory broker:
//! - Manual acknowledgment through handles
//! - Deferred automatic acknowledgment
//! - Fetch loop recovery and backpressure
//! - Lifecycle: timeouts, setup failures, closing

mod support;
mod auto_ack;
mod lifecycle;
mod loop_recovery;
mod manual_ack;
