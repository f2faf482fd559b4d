//! Single-slot rendezvous channel between the fetch loop and the iterator.
//!
//! The slot goes through three states:
//!
//! ```text
//!   empty ──put──▶ occupied ──get──▶ taken ──mark_consumed──▶ empty
//! ```
//!
//! A `put` only returns once its item went all the way back to `empty`, so
//! the producer never fetches item N+1 while item N is still in the slot or
//! still held by the consumer without having been released. The consumer side
//! blocks on a `Condvar`; the producer waits inside the async runtime without
//! parking a runtime worker.

use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

/// Why `get` returned without an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    /// Nothing arrived within the timeout
    Timeout,
    /// The channel was closed and the slot is empty
    Closed,
}

impl fmt::Display for RecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecvError::Timeout => write!(f, "timed out waiting for the next item"),
            RecvError::Closed => write!(f, "channel closed"),
        }
    }
}

impl std::error::Error for RecvError {}

/// Returned by `put` when the channel is closed. Carries the rejected item
/// back if it never reached the consumer.
#[derive(Debug, PartialEq, Eq)]
pub struct Closed<T>(pub Option<T>);

impl<T> fmt::Display for Closed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel closed")
    }
}

impl<T: fmt::Debug> std::error::Error for Closed<T> {}

struct Slot<T> {
    item: Option<T>,
    /// An item was put and has not been marked consumed yet
    outstanding: bool,
    closed: bool,
}

/// Capacity-one handoff with consumption tracking.
pub struct Rendezvous<T> {
    slot: Mutex<Slot<T>>,
    /// Wakes threads blocked in `get`
    changed: Condvar,
    /// Wakes the async producer
    released: Notify,
}

impl<T> Default for Rendezvous<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Rendezvous<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                item: None,
                outstanding: false,
                closed: false,
            }),
            changed: Condvar::new(),
            released: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand `item` to the consumer and wait until it has been released.
    ///
    /// Waits first for any previous item to be released. If the channel is
    /// closed before the consumer took the item, it is handed back in the error.
    pub async fn put(&self, item: T) -> Result<(), Closed<T>> {
        let mut item = Some(item);
        loop {
            let notified = self.released.notified();
            {
                let mut slot = self.lock();
                if slot.closed {
                    let item = item.or_else(|| slot.item.take());
                    return Err(Closed(item));
                }
                match item.take() {
                    Some(value) if !slot.outstanding => {
                        slot.item = Some(value);
                        slot.outstanding = true;
                        self.changed.notify_all();
                    }
                    Some(value) => item = Some(value),
                    None if !slot.outstanding => return Ok(()),
                    None => {}
                }
            }
            notified.await;
        }
    }

    /// Take the item, waiting at most `timeout`.
    ///
    /// An item already in the slot is still returned after `close`.
    pub fn get(&self, timeout: Duration) -> Result<T, RecvError> {
        // No representable deadline means wait without one.
        let deadline = Instant::now().checked_add(timeout);
        let mut slot = self.lock();
        loop {
            if let Some(item) = slot.item.take() {
                return Ok(item);
            }
            if slot.closed {
                return Err(RecvError::Closed);
            }
            slot = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(RecvError::Timeout);
                    }
                    self.changed
                        .wait_timeout(slot, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .changed
                    .wait(slot)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Release the slot so the producer may continue.
    pub fn mark_consumed(&self) {
        let mut slot = self.lock();
        if slot.item.is_none() {
            slot.outstanding = false;
        }
        drop(slot);
        self.changed.notify_all();
        self.released.notify_one();
    }

    /// Close the channel and wake both sides.
    pub fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_all();
        self.released.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Whether an item sits in the slot, not yet taken.
    pub fn is_occupied(&self) -> bool {
        self.lock().item.is_some()
    }

    /// Items put and not yet released: 0 or 1.
    pub fn in_flight(&self) -> usize {
        usize::from(self.lock().outstanding)
    }
}
