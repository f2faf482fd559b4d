//! Submit-and-forget acknowledgment dispatch.
//!
//! An [`AckCapability`] has to run on the runtime that owns the
//! subscription. The dispatcher binds each capability to that runtime when the
//! handle is created; invoking the handle from the consumer's thread spawns the
//! ack there and returns at once. Completion and failure are only logged.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::broker::AckCapability;

/// Spawns acknowledgments onto the background runtime.
#[derive(Clone)]
pub struct AckDispatcher {
    runtime: Handle,
    tracker: TaskTracker,
    closed: Arc<AtomicBool>,
}

impl AckDispatcher {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            tracker: TaskTracker::new(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bind `capability` to this dispatcher's runtime.
    pub fn wrap(&self, capability: AckCapability, message_id: i64) -> AckHandle {
        AckHandle {
            message_id,
            capability: Mutex::new(Some(capability)),
            dispatcher: self.clone(),
        }
    }

    /// Spawn `capability` on the runtime without waiting for it.
    ///
    /// Returns `false` if the dispatcher is already closed; the capability is
    /// dropped and nothing is sent.
    pub fn dispatch(&self, capability: AckCapability, message_id: i64) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            warn!(id = message_id, "ack after iterator closed, dropped");
            return false;
        }
        self.tracker.spawn_on(
            async move {
                match capability.await {
                    Ok(()) => debug!(id = message_id, "acked"),
                    Err(err) => warn!(id = message_id, error = %err, "ack failed"),
                }
            },
            &self.runtime,
        );
        true
    }

    /// Acks spawned and not finished yet.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Refuse further dispatches and wait up to `grace` for spawned acks.
    ///
    /// Returns whether every ack finished in time.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.closed.store(true, Ordering::SeqCst);
        self.tracker.close();
        tokio::time::timeout(grace, self.tracker.wait()).await.is_ok()
    }
}

/// One-shot acknowledgment for a single message.
///
/// Calling [`ack`](Self::ack) more than once sends a single acknowledgment.
/// Dropping the handle without acking leaves the message to the broker's
/// redelivery timer.
pub struct AckHandle {
    message_id: i64,
    capability: Mutex<Option<AckCapability>>,
    dispatcher: AckDispatcher,
}

impl AckHandle {
    /// Dispatch the acknowledgment. Returns `true` only for the call that
    /// actually submitted it.
    pub fn ack(&self) -> bool {
        let capability = self
            .capability
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match capability {
            Some(capability) => self.dispatcher.dispatch(capability, self.message_id),
            None => {
                debug!(id = self.message_id, "ack already dispatched");
                false
            }
        }
    }

    /// `id` of the message this handle acknowledges.
    pub fn message_id(&self) -> i64 {
        self.message_id
    }

    /// Whether `ack` has been called.
    pub fn is_dispatched(&self) -> bool {
        self.capability
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckHandle")
            .field("message_id", &self.message_id)
            .field("dispatched", &self.is_dispatched())
            .finish()
    }
}
