//! Session handles.
//!
//! A session is the hub's capability to deliver messages to one worker: a
//! single-writer `mpsc` channel plus a disposed flag. The transport adapter
//! owns the receiving half and forwards frames to the wire; tests own it
//! directly and assert on the delivered values.
//!
//! Delivery is total — it never raises to the broadcast engine or the
//! coordinators. A disposed handle or a closed channel classifies as
//! [`Delivery::Dead`]; an outbound queue that stays full past the delivery
//! timeout classifies as [`Delivery::Transient`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use brainhub_core::Delivery;

/// Default capacity of a session's outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default time a delivery may wait on a full outbound queue before it is
/// classified as transient.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opaque session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One worker-facing delivery capability.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    outbound: mpsc::Sender<Value>,
    disposed: AtomicBool,
    delivery_timeout: Duration,
}

impl Session {
    /// Create a session and hand back the receiving half of its outbound
    /// channel.
    #[must_use]
    pub fn channel(capacity: usize, delivery_timeout: Duration) -> (Arc<Self>, mpsc::Receiver<Value>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let session = Arc::new(Self {
            id: SessionId::new(),
            outbound: tx,
            disposed: AtomicBool::new(false),
            delivery_timeout,
        });
        (session, rx)
    }

    /// This session's id.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Mark the session unusable. Idempotent; any later delivery classifies
    /// as dead.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    /// Whether the session has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Deliver one message. Total: classifies instead of raising.
    pub async fn deliver(&self, message: Value) -> Delivery {
        if self.is_disposed() {
            return Delivery::Dead("disposed handle".into());
        }
        match tokio::time::timeout(self.delivery_timeout, self.outbound.send(message)).await {
            Ok(Ok(())) => Delivery::Ok,
            Ok(Err(_)) => {
                // Receiver dropped: the transport side is gone for good.
                self.dispose();
                Delivery::Dead("outbound channel closed".into())
            },
            Err(_) => Delivery::Transient("outbound queue full".into()),
        }
    }
}
