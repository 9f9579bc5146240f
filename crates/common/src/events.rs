//! Lifecycle notifications for UI and cache observers
//!
//! The credential manager, the failure gate, and the request pipeline publish
//! on an `EventBus` handed to them at construction. Observers subscribe for a
//! `broadcast::Receiver`; a bus with no subscribers silently drops events.

use std::time::Duration;

use tokio::sync::broadcast;
use tracing::debug;

/// Fire-and-forget notifications about the session and the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A renewal succeeded and a fresh credential pair was stored.
    CredentialRenewed,
    /// A renewal failed; stored credentials were cleared.
    CredentialRenewalFailed { reason: String },
    /// A request was rejected as unauthorized (or could not be authorized).
    RequestUnauthorized { path: String },
    /// The circuit opened; calls fail fast until `retry_in` elapses.
    ServiceUnavailable { retry_in: Duration },
}

impl LifecycleEvent {
    /// Stable label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            LifecycleEvent::CredentialRenewed => "credential-renewed",
            LifecycleEvent::CredentialRenewalFailed { .. } => "credential-renewal-failed",
            LifecycleEvent::RequestUnauthorized { .. } => "request-unauthorized",
            LifecycleEvent::ServiceUnavailable { .. } => "service-unavailable",
        }
    }
}

/// Cloneable publish handle over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` undelivered events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: LifecycleEvent) {
        let label = event.label();
        match self.tx.send(event) {
            Ok(receivers) => debug!(event = label, receivers, "published lifecycle event"),
            Err(_) => debug!(event = label, "no lifecycle subscribers"),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
