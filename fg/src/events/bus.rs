//! Event Bus - pub/sub for flow control events
//!
//! Components emit, operators (CLI, log shippers, tests) subscribe. Emitting
//! never blocks the admission path.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::types::{EventRecord, FlowControlEvent};

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1_024;

/// Broadcast channel of operator-visible events
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<EventRecord>,
}

impl EventBus {
    /// Create a new event bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Create a new event bus with default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit an event to all subscribers
    ///
    /// Fire-and-forget: with no subscribers the event is dropped, and slow
    /// subscribers lose the oldest events.
    pub fn emit(&self, event: FlowControlEvent) {
        debug!(
            event_type = event.event_type(),
            priority_level = event.priority_level(),
            "EventBus::emit"
        );
        // No subscribers is OK
        let _ = self.tx.send(EventRecord::new(event));
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Create an event bus wrapped in an Arc for shared ownership
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::with_default_capacity())
}
