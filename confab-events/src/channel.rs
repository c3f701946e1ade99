//! In-process event broadcasting.
//!
//! Each world owns one channel. Publishing is non-blocking: if no subscriber
//! is attached the event is dropped, and a subscriber that stops polling will
//! lag and miss events rather than stall the publisher.

use crate::WorldEvent;
use tokio::sync::broadcast;
use tracing::debug;

/// Default buffer capacity for a world channel.
///
/// The capacity bounds how many events a slow subscriber may fall behind
/// before it starts missing messages.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Publish/subscribe channel for one world's events.
#[derive(Debug, Clone)]
pub struct WorldChannel {
    tx: broadcast::Sender<WorldEvent>,
}

impl WorldChannel {
    /// Create a channel with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to every subscriber.
    ///
    /// Non-blocking. Returns the number of subscribers that received the
    /// event (zero when nobody is listening).
    pub fn publish(&self, event: WorldEvent) -> usize {
        let event_type = event.event_type();
        match self.tx.send(event) {
            Ok(receiver_count) => {
                debug!(event_type, receivers = receiver_count, "published event");
                receiver_count
            }
            Err(_) => {
                // No receivers attached; the event is dropped.
                debug!(event_type, "no receivers for event");
                0
            }
        }
    }

    /// Subscribe to the event stream.
    ///
    /// The receiver observes events in publication order and must be polled
    /// to avoid lagging. Dropping the receiver detaches the subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<WorldEvent> {
        self.tx.subscribe()
    }

    /// Number of currently attached subscribers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for WorldChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

// =============================================================================
// TESTS
// =============================================================================
