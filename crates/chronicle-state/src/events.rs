//! Change notifications for store subscribers.
//!
//! The [`EventBus`] wraps a tokio broadcast channel. Every mutation of the
//! store publishes one or more [`StateEvent`]s; subscribers that fall more
//! than the channel capacity behind receive
//! [`broadcast::error::RecvError::Lagged`] and skip to the newest events.

use tokio::sync::broadcast;

use chronicle_types::StateEvent;

/// Default capacity of the event channel.
pub const BROADCAST_CAPACITY: usize = 256;

/// Fan-out channel for [`StateEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    /// Broadcast sender. Receivers are created on demand.
    tx: broadcast::Sender<StateEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.tx.subscribe()
    }

    /// Publish an event.
    ///
    /// Returns the number of subscribers that received it; 0 when nobody
    /// is listening.
    pub fn publish(&self, event: StateEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BROADCAST_CAPACITY)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_returns_zero() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(StateEvent::SnapshotDeleted { version: 1 }), 0);
    }

    #[test]
    fn subscribers_receive_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        bus.publish(StateEvent::SnapshotDeleted { version: 1 });
        bus.publish(StateEvent::SnapshotDeleted { version: 2 });
        assert_eq!(rx.try_recv().unwrap(), StateEvent::SnapshotDeleted { version: 1 });
        assert_eq!(rx.try_recv().unwrap(), StateEvent::SnapshotDeleted { version: 2 });
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let bus = EventBus::new(0);
        let mut rx = bus.subscribe();
        assert_eq!(bus.publish(StateEvent::SnapshotDeleted { version: 3 }), 1);
        assert!(rx.try_recv().is_ok());
    }
}
