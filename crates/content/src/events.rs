//! Event Bus - lifecycle notifications of a content session
//!
//! Design: Type-safe events on a broadcast channel.
//! Use enums, not trait objects.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::registry::UsageSnapshot;

/// Session events that can be published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContentEvent {
    Initialized { url: String },
    Activated { selectors: Vec<String> },
    Deactivated,
    /// Bulk-release happened; `snapshot` is the usage just before it
    Released { snapshot: UsageSnapshot },
    ErrorReported { message: String },
    TornDown,
}

/// Simple event bus using tokio broadcast channel
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ContentEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    /// Publish an event
    pub fn publish(&self, event: ContentEvent) {
        let _ = self.tx.send(event); // Ignore error if no subscribers
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<ContentEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(ContentEvent::Deactivated);
        bus.publish(ContentEvent::Activated {
            selectors: vec![".price".to_string()],
        });

        assert_eq!(rx.recv().await.unwrap(), ContentEvent::Deactivated);
        match rx.recv().await {
            Ok(ContentEvent::Activated { selectors }) => assert_eq!(selectors, vec![".price"]),
            other => panic!("Expected Activated event, got {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(ContentEvent::TornDown);
    }
}
