//! Change signals the preference store listens to

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::storage::{ChangeEvent, KeyValueStorage, CHANGE_CHANNEL_CAPACITY};

/// Publish/subscribe channel for change notifications
pub trait ChangeBroadcaster: Send + Sync {
    fn publish(&self, event: ChangeEvent);

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}

/// In-process event bus shared by subscribers in one context
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChangeEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { tx }
    }
}

impl ChangeBroadcaster for EventBus {
    fn publish(&self, event: ChangeEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }
}

/// Change signal of a storage backend
///
/// Writes through the storage already raise the signal, so `publish` has
/// nothing left to do.
#[derive(Clone)]
pub struct StorageSignal {
    storage: Arc<dyn KeyValueStorage>,
}

impl StorageSignal {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self { storage }
    }
}

impl ChangeBroadcaster for StorageSignal {
    fn publish(&self, _event: ChangeEvent) {}

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.storage.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ContextId, MemoryStorage};

    #[tokio::test]
    async fn test_event_bus_delivers_to_all_subscribers() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        let origin = ContextId::next();

        bus.publish(ChangeEvent::new("k", origin));

        assert_eq!(a.recv().await.unwrap().origin, origin);
        assert_eq!(b.recv().await.unwrap().key.as_deref(), Some("k"));
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        EventBus::new().publish(ChangeEvent::new("k", ContextId::next()));
    }

    #[tokio::test]
    async fn test_storage_signal_forwards_storage_writes() {
        let storage = MemoryStorage::new();
        let signal = StorageSignal::new(Arc::new(storage.clone()));
        let mut rx = signal.subscribe();

        storage.set("k", "1").unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.key.as_deref(), Some("k"));
        assert_eq!(event.origin, storage.context());
    }
}
