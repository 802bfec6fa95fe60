use std::sync::Arc;

use tokio::sync::broadcast;

use sae_types::events::StorageEvent;

/// Broadcast channel connecting every tab that shares one storage backend.
#[derive(Clone)]
pub struct StorageBus {
    inner: Arc<StorageBusInner>,
}

struct StorageBusInner {
    /// Every subscribed tab receives every event, including its own.
    tx: broadcast::Sender<StorageEvent>,
}

impl StorageBus {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(StorageBusInner { tx }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.inner.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: StorageEvent) {
        let _ = self.inner.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.tx.receiver_count()
    }
}

impl Default for StorageBus {
    fn default() -> Self {
        Self::new()
    }
}
