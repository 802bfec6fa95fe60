use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A storage mutation announced to every other tab sharing the same storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEvent {
    /// Unique per published event, used to drop duplicates.
    pub id: Uuid,
    /// Tab that performed the write. Tabs never deliver their own events.
    pub origin: Uuid,
    pub key: String,
    /// New value, or `None` when the key was removed.
    pub new_value: Option<String>,
    pub at: DateTime<Utc>,
}

impl StorageEvent {
    pub fn new(origin: Uuid, key: impl Into<String>, new_value: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            origin,
            key: key.into(),
            new_value,
            at: Utc::now(),
        }
    }

    pub fn is_removal(&self) -> bool {
        self.new_value.is_none()
    }
}
