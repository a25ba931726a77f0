//! Durable key/value storage for user preferences
//!
//! The preference store only needs get/set/remove by string key plus a signal
//! when another execution context changes a key. `FileStorage` persists to the
//! XDG data directory; `MemoryStorage` keeps values in-process and shares them
//! between handles.

mod file;
mod memory;
mod watcher;

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::broadcast;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use watcher::{StorageWatcher, WatchConfig};

/// Capacity of every change channel
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Identifies the execution context (storage handle or preference store) a change came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    /// Origin used for changes observed on disk that no live handle made
    pub const EXTERNAL: ContextId = ContextId(0);

    /// Allocates a fresh, process-unique id
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ContextId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Notification that a stored key changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// The changed key, or `None` when the receiver must assume everything changed
    pub key: Option<String>,
    /// Who made the change
    pub origin: ContextId,
}

impl ChangeEvent {
    pub fn new(key: impl Into<String>, origin: ContextId) -> Self {
        Self {
            key: Some(key.into()),
            origin,
        }
    }

    /// Whether a listener interested in `key` should react
    pub fn concerns(&self, key: &str) -> bool {
        self.key.as_deref().map_or(true, |k| k == key)
    }
}

/// Errors that can occur when reading or writing durable storage
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Filesystem operation failed
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Value could not be encoded or decoded
    #[error("Stored value is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Key contains characters that cannot be stored
    #[error("Invalid storage key: '{0}'")]
    InvalidKey(String),

    /// Storage currently refuses writes
    #[error("Storage is read-only")]
    ReadOnly,
}

/// Narrow key/value contract the preference store depends on
pub trait KeyValueStorage: Send + Sync {
    /// Id stamped on change events caused by this handle
    fn context(&self) -> ContextId;

    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;

    /// Replaces the whole value stored under `key`
    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError>;

    fn remove(&self, key: &str) -> Result<(), PersistenceError>;

    /// Receives change events for writes made through any handle or context
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}

/// Rejects keys that cannot be used as a file name component
pub(crate) fn validate_key(key: &str) -> Result<(), PersistenceError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(PersistenceError::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_ids_are_unique() {
        let a = ContextId::next();
        let b = ContextId::next();
        assert_ne!(a, b);
        assert_ne!(a, ContextId::EXTERNAL);
    }

    #[test]
    fn test_event_concerns_key() {
        let event = ChangeEvent::new("favorite_publication_ids", ContextId::EXTERNAL);
        assert!(event.concerns("favorite_publication_ids"));
        assert!(!event.concerns("other"));

        let wildcard = ChangeEvent {
            key: None,
            origin: ContextId::EXTERNAL,
        };
        assert!(wildcard.concerns("anything"));
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("favorite_publication_ids").is_ok());
        assert!(validate_key("a-b_c1").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("../escape").is_err());
        assert!(validate_key("with space").is_err());
    }
}
