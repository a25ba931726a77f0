//! Process-local storage shared between handles

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::{ChangeEvent, ContextId, KeyValueStorage, PersistenceError, CHANGE_CHANNEL_CAPACITY};

#[derive(Debug)]
struct Shared {
    values: Mutex<HashMap<String, String>>,
    changes: broadcast::Sender<ChangeEvent>,
    read_only: AtomicBool,
}

/// In-memory storage whose handles behave like separate contexts over one store
///
/// Cloning keeps the same context; `new_context` opens another context on the
/// same values, which then sees this handle's writes as foreign changes.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    shared: Arc<Shared>,
    context: ContextId,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                values: Mutex::new(HashMap::new()),
                changes,
                read_only: AtomicBool::new(false),
            }),
            context: ContextId::next(),
        }
    }

    /// Opens another context over the same stored values
    pub fn new_context(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            context: ContextId::next(),
        }
    }

    /// Makes every subsequent write fail with `PersistenceError::ReadOnly`
    pub fn set_read_only(&self, read_only: bool) {
        self.shared.read_only.store(read_only, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), PersistenceError> {
        if self.shared.read_only.load(Ordering::SeqCst) {
            Err(PersistenceError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn notify(&self, key: &str) {
        // No receivers is fine
        let _ = self.shared.changes.send(ChangeEvent::new(key, self.context));
    }
}

impl KeyValueStorage for MemoryStorage {
    fn context(&self) -> ContextId {
        self.context
    }

    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.shared.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        self.check_writable()?;
        self.shared
            .values
            .lock()
            .insert(key.to_string(), value.to_string());
        self.notify(key);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        self.check_writable()?;
        let removed = self.shared.values.lock().remove(key).is_some();
        if removed {
            self.notify(key);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.shared.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_then_get() {
        let storage = MemoryStorage::new();
        storage.set("key", "[\"a\"]").unwrap();
        assert_eq!(storage.get("key").unwrap().as_deref(), Some("[\"a\"]"));
    }

    #[test]
    fn test_get_missing_is_none() {
        let storage = MemoryStorage::new();
        assert!(storage.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_contexts_share_values_but_not_ids() {
        let tab_a = MemoryStorage::new();
        let tab_b = tab_a.new_context();

        tab_a.set("key", "value").unwrap();

        assert_eq!(tab_b.get("key").unwrap().as_deref(), Some("value"));
        assert_ne!(tab_a.context(), tab_b.context());
        assert_eq!(tab_a.clone().context(), tab_a.context());
    }

    #[test]
    fn test_write_emits_event_with_origin() {
        let tab_a = MemoryStorage::new();
        let tab_b = tab_a.new_context();
        let mut rx = tab_b.subscribe();

        tab_a.set("key", "value").unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event, ChangeEvent::new("key", tab_a.context()));
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let storage = MemoryStorage::new();
        storage.set("key", "before").unwrap();
        storage.set_read_only(true);

        assert!(matches!(
            storage.set("key", "after"),
            Err(PersistenceError::ReadOnly)
        ));
        assert!(storage.remove("key").is_err());
        assert_eq!(storage.get("key").unwrap().as_deref(), Some("before"));
    }

    #[test]
    fn test_remove_missing_key_is_silent() {
        let storage = MemoryStorage::new();
        let mut rx = storage.subscribe();

        storage.remove("missing").unwrap();

        assert!(rx.try_recv().is_err());
    }
}
