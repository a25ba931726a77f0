//! Persisted set of favorite publication ids
//!
//! The store loads lazily from `KeyValueStorage`, persists the whole set on
//! every mutation and reloads the whole set whenever a change signal from
//! another subscriber or context arrives. Subscribers observe the set through
//! a `watch` channel.

mod broadcast;

pub use broadcast::{ChangeBroadcaster, EventBus, StorageSignal};

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast as channel, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::storage::{ChangeEvent, ContextId, KeyValueStorage, PersistenceError};

/// Storage key holding the JSON array of ids
pub const FAVORITES_KEY: &str = "favorite_publication_ids";

/// Set of favorite ids
pub type FavoriteSet = HashSet<String>;

/// Edits that failed to persist, replayed over the next reload
#[derive(Debug, Default)]
struct Unsaved {
    added: FavoriteSet,
    removed: FavoriteSet,
}

impl Unsaved {
    fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    fn record(&mut self, before: &FavoriteSet, after: &FavoriteSet) {
        for id in after.difference(before) {
            self.removed.remove(id);
            self.added.insert(id.clone());
        }
        for id in before.difference(after) {
            self.added.remove(id);
            self.removed.insert(id.clone());
        }
    }

    fn apply(&self, set: &mut FavoriteSet) {
        set.extend(self.added.iter().cloned());
        for id in &self.removed {
            set.remove(id);
        }
    }
}

struct Inner {
    id: ContextId,
    storage: Arc<dyn KeyValueStorage>,
    broadcasters: Vec<Arc<dyn ChangeBroadcaster>>,
    /// `None` until first loaded
    set: Mutex<Option<FavoriteSet>>,
    /// Only locked while `set` is held
    unsaved: Mutex<Unsaved>,
    changes: watch::Sender<FavoriteSet>,
}

impl Inner {
    fn read_storage(&self) -> FavoriteSet {
        match self.storage.get(FAVORITES_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<String>>(&raw) {
                Ok(ids) => ids.into_iter().collect(),
                Err(e) => {
                    warn!(error = %e, "stored favorites are corrupt, starting empty");
                    FavoriteSet::new()
                }
            },
            Ok(None) => FavoriteSet::new(),
            Err(e) => {
                warn!(error = %e, "failed to read favorites, starting empty");
                FavoriteSet::new()
            }
        }
    }

    fn write_storage(&self, set: &FavoriteSet) -> Result<(), PersistenceError> {
        let mut ids: Vec<&String> = set.iter().collect();
        ids.sort();
        let raw = serde_json::to_string(&ids)?;
        self.storage.set(FAVORITES_KEY, &raw)
    }

    /// Replaces the watched value, notifying only on a real change
    fn publish_local(&self, set: &FavoriteSet) {
        self.changes.send_if_modified(|current| {
            if current == set {
                false
            } else {
                current.clone_from(set);
                true
            }
        });
    }

    /// Runs `f` on the loaded set; loads first if needed
    fn with_set<R>(&self, f: impl FnOnce(&mut FavoriteSet) -> R) -> R {
        let mut guard = self.set.lock();
        if guard.is_none() {
            let loaded = self.read_storage();
            debug!(count = loaded.len(), "favorites loaded");
            self.publish_local(&loaded);
            *guard = Some(loaded);
        }
        let set = guard.get_or_insert_with(FavoriteSet::new);
        f(set)
    }

    /// Applies `mutate`, then persists and announces the whole snapshot
    ///
    /// Read, mutate and write share one lock acquisition.
    fn update(&self, mutate: impl FnOnce(&mut FavoriteSet)) {
        self.with_set(|set| {
            let before = set.clone();
            mutate(set);
            self.persist(&before, set);
            self.publish_local(set);
        });
    }

    /// Writes `set` and tells other subscribers when storage changed
    ///
    /// On failure the difference from `before` is remembered so a later
    /// reload cannot drop it. Caller holds the `set` lock.
    fn persist(&self, before: &FavoriteSet, set: &FavoriteSet) {
        let mut unsaved = self.unsaved.lock();
        match self.write_storage(set) {
            Ok(()) => {
                let flushed = !unsaved.is_empty();
                *unsaved = Unsaved::default();
                if set != before || flushed {
                    let event = ChangeEvent::new(FAVORITES_KEY, self.id);
                    for broadcaster in &self.broadcasters {
                        broadcaster.publish(event.clone());
                    }
                }
            }
            Err(e) => {
                unsaved.record(before, set);
                warn!(error = %e, "failed to persist favorites, keeping in-memory state");
            }
        }
    }

    fn should_reload(&self, event: &ChangeEvent) -> bool {
        event.concerns(FAVORITES_KEY)
            && event.origin != self.id
            && event.origin != self.storage.context()
    }

    /// Replaces the in-memory set with the stored one
    ///
    /// Edits that never reached storage are replayed on top and written
    /// again, so they survive for the rest of the session.
    fn reload(&self) {
        let mut guard = self.set.lock();
        let stored = self.read_storage();
        let mut loaded = stored.clone();
        let pending = {
            let mut unsaved = self.unsaved.lock();
            unsaved.apply(&mut loaded);
            if loaded == stored {
                *unsaved = Unsaved::default();
                false
            } else {
                true
            }
        };
        if pending {
            debug!("replaying unsaved favorites over external change");
            self.persist(&stored, &loaded);
        }
        debug!(count = loaded.len(), "favorites reloaded after external change");
        self.publish_local(&loaded);
        *guard = Some(loaded);
    }
}

/// Favorites store shared by every view in one context
pub struct Favorites {
    inner: Arc<Inner>,
    listeners: Vec<JoinHandle<()>>,
}

impl Favorites {
    /// Creates a store over `storage`, listening on every broadcaster
    ///
    /// # Arguments
    ///
    /// * `storage` - Durable backend; read lazily on first use
    /// * `broadcasters` - Channels changes are announced on and listened to
    ///
    /// # Returns
    ///
    /// A store with one listener task per broadcaster. Must be called within
    /// a tokio runtime.
    pub fn new(
        storage: Arc<dyn KeyValueStorage>,
        broadcasters: Vec<Arc<dyn ChangeBroadcaster>>,
    ) -> Self {
        let (changes, _) = watch::channel(FavoriteSet::new());
        let inner = Arc::new(Inner {
            id: ContextId::next(),
            storage,
            broadcasters,
            set: Mutex::new(None),
            unsaved: Mutex::new(Unsaved::default()),
            changes,
        });

        let listeners = inner
            .broadcasters
            .iter()
            .map(|b| spawn_listener(Arc::downgrade(&inner), b.subscribe()))
            .collect();

        Self { inner, listeners }
    }

    /// Id stamped on this store's change events
    pub fn context(&self) -> ContextId {
        self.inner.id
    }

    /// Loads from storage now instead of on first use
    pub fn load(&self) {
        self.inner.with_set(|_| ());
    }

    pub fn is_favorite(&self, id: &str) -> bool {
        self.inner.with_set(|set| set.contains(id))
    }

    /// Flips membership of `id` and returns the new membership
    pub fn toggle_favorite(&self, id: &str) -> bool {
        let mut now_favorite = false;
        self.inner.update(|set| {
            now_favorite = if set.remove(id) {
                false
            } else {
                set.insert(id.to_string());
                true
            };
        });
        now_favorite
    }

    pub fn set_favorite(&self, id: &str, favorite: bool) {
        self.inner.update(|set| {
            if favorite {
                set.insert(id.to_string());
            } else {
                set.remove(id);
            }
        });
    }

    /// Sorted snapshot of the current ids
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.with_set(|set| set.iter().cloned().collect());
        ids.sort();
        ids
    }

    /// Receiver notified whenever the set changes
    pub fn subscribe(&self) -> watch::Receiver<FavoriteSet> {
        self.load();
        self.inner.changes.subscribe()
    }
}

impl Drop for Favorites {
    fn drop(&mut self) {
        for listener in &self.listeners {
            listener.abort();
        }
    }
}

fn spawn_listener(inner: Weak<Inner>, mut rx: channel::Receiver<ChangeEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "favorites listener lagged, reloading");
                    None
                }
                Err(RecvError::Closed) => break,
            };

            let Some(inner) = inner.upgrade() else {
                break;
            };
            if event.map_or(true, |e| inner.should_reload(&e)) {
                inner.reload();
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::time::Duration;
    use tokio::time::timeout;

    fn stored_ids(storage: &MemoryStorage) -> Vec<String> {
        storage
            .get(FAVORITES_KEY)
            .unwrap()
            .map(|raw| serde_json::from_str(&raw).unwrap())
            .unwrap_or_default()
    }

    fn store(storage: &MemoryStorage, bus: Option<&EventBus>) -> Favorites {
        let storage: Arc<dyn KeyValueStorage> = Arc::new(storage.clone());
        let mut broadcasters: Vec<Arc<dyn ChangeBroadcaster>> =
            vec![Arc::new(StorageSignal::new(storage.clone()))];
        if let Some(bus) = bus {
            broadcasters.push(Arc::new(bus.clone()));
        }
        Favorites::new(storage, broadcasters)
    }

    async fn wait_for_change(rx: &mut watch::Receiver<FavoriteSet>) {
        timeout(Duration::from_secs(1), rx.changed())
            .await
            .expect("no change notification")
            .unwrap();
    }

    #[tokio::test]
    async fn test_loads_existing_favorites() {
        let storage = MemoryStorage::new();
        storage.set(FAVORITES_KEY, r#"["3","1"]"#).unwrap();

        let favorites = store(&storage, None);
        assert!(favorites.is_favorite("1"));
        assert!(!favorites.is_favorite("2"));
        assert_eq!(favorites.ids(), vec!["1".to_string(), "3".to_string()]);
    }

    #[tokio::test]
    async fn test_corrupt_storage_starts_empty() {
        let storage = MemoryStorage::new();
        storage.set(FAVORITES_KEY, "{not json").unwrap();

        let favorites = store(&storage, None);
        assert!(favorites.ids().is_empty());
    }

    #[tokio::test]
    async fn test_double_toggle_restores_membership() {
        let storage = MemoryStorage::new();
        let favorites = store(&storage, None);

        assert!(favorites.toggle_favorite("7"));
        assert!(favorites.is_favorite("7"));
        assert_eq!(stored_ids(&storage), favorites.ids());

        assert!(!favorites.toggle_favorite("7"));
        assert!(!favorites.is_favorite("7"));
        assert_eq!(stored_ids(&storage), favorites.ids());
    }

    #[tokio::test]
    async fn test_set_favorite_is_idempotent() {
        let storage = MemoryStorage::new();
        let favorites = store(&storage, None);

        favorites.set_favorite("2", true);
        favorites.set_favorite("2", true);
        assert_eq!(favorites.ids(), vec!["2".to_string()]);
        assert_eq!(stored_ids(&storage), vec!["2".to_string()]);

        favorites.set_favorite("2", false);
        favorites.set_favorite("2", false);
        assert!(favorites.ids().is_empty());
        assert!(stored_ids(&storage).is_empty());
    }

    #[tokio::test]
    async fn test_same_context_subscriber_sees_change_via_event_bus() {
        let storage = MemoryStorage::new();
        let bus = EventBus::new();
        let first = store(&storage, Some(&bus));
        let second = store(&storage, Some(&bus));
        let mut rx = second.subscribe();

        first.toggle_favorite("5");
        wait_for_change(&mut rx).await;

        assert!(second.is_favorite("5"));
        assert!(rx.borrow().contains("5"));
    }

    #[tokio::test]
    async fn test_other_context_sees_change_via_storage_signal() {
        let tab_a = MemoryStorage::new();
        let tab_b = tab_a.new_context();
        let first = store(&tab_a, None);
        let second = store(&tab_b, None);
        let mut rx = second.subscribe();

        first.set_favorite("9", true);
        wait_for_change(&mut rx).await;

        assert!(second.is_favorite("9"));
    }

    #[tokio::test]
    async fn test_own_changes_notify_local_subscribers() {
        let storage = MemoryStorage::new();
        let favorites = store(&storage, None);
        let mut rx = favorites.subscribe();

        favorites.toggle_favorite("1");

        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().contains("1"));
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_in_memory_state() {
        let storage = MemoryStorage::new();
        let favorites = store(&storage, None);
        favorites.load();
        storage.set_read_only(true);

        assert!(favorites.toggle_favorite("4"));

        assert!(favorites.is_favorite("4"));
        assert!(stored_ids(&storage).is_empty());
    }

    #[tokio::test]
    async fn test_unsaved_favorite_survives_external_change() {
        let storage = MemoryStorage::new();
        let favorites = store(&storage, None);
        let mut rx = favorites.subscribe();

        storage.set_read_only(true);
        assert!(favorites.toggle_favorite("4"));
        rx.borrow_and_update();
        storage.set_read_only(false);

        let other_process = storage.new_context();
        other_process.set(FAVORITES_KEY, r#"["9"]"#).unwrap();
        wait_for_change(&mut rx).await;

        assert_eq!(favorites.ids(), vec!["4".to_string(), "9".to_string()]);
        assert_eq!(stored_ids(&storage), vec!["4".to_string(), "9".to_string()]);
    }

    #[tokio::test]
    async fn test_unsaved_removal_survives_external_change() {
        let storage = MemoryStorage::new();
        storage.set(FAVORITES_KEY, r#"["1","2"]"#).unwrap();
        let favorites = store(&storage, None);
        let mut rx = favorites.subscribe();

        storage.set_read_only(true);
        favorites.set_favorite("1", false);
        rx.borrow_and_update();
        storage.set_read_only(false);

        let other_process = storage.new_context();
        other_process.set(FAVORITES_KEY, r#"["1","2","3"]"#).unwrap();
        wait_for_change(&mut rx).await;

        assert_eq!(favorites.ids(), vec!["2".to_string(), "3".to_string()]);
    }

    #[test]
    fn test_unsaved_edits_cancel_out() {
        let mut unsaved = Unsaved::default();
        let empty = FavoriteSet::new();
        let with_one: FavoriteSet = ["1".to_string()].into_iter().collect();

        unsaved.record(&empty, &with_one);
        unsaved.record(&with_one, &empty);

        assert!(unsaved.added.is_empty());
        assert_eq!(unsaved.removed, with_one);
    }

    #[tokio::test]
    async fn test_external_write_is_picked_up() {
        let storage = MemoryStorage::new();
        let favorites = store(&storage, None);
        let mut rx = favorites.subscribe();

        let other_process = storage.new_context();
        other_process.set(FAVORITES_KEY, r#"["42"]"#).unwrap();
        wait_for_change(&mut rx).await;

        assert_eq!(favorites.ids(), vec!["42".to_string()]);
    }
}
