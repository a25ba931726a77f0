//! Background detection of storage changes made by other processes
//!
//! Watches the storage directory through the platform file notifier and
//! announces keys whose content changed outside this handle, using the same
//! change channel as local writes.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::file::{content_digest, FileStorage};
use super::{validate_key, ChangeEvent, ContextId};

/// Configuration for the storage watcher
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// How long file events are batched before being examined
    pub debounce: Duration,
    /// Whether the watcher runs at all
    pub enabled: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(200),
            enabled: true,
        }
    }
}

/// Handle for the background watcher
pub struct StorageWatcher {
    /// Dropping the debouncer stops the platform watcher
    _debouncer: Option<Debouncer<RecommendedWatcher>>,
    /// Channel used to stop the task
    shutdown_tx: mpsc::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl StorageWatcher {
    /// Starts watching `storage` for foreign changes
    ///
    /// # Arguments
    ///
    /// * `storage` - Handle whose directory is watched and whose change channel
    ///   receives the events
    /// * `config` - Debounce window and on/off switch
    ///
    /// # Returns
    ///
    /// The running watcher, or the notifier error if the directory cannot be
    /// watched. Must be called within a tokio runtime.
    pub fn spawn(storage: &FileStorage, config: WatchConfig) -> notify::Result<Self> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        if !config.enabled {
            return Ok(Self {
                _debouncer: None,
                shutdown_tx,
                task: None,
            });
        }

        fs::create_dir_all(storage.dir()).map_err(notify::Error::io)?;

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<DebounceEventResult>();
        let mut debouncer = new_debouncer(config.debounce, move |result: DebounceEventResult| {
            let _ = event_tx.send(result);
        })?;
        debouncer
            .watcher()
            .watch(storage.dir(), RecursiveMode::NonRecursive)?;

        info!(dir = %storage.dir().display(), "watching storage for external changes");

        let storage = storage.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(result) = event_rx.recv() => match result {
                        Ok(events) => {
                            let mut keys: Vec<String> = events
                                .iter()
                                .filter_map(|event| key_for_path(&event.path))
                                .collect();
                            keys.sort();
                            keys.dedup();
                            for key in keys {
                                if observe(&storage, &key) {
                                    debug!(key = %key, "storage changed outside this process");
                                    let _ = storage.changes.send(ChangeEvent::new(key, ContextId::EXTERNAL));
                                }
                            }
                        }
                        Err(err) => warn!(error = %err, "storage watcher error"),
                    },
                    _ = shutdown_rx.recv() => {
                        debug!("storage watcher stopping");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            _debouncer: Some(debouncer),
            shutdown_tx,
            task: Some(task),
        })
    }

    /// Whether the background task was started
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops the background task and waits for it to exit
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for StorageWatcher {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Maps a watched path to its storage key
///
/// Temporary files (leading dot) and non-JSON files are ignored.
fn key_for_path(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    if name.starts_with('.') {
        return None;
    }
    let key = name.strip_suffix(".json")?;
    validate_key(key).ok()?;
    Some(key.to_string())
}

/// Compares the file for `key` against the last known content
///
/// Returns true when the content differs from what this handle last wrote or
/// saw, and records the new state so the same change is reported once.
fn observe(storage: &FileStorage, key: &str) -> bool {
    let current = match fs::read_to_string(storage.value_path(key)) {
        Ok(content) => Some(content_digest(&content)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => {
            warn!(key, error = %err, "failed to read changed storage file");
            return false;
        }
    };

    let mut known = storage.known.lock();
    match current {
        Some(digest) => {
            if known.get(key) == Some(&digest) {
                false
            } else {
                known.insert(key.to_string(), digest);
                true
            }
        }
        None => known.remove(key).is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::KeyValueStorage;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio::time::timeout;

    fn fast_config() -> WatchConfig {
        WatchConfig {
            debounce: Duration::from_millis(20),
            enabled: true,
        }
    }

    #[test]
    fn test_watch_config_default() {
        let config = WatchConfig::default();
        assert_eq!(config.debounce, Duration::from_millis(200));
        assert!(config.enabled);
    }

    #[test]
    fn test_key_for_path() {
        assert_eq!(
            key_for_path(&PathBuf::from("/data/favorite_publication_ids.json")).as_deref(),
            Some("favorite_publication_ids")
        );
        assert!(key_for_path(&PathBuf::from("/data/.favorite_publication_ids.json.tmp")).is_none());
        assert!(key_for_path(&PathBuf::from("/data/notes.txt")).is_none());
        assert!(key_for_path(&PathBuf::from("/data/.json")).is_none());
    }

    #[tokio::test]
    async fn test_disabled_watcher_does_not_run() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::with_dir(temp_dir.path().to_path_buf());
        let watcher = StorageWatcher::spawn(
            &storage,
            WatchConfig {
                enabled: false,
                ..Default::default()
            },
        )
        .unwrap();

        assert!(!watcher.is_running());
    }

    #[test]
    fn test_observe_ignores_own_writes() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::with_dir(temp_dir.path().to_path_buf());

        storage.set("key", "value").unwrap();

        assert!(!observe(&storage, "key"));
    }

    #[test]
    fn test_observe_reports_foreign_writes_once() {
        let temp_dir = TempDir::new().unwrap();
        let ours = FileStorage::with_dir(temp_dir.path().to_path_buf());
        let theirs = FileStorage::with_dir(temp_dir.path().to_path_buf());

        theirs.set("favorite_publication_ids", "[\"2\"]").unwrap();

        assert!(observe(&ours, "favorite_publication_ids"));
        assert!(!observe(&ours, "favorite_publication_ids"));
    }

    #[test]
    fn test_observe_reports_same_size_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let ours = FileStorage::with_dir(temp_dir.path().to_path_buf());
        let theirs = FileStorage::with_dir(temp_dir.path().to_path_buf());

        ours.set("favorite_publication_ids", "[\"1\"]").unwrap();
        theirs.set("favorite_publication_ids", "[\"2\"]").unwrap();

        assert!(observe(&ours, "favorite_publication_ids"));
    }

    #[test]
    fn test_observe_reports_removal() {
        let temp_dir = TempDir::new().unwrap();
        let ours = FileStorage::with_dir(temp_dir.path().to_path_buf());
        let theirs = FileStorage::with_dir(temp_dir.path().to_path_buf());

        ours.set("key", "value").unwrap();
        theirs.remove("key").unwrap();

        assert!(observe(&ours, "key"));
        assert!(!observe(&ours, "key"));
    }

    #[tokio::test]
    async fn test_watcher_announces_foreign_write_only() {
        let temp_dir = TempDir::new().unwrap();
        let ours = FileStorage::with_dir(temp_dir.path().to_path_buf());
        let theirs = FileStorage::with_dir(temp_dir.path().to_path_buf());
        let mut rx = ours.subscribe();

        let watcher = StorageWatcher::spawn(&ours, fast_config()).unwrap();
        assert!(watcher.is_running());

        ours.set("favorite_publication_ids", "[\"1\"]").unwrap();
        theirs.set("favorite_publication_ids", "[\"3\"]").unwrap();

        let own = rx.recv().await.unwrap();
        assert_eq!(own, ChangeEvent::new("favorite_publication_ids", ours.context()));

        let foreign = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("watcher should report within timeout")
            .unwrap();
        assert_eq!(
            foreign,
            ChangeEvent::new("favorite_publication_ids", ContextId::EXTERNAL)
        );

        assert!(
            timeout(Duration::from_millis(300), rx.recv()).await.is_err(),
            "the foreign write should be announced once"
        );

        watcher.shutdown().await;
    }
}
