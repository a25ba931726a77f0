//! File-backed storage in the XDG data directory
//!
//! Each key is stored as `<key>.json` and replaced atomically through a
//! temporary file, so readers in other processes never see a partial write.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use directories::ProjectDirs;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use tracing::debug;

use super::{
    validate_key, ChangeEvent, ContextId, KeyValueStorage, PersistenceError,
    CHANGE_CHANNEL_CAPACITY,
};

/// Hex SHA-256 of a stored value, used to tell our own writes from foreign ones
pub(crate) fn content_digest(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Stores values as JSON files on disk
///
/// Writes made through this handle are announced immediately on its change
/// channel. Writes made by other processes are picked up by a
/// [`StorageWatcher`](super::StorageWatcher).
#[derive(Debug, Clone)]
pub struct FileStorage {
    /// Directory where value files are stored
    dir: PathBuf,
    context: ContextId,
    /// Digest of the last content written or observed per key, shared with the watcher
    pub(crate) known: Arc<Mutex<HashMap<String, String>>>,
    pub(crate) changes: broadcast::Sender<ChangeEvent>,
}

impl FileStorage {
    /// Creates storage in the XDG-compliant data directory
    ///
    /// Uses `~/.local/share/spacebio/` on Linux, or the platform equivalent.
    /// Returns `None` if no home directory can be determined.
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "spacebio")?;
        Some(Self::with_dir(project_dirs.data_dir().to_path_buf()))
    }

    /// Creates storage rooted at a custom directory
    pub fn with_dir(dir: PathBuf) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            dir,
            context: ContextId::next(),
            known: Arc::new(Mutex::new(HashMap::new())),
            changes,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of the file holding `key`
    pub(crate) fn value_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)
    }

    fn notify(&self, key: &str) {
        let _ = self.changes.send(ChangeEvent::new(key, self.context));
    }
}

impl KeyValueStorage for FileStorage {
    fn context(&self) -> ContextId {
        self.context
    }

    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        validate_key(key)?;
        match fs::read_to_string(self.value_path(key)) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        validate_key(key)?;
        self.ensure_dir()?;

        let path = self.value_path(key);
        let tmp_path = self.dir.join(format!(".{}.json.tmp", key));

        // The digest comes from the value, not the file, so a foreign write
        // landing right after the rename still differs from what we recorded.
        let mut known = self.known.lock();
        fs::write(&tmp_path, value)?;
        fs::rename(&tmp_path, &path)?;
        known.insert(key.to_string(), content_digest(value));
        drop(known);

        debug!(key, path = %path.display(), "stored value");
        self.notify(key);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        validate_key(key)?;

        let mut known = self.known.lock();
        match fs::remove_file(self.value_path(key)) {
            Ok(()) => {
                known.remove(key);
                drop(known);
                self.notify(key);
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}
