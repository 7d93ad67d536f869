//! Durable, namespaced state storage.
//!
//! A [`StateStore`] holds one opaque document per namespace. Subscriptions
//! use the namespace `subs.<name>`; shared settings use `subs`. Writes are
//! committed durably before they return, which is what makes resuming an
//! interrupted unpack possible.
//!
//! [`Locals`] layers a typed, in-memory copy on top of a store. Its
//! [`update`](Locals::update) method commits the new value first and only
//! then replaces the in-memory copy.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{SyncError, SyncResult};

/// Namespace for settings shared by all subscriptions.
pub const SETTINGS_NAMESPACE: &str = "subs";

/// Namespace for one subscription's private state.
pub fn subscription_namespace(name: &str) -> String {
    format!("{}.{}", SETTINGS_NAMESPACE, name)
}

/// Durable storage of one document per namespace.
pub trait StateStore: Send + Sync {
    /// Read the document for `namespace`, or `None` if nothing was stored.
    fn read(&self, namespace: &str) -> SyncResult<Option<Vec<u8>>>;

    /// Replace the document for `namespace`.
    ///
    /// Must not return until the write is durable, and must never leave a
    /// torn document behind if the process dies mid-write.
    fn write(&self, namespace: &str, data: &[u8]) -> SyncResult<()>;

    /// Remove the document for `namespace`.
    fn remove(&self, namespace: &str) -> SyncResult<()>;
}

/// File-backed store: one JSON file per namespace, replaced atomically.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> SyncResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| SyncError::CreateDirFailed {
            path: dir.clone(),
            source: e,
        })?;
        Ok(Self { dir })
    }

    /// Directory holding the state files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, namespace: &str) -> PathBuf {
        let file_name: String = namespace
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", file_name))
    }
}

impl StateStore for FileStateStore {
    fn read(&self, namespace: &str) -> SyncResult<Option<Vec<u8>>> {
        let path = self.path_for(namespace);
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::ReadFailed { path, source: e }),
        }
    }

    fn write(&self, namespace: &str, data: &[u8]) -> SyncResult<()> {
        let path = self.path_for(namespace);
        atomic_write(&path, data)
    }

    fn remove(&self, namespace: &str) -> SyncResult<()> {
        let path = self.path_for(namespace);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::DeleteFailed { path, source: e }),
        }
    }
}

/// Write `data` to `path` via a synced temporary file and a rename.
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> SyncResult<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));

    let write_tmp = || -> io::Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()
    };
    write_tmp().map_err(|e| SyncError::WriteFailed {
        path: tmp_path.clone(),
        source: e,
    })?;

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        SyncError::RenameFailed {
            from: tmp_path.clone(),
            to: path.to_path_buf(),
            source: e,
        }
    })?;

    if let Some(parent) = path.parent() {
        sync_dir(parent);
    }
    Ok(())
}

/// Persist a rename. Best effort: not every platform can open a directory.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

/// In-memory store, for tests and ephemeral setups.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    docs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn read(&self, namespace: &str) -> SyncResult<Option<Vec<u8>>> {
        Ok(self.docs.lock().get(namespace).cloned())
    }

    fn write(&self, namespace: &str, data: &[u8]) -> SyncResult<()> {
        self.docs.lock().insert(namespace.to_string(), data.to_vec());
        Ok(())
    }

    fn remove(&self, namespace: &str) -> SyncResult<()> {
        self.docs.lock().remove(namespace);
        Ok(())
    }
}

/// Typed view of one namespace with a write-through in-memory copy.
pub struct Locals<T> {
    store: Arc<dyn StateStore>,
    namespace: String,
    current: Mutex<T>,
}

impl<T> Locals<T>
where
    T: Serialize + DeserializeOwned + Default + Clone,
{
    /// Load the namespace from `store`, starting from `T::default()` if it
    /// has never been written.
    pub fn open(store: Arc<dyn StateStore>, namespace: impl Into<String>) -> SyncResult<Self> {
        let namespace = namespace.into();
        let current = match store.read(&namespace)? {
            Some(data) => serde_json::from_slice(&data).map_err(|e| SyncError::StateStore {
                namespace: namespace.clone(),
                reason: e.to_string(),
            })?,
            None => T::default(),
        };
        Ok(Self {
            store,
            namespace,
            current: Mutex::new(current),
        })
    }

    /// The namespace this view reads and writes.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Snapshot of the current value.
    pub fn get(&self) -> T {
        self.current.lock().clone()
    }

    /// Read from the current value without cloning it.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&*self.current.lock())
    }

    /// Apply `f` to a copy of the value, commit the copy, then adopt it.
    ///
    /// If the commit fails the in-memory value is left unchanged.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> SyncResult<R> {
        let mut current = self.current.lock();
        let mut next = current.clone();
        let result = f(&mut next);
        let data = serde_json::to_vec_pretty(&next).map_err(|e| SyncError::StateStore {
            namespace: self.namespace.clone(),
            reason: e.to_string(),
        })?;
        self.store.write(&self.namespace, &data)?;
        *current = next;
        Ok(result)
    }

    /// Replace the whole value.
    pub fn replace(&self, value: T) -> SyncResult<()> {
        self.update(|current| *current = value)
    }
}
