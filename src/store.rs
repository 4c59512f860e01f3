//! Execution state store.
//!
//! A store maps a collection name to one JSON document. `save` always replaces
//! the whole document; there are no partial patches. The file-backed store
//! writes to a temporary file, fsyncs it and renames it over the previous
//! document, so a crash leaves either the old or the new snapshot on disk.

use crate::errors::StoreError;
use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Durable collection -> document persistence.
pub trait StateStore: Send + Sync {
    /// Load the current document for a collection, or `None` if it was never saved.
    fn load(&self, collection: &str) -> Result<Option<Value>, StoreError>;

    /// Atomically overwrite the document for a collection.
    fn save(&self, collection: &str, document: &Value) -> Result<(), StoreError>;
}

impl dyn StateStore {
    /// Load and deserialize a collection, falling back to `T::default()` when absent.
    pub fn load_or_default<T>(&self, collection: &str) -> Result<T, StoreError>
    where
        T: DeserializeOwned + Default,
    {
        match self.load(collection)? {
            Some(value) => {
                serde_json::from_value(value).map_err(|source| StoreError::Serialization {
                    collection: collection.to_string(),
                    source,
                })
            }
            None => Ok(T::default()),
        }
    }

    /// Serialize and save a collection.
    pub fn save_typed<T: Serialize>(&self, collection: &str, document: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(document).map_err(|source| StoreError::Serialization {
            collection: collection.to_string(),
            source,
        })?;
        self.save(collection, &value)
    }
}

/// Stores each collection as `<dir>/<collection>.json`.
///
/// Holds an exclusive advisory lock on `<dir>/.lock` for as long as it lives.
#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
    _lock: File,
}

impl JsonFileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;

        let lock_path = dir.join(".lock");
        let lock = File::create(&lock_path).map_err(|source| StoreError::Io {
            path: lock_path.clone(),
            source,
        })?;
        lock.try_lock_exclusive()
            .map_err(|_| StoreError::Locked { path: dir.clone() })?;

        Ok(Self { dir, _lock: lock })
    }

    /// Root directory of this store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn document_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}.json"))
    }
}

impl StateStore for JsonFileStore {
    fn load(&self, collection: &str) -> Result<Option<Value>, StoreError> {
        let path = self.document_path(collection);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        let value = serde_json::from_str(&content).map_err(|source| StoreError::Serialization {
            collection: collection.to_string(),
            source,
        })?;
        Ok(Some(value))
    }

    fn save(&self, collection: &str, document: &Value) -> Result<(), StoreError> {
        let path = self.document_path(collection);
        let tmp_path = self.dir.join(format!("{collection}.json.tmp"));
        let bytes =
            serde_json::to_vec_pretty(document).map_err(|source| StoreError::Serialization {
                collection: collection.to_string(),
                source,
            })?;

        let io_err = |source| StoreError::Io {
            path: tmp_path.clone(),
            source,
        };
        let mut file = File::create(&tmp_path).map_err(io_err)?;
        file.write_all(&bytes).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);

        fs::rename(&tmp_path, &path).map_err(|source| StoreError::Io { path, source })
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn load(&self, collection: &str) -> Result<Option<Value>, StoreError> {
        let documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        Ok(documents.get(collection).cloned())
    }

    fn save(&self, collection: &str, document: &Value) -> Result<(), StoreError> {
        let mut documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        documents.insert(collection.to_string(), document.clone());
        Ok(())
    }
}
