//! Durable key-value store collaborator
//!
//! The logger mirrors its snapshot into a [`KeyValueStore`] under a single
//! well-known key. Two implementations ship with the crate: an in-memory map
//! for tests and ephemeral hosts, and a redb-backed store for hosts with a
//! filesystem.

use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

use crate::error::RawFailure;

/// Failures reported by a store backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store operation '{operation}' failed: {message}")]
    Backend { operation: String, message: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    fn backend(operation: &str, err: impl fmt::Display) -> Self {
        StoreError::Backend {
            operation: operation.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<StoreError> for RawFailure {
    fn from(err: StoreError) -> Self {
        RawFailure::native(err)
    }
}

/// A string key-value store that survives process restarts
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Process-local store, lost on exit
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values.write().remove(key);
        Ok(())
    }
}

const KV_TABLE: TableDefinition<&str, &str> = TableDefinition::new("bulwark_kv");

/// File-backed store using an embedded redb database
pub struct RedbStore {
    database: Database,
}

impl fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open (or create) the database at `path` and make sure the table exists
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let database =
            Database::create(path.as_ref()).map_err(|e| StoreError::backend("open", e))?;

        let write_txn = database
            .begin_write()
            .map_err(|e| StoreError::backend("init", e))?;
        {
            let _ = write_txn
                .open_table(KV_TABLE)
                .map_err(|e| StoreError::backend("init", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| StoreError::backend("init", e))?;

        Ok(Self { database })
    }
}

impl KeyValueStore for RedbStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let read_txn = self
            .database
            .begin_read()
            .map_err(|e| StoreError::backend("get", e))?;
        let table = read_txn
            .open_table(KV_TABLE)
            .map_err(|e| StoreError::backend("get", e))?;
        let value = table
            .get(key)
            .map_err(|e| StoreError::backend("get", e))?
            .map(|guard| guard.value().to_string());
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let write_txn = self
            .database
            .begin_write()
            .map_err(|e| StoreError::backend("set", e))?;
        {
            let mut table = write_txn
                .open_table(KV_TABLE)
                .map_err(|e| StoreError::backend("set", e))?;
            table
                .insert(key, value)
                .map_err(|e| StoreError::backend("set", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| StoreError::backend("set", e))
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let write_txn = self
            .database
            .begin_write()
            .map_err(|e| StoreError::backend("remove", e))?;
        {
            let mut table = write_txn
                .open_table(KV_TABLE)
                .map_err(|e| StoreError::backend("remove", e))?;
            table
                .remove(key)
                .map_err(|e| StoreError::backend("remove", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| StoreError::backend("remove", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("missing").unwrap(), None);

        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));

        store.remove("k").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_redb_store_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bulwark.redb");

        {
            let store = RedbStore::open(&path).unwrap();
            store.set("bulwark.debug", "true").unwrap();
            store.set("other", "1").unwrap();
            store.remove("other").unwrap();
        }

        let store = RedbStore::open(&path).unwrap();
        assert_eq!(store.get("bulwark.debug").unwrap().as_deref(), Some("true"));
        assert_eq!(store.get("other").unwrap(), None);
    }
}
