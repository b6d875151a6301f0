//! Key/value persistence behind the conversation and bot stores
//!
//! Values are JSON documents tagged with a storage category so a host can
//! honor consent settings.

mod sqlite;

pub use sqlite::SqliteStorage;

use crate::sync::lock;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Consent category of a stored value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageCategory {
    /// Required for the conversation to work at all
    Necessary,
    Functional,
}

impl StorageCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Necessary => "necessary",
            Self::Functional => "functional",
        }
    }
}

/// Session-scoped key/value storage
#[async_trait]
pub trait KeyValueStorage: Send + Sync {
    /// Read a value; `Ok(None)` when the key was never written
    async fn read(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// Replace the value stored under `key`
    async fn write(
        &self,
        key: &str,
        value: Value,
        category: StorageCategory,
    ) -> Result<(), StorageError>;
}

#[async_trait]
impl<T: KeyValueStorage + ?Sized> KeyValueStorage for Arc<T> {
    async fn read(&self, key: &str) -> Result<Option<Value>, StorageError> {
        (**self).read(key).await
    }

    async fn write(
        &self,
        key: &str,
        value: Value,
        category: StorageCategory,
    ) -> Result<(), StorageError> {
        (**self).write(key, value, category).await
    }
}

/// In-memory storage, lost with the process
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }
}

#[async_trait]
impl KeyValueStorage for MemoryStorage {
    async fn read(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    async fn write(
        &self,
        key: &str,
        value: Value,
        _category: StorageCategory,
    ) -> Result<(), StorageError> {
        lock(&self.entries).insert(key.to_string(), value);
        Ok(())
    }
}
