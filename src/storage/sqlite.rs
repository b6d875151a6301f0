//! SQLite-backed key/value storage

use super::{KeyValueStorage, StorageCategory, StorageError};
use crate::sync::lock;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS storage (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    category TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

/// Thread-safe storage handle
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open or create the storage database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Category a key was last written with
    pub fn category(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = lock(&self.conn);
        let category = conn
            .query_row(
                "SELECT category FROM storage WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(category)
    }
}

#[async_trait]
impl KeyValueStorage for SqliteStorage {
    async fn read(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let raw: Option<String> = {
            let conn = lock(&self.conn);
            conn.query_row(
                "SELECT value FROM storage WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?
        };

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn write(
        &self,
        key: &str,
        value: Value,
        category: StorageCategory,
    ) -> Result<(), StorageError> {
        let raw = serde_json::to_string(&value)?;
        let conn = lock(&self.conn);
        conn.execute(
            "INSERT INTO storage (key, value, category, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                 category = excluded.category, updated_at = excluded.updated_at",
            params![key, raw, category.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_then_read() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage
            .write("bot-provider-entries", json!([{"id": "1"}]), StorageCategory::Necessary)
            .await
            .unwrap();

        let value = storage.read("bot-provider-entries").await.unwrap();
        assert_eq!(value, Some(json!([{"id": "1"}])));
        assert!(storage.read("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces_value_and_category() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage
            .write("k", json!(1), StorageCategory::Functional)
            .await
            .unwrap();
        storage
            .write("k", json!(2), StorageCategory::Necessary)
            .await
            .unwrap();

        assert_eq!(storage.read("k").await.unwrap(), Some(json!(2)));
        assert_eq!(storage.category("k").unwrap().as_deref(), Some("necessary"));
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.db");

        {
            let storage = SqliteStorage::open(&path).unwrap();
            storage
                .write("conversation-main", json!({"messages": []}), StorageCategory::Necessary)
                .await
                .unwrap();
        }

        let reopened = SqliteStorage::open(&path).unwrap();
        assert_eq!(
            reopened.read("conversation-main").await.unwrap(),
            Some(json!({"messages": []}))
        );
    }
}
