//! Bot session store

use crate::storage::{KeyValueStorage, StorageCategory, StorageError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Keys of the bot's session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKey {
    GlobalState,
    LocalState,
    Entries,
    Meta,
}

impl SessionKey {
    pub fn storage_key(self) -> &'static str {
        match self {
            Self::GlobalState => "bot-provider-global-state",
            Self::LocalState => "bot-provider-local-state",
            Self::Entries => "bot-provider-entries",
            Self::Meta => "bot-provider-conversation-meta",
        }
    }
}

/// Branding received from a `Widget` entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentMeta>,
}

/// Typed access to the four session keys; a disabled store reads nothing
/// and drops writes
#[derive(Clone)]
pub struct BotStore {
    storage: Arc<dyn KeyValueStorage>,
    enabled: bool,
}

impl BotStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            storage,
            enabled: true,
        }
    }

    pub fn disabled(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            storage,
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn read<T: DeserializeOwned>(&self, key: SessionKey) -> Result<Option<T>, StorageError> {
        if !self.enabled {
            return Ok(None);
        }
        match self.storage.read(key.storage_key()).await? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
        }
    }

    pub async fn write<T: Serialize + ?Sized + Sync>(
        &self,
        key: SessionKey,
        value: &T,
    ) -> Result<(), StorageError> {
        if !self.enabled {
            return Ok(());
        }
        let value = serde_json::to_value(value)?;
        self.storage
            .write(key.storage_key(), value, StorageCategory::Necessary)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    #[tokio::test]
    async fn test_typed_round_trip() {
        let store = BotStore::new(Arc::new(MemoryStorage::new()));
        let meta = ConversationMeta {
            agent: Some(AgentMeta {
                name: Some("Guide".to_string()),
                avatar: None,
            }),
        };
        store.write(SessionKey::Meta, &meta).await.unwrap();

        let read: Option<ConversationMeta> = store.read(SessionKey::Meta).await.unwrap();
        assert_eq!(read, Some(meta));
    }

    #[tokio::test]
    async fn test_null_reads_as_absent() {
        let store = BotStore::new(Arc::new(MemoryStorage::new()));
        store
            .write(SessionKey::LocalState, &Option::<Value>::None)
            .await
            .unwrap();
        let read: Option<Value> = store.read(SessionKey::LocalState).await.unwrap();
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn test_disabled_store_is_inert() {
        let storage = Arc::new(MemoryStorage::new());
        let store = BotStore::disabled(storage.clone());
        store.write(SessionKey::GlobalState, &json!({"a": 1})).await.unwrap();
        assert!(storage.is_empty());
        let read: Option<Value> = store.read(SessionKey::GlobalState).await.unwrap();
        assert!(read.is_none());
    }

    #[test]
    fn test_storage_keys() {
        assert_eq!(SessionKey::Entries.storage_key(), "bot-provider-entries");
        assert_eq!(SessionKey::Meta.storage_key(), "bot-provider-conversation-meta");
    }
}
