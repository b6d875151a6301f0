//! Service-client parameters written by the bot

use crate::sync::lock;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Parameter sink of the widget's data/service client
#[async_trait]
pub trait ServiceParameters: Send + Sync {
    async fn set_parameter(&self, key: &str, value: &str) -> Result<(), String>;
}

#[async_trait]
impl<T: ServiceParameters + ?Sized> ServiceParameters for Arc<T> {
    async fn set_parameter(&self, key: &str, value: &str) -> Result<(), String> {
        (**self).set_parameter(key, value).await
    }
}

/// Parameters kept in memory
#[derive(Debug, Default)]
pub struct MemoryParameters {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }
}

#[async_trait]
impl ServiceParameters for MemoryParameters {
    async fn set_parameter(&self, key: &str, value: &str) -> Result<(), String> {
        lock(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }
}
