use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use crate::domain::{error::ImportError, ports::StateRepository};

#[derive(Default)]
pub struct MemoryStateRepository {
    entries: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryStateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, serde_json::Value>>, ImportError> {
        self.entries
            .lock()
            .map_err(|e| ImportError::Storage(format!("state lock poisoned: {}", e)))
    }
}

#[async_trait]
impl StateRepository for MemoryStateRepository {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, ImportError> {
        Ok(self.entries()?.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<(), ImportError> {
        self.entries()?.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &serde_json::Value) -> Result<bool, ImportError> {
        let mut entries = self.entries()?;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), value.clone());
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, ImportError> {
        Ok(self.entries()?.remove(key).is_some())
    }

    async fn compare_and_delete(&self, key: &str, expected: &serde_json::Value) -> Result<bool, ImportError> {
        let mut entries = self.entries()?;
        if entries.get(key) != Some(expected) {
            return Ok(false);
        }
        entries.remove(key);
        Ok(true)
    }
}
