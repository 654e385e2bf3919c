//! Process-local store, for tests and throwaway sessions

use super::{KeyValueStore, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// In-memory [`KeyValueStore`]. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<(String, String), String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<(String, String), String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of keys across all namespaces
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .entries()
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    async fn set(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries()
            .insert((namespace.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        self.entries()
            .remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }

    async fn clear(&self, namespace: &str) -> Result<(), StoreError> {
        self.entries().retain(|(ns, _), _| ns != namespace);
        Ok(())
    }
}
