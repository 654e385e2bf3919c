//! Durable key/value persistence
//!
//! Every long-lived record of the client (run archive, settings, service
//! status) lives under its own namespace of a [`KeyValueStore`], so clearing
//! one never touches the others.

mod memory;
mod migrations;
mod repository;

use async_trait::async_trait;

pub use memory::MemoryStore;
pub use repository::{Database, DatabaseError};

/// Error type of every store operation
pub type StoreError = DatabaseError;

/// Namespaces used by the client
pub mod namespaces {
    pub const HISTORY: &str = "prism-research-history";
    pub const SETTINGS: &str = "prism-settings-storage";
    pub const STATUS: &str = "prism-system-status";
}

/// String-keyed durable storage, partitioned by namespace.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError>;

    /// Insert or replace a value
    async fn set(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a value; missing keys are not an error
    async fn delete(&self, namespace: &str, key: &str) -> Result<(), StoreError>;

    /// Remove every key of one namespace
    async fn clear(&self, namespace: &str) -> Result<(), StoreError>;
}
