//! Research run archive
//!
//! Durable map from run id to a finished [`RunRecord`], plus the transient
//! map of runs that were started but have not produced a record yet
//! (pending queries). A run id lives in exactly one of the two once it has
//! been started.
//!
//! The archive loads its namespace once on construction and flushes the
//! whole document on every mutation, so a save is atomic from the store's
//! point of view.

use crate::db::{namespaces, KeyValueStore, StoreError};
use crate::protocol::FinalReport;
use crate::timeline::Step;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Key of the archive document inside its namespace
const ARCHIVE_KEY: &str = "state";

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Corrupt archive document: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// A completed research run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: Uuid,
    pub query: String,
    pub timestamp: DateTime<Utc>,
    pub final_report: FinalReport,
    pub history: Vec<Step>,
}

impl RunRecord {
    pub fn new(
        id: Uuid,
        query: impl Into<String>,
        final_report: FinalReport,
        history: Vec<Step>,
    ) -> Self {
        Self {
            id,
            query: query.into(),
            timestamp: Utc::now(),
            final_report,
            history,
        }
    }
}

/// Persisted form of the archive namespace
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ArchiveDocument {
    #[serde(default)]
    history: Vec<RunRecord>,
    #[serde(default)]
    pending: BTreeMap<Uuid, String>,
}

/// Run archive service. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Archive {
    store: Arc<dyn KeyValueStore>,
    state: Arc<RwLock<ArchiveDocument>>,
}

impl Archive {
    /// Load the archive from its namespace (empty if never written)
    pub async fn load(store: Arc<dyn KeyValueStore>) -> Result<Self, ArchiveError> {
        let state = match store.get(namespaces::HISTORY, ARCHIVE_KEY).await? {
            Some(json) => serde_json::from_str(&json)?,
            None => ArchiveDocument::default(),
        };

        tracing::debug!(
            records = state.history.len(),
            pending = state.pending.len(),
            "Archive loaded"
        );

        Ok(Self {
            store,
            state: Arc::new(RwLock::new(state)),
        })
    }

    /// Write `next` to the store, then install it as the live document.
    /// On a failed write the live document is left untouched.
    async fn commit(
        &self,
        state: &mut ArchiveDocument,
        next: ArchiveDocument,
    ) -> Result<(), ArchiveError> {
        let json = serde_json::to_string(&next)?;
        self.store.set(namespaces::HISTORY, ARCHIVE_KEY, &json).await?;
        *state = next;
        Ok(())
    }

    /// Archived record for a run
    pub async fn get(&self, id: Uuid) -> Option<RunRecord> {
        self.state
            .read()
            .await
            .history
            .iter()
            .find(|record| record.id == id)
            .cloned()
    }

    /// Register a run that has been requested but not finished
    pub async fn start_pending(&self, id: Uuid, query: &str) -> Result<(), ArchiveError> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        next.pending.insert(id, query.to_string());
        self.commit(&mut state, next).await
    }

    /// Store a finished run and drop its pending entry in one write.
    ///
    /// Works whether or not a pending entry exists; an existing record with
    /// the same id is replaced.
    pub async fn save(
        &self,
        id: Uuid,
        query: &str,
        final_report: FinalReport,
        history: Vec<Step>,
    ) -> Result<RunRecord, ArchiveError> {
        let record = RunRecord::new(id, query, final_report, history);

        let mut state = self.state.write().await;
        let mut next = state.clone();
        next.history.retain(|r| r.id != id);
        next.history.push(record.clone());
        next.pending.remove(&id);
        self.commit(&mut state, next).await?;

        tracing::info!(run_id = %id, steps = record.history.len(), "Run archived");
        Ok(record)
    }

    /// Remove one archived run
    pub async fn delete(&self, id: Uuid) -> Result<bool, ArchiveError> {
        let mut state = self.state.write().await;
        if !state.history.iter().any(|r| r.id == id) {
            return Ok(false);
        }
        let mut next = state.clone();
        next.history.retain(|r| r.id != id);
        self.commit(&mut state, next).await?;
        Ok(true)
    }

    /// Remove every archived run. Pending queries are kept.
    pub async fn clear(&self) -> Result<(), ArchiveError> {
        let mut state = self.state.write().await;
        let next = ArchiveDocument {
            history: Vec::new(),
            pending: state.pending.clone(),
        };
        self.commit(&mut state, next).await
    }

    /// Archived runs, newest first, optionally filtered by a
    /// case-insensitive substring of the query
    pub async fn list(&self, filter: Option<&str>) -> Vec<RunRecord> {
        let needle = filter.map(|f| f.to_lowercase()).unwrap_or_default();
        let state = self.state.read().await;

        let mut records: Vec<RunRecord> = state
            .history
            .iter()
            .filter(|r| needle.is_empty() || r.query.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records
    }

    /// Query of a started-but-unarchived run
    pub async fn pending_query(&self, id: Uuid) -> Option<String> {
        self.state.read().await.pending.get(&id).cloned()
    }

    /// All started-but-unarchived runs
    pub async fn pending(&self) -> BTreeMap<Uuid, String> {
        self.state.read().await.pending.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.history.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, MemoryStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory store whose writes start failing once `fail` is set
    struct FailingStore {
        inner: MemoryStore,
        fail: AtomicBool,
    }

    #[async_trait]
    impl KeyValueStore for FailingStore {
        async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(namespace, key).await
        }

        async fn set(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Sqlx(sqlx::Error::PoolClosed));
            }
            self.inner.set(namespace, key, value).await
        }

        async fn delete(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
            self.inner.delete(namespace, key).await
        }

        async fn clear(&self, namespace: &str) -> Result<(), StoreError> {
            self.inner.clear(namespace).await
        }
    }

    fn report(text: &str) -> FinalReport {
        FinalReport {
            report: text.to_string(),
            image_urls: vec![],
        }
    }

    #[tokio::test]
    async fn test_pending_then_save_moves_run() {
        let archive = Archive::load(Arc::new(MemoryStore::new())).await.unwrap();
        let id = Uuid::new_v4();

        archive.start_pending(id, "rust async").await.unwrap();
        assert_eq!(archive.pending_query(id).await.as_deref(), Some("rust async"));
        assert!(archive.get(id).await.is_none());

        archive.save(id, "rust async", report("R"), vec![]).await.unwrap();
        assert!(archive.pending_query(id).await.is_none());
        assert_eq!(archive.get(id).await.unwrap().final_report.report, "R");
    }

    #[tokio::test]
    async fn test_save_without_pending_and_twice() {
        let archive = Archive::load(Arc::new(MemoryStore::new())).await.unwrap();
        let id = Uuid::new_v4();

        archive.save(id, "q", report("first"), vec![]).await.unwrap();
        archive.save(id, "q", report("second"), vec![]).await.unwrap();

        assert_eq!(archive.len().await, 1);
        assert_eq!(archive.get(id).await.unwrap().final_report.report, "second");
    }

    #[tokio::test]
    async fn test_list_sorts_newest_first_and_filters() {
        let archive = Archive::load(Arc::new(MemoryStore::new())).await.unwrap();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        archive.save(first, "Solar Panels", report("a"), vec![]).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        archive.save(second, "wind turbines", report("b"), vec![]).await.unwrap();

        let all = archive.list(None).await;
        assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![second, first]);

        let solar = archive.list(Some("SOLAR")).await;
        assert_eq!(solar.len(), 1);
        assert_eq!(solar[0].id, first);

        assert!(archive.list(Some("tidal")).await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_and_clear_keep_pending() {
        let archive = Archive::load(Arc::new(MemoryStore::new())).await.unwrap();
        let done = Uuid::new_v4();
        let waiting = Uuid::new_v4();

        archive.save(done, "q", report("R"), vec![]).await.unwrap();
        archive.start_pending(waiting, "other").await.unwrap();

        assert!(archive.delete(done).await.unwrap());
        assert!(!archive.delete(done).await.unwrap());

        archive.clear().await.unwrap();
        assert!(archive.is_empty().await);
        assert_eq!(archive.pending().await.len(), 1);
    }

    #[tokio::test]
    async fn test_archive_survives_reload() {
        let store: Arc<dyn KeyValueStore> = Arc::new(Database::in_memory().await.unwrap());
        let id = Uuid::new_v4();

        let archive = Archive::load(store.clone()).await.unwrap();
        archive.save(id, "persist me", report("R"), vec![]).await.unwrap();
        drop(archive);

        let reloaded = Archive::load(store).await.unwrap();
        let record = reloaded.get(id).await.unwrap();
        assert_eq!(record.query, "persist me");
    }

    #[tokio::test]
    async fn test_failed_write_leaves_archive_unchanged() {
        let store = Arc::new(FailingStore {
            inner: MemoryStore::new(),
            fail: AtomicBool::new(false),
        });
        let archive = Archive::load(store.clone()).await.unwrap();
        let kept = Uuid::new_v4();
        let id = Uuid::new_v4();

        archive.save(kept, "kept", report("K"), vec![]).await.unwrap();
        archive.start_pending(id, "q").await.unwrap();
        store.fail.store(true, Ordering::SeqCst);

        assert!(archive.save(id, "q", report("R"), vec![]).await.is_err());
        assert!(archive.get(id).await.is_none());
        assert_eq!(archive.pending_query(id).await.as_deref(), Some("q"));

        assert!(archive.start_pending(Uuid::new_v4(), "other").await.is_err());
        assert!(archive.delete(kept).await.is_err());
        assert!(archive.clear().await.is_err());
        assert_eq!(archive.len().await, 1);
        assert_eq!(archive.pending().await.len(), 1);

        let reloaded = Archive::load(store).await.unwrap();
        assert!(reloaded.get(id).await.is_none());
        assert!(reloaded.get(kept).await.is_some());
        assert_eq!(reloaded.pending_query(id).await.as_deref(), Some("q"));
    }

    #[tokio::test]
    async fn test_record_serializes_camel_case() {
        let record = RunRecord::new(Uuid::nil(), "q", report("R"), vec![]);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["finalReport"]["report"], "R");
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
        assert!(json["history"].as_array().unwrap().is_empty());
    }
}
