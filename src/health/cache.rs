//! Session-scoped cache of the latest service statuses

use super::{Classification, ServiceId, ServiceStatus};
use crate::db::{namespaces, KeyValueStore, StoreError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const STATUS_KEY: &str = "state";

/// Latest [`ServiceStatus`] per service, mirrored to the `status` namespace.
///
/// Written only by the [`HealthPoller`](super::HealthPoller).
#[derive(Clone)]
pub struct StatusCache {
    store: Arc<dyn KeyValueStore>,
    statuses: Arc<RwLock<BTreeMap<ServiceId, ServiceStatus>>>,
}

impl StatusCache {
    /// Start a fresh session: whatever an earlier session left behind is dropped.
    pub async fn new_session(store: Arc<dyn KeyValueStore>) -> Result<Self, StoreError> {
        store.clear(namespaces::STATUS).await?;
        Ok(Self {
            store,
            statuses: Arc::new(RwLock::new(BTreeMap::new())),
        })
    }

    /// Reopen the statuses written by the current or last session
    pub async fn load(store: Arc<dyn KeyValueStore>) -> Result<Self, StoreError> {
        let statuses = match store.get(namespaces::STATUS, STATUS_KEY).await? {
            Some(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Discarding unreadable status cache");
                BTreeMap::new()
            }),
            None => BTreeMap::new(),
        };

        Ok(Self {
            store,
            statuses: Arc::new(RwLock::new(statuses)),
        })
    }

    pub async fn get(&self, service: ServiceId) -> Option<ServiceStatus> {
        self.statuses.read().await.get(&service).copied()
    }

    pub async fn all(&self) -> BTreeMap<ServiceId, ServiceStatus> {
        self.statuses.read().await.clone()
    }

    /// Store a new status and return the previous classification.
    ///
    /// The in-memory value is updated even if persisting it fails.
    pub(crate) async fn record(
        &self,
        service: ServiceId,
        status: ServiceStatus,
    ) -> (Option<Classification>, Result<(), StoreError>) {
        let mut statuses = self.statuses.write().await;
        let previous = statuses.insert(service, status).map(|s| s.classification);

        let flushed = match serde_json::to_string(&*statuses) {
            Ok(json) => self.store.set(namespaces::STATUS, STATUS_KEY, &json).await,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode status cache");
                Ok(())
            }
        };

        (previous, flushed)
    }
}
