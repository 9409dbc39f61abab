//! Local snapshot of the last-known record list per resource.
//!
//! Only rows the backend returned or confirmed are stored here. Unsynced
//! edits live in the offline queue and are laid over the snapshot on load.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use millstock_core::{Record, ResourceKind};
use serde::{Deserialize, Serialize};

use crate::storage::{DurableStore, StorageError};

/// A stored snapshot and when it was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub records: Vec<Record>,
    pub fetched_at: DateTime<Utc>,
}

/// Per-resource list cache on top of a `DurableStore`.
///
/// Each `put` replaces the whole snapshot under `{namespace}:cache:{resource}`.
#[derive(Clone)]
pub struct LocalCache {
    store: Arc<dyn DurableStore>,
    namespace: String,
}

impl LocalCache {
    pub fn new(store: Arc<dyn DurableStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    pub fn key(&self, resource: ResourceKind) -> String {
        format!("{}:cache:{}", self.namespace, resource.as_str())
    }

    /// The stored snapshot, or `None` if the resource was never fetched.
    pub async fn entry(&self, resource: ResourceKind) -> Result<Option<CacheEntry>, StorageError> {
        let key = self.key(resource);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StorageError::Corrupt {
                key,
                reason: e.to_string(),
            })
    }

    /// Last-known records; empty if nothing was ever stored.
    pub async fn get(&self, resource: ResourceKind) -> Result<Vec<Record>, StorageError> {
        Ok(self
            .entry(resource)
            .await?
            .map(|entry| entry.records)
            .unwrap_or_default())
    }

    /// Replace the snapshot after a successful backend read, stamped with the current time.
    pub async fn put(&self, resource: ResourceKind, records: &[Record]) -> Result<(), StorageError> {
        let entry = CacheEntry {
            records: records.to_vec(),
            fetched_at: Utc::now(),
        };
        self.store_entry(resource, &entry).await
    }

    /// Store an entry as given, keeping its `fetched_at`.
    pub async fn store_entry(&self, resource: ResourceKind, entry: &CacheEntry) -> Result<(), StorageError> {
        let key = self.key(resource);
        let payload = serde_json::to_string(entry).map_err(|e| StorageError::Corrupt {
            key: key.clone(),
            reason: format!("failed to serialize snapshot: {e}"),
        })?;
        self.store.set(&key, &payload).await?;
        tracing::debug!(resource = %resource, records = entry.records.len(), "cache snapshot stored");
        Ok(())
    }

    pub async fn clear(&self, resource: ResourceKind) -> Result<(), StorageError> {
        self.store.remove(&self.key(resource)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use millstock_core::RecordId;

    fn cache() -> (Arc<MemoryStore>, LocalCache) {
        let store = Arc::new(MemoryStore::new());
        let cache = LocalCache::new(store.clone(), "plant");
        (store, cache)
    }

    #[tokio::test]
    async fn missing_snapshot_reads_as_empty() {
        let (_, cache) = cache();
        assert!(cache.get(ResourceKind::Stocks).await.unwrap().is_empty());
        assert!(cache.entry(ResourceKind::Stocks).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_replaces_the_whole_snapshot() {
        let (_, cache) = cache();
        let first = vec![
            Record::new().with_field("item", "Bags").with_id(RecordId::new("1")),
            Record::new().with_field("item", "Twine").with_id(RecordId::new("2")),
        ];
        cache.put(ResourceKind::Stocks, &first).await.unwrap();

        let second = vec![Record::new().with_field("item", "Labels").with_id(RecordId::new("3"))];
        cache.put(ResourceKind::Stocks, &second).await.unwrap();

        assert_eq!(cache.get(ResourceKind::Stocks).await.unwrap(), second);
    }

    #[tokio::test]
    async fn resources_are_kept_apart() {
        let (_, cache) = cache();
        let maize = vec![Record::new().with_field("material", "Maize")];
        cache.put(ResourceKind::RawMaterials, &maize).await.unwrap();

        assert_eq!(cache.get(ResourceKind::RawMaterials).await.unwrap(), maize);
        assert!(cache.get(ResourceKind::FinishedProducts).await.unwrap().is_empty());

        cache.clear(ResourceKind::RawMaterials).await.unwrap();
        assert!(cache.get(ResourceKind::RawMaterials).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stored_entry_keeps_its_timestamp() {
        let (_, cache) = cache();
        cache.put(ResourceKind::Stocks, &[]).await.unwrap();
        let mut entry = cache.entry(ResourceKind::Stocks).await.unwrap().unwrap();

        entry.records.push(Record::new().with_field("item", "Bags").with_id(RecordId::new("9")));
        cache.store_entry(ResourceKind::Stocks, &entry).await.unwrap();

        let stored = cache.entry(ResourceKind::Stocks).await.unwrap().unwrap();
        assert_eq!(stored.fetched_at, entry.fetched_at);
        assert_eq!(stored.records.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_reported() {
        let (store, cache) = cache();
        store.set("plant:cache:dispatches", "{not json").await.unwrap();
        let err = cache.get(ResourceKind::Dispatches).await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { ref key, .. } if key == "plant:cache:dispatches"));
    }
}
