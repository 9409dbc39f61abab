//! Durable FIFO of writes that could not reach the backend.
//!
//! One list per resource under `{namespace}:pending:{resource}`; writes the
//! backend refused during replay move to `{namespace}:rejected:{resource}`.
//! Every mutation rewrites the list in a single `set`, so a crash leaves
//! either the old or the new list.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use millstock_core::{LocalId, Record, RecordId, ResourceKind};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::storage::{DurableStore, StorageError};
use crate::types::{QueuedWrite, RejectedWrite, WriteKind};

/// Verdict of replaying one queued write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replay {
    /// The backend accepted it. `assigned` carries the id of a newly created record.
    Applied { assigned: Option<RecordId> },
    /// The backend refused it for good. It moves aside together with every
    /// later write for the same record; other records keep replaying.
    Rejected(String),
    /// Still unreachable; stop and keep this write at the head.
    Retry(String),
}

/// What one `drain` pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    pub applied: usize,
    pub rejected: Vec<RejectedWrite>,
    /// Reason the pass stopped early, if it did.
    pub stopped: Option<String>,
    pub remaining: usize,
}

pub struct OfflineWriteQueue {
    store: Arc<dyn DurableStore>,
    namespace: String,
    /// Guards read-modify-write of the stored lists.
    lock: Mutex<()>,
    /// Serializes replay passes.
    draining: Mutex<()>,
}

impl OfflineWriteQueue {
    pub fn new(store: Arc<dyn DurableStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            lock: Mutex::new(()),
            draining: Mutex::new(()),
        }
    }

    fn pending_key(&self, resource: ResourceKind) -> String {
        format!("{}:pending:{}", self.namespace, resource.as_str())
    }

    fn rejected_key(&self, resource: ResourceKind) -> String {
        format!("{}:rejected:{}", self.namespace, resource.as_str())
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>, StorageError> {
        match self.store.get(key).await? {
            None => Ok(Vec::new()),
            Some(raw) => serde_json::from_str(&raw).map_err(|e| StorageError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn save<T: Serialize>(&self, key: &str, items: &[T]) -> Result<(), StorageError> {
        if items.is_empty() {
            return self.store.remove(key).await;
        }
        let payload = serde_json::to_string(items).map_err(|e| StorageError::Corrupt {
            key: key.to_string(),
            reason: format!("failed to serialize queue: {e}"),
        })?;
        self.store.set(key, &payload).await
    }

    /// Append a write to the tail of the resource's queue.
    pub async fn enqueue(
        &self,
        resource: ResourceKind,
        kind: WriteKind,
        record: Record,
    ) -> Result<QueuedWrite, StorageError> {
        let write = QueuedWrite {
            id: Uuid::now_v7(),
            resource,
            kind,
            record,
            enqueued_at: Utc::now(),
        };

        let _guard = self.lock.lock().await;
        let key = self.pending_key(resource);
        let mut pending: Vec<QueuedWrite> = self.load(&key).await?;
        pending.push(write.clone());
        self.save(&key, &pending).await?;

        tracing::info!(
            resource = %resource,
            kind = kind.as_str(),
            queued = pending.len(),
            "write queued for replay"
        );
        Ok(write)
    }

    /// Queued writes in replay order.
    pub async fn pending(&self, resource: ResourceKind) -> Result<Vec<QueuedWrite>, StorageError> {
        let _guard = self.lock.lock().await;
        self.load(&self.pending_key(resource)).await
    }

    pub async fn peek(&self, resource: ResourceKind) -> Result<Option<QueuedWrite>, StorageError> {
        Ok(self.pending(resource).await?.into_iter().next())
    }

    pub async fn len(&self, resource: ResourceKind) -> Result<usize, StorageError> {
        Ok(self.pending(resource).await?.len())
    }

    pub async fn is_empty(&self, resource: ResourceKind) -> Result<bool, StorageError> {
        Ok(self.len(resource).await? == 0)
    }

    pub async fn resources_with_pending(&self) -> Result<Vec<ResourceKind>, StorageError> {
        let mut out = Vec::new();
        for resource in ResourceKind::ALL {
            if !self.is_empty(resource).await? {
                out.push(resource);
            }
        }
        Ok(out)
    }

    /// Drop every queued write for a record the backend has never seen.
    ///
    /// Returns how many writes were removed.
    pub async fn discard_local(
        &self,
        resource: ResourceKind,
        local_id: LocalId,
    ) -> Result<usize, StorageError> {
        let _guard = self.lock.lock().await;
        let key = self.pending_key(resource);
        let mut pending: Vec<QueuedWrite> = self.load(&key).await?;
        let before = pending.len();
        pending.retain(|w| !(w.record.local_id == local_id && w.record.id.is_none()));
        let removed = before - pending.len();
        if removed > 0 {
            self.save(&key, &pending).await?;
            tracing::info!(resource = %resource, removed, "discarded queued writes for unsynced record");
        }
        Ok(removed)
    }

    /// Writes the backend refused during replay, oldest first.
    pub async fn rejected(&self, resource: ResourceKind) -> Result<Vec<RejectedWrite>, StorageError> {
        let _guard = self.lock.lock().await;
        self.load(&self.rejected_key(resource)).await
    }

    pub async fn clear_rejected(&self, resource: ResourceKind) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        self.store.remove(&self.rejected_key(resource)).await
    }

    /// Replay queued writes head-first through `apply`.
    ///
    /// A write leaves the queue only after `apply` returns `Applied` or
    /// `Rejected`; `Retry` stops the pass with that write still at the head.
    /// A rejected write takes the later writes for the same record with it,
    /// so no write ever replays ahead of one that failed before it.
    /// The lock is not held across `apply`, so writes enqueued meanwhile land
    /// behind the ones being replayed.
    pub async fn drain<F, Fut>(
        &self,
        resource: ResourceKind,
        mut apply: F,
    ) -> Result<DrainReport, StorageError>
    where
        F: FnMut(QueuedWrite) -> Fut,
        Fut: Future<Output = Replay>,
    {
        let _pass = self.draining.lock().await;
        let key = self.pending_key(resource);
        let mut report = DrainReport::default();

        loop {
            let head = {
                let _guard = self.lock.lock().await;
                let pending: Vec<QueuedWrite> = self.load(&key).await?;
                pending.into_iter().next()
            };
            let Some(head) = head else {
                break;
            };

            let verdict = apply(head.clone()).await;

            let _guard = self.lock.lock().await;
            let mut pending: Vec<QueuedWrite> = self.load(&key).await?;

            match verdict {
                Replay::Retry(reason) => {
                    tracing::warn!(resource = %resource, kind = head.kind.as_str(), "replay stopped: {reason}");
                    report.stopped = Some(reason);
                    report.remaining = pending.len();
                    return Ok(report);
                }
                Replay::Applied { assigned } => {
                    pending.retain(|w| w.id != head.id);
                    if let Some(id) = assigned {
                        for later in pending
                            .iter_mut()
                            .filter(|w| w.record.id.is_none() && w.record.local_id == head.record.local_id)
                        {
                            later.record.id = Some(id.clone());
                        }
                    }
                    self.save(&key, &pending).await?;
                    report.applied += 1;
                }
                Replay::Rejected(reason) => {
                    let (dependents, kept): (Vec<QueuedWrite>, Vec<QueuedWrite>) = pending
                        .into_iter()
                        .filter(|w| w.id != head.id)
                        .partition(|w| w.record.same_record(&head.record));
                    self.save(&key, &kept).await?;

                    let now = Utc::now();
                    let mut entries = vec![RejectedWrite {
                        write: head.clone(),
                        reason: reason.clone(),
                        rejected_at: now,
                    }];
                    entries.extend(dependents.into_iter().map(|write| RejectedWrite {
                        write,
                        reason: format!("earlier {} was rejected: {reason}", head.kind.as_str()),
                        rejected_at: now,
                    }));
                    if entries.len() > 1 {
                        tracing::warn!(
                            resource = %resource,
                            set_aside = entries.len() - 1,
                            "later writes for a rejected record moved aside"
                        );
                    }

                    let rejected_key = self.rejected_key(resource);
                    let mut rejected: Vec<RejectedWrite> = self.load(&rejected_key).await?;
                    rejected.extend(entries.iter().cloned());
                    self.save(&rejected_key, &rejected).await?;
                    report.rejected.extend(entries);
                }
            }
        }

        Ok(report)
    }
}
