//! Sync coordinator: the only writer of the local cache and offline queue.
//!
//! The cache holds only what the backend returned or confirmed, and its
//! `fetched_at` moves only on a successful read. Unsynced edits are kept in
//! the queue and laid over the cached rows whenever a list is built.
//!
//! Reads go to the backend first and fall back to the cached snapshot when it
//! cannot be reached. Writes go to the backend first and are queued when it
//! cannot be reached; queued writes replay in FIFO order per resource on
//! reconnect or ahead of the next write. Each resource tracks its own
//! `SyncMode`, which is `Live` only after a successful backend call with
//! nothing left in its queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use millstock_core::{DomainError, Record, RecordId, ResourceKind};
use thiserror::Error;
use tokio::sync::{Mutex, broadcast};

use crate::cache::LocalCache;
use crate::config::ClientConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::offline_queue::{OfflineWriteQueue, Replay};
use crate::remote::{HttpRemoteStore, RemoteError, RemoteStore};
use crate::storage::{DurableStore, ResilientStore, SqliteStore, StorageError};
use crate::types::{
    ConnectivityState, Freshness, QueuedWrite, ReadResult, RejectedWrite, SyncMode, SyncNotice,
    SyncReport, WriteKind, WriteOutcome,
};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// In-memory list a screen renders, plus its mode.
#[derive(Debug, Default)]
struct ResourceView {
    records: Vec<Record>,
    mode: SyncMode,
    loaded: bool,
}

pub struct SyncCoordinator {
    remote: Arc<dyn RemoteStore>,
    store: Arc<ResilientStore>,
    cache: LocalCache,
    queue: OfflineWriteQueue,
    views: Mutex<HashMap<ResourceKind, ResourceView>>,
    connectivity: Mutex<ConnectivityState>,
    notices: broadcast::Sender<SyncNotice>,
    probe_interval: Duration,
}

impl SyncCoordinator {
    pub fn new(config: &ClientConfig, remote: Arc<dyn RemoteStore>, durable: Arc<dyn DurableStore>) -> Self {
        let store = Arc::new(ResilientStore::new(durable));
        let shared: Arc<dyn DurableStore> = store.clone();
        let (notices, _) = broadcast::channel(64);
        Self {
            remote,
            cache: LocalCache::new(shared.clone(), config.namespace.clone()),
            queue: OfflineWriteQueue::new(shared, config.namespace.clone()),
            store,
            views: Mutex::new(HashMap::new()),
            connectivity: Mutex::new(ConnectivityState::Online),
            notices,
            probe_interval: config.probe_interval,
        }
    }

    /// Coordinator over the HTTP backend and the SQLite store from `config`.
    pub fn connect(config: &ClientConfig) -> anyhow::Result<Self> {
        let remote = HttpRemoteStore::new(config).context("failed to build backend client")?;
        let path = config
            .resolved_storage_path()
            .context("failed to resolve local storage path")?;
        tracing::info!(base_url = %config.base_url, storage = ?path, "sync coordinator configured");
        Ok(Self::new(config, Arc::new(remote), Arc::new(SqliteStore::new(path))))
    }

    /// Ping the backend every `probe_interval` and replay queues when it comes back.
    pub fn watch_connectivity(self: &Arc<Self>) -> ConnectivityMonitor {
        ConnectivityMonitor::start(self.clone(), self.remote.clone(), self.probe_interval)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncNotice> {
        self.notices.subscribe()
    }

    pub async fn connectivity(&self) -> ConnectivityState {
        *self.connectivity.lock().await
    }

    pub async fn mode(&self, resource: ResourceKind) -> SyncMode {
        self.views
            .lock()
            .await
            .get(&resource)
            .map(|v| v.mode)
            .unwrap_or_default()
    }

    /// Current in-memory list, including optimistic offline changes.
    pub async fn records(&self, resource: ResourceKind) -> Vec<Record> {
        self.views
            .lock()
            .await
            .get(&resource)
            .map(|v| v.records.clone())
            .unwrap_or_default()
    }

    pub async fn pending_writes(&self, resource: ResourceKind) -> Result<Vec<QueuedWrite>, SyncError> {
        Ok(self.queue.pending(resource).await?)
    }

    pub async fn pending_count(&self, resource: ResourceKind) -> Result<usize, SyncError> {
        Ok(self.queue.len(resource).await?)
    }

    /// Whether `record` still has writes waiting for replay.
    pub async fn is_pending(&self, resource: ResourceKind, record: &Record) -> Result<bool, SyncError> {
        Ok(self
            .queue
            .pending(resource)
            .await?
            .iter()
            .any(|w| w.record.same_record(record)))
    }

    pub async fn rejected_writes(&self, resource: ResourceKind) -> Result<Vec<RejectedWrite>, SyncError> {
        Ok(self.queue.rejected(resource).await?)
    }

    /// Drop the refused writes once the user has seen them; returns how many there were.
    pub async fn clear_rejected(&self, resource: ResourceKind) -> Result<usize, SyncError> {
        let count = self.queue.rejected(resource).await?.len();
        if count > 0 {
            self.queue.clear_rejected(resource).await?;
            tracing::info!(resource = %resource, count, "rejected writes acknowledged");
        }
        Ok(count)
    }

    /// Fetch a resource list, falling back to the cached snapshot when offline.
    pub async fn read(&self, resource: ResourceKind) -> Result<ReadResult, SyncError> {
        if !self.queue.is_empty(resource).await? {
            self.replay(resource).await?;
        }

        let result = match self.remote.list(resource).await {
            Ok(records) => {
                self.cache.put(resource, &records).await?;
                let pending = self.queue.pending(resource).await?;
                let records = overlay(records, &pending);
                let mode = self.settle(resource, true, pending.len()).await;
                self.replace_view(resource, records.clone(), mode).await;
                self.mark_online().await;
                Ok(ReadResult {
                    resource,
                    records,
                    freshness: Freshness::Live,
                    pending: pending.len(),
                })
            }
            Err(err) if err.is_connectivity() => {
                self.mark_offline().await;
                let entry = match self.cache.entry(resource).await {
                    Ok(entry) => entry,
                    Err(storage_err) => {
                        tracing::error!(resource = %resource, "cached snapshot unusable: {storage_err}");
                        None
                    }
                };
                let fetched_at = entry.as_ref().map(|e| e.fetched_at);
                let pending = self.queue.pending(resource).await?;
                let records = overlay(entry.map(|e| e.records).unwrap_or_default(), &pending);
                self.replace_view(resource, records.clone(), SyncMode::Degraded).await;
                self.notify(SyncNotice::Degraded {
                    resource,
                    reason: err.to_string(),
                });
                Ok(ReadResult {
                    resource,
                    records,
                    freshness: Freshness::Cached { fetched_at },
                    pending: pending.len(),
                })
            }
            Err(err) => Err(SyncError::Remote(err)),
        };

        self.flush_storage_warning();
        result
    }

    pub async fn create(&self, resource: ResourceKind, record: Record) -> Result<WriteOutcome, SyncError> {
        let record = resource.schema().normalize(&record)?;
        self.ensure_view(resource).await?;
        let outcome = self.submit(resource, WriteKind::Create, record).await;
        self.flush_storage_warning();
        outcome
    }

    pub async fn update(&self, resource: ResourceKind, record: Record) -> Result<WriteOutcome, SyncError> {
        let mut record = resource.schema().normalize(&record)?;
        self.ensure_view(resource).await?;
        if record.id.is_none() {
            record.id = self.resolve_id(resource, &record).await;
        }
        let outcome = self.submit(resource, WriteKind::Update, record).await;
        self.flush_storage_warning();
        outcome
    }

    pub async fn delete(&self, resource: ResourceKind, record: &Record) -> Result<WriteOutcome, SyncError> {
        self.ensure_view(resource).await?;
        let mut record = record.clone();
        if record.id.is_none() {
            record.id = self.resolve_id(resource, &record).await;
        }

        let outcome = if record.id.is_none() {
            // Never reached the backend: drop it and everything queued for it.
            let removed = self.queue.discard_local(resource, record.local_id).await?;
            self.merge(resource, WriteKind::Delete, &record).await;
            tracing::info!(resource = %resource, removed, "unsynced record discarded locally");
            Ok(WriteOutcome::Discarded)
        } else {
            self.submit(resource, WriteKind::Delete, record).await
        };
        self.flush_storage_warning();
        outcome
    }

    /// Drain every resource with queued writes, then refresh the ones that finished.
    pub async fn reconnected(&self) -> Vec<SyncReport> {
        self.mark_online().await;

        let resources = match self.queue.resources_with_pending().await {
            Ok(resources) => resources,
            Err(err) => {
                tracing::error!("failed to read offline queue: {err}");
                return Vec::new();
            }
        };

        let mut reports = Vec::with_capacity(resources.len());
        for resource in resources {
            let mut report = match self.replay(resource).await {
                Ok(report) => report,
                Err(err) => SyncReport {
                    error: Some(err.to_string()),
                    ..SyncReport::for_resource(resource)
                },
            };
            if report.is_complete() {
                if let Err(err) = self.read(resource).await {
                    report.error = Some(err.to_string());
                }
            }
            reports.push(report);
        }
        self.flush_storage_warning();
        reports
    }

    /// Feed an observed connectivity state; replays queues on Offline -> Online.
    pub async fn on_connectivity(&self, state: ConnectivityState) -> Vec<SyncReport> {
        let previous = {
            let mut current = self.connectivity.lock().await;
            std::mem::replace(&mut *current, state)
        };
        match (previous, state) {
            (ConnectivityState::Offline, ConnectivityState::Online) => {
                tracing::info!("connectivity restored, replaying queued writes");
                self.reconnected().await
            }
            (ConnectivityState::Online, ConnectivityState::Offline) => {
                tracing::warn!("connectivity lost");
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    async fn submit(
        &self,
        resource: ResourceKind,
        kind: WriteKind,
        mut record: Record,
    ) -> Result<WriteOutcome, SyncError> {
        if !self.queue.is_empty(resource).await? {
            let report = self.replay(resource).await?;
            if report.remaining > 0 {
                let reason = report
                    .error
                    .unwrap_or_else(|| "earlier writes are still queued".to_string());
                return self.save_offline(resource, kind, record, &reason).await;
            }
            if record.id.is_none() && kind != WriteKind::Create {
                record.id = self.resolve_id(resource, &record).await;
            }
        }

        let result = match kind {
            WriteKind::Create => self.remote.create(resource, &record).await.map(Some),
            WriteKind::Update => {
                let Some(id) = record.id.clone() else {
                    return Err(SyncError::NotFound(format!(
                        "{} record has no server id",
                        resource.label()
                    )));
                };
                self.remote.update(resource, &id, &record).await.map(Some)
            }
            WriteKind::Delete => {
                let Some(id) = record.id.clone() else {
                    return Err(SyncError::NotFound(format!(
                        "{} record has no server id",
                        resource.label()
                    )));
                };
                self.remote.delete(resource, &id).await.map(|_| None)
            }
        };

        match result {
            Ok(confirmed) => {
                self.mark_online().await;
                let merged = confirmed.unwrap_or(record);
                self.merge(resource, kind, &merged).await;
                self.cache_confirmed(resource, kind, &merged).await;
                let pending = self.queue.len(resource).await?;
                self.settle(resource, true, pending).await;
                tracing::info!(resource = %resource, kind = kind.as_str(), "write confirmed");
                Ok(match kind {
                    WriteKind::Delete => WriteOutcome::Deleted,
                    _ => WriteOutcome::Saved(merged),
                })
            }
            Err(err) if err.is_connectivity() => {
                self.mark_offline().await;
                self.save_offline(resource, kind, record, &err.to_string()).await
            }
            Err(RemoteError::Validation(reason)) => {
                tracing::warn!(resource = %resource, kind = kind.as_str(), "write rejected: {reason}");
                Err(SyncError::Validation(DomainError::validation(reason)))
            }
            Err(RemoteError::NotFound(reason)) => {
                tracing::warn!(resource = %resource, kind = kind.as_str(), "stale record: {reason}");
                if let Err(err) = self.read(resource).await {
                    tracing::warn!(resource = %resource, "refresh after stale record failed: {err}");
                }
                self.notify(SyncNotice::StaleRecord {
                    resource,
                    reason: reason.clone(),
                });
                Err(SyncError::NotFound(reason))
            }
            Err(err) => Err(SyncError::Remote(err)),
        }
    }

    async fn save_offline(
        &self,
        resource: ResourceKind,
        kind: WriteKind,
        record: Record,
        reason: &str,
    ) -> Result<WriteOutcome, SyncError> {
        tracing::warn!(resource = %resource, kind = kind.as_str(), "backend unreachable, saving offline: {reason}");
        self.queue.enqueue(resource, kind, record.clone()).await?;
        self.merge(resource, kind, &record).await;
        self.set_mode(resource, SyncMode::Degraded).await;
        self.notify(SyncNotice::SavedOffline { resource, kind });
        Ok(match kind {
            WriteKind::Delete => WriteOutcome::DeletedOffline,
            _ => WriteOutcome::SavedOffline(record),
        })
    }

    /// Replay one resource's queue and fold the results into its list.
    async fn replay(&self, resource: ResourceKind) -> Result<SyncReport, SyncError> {
        self.ensure_view(resource).await?;
        let drained = self
            .queue
            .drain(resource, |write| self.apply_queued(write))
            .await?;

        for rejected in &drained.rejected {
            tracing::error!(
                resource = %resource,
                kind = rejected.write.kind.as_str(),
                "queued write rejected by backend: {}",
                rejected.reason
            );
            self.notify(SyncNotice::WriteRejected {
                resource,
                reason: rejected.reason.clone(),
            });
        }
        if drained.applied > 0 && drained.remaining == 0 {
            self.notify(SyncNotice::SyncCompleted {
                resource,
                replayed: drained.applied,
            });
        }

        Ok(SyncReport {
            resource: Some(resource),
            replayed: drained.applied,
            rejected: drained.rejected.len(),
            remaining: drained.remaining,
            error: drained.stopped,
        })
    }

    async fn apply_queued(&self, write: QueuedWrite) -> Replay {
        let QueuedWrite {
            resource,
            kind,
            record,
            ..
        } = write;

        let result = match (kind, record.id.clone()) {
            (WriteKind::Create, _) => self.remote.create(resource, &record).await.map(Some),
            (WriteKind::Update, Some(id)) => self.remote.update(resource, &id, &record).await.map(Some),
            (WriteKind::Update, None) => {
                return Replay::Rejected("update of a record that was never created".to_string());
            }
            (WriteKind::Delete, Some(id)) => match self.remote.delete(resource, &id).await {
                Err(RemoteError::NotFound(reason)) => {
                    tracing::warn!(resource = %resource, "queued delete of a record already gone: {reason}");
                    Ok(None)
                }
                other => other.map(|_| None),
            },
            (WriteKind::Delete, None) => return Replay::Applied { assigned: None },
        };

        match result {
            Ok(confirmed) => {
                let assigned = match (kind, &confirmed) {
                    (WriteKind::Create, Some(created)) => created.id.clone(),
                    _ => None,
                };
                if let Some(id) = &assigned {
                    self.assign_id(resource, &record, id).await;
                }
                self.cache_confirmed(resource, kind, confirmed.as_ref().unwrap_or(&record))
                    .await;
                Replay::Applied { assigned }
            }
            Err(RemoteError::Validation(reason)) | Err(RemoteError::NotFound(reason)) => {
                if kind == WriteKind::Create {
                    self.merge(resource, WriteKind::Delete, &record).await;
                }
                Replay::Rejected(reason)
            }
            Err(err) => {
                if err.is_connectivity() {
                    self.mark_offline().await;
                }
                Replay::Retry(err.to_string())
            }
        }
    }

    /// Build the in-memory list from the cache the first time a resource is touched.
    async fn ensure_view(&self, resource: ResourceKind) -> Result<(), SyncError> {
        if self.views.lock().await.get(&resource).is_some_and(|v| v.loaded) {
            return Ok(());
        }
        let cached = match self.cache.get(resource).await {
            Ok(records) => records,
            Err(err) => {
                tracing::error!(resource = %resource, "cached snapshot unusable: {err}");
                Vec::new()
            }
        };
        let pending = self.queue.pending(resource).await?;
        let records = overlay(cached, &pending);

        let mut views = self.views.lock().await;
        let view = views.entry(resource).or_default();
        if !view.loaded {
            view.records = records;
            view.loaded = true;
            if !pending.is_empty() {
                view.mode = SyncMode::Degraded;
            }
        }
        Ok(())
    }

    async fn replace_view(&self, resource: ResourceKind, records: Vec<Record>, mode: SyncMode) {
        let mut views = self.views.lock().await;
        let view = views.entry(resource).or_default();
        view.records = records;
        view.loaded = true;
        Self::transition(resource, view, mode);
    }

    /// Fold a backend-confirmed write into the cached rows without moving `fetched_at`.
    async fn cache_confirmed(&self, resource: ResourceKind, kind: WriteKind, record: &Record) {
        let mut entry = match self.cache.entry(resource).await {
            Ok(Some(entry)) => entry,
            // Nothing cached yet; the next read stores the full list.
            Ok(None) => return,
            Err(err) => {
                tracing::error!(resource = %resource, "cached snapshot unusable: {err}");
                return;
            }
        };
        apply_merge(&mut entry.records, kind, record);
        if let Err(err) = self.cache.store_entry(resource, &entry).await {
            tracing::error!(resource = %resource, "failed to store confirmed write in cache: {err}");
        }
    }

    async fn merge(&self, resource: ResourceKind, kind: WriteKind, record: &Record) {
        let mut views = self.views.lock().await;
        let view = views.entry(resource).or_default();
        apply_merge(&mut view.records, kind, record);
    }

    async fn assign_id(&self, resource: ResourceKind, record: &Record, id: &RecordId) {
        let mut views = self.views.lock().await;
        if let Some(view) = views.get_mut(&resource) {
            for row in view.records.iter_mut().filter(|r| r.id.is_none() && r.local_id == record.local_id) {
                row.id = Some(id.clone());
            }
        }
    }

    async fn resolve_id(&self, resource: ResourceKind, record: &Record) -> Option<RecordId> {
        self.views
            .lock()
            .await
            .get(&resource)
            .and_then(|v| v.records.iter().find(|r| r.local_id == record.local_id))
            .and_then(|r| r.id.clone())
    }

    /// `Live` only when the backend answered and nothing is left to replay.
    async fn settle(&self, resource: ResourceKind, reached_backend: bool, pending: usize) -> SyncMode {
        let mode = if reached_backend && pending == 0 {
            SyncMode::Live
        } else {
            SyncMode::Degraded
        };
        self.set_mode(resource, mode).await;
        mode
    }

    async fn set_mode(&self, resource: ResourceKind, mode: SyncMode) {
        let mut views = self.views.lock().await;
        let view = views.entry(resource).or_default();
        Self::transition(resource, view, mode);
    }

    fn transition(resource: ResourceKind, view: &mut ResourceView, mode: SyncMode) {
        if view.mode != mode {
            tracing::info!(resource = %resource, from = ?view.mode, to = ?mode, "sync mode changed");
            view.mode = mode;
        }
    }

    async fn mark_offline(&self) {
        *self.connectivity.lock().await = ConnectivityState::Offline;
    }

    async fn mark_online(&self) {
        *self.connectivity.lock().await = ConnectivityState::Online;
    }

    fn notify(&self, notice: SyncNotice) {
        tracing::info!(notice = ?notice, "sync notice");
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }

    fn flush_storage_warning(&self) {
        if let Some(err) = self.store.take_warning() {
            self.notify(SyncNotice::StorageUnavailable {
                reason: err.to_string(),
            });
        }
    }
}

/// Apply a write to a list the way the screens show it.
fn apply_merge(records: &mut Vec<Record>, kind: WriteKind, record: &Record) {
    match kind {
        WriteKind::Create => match records.iter_mut().find(|r| r.same_record(record)) {
            Some(existing) => *existing = record.clone(),
            None => records.insert(0, record.clone()),
        },
        WriteKind::Update => {
            if let Some(existing) = records.iter_mut().find(|r| r.same_record(record)) {
                *existing = record.clone();
            }
        }
        WriteKind::Delete => records.retain(|r| !r.same_record(record)),
    }
}

/// Lay queued writes over a snapshot so unsynced changes stay visible.
fn overlay(mut records: Vec<Record>, pending: &[QueuedWrite]) -> Vec<Record> {
    for write in pending {
        apply_merge(&mut records, write.kind, &write.record);
    }
    records
}
