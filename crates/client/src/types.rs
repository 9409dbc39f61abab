//! Shared types for the sync layer and the screens.

use chrono::{DateTime, Utc};
use millstock_core::{Record, ResourceKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Connectivity state of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    /// Online and connected to the API.
    Online,
    /// Offline (network unreachable or API unavailable).
    Offline,
}

/// Per-resource sync state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Last backend call succeeded and nothing is waiting to be replayed.
    #[default]
    Live,
    /// Serving cached reads and/or holding queued writes.
    Degraded,
}

/// Kind of a write operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteKind {
    Create,
    Update,
    Delete,
}

impl WriteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteKind::Create => "create",
            WriteKind::Update => "update",
            WriteKind::Delete => "delete",
        }
    }
}

/// A write held back because the backend could not be reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedWrite {
    pub id: Uuid,
    pub resource: ResourceKind,
    pub kind: WriteKind,
    pub record: Record,
    pub enqueued_at: DateTime<Utc>,
}

/// A queued write the backend refused during replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedWrite {
    pub write: QueuedWrite,
    pub reason: String,
    pub rejected_at: DateTime<Utc>,
}

/// Where the records of a read came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum Freshness {
    /// Straight from the backend.
    Live,
    /// Local snapshot; `fetched_at` is when it was last read from the backend.
    Cached { fetched_at: Option<DateTime<Utc>> },
}

/// Result of `SyncCoordinator::read`.
#[derive(Debug, Clone, Serialize)]
pub struct ReadResult {
    pub resource: ResourceKind,
    pub records: Vec<Record>,
    pub freshness: Freshness,
    /// Writes still waiting to be replayed for this resource.
    pub pending: usize,
}

impl ReadResult {
    pub fn is_degraded(&self) -> bool {
        matches!(self.freshness, Freshness::Cached { .. })
    }
}

/// Result of a create/update/delete.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "record", rename_all = "snake_case")]
pub enum WriteOutcome {
    /// Confirmed by the backend.
    Saved(Record),
    /// Queued for replay; the record is shown optimistically.
    SavedOffline(Record),
    Deleted,
    DeletedOffline,
    /// A never-synced record was dropped locally together with its queued writes.
    Discarded,
}

impl WriteOutcome {
    pub fn is_offline(&self) -> bool {
        matches!(self, WriteOutcome::SavedOffline(_) | WriteOutcome::DeletedOffline)
    }
}

/// Outcome of replaying one resource's queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub resource: Option<ResourceKind>,
    pub replayed: usize,
    pub rejected: usize,
    pub remaining: usize,
    pub error: Option<String>,
}

impl SyncReport {
    pub fn for_resource(resource: ResourceKind) -> Self {
        Self {
            resource: Some(resource),
            ..Self::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.remaining == 0 && self.error.is_none()
    }
}

/// User-facing signals emitted by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncNotice {
    /// A read was served from the local snapshot.
    Degraded { resource: ResourceKind, reason: String },
    /// A write was queued instead of reaching the backend.
    SavedOffline { resource: ResourceKind, kind: WriteKind },
    /// All queued writes of a resource were replayed.
    SyncCompleted { resource: ResourceKind, replayed: usize },
    /// The backend refused a queued write; it was moved aside.
    WriteRejected { resource: ResourceKind, reason: String },
    /// A record was already gone on the backend; the list was refreshed.
    StaleRecord { resource: ResourceKind, reason: String },
    /// Durable storage failed; this session continues in memory only.
    StorageUnavailable { reason: String },
}

impl SyncNotice {
    pub fn resource(&self) -> Option<ResourceKind> {
        match self {
            SyncNotice::Degraded { resource, .. }
            | SyncNotice::SavedOffline { resource, .. }
            | SyncNotice::SyncCompleted { resource, .. }
            | SyncNotice::WriteRejected { resource, .. }
            | SyncNotice::StaleRecord { resource, .. } => Some(*resource),
            SyncNotice::StorageUnavailable { .. } => None,
        }
    }
}
