//! `millstock-client`
//!
//! **Responsibility:** offline-first data access for the inventory dashboard.
//!
//! This crate provides:
//! - A REST client for the backend resources (`remote`)
//! - A durable key/text store with an in-memory session fallback (`storage`)
//! - Per-resource snapshots of the last good read (`cache`)
//! - A FIFO queue of writes made while the backend was unreachable (`offline_queue`)
//! - The coordinator that ties them together and replays on reconnect (`coordinator`)
//! - Connectivity tracking (`connectivity`) and the screen controllers (`screens`)
//!
//! The backend remains the authority; the client never merges concurrent edits
//! (last writer wins).

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod offline_queue;
pub mod remote;
pub mod screens;
pub mod storage;
pub mod types;

pub use cache::LocalCache;
pub use config::{ClientConfig, ConfigError};
pub use connectivity::{ConnectivityMonitor, ConnectivityProbe, ConnectivityWatcher};
pub use coordinator::{SyncCoordinator, SyncError};
pub use offline_queue::{DrainReport, OfflineWriteQueue, Replay};
pub use remote::{HttpRemoteStore, InMemoryRemote, RemoteError, RemoteStore};
pub use screens::{ReportsController, ScreenController};
pub use storage::{DurableStore, MemoryStore, ResilientStore, SqliteStore, StorageError};
pub use types::{
    ConnectivityState, Freshness, QueuedWrite, ReadResult, RejectedWrite, SyncMode, SyncNotice,
    SyncReport, WriteKind, WriteOutcome,
};
