//! Durable key -> text storage backing the cache and the offline queue.
//!
//! Values are opaque JSON text; each `set` replaces one key in a single
//! statement, so readers never observe a half-written snapshot.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqlitePool};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("local storage unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt entry at '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

/// Key -> text persistence.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Replace the value at `key` atomically.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// SQLite-backed store (one `kv` table), opened lazily on first use.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
    pool: Arc<tokio::sync::Mutex<Option<SqlitePool>>>,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pool: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Get the pool, creating the file and table on first use.
    async fn get_pool(&self) -> anyhow::Result<SqlitePool> {
        let mut pool_guard = self.pool.lock().await;
        if let Some(pool) = pool_guard.as_ref() {
            return Ok(pool.clone());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create storage directory at {:?}", parent))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .with_context(|| format!("failed to open SQLite store at {:?}", self.path))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .context("failed to create kv table")?;

        *pool_guard = Some(pool.clone());
        Ok(pool)
    }
}

fn unavailable(err: anyhow::Error) -> StorageError {
    StorageError::Unavailable(format!("{err:#}"))
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let pool = self.get_pool().await.map_err(unavailable)?;
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&pool)
            .await
            .with_context(|| format!("failed to read key '{key}'"))
            .map_err(unavailable)?;

        match row {
            Some(row) => {
                let value: String = row
                    .try_get("value")
                    .context("kv.value is not text")
                    .map_err(unavailable)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let pool = self.get_pool().await.map_err(unavailable)?;
        sqlx::query(
            r#"
            INSERT INTO kv (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key)
            DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&pool)
        .await
        .with_context(|| format!("failed to write key '{key}'"))
        .map_err(unavailable)?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let pool = self.get_pool().await.map_err(unavailable)?;
        sqlx::query("DELETE FROM kv WHERE key = ?1")
            .bind(key)
            .execute(&pool)
            .await
            .with_context(|| format!("failed to delete key '{key}'"))
            .map_err(unavailable)?;
        Ok(())
    }
}

/// In-process store. Used by tests and as the session fallback.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> StorageError {
    StorageError::Unavailable("memory store lock poisoned".to_string())
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// Durable store that degrades to memory for the rest of the session.
///
/// The first `Unavailable` error from the primary store flips it to the
/// in-memory fallback; the error is kept so it can be surfaced exactly once
/// (`take_warning`). `Corrupt` errors come from callers decoding values and
/// never pass through here.
pub struct ResilientStore {
    primary: Arc<dyn DurableStore>,
    fallback: MemoryStore,
    degraded: AtomicBool,
    warning: Mutex<Option<StorageError>>,
}

impl ResilientStore {
    pub fn new(primary: Arc<dyn DurableStore>) -> Self {
        Self {
            primary,
            fallback: MemoryStore::new(),
            degraded: AtomicBool::new(false),
            warning: Mutex::new(None),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// The error that caused the switch to memory, at most once per session.
    pub fn take_warning(&self) -> Option<StorageError> {
        self.warning.lock().ok().and_then(|mut w| w.take())
    }

    fn degrade(&self, err: StorageError) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            tracing::warn!("durable storage failed, continuing in memory for this session: {err}");
            if let Ok(mut warning) = self.warning.lock() {
                *warning = Some(err);
            }
        }
    }
}

#[async_trait]
impl DurableStore for ResilientStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        if !self.is_degraded() {
            match self.primary.get(key).await {
                Ok(value) => return Ok(value),
                Err(err) => self.degrade(err),
            }
        }
        self.fallback.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if !self.is_degraded() {
            match self.primary.set(key, value).await {
                Ok(()) => return Ok(()),
                Err(err) => self.degrade(err),
            }
        }
        self.fallback.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        if !self.is_degraded() {
            match self.primary.remove(key).await {
                Ok(()) => return Ok(()),
                Err(err) => self.degrade(err),
            }
        }
        self.fallback.remove(key).await
    }
}
