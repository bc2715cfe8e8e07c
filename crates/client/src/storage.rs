//! Key-value storage backends for the job cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

/// Durable client-local key-value storage.
///
/// Each key holds one opaque string. Implementations must tolerate
/// concurrent use from several tasks but give no ordering guarantee beyond
/// last write wins.
#[async_trait::async_trait]
pub trait CacheStorage: Send + Sync + std::fmt::Debug {
    async fn read(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn write(&self, key: &str, value: &str) -> anyhow::Result<()>;

    /// Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> anyhow::Result<()>;
}

/// Process-local storage; clones share the same slots.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    slots: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> anyhow::Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.slots
            .lock()
            .map_err(|_| anyhow::anyhow!("memory storage lock poisoned"))
    }
}

#[async_trait::async_trait]
impl CacheStorage for MemoryStorage {
    async fn read(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.slots()?.get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.slots()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.slots()?.remove(key);
        Ok(())
    }
}

/// SQLite-backed storage (`kv_store` table).
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a cache database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create cache directory at {:?}", parent))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        Self::connect(options, &format!("{:?}", path)).await
    }

    /// Open the per-user cache database (see [`default_cache_path`]).
    pub async fn open_default() -> anyhow::Result<Self> {
        let path = default_cache_path()?;
        Self::open(path).await
    }

    /// A private in-memory database; contents vanish with the last clone.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("invalid in-memory SQLite URL")?;
        Self::connect(options, "in-memory database").await
    }

    async fn connect(options: SqliteConnectOptions, label: &str) -> anyhow::Result<Self> {
        // One long-lived connection: an in-memory database lives exactly as
        // long as its connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<std::time::Duration>)
            .max_lifetime(None::<std::time::Duration>)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open SQLite cache at {label}"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .context("failed to create kv_store table")?;

        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl CacheStorage for SqliteStorage {
    async fn read(&self, key: &str) -> anyhow::Result<Option<String>> {
        let row = sqlx::query(
            r#"
            SELECT value
            FROM kv_store
            WHERE key = ?1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to read `{key}` from cache"))?;

        match row {
            Some(row) => Ok(Some(row.try_get("value")?)),
            None => Ok(None),
        }
    }

    async fn write(&self, key: &str, value: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
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
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to write `{key}` to cache"))?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            DELETE FROM kv_store
            WHERE key = ?1
            "#,
        )
        .bind(key)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to remove `{key}` from cache"))?;

        Ok(())
    }
}

/// Resolve the cache database path: `{app_data_dir}/fieldops/cache.db`.
pub fn default_cache_path() -> anyhow::Result<PathBuf> {
    let mut dir = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .context("failed to resolve OS app data directory - tried data_dir() and home_dir()/.local/share")?;

    dir.push("fieldops");
    dir.push("cache.db");
    Ok(dir)
}
