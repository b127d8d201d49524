//! SQLite-backed persistent cache store.
//!
//! Rows live in a single `cached_images` table:
//!
//! | column             | type    | notes                                   |
//! |--------------------|---------|-----------------------------------------|
//! | `id`               | TEXT    | UUID, primary key                       |
//! | `cache_key`        | TEXT    | unique, see [`CacheKey::storage_key`]   |
//! | `zoom_level`       | TEXT    | `house`, `street`, `area`, `city`       |
//! | `postal_code`      | TEXT    | normalized fragment                     |
//! | `house_number`     | INTEGER | nullable                                |
//! | `payload`          | BLOB    | image bytes                             |
//! | `last_accessed_at` | INTEGER | unix milliseconds, UTC                  |
//! | `version`          | INTEGER | concurrency token                       |
//!
//! Eviction deletes through the `(zoom_level, last_accessed_at)` index in a
//! single statement per level.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::key::CacheKey;
use crate::store::traits::{CacheStore, CachedImage, StoreError, StoreStats};
use crate::zoom::ZoomLevel;

/// Default number of pooled connections for file-backed stores.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 4;

/// Upsert rounds before giving up on a row that keeps being evicted.
const MAX_UPSERT_ATTEMPTS: u32 = 5;

const SELECT_COLUMNS: &str = "SELECT id, zoom_level, postal_code, house_number, payload, \
                              last_accessed_at, version FROM cached_images";

/// SQLite cache store.
pub struct SqliteStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    /// Open (or create) a store at `path` and apply the schema.
    ///
    /// # Arguments
    ///
    /// * `path` - Database file, parent directories are created
    /// * `max_connections` - Pool size
    /// * `clock` - Time source for `last_accessed_at`
    pub async fn open(
        path: impl AsRef<Path>,
        max_connections: u32,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            // Writers queue instead of failing with "database is locked"
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(opts)
            .await?;

        let store = Self { pool, clock };
        store.migrate().await?;

        info!(
            path = %path.display(),
            max_connections,
            "SQLite cache store opened"
        );

        Ok(store)
    }

    /// Open a private in-memory database.
    ///
    /// The pool is pinned to one connection that never expires, since every
    /// connection to `:memory:` would otherwise see its own empty database.
    pub async fn in_memory(clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;

        let store = Self { pool, clock };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cached_images (
                id TEXT PRIMARY KEY NOT NULL,
                cache_key TEXT NOT NULL UNIQUE,
                zoom_level TEXT NOT NULL,
                postal_code TEXT NOT NULL,
                house_number INTEGER,
                payload BLOB NOT NULL,
                last_accessed_at INTEGER NOT NULL,
                version INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_cached_images_zoom_accessed \
             ON cached_images (zoom_level, last_accessed_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_by_key(&self, key: &CacheKey) -> Result<Option<CachedImage>, StoreError> {
        let row = sqlx::query(&format!("{} WHERE cache_key = ?", SELECT_COLUMNS))
            .bind(key.storage_key())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_image).transpose()
    }

    async fn insert_if_absent(
        &self,
        id: Uuid,
        key: &CacheKey,
        payload: &[u8],
        now_ms: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO cached_images
                (id, cache_key, zoom_level, postal_code, house_number, payload, last_accessed_at, version)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0)
            ON CONFLICT(cache_key) DO NOTHING
            "#,
        )
        .bind(id.to_string())
        .bind(key.storage_key())
        .bind(key.zoom().as_str())
        .bind(key.postal_code())
        .bind(key.house_number().map(i64::from))
        .bind(payload)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_if_version(
        &self,
        id: &str,
        expected_version: i64,
        payload: &[u8],
        now_ms: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE cached_images \
             SET payload = ?, last_accessed_at = ?, version = version + 1 \
             WHERE id = ? AND version = ?",
        )
        .bind(payload)
        .bind(now_ms)
        .bind(id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn row_to_image(row: &SqliteRow) -> Result<CachedImage, StoreError> {
    let id: String = row.try_get("id")?;
    let zoom: String = row.try_get("zoom_level")?;
    let postal_code: String = row.try_get("postal_code")?;
    let house_number: Option<i64> = row.try_get("house_number")?;
    let payload: Vec<u8> = row.try_get("payload")?;
    let last_accessed_ms: i64 = row.try_get("last_accessed_at")?;
    let version: i64 = row.try_get("version")?;

    let id = Uuid::parse_str(&id).map_err(|e| StoreError::Corrupt(format!("id '{}': {}", id, e)))?;
    let zoom = parse_zoom(&zoom)?;
    let house_number = house_number
        .map(u32::try_from)
        .transpose()
        .map_err(|_| StoreError::Corrupt(format!("house number out of range in row {}", id)))?;
    let last_accessed_at = DateTime::<Utc>::from_timestamp_millis(last_accessed_ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp {} in row {}", last_accessed_ms, id)))?;

    Ok(CachedImage {
        id,
        key: CacheKey::from_parts(zoom, postal_code, house_number),
        payload: Bytes::from(payload),
        last_accessed_at,
        version,
    })
}

fn parse_zoom(value: &str) -> Result<ZoomLevel, StoreError> {
    value
        .parse()
        .map_err(|_| StoreError::Corrupt(format!("zoom level '{}'", value)))
}

impl CacheStore for SqliteStore {
    fn lookup<'a>(
        &'a self,
        key: &'a CacheKey,
    ) -> BoxFuture<'a, Result<Option<CachedImage>, StoreError>> {
        Box::pin(self.fetch_by_key(key))
    }

    fn touch(&self, id: Uuid) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let now_ms = self.clock.now().timestamp_millis();
            // Never move last access backwards if clocks disagree
            sqlx::query(
                "UPDATE cached_images SET last_accessed_at = MAX(last_accessed_at, ?) WHERE id = ?",
            )
            .bind(now_ms)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn upsert<'a>(
        &'a self,
        key: &'a CacheKey,
        payload: Bytes,
    ) -> BoxFuture<'a, Result<CachedImage, StoreError>> {
        Box::pin(async move {
            let now = self.clock.now();
            let now_ms = now.timestamp_millis();
            let stamped = DateTime::<Utc>::from_timestamp_millis(now_ms).unwrap_or(now);

            for attempt in 1..=MAX_UPSERT_ATTEMPTS {
                let existing: Option<(String, i64)> =
                    sqlx::query_as("SELECT id, version FROM cached_images WHERE cache_key = ?")
                        .bind(key.storage_key())
                        .fetch_optional(&self.pool)
                        .await?;

                // A successful write is returned as written; an eviction
                // right after it must not turn it into a failure
                let written = match existing {
                    None => {
                        let id = Uuid::new_v4();
                        self.insert_if_absent(id, key, &payload, now_ms)
                            .await?
                            .then_some((id, 0))
                    }
                    Some((id, version)) => {
                        let written = self
                            .update_if_version(&id, version, &payload, now_ms)
                            .await?;
                        if written {
                            let id = Uuid::parse_str(&id).map_err(|e| {
                                StoreError::Corrupt(format!("id '{}': {}", id, e))
                            })?;
                            Some((id, version + 1))
                        } else {
                            None
                        }
                    }
                };

                if let Some((id, version)) = written {
                    return Ok(CachedImage {
                        id,
                        key: key.clone(),
                        payload,
                        last_accessed_at: stamped,
                        version,
                    });
                }

                if let Some(winner) = self.fetch_by_key(key).await? {
                    debug!(key = %key, "Lost upsert race; keeping winner's row");
                    return Ok(winner);
                }

                // Row was evicted between the read and the write
                debug!(key = %key, attempt, "Row vanished during upsert; retrying");
            }

            Err(StoreError::Vanished(key.storage_key()))
        })
    }

    fn delete_older_than(
        &self,
        zoom: ZoomLevel,
        cutoff: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<u64, StoreError>> {
        Box::pin(async move {
            let result = sqlx::query(
                "DELETE FROM cached_images WHERE zoom_level = ? AND last_accessed_at < ?",
            )
            .bind(zoom.as_str())
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await?;

            Ok(result.rows_affected())
        })
    }

    fn stats(&self) -> BoxFuture<'_, Result<StoreStats, StoreError>> {
        Box::pin(async move {
            let rows: Vec<(String, i64, i64)> = sqlx::query_as(
                "SELECT zoom_level, COUNT(*), COALESCE(SUM(LENGTH(payload)), 0) \
                 FROM cached_images GROUP BY zoom_level",
            )
            .fetch_all(&self.pool)
            .await?;

            let mut stats = StoreStats::empty();
            for (zoom, entries, bytes) in rows {
                stats.record(parse_zoom(&zoom)?, entries.max(0) as u64, bytes.max(0) as u64);
            }
            Ok(stats)
        })
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}
