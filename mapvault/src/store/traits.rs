//! Core traits for the image cache store.
//!
//! The `CacheStore` trait is the persistence contract the retriever and the
//! eviction sweep depend on. Every backend implements it, so callers work
//! with `Arc<dyn CacheStore>` regardless of where rows actually live.
//!
//! # Design Principles
//!
//! - **Miss is not an error**: `lookup` returns `Ok(None)`
//! - **Optimistic concurrency**: every row carries a `version`; writers that
//!   lose a race become no-ops and the winner's row is returned
//! - **Set-based eviction**: `delete_older_than` runs as one statement per
//!   zoom level, never loading rows into memory
//! - **Dyn-compatible**: boxed futures for trait object support

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use thiserror::Error;
use uuid::Uuid;

use crate::key::CacheKey;
use crate::zoom::ZoomLevel;

/// One persisted map image.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedImage {
    /// Opaque unique row identifier.
    pub id: Uuid,
    /// The key this image was fetched for.
    pub key: CacheKey,
    /// Encoded image bytes as returned by the imagery provider.
    pub payload: Bytes,
    /// Last time the image was served or written.
    pub last_accessed_at: DateTime<Utc>,
    /// Concurrency token, incremented on every content write.
    pub version: i64,
}

impl CachedImage {
    pub fn zoom(&self) -> ZoomLevel {
        self.key.zoom()
    }
}

/// Entry count and payload volume for one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoomStats {
    pub zoom: ZoomLevel,
    pub entries: u64,
    pub payload_bytes: u64,
}

/// Per-zoom-level store statistics, one entry per [`ZoomLevel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub levels: Vec<ZoomStats>,
}

impl StoreStats {
    /// Statistics with every level at zero.
    pub fn empty() -> Self {
        Self {
            levels: ZoomLevel::ALL
                .iter()
                .map(|&zoom| ZoomStats {
                    zoom,
                    entries: 0,
                    payload_bytes: 0,
                })
                .collect(),
        }
    }

    /// Adds one level's figures.
    pub(crate) fn record(&mut self, zoom: ZoomLevel, entries: u64, payload_bytes: u64) {
        let level = &mut self.levels[zoom.index()];
        level.entries += entries;
        level.payload_bytes += payload_bytes;
    }

    pub fn total_entries(&self) -> u64 {
        self.levels.iter().map(|l| l.entries).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.levels.iter().map(|l| l.payload_bytes).sum()
    }
}

impl fmt::Display for StoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entries, {} bytes",
            self.total_entries(),
            self.total_bytes()
        )
    }
}

/// Errors that can occur during store operations.
///
/// Sources are held in `Arc` so the error can be cloned to every caller
/// waiting on a shared fetch.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Database driver or connection failure.
    #[error("Database error: {0}")]
    Database(#[source] Arc<sqlx::Error>),

    /// Filesystem failure while opening the store.
    #[error("I/O error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    /// A persisted row could not be decoded.
    #[error("Corrupt cache row: {0}")]
    Corrupt(String),

    /// Every upsert attempt lost its row to a concurrent delete.
    #[error("Cache row for '{0}' kept disappearing during write")]
    Vanished(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(Arc::new(e))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(Arc::new(e))
    }
}

/// Persistent key → image mapping with last-access tracking.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync`; one store instance is shared
/// by every retriever call and by the eviction sweep.
pub trait CacheStore: Send + Sync {
    /// Retrieve the image for a key.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(image))` if the key is cached
    /// - `Ok(None)` on a miss
    /// - `Err(_)` if the store failed
    fn lookup<'a>(
        &'a self,
        key: &'a CacheKey,
    ) -> BoxFuture<'a, Result<Option<CachedImage>, StoreError>>;

    /// Set `last_accessed_at` of a row to now.
    ///
    /// Touching a row that was evicted in the meantime is not an error.
    fn touch(&self, id: Uuid) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Insert a new row or replace the payload of the existing one.
    ///
    /// If a concurrent writer changes the row between reading its version and
    /// writing, this write is dropped and the winner's row is returned.
    fn upsert<'a>(
        &'a self,
        key: &'a CacheKey,
        payload: Bytes,
    ) -> BoxFuture<'a, Result<CachedImage, StoreError>>;

    /// Delete every row of `zoom` last accessed strictly before `cutoff`.
    ///
    /// # Returns
    ///
    /// Number of rows deleted.
    fn delete_older_than(
        &self,
        zoom: ZoomLevel,
        cutoff: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<u64, StoreError>>;

    /// Entry counts and payload sizes per zoom level.
    fn stats(&self) -> BoxFuture<'_, Result<StoreStats, StoreError>>;

    /// Human-readable backend name for logs.
    fn name(&self) -> &str;
}
