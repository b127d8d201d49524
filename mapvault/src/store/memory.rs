//! In-memory cache store using dashmap.
//!
//! Rows live in a sharded concurrent map keyed by storage key, so unrelated
//! keys never contend. Behaviour matches [`SqliteStore`](super::SqliteStore)
//! including the version check on upsert; contents are lost on drop, which
//! makes this backend suitable for development and tests.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use tracing::debug;
use uuid::Uuid;

use crate::clock::{system_clock, Clock};
use crate::key::CacheKey;
use crate::store::traits::{CacheStore, CachedImage, StoreError, StoreStats};
use crate::zoom::ZoomLevel;

/// In-memory cache store.
pub struct MemoryStore {
    /// Rows by storage key.
    entries: DashMap<String, CachedImage>,

    /// Row id → storage key, for `touch`.
    ids: DashMap<Uuid, String>,

    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create an empty store using the system clock.
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    /// Create an empty store stamping rows with the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ids: DashMap::new(),
            clock,
        }
    }

    /// Number of rows currently held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn new_row(&self, key: &CacheKey, payload: Bytes, now: DateTime<Utc>) -> CachedImage {
        CachedImage {
            id: Uuid::new_v4(),
            key: key.clone(),
            payload,
            last_accessed_at: now,
            version: 0,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for MemoryStore {
    fn lookup<'a>(
        &'a self,
        key: &'a CacheKey,
    ) -> BoxFuture<'a, Result<Option<CachedImage>, StoreError>> {
        let storage_key = key.storage_key();
        Box::pin(async move { Ok(self.entries.get(&storage_key).map(|e| e.value().clone())) })
    }

    fn touch(&self, id: Uuid) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let Some(storage_key) = self.ids.get(&id).map(|k| k.value().clone()) else {
                return Ok(());
            };

            if let Some(mut row) = self.entries.get_mut(&storage_key) {
                if row.id == id {
                    let now = self.clock.now();
                    if now > row.last_accessed_at {
                        row.last_accessed_at = now;
                    }
                }
            }
            Ok(())
        })
    }

    fn upsert<'a>(
        &'a self,
        key: &'a CacheKey,
        payload: Bytes,
    ) -> BoxFuture<'a, Result<CachedImage, StoreError>> {
        Box::pin(async move {
            let storage_key = key.storage_key();
            let observed = self.entries.get(&storage_key).map(|e| e.version);
            let now = self.clock.now();

            let row = match self.entries.entry(storage_key) {
                Entry::Vacant(vacant) if observed.is_none() => {
                    let row = self.new_row(key, payload, now);
                    self.ids.insert(row.id, vacant.key().clone());
                    vacant.insert(row.clone());
                    row
                }
                Entry::Occupied(mut occupied) if observed == Some(occupied.get().version) => {
                    let row = occupied.get_mut();
                    row.payload = payload;
                    row.last_accessed_at = now;
                    row.version += 1;
                    row.clone()
                }
                Entry::Occupied(occupied) => {
                    debug!(key = %key, "Lost upsert race; keeping winner's row");
                    occupied.get().clone()
                }
                Entry::Vacant(vacant) => {
                    // Row was evicted between the read and the write
                    let row = self.new_row(key, payload, now);
                    self.ids.insert(row.id, vacant.key().clone());
                    vacant.insert(row.clone());
                    row
                }
            };

            Ok(row)
        })
    }

    fn delete_older_than(
        &self,
        zoom: ZoomLevel,
        cutoff: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<u64, StoreError>> {
        Box::pin(async move {
            let mut removed = Vec::new();
            self.entries.retain(|_, row| {
                let expired = row.zoom() == zoom && row.last_accessed_at < cutoff;
                if expired {
                    removed.push(row.id);
                }
                !expired
            });

            for id in &removed {
                self.ids.remove(id);
            }
            Ok(removed.len() as u64)
        })
    }

    fn stats(&self) -> BoxFuture<'_, Result<StoreStats, StoreError>> {
        Box::pin(async move {
            let mut stats = StoreStats::empty();
            for row in self.entries.iter() {
                stats.record(row.zoom(), 1, row.payload.len() as u64);
            }
            Ok(stats)
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn key(postal: &str, zoom: ZoomLevel) -> CacheKey {
        CacheKey::for_request(Some(postal), Some(1), zoom).unwrap()
    }

    fn store_with_clock() -> (MemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (MemoryStore::with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_lookup_miss() {
        let store = MemoryStore::new();
        let result = store.lookup(&key("1234AB", ZoomLevel::House)).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_upsert_then_lookup() {
        let store = MemoryStore::new();
        let k = key("1234AB", ZoomLevel::House);

        let written = store.upsert(&k, Bytes::from_static(b"png")).await.unwrap();
        assert_eq!(written.version, 0);

        let found = store.lookup(&k).await.unwrap().unwrap();
        assert_eq!(found.id, written.id);
        assert_eq!(found.payload, Bytes::from_static(b"png"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_bumps_version() {
        let store = MemoryStore::new();
        let k = key("1234AB", ZoomLevel::Street);

        let first = store.upsert(&k, Bytes::from_static(b"v1")).await.unwrap();
        let second = store.upsert(&k, Bytes::from_static(b"v2")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.version, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.lookup(&k).await.unwrap().unwrap().payload,
            Bytes::from_static(b"v2")
        );
    }

    #[tokio::test]
    async fn test_touch_updates_last_accessed() {
        let (store, clock) = store_with_clock();
        let k = key("1234AB", ZoomLevel::House);
        let row = store.upsert(&k, Bytes::from_static(b"x")).await.unwrap();

        clock.advance(Duration::from_secs(60));
        store.touch(row.id).await.unwrap();

        let found = store.lookup(&k).await.unwrap().unwrap();
        assert_eq!(found.last_accessed_at, clock.now());
        assert_eq!(found.version, row.version);
    }

    #[tokio::test]
    async fn test_touch_unknown_id_is_noop() {
        let store = MemoryStore::new();
        store.touch(Uuid::new_v4()).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_older_than_is_scoped_to_zoom() {
        let (store, clock) = store_with_clock();
        let area = key("1234AB", ZoomLevel::Area);
        let city = key("1234AB", ZoomLevel::City);
        store.upsert(&area, Bytes::from_static(b"a")).await.unwrap();
        store.upsert(&city, Bytes::from_static(b"c")).await.unwrap();

        clock.advance(Duration::from_secs(10));
        let deleted = store
            .delete_older_than(ZoomLevel::Area, clock.now())
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(store.lookup(&area).await.unwrap().is_none());
        assert!(store.lookup(&city).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_keeps_rows_at_cutoff() {
        let (store, clock) = store_with_clock();
        let k = key("1234AB", ZoomLevel::City);
        store.upsert(&k, Bytes::from_static(b"c")).await.unwrap();

        let deleted = store
            .delete_older_than(ZoomLevel::City, clock.now())
            .await
            .unwrap();
        assert_eq!(deleted, 0);
    }

    #[tokio::test]
    async fn test_evicted_row_id_no_longer_touchable() {
        let (store, clock) = store_with_clock();
        let k = key("1234AB", ZoomLevel::Area);
        let row = store.upsert(&k, Bytes::from_static(b"a")).await.unwrap();

        clock.advance(Duration::from_secs(1));
        store
            .delete_older_than(ZoomLevel::Area, clock.now())
            .await
            .unwrap();

        store.touch(row.id).await.unwrap();
        assert!(store.is_empty());
        assert!(store.ids.is_empty());
    }

    #[tokio::test]
    async fn test_stats() {
        let store = MemoryStore::new();
        store
            .upsert(&key("1234AB", ZoomLevel::House), Bytes::from_static(b"abcd"))
            .await
            .unwrap();
        store
            .upsert(&key("5678CD", ZoomLevel::House), Bytes::from_static(b"ef"))
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.levels[ZoomLevel::House.index()].entries, 2);
        assert_eq!(stats.total_bytes(), 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upserts_leave_one_row() {
        let store = Arc::new(MemoryStore::new());
        let k = key("1234AB", ZoomLevel::House);

        let mut handles = Vec::new();
        for i in 0..16u8 {
            let store = Arc::clone(&store);
            let k = k.clone();
            handles.push(tokio::spawn(async move {
                store.upsert(&k, Bytes::from(vec![i; 8])).await.unwrap()
            }));
        }

        let mut payloads = Vec::new();
        for handle in handles {
            payloads.push(handle.await.unwrap().payload);
        }

        assert_eq!(store.len(), 1);
        let stored = store.lookup(&k).await.unwrap().unwrap().payload;
        assert!(stored.iter().all(|b| *b == stored[0]));
        assert!(payloads.contains(&stored));
    }
}
