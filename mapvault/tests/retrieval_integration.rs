//! Integration tests for map image retrieval.
//!
//! These tests drive `MapImageRetriever` through its public API against real
//! stores, with scripted providers standing in for the HTTP services:
//! - Concurrent misses for one key share a single provider round trip
//! - Coarse zoom levels share one image per district
//! - Failures and "not found" are never cached
//! - Cached images survive reopening the SQLite database
//!
//! Run with: `cargo test --test retrieval_integration`

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use mapvault::clock::system_clock;
use mapvault::config::{ImageDimensions, Settings, SettingsHandle};
use mapvault::provider::{GeocodeProvider, ImageryProvider, ProviderError};
use mapvault::store::{CacheStore, MemoryStore, SqliteStore};
use mapvault::{CacheKey, MapImageRetriever, Position, RetrieveError, ZoomLevel};

// ============================================================================
// Scripted Providers
// ============================================================================

/// Geocoder that knows a fixed set of postal codes.
struct ScriptedGeocoder {
    known: Vec<&'static str>,
    calls: AtomicU32,
    gate: Option<Arc<Notify>>,
    fail_next: AtomicU32,
}

impl ScriptedGeocoder {
    fn new(known: &[&'static str]) -> Self {
        Self {
            known: known.to_vec(),
            calls: AtomicU32::new(0),
            gate: None,
            fail_next: AtomicU32::new(0),
        }
    }

    /// Block every lookup until the gate is opened.
    fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Fail the next `n` lookups with a server error.
    fn failing(self, n: u32) -> Self {
        self.fail_next.store(n, Ordering::SeqCst);
        self
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl GeocodeProvider for ScriptedGeocoder {
    fn resolve<'a>(
        &'a self,
        postal_code: &'a str,
        _house_number: Option<u32>,
        _cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Option<Position>, ProviderError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }

            let failing = self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(ProviderError::Status {
                    provider: "scripted".to_string(),
                    status: 503,
                });
            }

            let stripped: String = postal_code
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_uppercase();
            if self.known.iter().any(|k| *k == stripped) {
                Ok(Some(Position::new(52.37, 4.89).unwrap()))
            } else {
                Ok(None)
            }
        })
    }

    fn name(&self) -> &str {
        "scripted-geocoder"
    }
}

/// Imagery provider that encodes the request into the returned bytes.
#[derive(Default)]
struct EchoImagery {
    calls: AtomicU32,
    sizes: Mutex<Vec<(u32, u32)>>,
}

impl EchoImagery {
    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ImageryProvider for EchoImagery {
    fn fetch_image<'a>(
        &'a self,
        _position: Position,
        zoom: ZoomLevel,
        height: u32,
        width: u32,
        _cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Bytes, ProviderError>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.sizes.lock().unwrap().push((width, height));
            Ok(Bytes::from(format!("{}:{}x{}:#{}", zoom, width, height, n)))
        })
    }

    fn name(&self) -> &str {
        "echo-imagery"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn retriever(
    store: Arc<dyn CacheStore>,
    geocoder: Arc<ScriptedGeocoder>,
    imagery: Arc<EchoImagery>,
) -> MapImageRetriever {
    MapImageRetriever::new(store, geocoder, imagery, SettingsHandle::new(Settings::default()))
}

/// Wait until `count` callers are attached to the fetch for `key`.
async fn wait_for_waiters(retriever: &MapImageRetriever, key: &CacheKey, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while retriever.waiters(key) < count {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("callers never joined the fetch");
}

// ============================================================================
// Integration Tests
// ============================================================================

/// Many concurrent misses for the same address produce one provider round trip.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_share_one_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("cache.db"), 4, system_clock())
        .await
        .unwrap();

    let gate = Arc::new(Notify::new());
    let geocoder = Arc::new(ScriptedGeocoder::new(&["1012JS"]).gated(Arc::clone(&gate)));
    let imagery = Arc::new(EchoImagery::default());
    let retriever = Arc::new(retriever(
        Arc::new(store),
        Arc::clone(&geocoder),
        Arc::clone(&imagery),
    ));

    const CALLERS: usize = 16;
    let mut handles = Vec::new();
    for _ in 0..CALLERS {
        let retriever = Arc::clone(&retriever);
        handles.push(tokio::spawn(async move {
            retriever
                .get_image(Some("1012 JS"), Some(1), ZoomLevel::House, &CancellationToken::new())
                .await
        }));
    }

    let key = CacheKey::for_request(Some("1012 JS"), Some(1), ZoomLevel::House).unwrap();
    wait_for_waiters(&retriever, &key, CALLERS).await;
    gate.notify_one();

    let mut payloads = Vec::new();
    for handle in handles {
        payloads.push(handle.await.unwrap().unwrap().unwrap());
    }

    assert!(payloads.iter().all(|p| p == &payloads[0]));
    assert_eq!(geocoder.calls(), 1);
    assert_eq!(imagery.calls(), 1);
    assert_eq!(retriever.in_flight(), 0);

    let snapshot = retriever.metrics().snapshot();
    assert_eq!(snapshot.misses, CALLERS as u64);
    assert_eq!(snapshot.coalesced, CALLERS as u64 - 1);
    assert_eq!(snapshot.fetches, 1);
}

/// A repeat request is served from the store without touching the providers.
#[tokio::test]
async fn test_second_request_is_a_cache_hit() {
    let geocoder = Arc::new(ScriptedGeocoder::new(&["1012JS"]));
    let imagery = Arc::new(EchoImagery::default());
    let retriever = retriever(
        Arc::new(MemoryStore::new()),
        Arc::clone(&geocoder),
        Arc::clone(&imagery),
    );
    let token = CancellationToken::new();

    let first = retriever
        .get_image(Some("1012JS"), Some(7), ZoomLevel::Street, &token)
        .await
        .unwrap();
    // Different spelling of the same address
    let second = retriever
        .get_image(Some(" 1012 JS "), Some(7), ZoomLevel::Street, &token)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(imagery.calls(), 1);

    let snapshot = retriever.metrics().snapshot();
    assert_eq!(snapshot.hits, 1);
    assert_eq!(snapshot.misses, 1);
}

/// Addresses in the same district share the area and city images.
#[tokio::test]
async fn test_coarse_levels_share_image_per_district() {
    let geocoder = Arc::new(ScriptedGeocoder::new(&["1012JS", "1012AB", "3011AA"]));
    let imagery = Arc::new(EchoImagery::default());
    let retriever = retriever(
        Arc::new(MemoryStore::new()),
        Arc::clone(&geocoder),
        Arc::clone(&imagery),
    );
    let token = CancellationToken::new();

    let a = retriever
        .get_image(Some("1012 JS"), Some(1), ZoomLevel::City, &token)
        .await
        .unwrap();
    let b = retriever
        .get_image(Some("1012AB"), Some(99), ZoomLevel::City, &token)
        .await
        .unwrap();
    assert_eq!(a, b);
    assert_eq!(imagery.calls(), 1);

    // Another district is a separate image
    retriever
        .get_image(Some("3011AA"), None, ZoomLevel::City, &token)
        .await
        .unwrap();
    assert_eq!(imagery.calls(), 2);

    // House level keeps postal code and house number apart
    retriever
        .get_image(Some("1012JS"), Some(1), ZoomLevel::House, &token)
        .await
        .unwrap();
    retriever
        .get_image(Some("1012JS"), Some(2), ZoomLevel::House, &token)
        .await
        .unwrap();
    assert_eq!(imagery.calls(), 4);
}

/// Unknown addresses return nothing and are looked up again next time.
#[tokio::test]
async fn test_not_found_is_not_cached() {
    let store = Arc::new(MemoryStore::new());
    let geocoder = Arc::new(ScriptedGeocoder::new(&[]));
    let imagery = Arc::new(EchoImagery::default());
    let retriever = retriever(store.clone(), Arc::clone(&geocoder), Arc::clone(&imagery));
    let token = CancellationToken::new();

    for _ in 0..2 {
        let image = retriever
            .get_image(Some("9999ZZ"), Some(1), ZoomLevel::House, &token)
            .await
            .unwrap();
        assert!(image.is_none());
    }

    assert_eq!(geocoder.calls(), 2);
    assert_eq!(imagery.calls(), 0);
    assert!(store.is_empty());
    assert_eq!(retriever.metrics().snapshot().not_found, 2);
}

/// A provider failure reaches every waiter, and the next request retries.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_upstream_failure_reaches_all_waiters_then_recovers() {
    let gate = Arc::new(Notify::new());
    let geocoder = Arc::new(
        ScriptedGeocoder::new(&["1012JS"])
            .gated(Arc::clone(&gate))
            .failing(1),
    );
    let imagery = Arc::new(EchoImagery::default());
    let retriever = Arc::new(retriever(
        Arc::new(MemoryStore::new()),
        Arc::clone(&geocoder),
        Arc::clone(&imagery),
    ));

    let mut handles = Vec::new();
    for _ in 0..3 {
        let retriever = Arc::clone(&retriever);
        handles.push(tokio::spawn(async move {
            retriever
                .get_image(Some("1012JS"), None, ZoomLevel::Area, &CancellationToken::new())
                .await
        }));
    }

    let key = CacheKey::for_request(Some("1012JS"), None, ZoomLevel::Area).unwrap();
    wait_for_waiters(&retriever, &key, 3).await;
    gate.notify_one();

    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, RetrieveError::Upstream(_)));
        assert!(err.is_retryable());
    }
    assert_eq!(geocoder.calls(), 1);

    // Gate stays closed unless opened again
    gate.notify_one();
    let image = retriever
        .get_image(Some("1012JS"), None, ZoomLevel::Area, &CancellationToken::new())
        .await
        .unwrap();
    assert!(image.is_some());
    assert_eq!(geocoder.calls(), 2);
}

/// One caller giving up does not disturb the others sharing the fetch.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_caller_leaves_others_waiting() {
    let gate = Arc::new(Notify::new());
    let geocoder = Arc::new(ScriptedGeocoder::new(&["1012JS"]).gated(Arc::clone(&gate)));
    let imagery = Arc::new(EchoImagery::default());
    let retriever = Arc::new(retriever(
        Arc::new(MemoryStore::new()),
        Arc::clone(&geocoder),
        Arc::clone(&imagery),
    ));

    let impatient = CancellationToken::new();
    let cancelled = {
        let retriever = Arc::clone(&retriever);
        let token = impatient.clone();
        tokio::spawn(async move {
            retriever
                .get_image(Some("1012JS"), Some(3), ZoomLevel::House, &token)
                .await
        })
    };
    let patient = {
        let retriever = Arc::clone(&retriever);
        tokio::spawn(async move {
            retriever
                .get_image(Some("1012JS"), Some(3), ZoomLevel::House, &CancellationToken::new())
                .await
        })
    };

    let key = CacheKey::for_request(Some("1012JS"), Some(3), ZoomLevel::House).unwrap();
    wait_for_waiters(&retriever, &key, 2).await;

    impatient.cancel();
    assert!(matches!(
        cancelled.await.unwrap(),
        Err(RetrieveError::Cancelled)
    ));
    assert_eq!(retriever.waiters(&key), 1);

    gate.notify_one();
    let image = patient.await.unwrap().unwrap();
    assert!(image.is_some());
    assert_eq!(imagery.calls(), 1);
}

/// Images written through one store instance are hits after reopening.
#[tokio::test]
async fn test_cached_images_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let token = CancellationToken::new();

    let first = {
        let store = SqliteStore::open(&path, 2, system_clock()).await.unwrap();
        let retriever = retriever(
            Arc::new(store),
            Arc::new(ScriptedGeocoder::new(&["1012JS"])),
            Arc::new(EchoImagery::default()),
        );
        retriever
            .get_image(Some("1012JS"), Some(1), ZoomLevel::House, &token)
            .await
            .unwrap()
            .unwrap()
    };

    let store = SqliteStore::open(&path, 2, system_clock()).await.unwrap();
    let geocoder = Arc::new(ScriptedGeocoder::new(&["1012JS"]));
    let imagery = Arc::new(EchoImagery::default());
    let retriever = retriever(Arc::new(store), Arc::clone(&geocoder), Arc::clone(&imagery));

    let second = retriever
        .get_image(Some("1012JS"), Some(1), ZoomLevel::House, &token)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(geocoder.calls(), 0);
    assert_eq!(imagery.calls(), 0);
}

/// Dimension changes apply to the next fetch without restarting.
#[tokio::test]
async fn test_dimension_change_applies_to_next_fetch() {
    let settings = SettingsHandle::new(Settings::default());
    let imagery = Arc::new(EchoImagery::default());
    let retriever = MapImageRetriever::new(
        Arc::new(MemoryStore::new()),
        Arc::new(ScriptedGeocoder::new(&["1012JS", "3011AA"])),
        imagery.clone(),
        settings.clone(),
    );
    let token = CancellationToken::new();

    retriever
        .get_image(Some("1012JS"), None, ZoomLevel::City, &token)
        .await
        .unwrap();

    let mut updated = (*settings.current()).clone();
    updated.dimensions = updated
        .dimensions
        .with(ZoomLevel::City, ImageDimensions::new(320, 200));
    settings.replace(updated);

    retriever
        .get_image(Some("3011AA"), None, ZoomLevel::City, &token)
        .await
        .unwrap();

    let sizes = imagery.sizes.lock().unwrap().clone();
    assert_eq!(sizes, vec![(640, 400), (320, 200)]);
}

/// Malformed input is rejected before any I/O.
#[tokio::test]
async fn test_invalid_requests_rejected() {
    let geocoder = Arc::new(ScriptedGeocoder::new(&["1012JS"]));
    let retriever = retriever(
        Arc::new(MemoryStore::new()),
        Arc::clone(&geocoder),
        Arc::new(EchoImagery::default()),
    );
    let token = CancellationToken::new();

    for postal in [None, Some(""), Some("ABCD"), Some("12")] {
        let result = retriever
            .get_image(postal, Some(1), ZoomLevel::House, &token)
            .await;
        assert!(
            matches!(result, Err(RetrieveError::InvalidArgument(_))),
            "{:?} should be rejected",
            postal
        );
    }

    let result = retriever
        .get_image_by_name(Some("1012JS"), None, "galaxy", &token)
        .await;
    assert!(matches!(result, Err(RetrieveError::InvalidArgument(_))));
    assert_eq!(geocoder.calls(), 0);
}
