//! Single-flight cache-aside retrieval of map images.
//!
//! [`MapImageRetriever::get_image`] is the entry point for every request:
//!
//! 1. Validate the postal code and build the [`CacheKey`]
//! 2. Look the key up in the [`CacheStore`]; on a hit, touch the row and
//!    return its payload
//! 3. On a miss, join the in-flight fetch for the key (or start one)
//! 4. The fetch geocodes the address, downloads the image, and upserts it
//! 5. Every caller waiting on the fetch receives the same outcome
//!
//! Input errors are reported before any I/O. An address that resolves
//! nowhere yields `Ok(None)` and leaves the store untouched.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::coalesce::{FetchOutcome, RequestCoalescer};
use crate::config::{ImageDimensions, SettingsHandle};
use crate::key::{validate_postal_code, CacheKey, KeyError};
use crate::provider::{GeocodeProvider, ImageryProvider, ProviderError};
use crate::store::{CacheStore, StoreError};
use crate::telemetry::RetrieverMetrics;
use crate::zoom::{UnsupportedZoomLevel, ZoomLevel};

/// Errors returned by [`MapImageRetriever::get_image`].
///
/// `Clone` because one fetch outcome is delivered to every waiter.
#[derive(Debug, Clone, Error)]
pub enum RetrieveError {
    /// The caller supplied a missing or malformed postal code or zoom level.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Geocoding or imagery failed.
    #[error("Upstream provider error: {0}")]
    Upstream(#[from] ProviderError),

    /// The cache store failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// The caller's cancellation token fired before the outcome arrived.
    #[error("Request cancelled")]
    Cancelled,

    /// The shared fetch ended without producing an outcome.
    #[error("Fetch abandoned before completion")]
    FetchAbandoned,
}

impl RetrieveError {
    /// True when the same request may succeed if retried later.
    ///
    /// Input errors never succeed on retry; provider outages, storage
    /// failures and abandoned fetches might. Nothing here retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            RetrieveError::Upstream(e) => !matches!(e, ProviderError::InvalidRequest(_)),
            RetrieveError::Storage(_) | RetrieveError::FetchAbandoned => true,
            RetrieveError::InvalidArgument(_) | RetrieveError::Cancelled => false,
        }
    }
}

impl From<KeyError> for RetrieveError {
    fn from(e: KeyError) -> Self {
        RetrieveError::InvalidArgument(e.to_string())
    }
}

impl From<UnsupportedZoomLevel> for RetrieveError {
    fn from(e: UnsupportedZoomLevel) -> Self {
        RetrieveError::InvalidArgument(e.to_string())
    }
}

/// Parse a zoom level given as a name (`"area"`) or number (`"2"`).
pub fn parse_zoom_level(value: &str) -> Result<ZoomLevel, RetrieveError> {
    Ok(value.parse::<ZoomLevel>()?)
}

/// Cache-aside retriever with per-key request coalescing.
pub struct MapImageRetriever {
    store: Arc<dyn CacheStore>,
    geocoder: Arc<dyn GeocodeProvider>,
    imagery: Arc<dyn ImageryProvider>,
    settings: SettingsHandle,
    coalescer: RequestCoalescer,
    metrics: Arc<RetrieverMetrics>,
}

impl MapImageRetriever {
    /// Creates a retriever over the given store and providers.
    ///
    /// Image dimensions are read from `settings` on every fetch.
    pub fn new(
        store: Arc<dyn CacheStore>,
        geocoder: Arc<dyn GeocodeProvider>,
        imagery: Arc<dyn ImageryProvider>,
        settings: SettingsHandle,
    ) -> Self {
        Self {
            store,
            geocoder,
            imagery,
            settings,
            coalescer: RequestCoalescer::new(),
            metrics: Arc::new(RetrieverMetrics::new()),
        }
    }

    /// Record into shared metrics instead of a private instance.
    pub fn with_metrics(mut self, metrics: Arc<RetrieverMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<RetrieverMetrics> {
        &self.metrics
    }

    /// Keys with a provider fetch currently running.
    pub fn in_flight(&self) -> usize {
        self.coalescer.in_flight_count()
    }

    /// Callers currently waiting on the fetch for `key`.
    pub fn waiters(&self, key: &CacheKey) -> usize {
        self.coalescer.waiters(key)
    }

    /// Get the map image for an address.
    ///
    /// # Arguments
    ///
    /// * `raw_postal_code` - Postal code as supplied by the caller
    /// * `house_number` - Only part of the cache key on house and street level
    /// * `zoom` - Requested zoom level
    /// * `cancellation` - Stops this caller waiting; a shared fetch keeps
    ///   running while other callers still wait on it
    ///
    /// # Returns
    ///
    /// - `Ok(Some(bytes))` with the encoded image
    /// - `Ok(None)` if the address could not be found
    /// - `Err(_)` on invalid input, provider or storage failure
    #[instrument(skip(self, cancellation), fields(zoom = %zoom))]
    pub async fn get_image(
        &self,
        raw_postal_code: Option<&str>,
        house_number: Option<u32>,
        zoom: ZoomLevel,
        cancellation: &CancellationToken,
    ) -> Result<Option<Bytes>, RetrieveError> {
        validate_postal_code(raw_postal_code)?;
        let key = CacheKey::for_request(raw_postal_code, house_number, zoom)?;

        if cancellation.is_cancelled() {
            return Err(RetrieveError::Cancelled);
        }

        match self.store.lookup(&key).await {
            Ok(Some(row)) => {
                if let Err(e) = self.store.touch(row.id).await {
                    self.metrics.storage_failure();
                    return Err(e.into());
                }
                self.metrics.cache_hit();
                debug!(key = %key, size_bytes = row.payload.len(), "Cache hit");
                return Ok(Some(row.payload));
            }
            Ok(None) => {
                self.metrics.cache_miss();
                debug!(key = %key, "Cache miss");
            }
            Err(e) => {
                self.metrics.storage_failure();
                warn!(key = %key, error = %e, "Cache lookup failed");
                return Err(e.into());
            }
        }

        let job = FetchJob {
            key: key.clone(),
            // Geocoding wants the caller's spelling, not the key fragment
            postal_code: raw_postal_code.unwrap_or_default().trim().to_string(),
            house_number,
            dimensions: self.settings.current().dimensions.get(zoom),
            store: Arc::clone(&self.store),
            geocoder: Arc::clone(&self.geocoder),
            imagery: Arc::clone(&self.imagery),
            metrics: Arc::clone(&self.metrics),
        };

        let registration = self.coalescer.join(&key, move |abort| job.run(abort));
        if !registration.is_leader() {
            self.metrics.coalesced();
        }

        registration.wait(cancellation).await
    }

    /// Like [`get_image`](Self::get_image) with the zoom level given as text.
    pub async fn get_image_by_name(
        &self,
        raw_postal_code: Option<&str>,
        house_number: Option<u32>,
        zoom: &str,
        cancellation: &CancellationToken,
    ) -> Result<Option<Bytes>, RetrieveError> {
        let zoom = parse_zoom_level(zoom)?;
        self.get_image(raw_postal_code, house_number, zoom, cancellation)
            .await
    }
}

/// Everything one provider round trip needs, detached from the retriever.
struct FetchJob {
    key: CacheKey,
    postal_code: String,
    house_number: Option<u32>,
    dimensions: ImageDimensions,
    store: Arc<dyn CacheStore>,
    geocoder: Arc<dyn GeocodeProvider>,
    imagery: Arc<dyn ImageryProvider>,
    metrics: Arc<RetrieverMetrics>,
}

impl FetchJob {
    async fn run(self, cancellation: CancellationToken) -> FetchOutcome {
        // A fetch that finished just before this one started may have
        // filled the row already
        if let Some(row) = self.store.lookup(&self.key).await.map_err(|e| self.storage(e))? {
            debug!(key = %self.key, "Row appeared while joining; skipping fetch");
            return Ok(Some(row.payload));
        }

        self.metrics.fetch_started();

        let position = match self
            .geocoder
            .resolve(&self.postal_code, self.house_number, &cancellation)
            .await
        {
            Ok(Some(position)) => position,
            Ok(None) => {
                self.metrics.not_found();
                debug!(
                    key = %self.key,
                    geocoder = self.geocoder.name(),
                    "Address not found"
                );
                return Ok(None);
            }
            Err(e) => return Err(self.upstream(self.geocoder.name(), e)),
        };

        let payload = self
            .imagery
            .fetch_image(
                position,
                self.key.zoom(),
                self.dimensions.height,
                self.dimensions.width,
                &cancellation,
            )
            .await
            .map_err(|e| self.upstream(self.imagery.name(), e))?;

        let row = self
            .store
            .upsert(&self.key, payload)
            .await
            .map_err(|e| self.storage(e))?;

        debug!(
            key = %self.key,
            position = %position,
            size_bytes = row.payload.len(),
            "Fetched and cached image"
        );

        Ok(Some(row.payload))
    }

    fn upstream(&self, provider: &str, error: ProviderError) -> RetrieveError {
        self.metrics.upstream_failure();
        warn!(key = %self.key, provider, error = %error, "Provider request failed");
        RetrieveError::Upstream(error)
    }

    fn storage(&self, error: StoreError) -> RetrieveError {
        self.metrics.storage_failure();
        warn!(key = %self.key, error = %error, "Cache store failed during fetch");
        RetrieveError::Storage(error)
    }
}
