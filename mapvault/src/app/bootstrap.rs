//! Application bootstrap implementation.
//!
//! This module contains `MapVaultApp`, which builds every component from the
//! current settings and hands out shared references to them.

use std::sync::Arc;

use tracing::info;

use super::error::AppError;
use crate::clock::{system_clock, Clock};
use crate::config::SettingsHandle;
use crate::eviction::CacheEvictionTask;
use crate::provider::{
    GeocodeProvider, GoogleStaticMapsProvider, ImageryProvider, PdokGeocoder, ReqwestHttpClient,
};
use crate::retriever::MapImageRetriever;
use crate::store::{open_store, CacheStore};
use crate::telemetry::TelemetrySnapshot;

/// MapVault application with all components wired.
///
/// Components are created in dependency order:
/// 1. Cache store
/// 2. HTTP-backed geocoder and imagery providers
/// 3. Retriever and eviction task, sharing the store
///
/// # Example
///
/// ```ignore
/// use mapvault::app::MapVaultApp;
///
/// let app = MapVaultApp::start(settings).await?;
/// let retriever = app.retriever();
///
/// // Later: log final counters
/// app.shutdown();
/// ```
pub struct MapVaultApp {
    settings: SettingsHandle,
    store: Arc<dyn CacheStore>,
    retriever: Arc<MapImageRetriever>,
    eviction: Arc<CacheEvictionTask>,
}

impl MapVaultApp {
    /// Start the application from the given settings.
    ///
    /// # Errors
    ///
    /// Returns an error if no imagery API key is configured, the store cannot
    /// be opened, or an HTTP client cannot be built.
    pub async fn start(settings: SettingsHandle) -> Result<Self, AppError> {
        Self::start_with_clock(settings, system_clock()).await
    }

    /// Start the application with an explicit time source.
    pub async fn start_with_clock(
        settings: SettingsHandle,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AppError> {
        let current = settings.current();
        info!(version = crate::VERSION, "Starting MapVault");

        let api_key = current.imagery.api_key.clone().ok_or_else(|| {
            AppError::Config(
                "Google Static Maps requires an API key. \
                 Set api_key in the [imagery] section of config.ini"
                    .to_string(),
            )
        })?;

        // 1. Store first; nothing else is useful without it
        let store = open_store(&current.store, Arc::clone(&clock)).await?;

        // 2. Providers, each with its own timeout
        let geocoder_client = ReqwestHttpClient::with_timeout(current.geocoder.timeout)?;
        let geocoder =
            PdokGeocoder::new(geocoder_client).with_base_url(current.geocoder.url.clone());

        let imagery_client = ReqwestHttpClient::with_timeout(current.imagery.timeout)?;
        let imagery = GoogleStaticMapsProvider::new(imagery_client, api_key)
            .with_base_url(current.imagery.url.clone())
            .with_map_type(current.imagery.map_type.clone())
            .with_marker(current.imagery.marker);

        info!(
            store = store.name(),
            geocoder = geocoder.name(),
            imagery = imagery.name(),
            "Components ready"
        );

        Ok(Self::from_parts(
            settings,
            store,
            Arc::new(geocoder),
            Arc::new(imagery),
            clock,
        ))
    }

    /// Wire the application from already-built components.
    pub fn from_parts(
        settings: SettingsHandle,
        store: Arc<dyn CacheStore>,
        geocoder: Arc<dyn GeocodeProvider>,
        imagery: Arc<dyn ImageryProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let retriever = Arc::new(MapImageRetriever::new(
            Arc::clone(&store),
            geocoder,
            imagery,
            settings.clone(),
        ));
        let eviction = Arc::new(CacheEvictionTask::new(
            Arc::clone(&store),
            settings.clone(),
            clock,
        ));

        Self {
            settings,
            store,
            retriever,
            eviction,
        }
    }

    pub fn retriever(&self) -> Arc<MapImageRetriever> {
        Arc::clone(&self.retriever)
    }

    pub fn eviction(&self) -> Arc<CacheEvictionTask> {
        Arc::clone(&self.eviction)
    }

    pub fn store(&self) -> Arc<dyn CacheStore> {
        Arc::clone(&self.store)
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    /// Current retrieval counters.
    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.retriever.metrics().snapshot()
    }

    /// Shut the application down, logging final counters.
    pub fn shutdown(self) {
        info!(telemetry = %self.telemetry(), "MapVault shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Settings, StoreBackend};
    use tokio_util::sync::CancellationToken;

    fn memory_settings(api_key: Option<&str>) -> SettingsHandle {
        let mut settings = Settings::default();
        settings.store.backend = StoreBackend::Memory;
        settings.imagery.api_key = api_key.map(str::to_string);
        SettingsHandle::new(settings)
    }

    #[tokio::test]
    async fn test_start_requires_api_key() {
        let result = MapVaultApp::start(memory_settings(None)).await;
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn test_start_with_memory_store() {
        let app = MapVaultApp::start(memory_settings(Some("test-key")))
            .await
            .unwrap();

        assert_eq!(app.store().name(), "memory");
        assert_eq!(app.telemetry().requests(), 0);

        let report = app.eviction().run_sweep(&CancellationToken::new()).await;
        assert!(report.is_complete());
        assert_eq!(report.total_deleted(), 0);

        app.shutdown();
    }

    #[tokio::test]
    async fn test_start_with_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.store.path = dir.path().join("cache.db");
        settings.imagery.api_key = Some("test-key".to_string());

        let app = MapVaultApp::start(SettingsHandle::new(settings))
            .await
            .unwrap();
        assert_eq!(app.store().name(), "sqlite");
        assert!(dir.path().join("cache.db").exists());
    }

    #[tokio::test]
    async fn test_invalid_input_rejected_without_network() {
        let app = MapVaultApp::start(memory_settings(Some("test-key")))
            .await
            .unwrap();

        let result = app
            .retriever()
            .get_image(
                Some("not a postcode"),
                None,
                crate::zoom::ZoomLevel::City,
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(
            result,
            Err(crate::retriever::RetrieveError::InvalidArgument(_))
        ));
    }
}
