//! Google Static Maps imagery provider.
//!
//! Uses the Maps Static API with an API key. Users must create a Google Cloud
//! project with the Maps Static API enabled and supply the key in
//! `[imagery] api_key`.
//!
//! # API Endpoint
//!
//! `https://maps.googleapis.com/maps/api/staticmap?center={lat},{lon}&zoom={z}&size={w}x{h}&maptype={type}&key={API_KEY}`
//!
//! The requested zoom comes from [`ZoomLevel::map_zoom`]; the image size
//! from the configured dimensions of that level.

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::coord::Position;
use crate::provider::{AsyncHttpClient, ImageryProvider, ProviderError};
use crate::zoom::ZoomLevel;

/// Default Maps Static API endpoint.
pub const DEFAULT_STATIC_MAPS_URL: &str = "https://maps.googleapis.com/maps/api/staticmap";

/// Largest edge the Static Maps API renders without a premium plan.
pub const MAX_EDGE_PIXELS: u32 = 640;

const PROVIDER_NAME: &str = "Google Static Maps";

/// Google Static Maps imagery provider.
///
/// Google Maps Platform is a paid service and rate limited per key, which is
/// why every image is cached by the caller.
///
/// # Example
///
/// ```no_run
/// use mapvault::provider::{GoogleStaticMapsProvider, ReqwestHttpClient};
///
/// let client = ReqwestHttpClient::new().unwrap();
/// let provider = GoogleStaticMapsProvider::new(client, "YOUR_API_KEY".to_string());
/// ```
pub struct GoogleStaticMapsProvider<C: AsyncHttpClient> {
    http_client: C,
    api_key: String,
    base_url: String,
    map_type: String,
    marker: bool,
}

impl<C: AsyncHttpClient> GoogleStaticMapsProvider<C> {
    /// Creates a provider for the public endpoint with a roadmap style.
    pub fn new(http_client: C, api_key: String) -> Self {
        Self {
            http_client,
            api_key,
            base_url: DEFAULT_STATIC_MAPS_URL.to_string(),
            map_type: "roadmap".to_string(),
            marker: true,
        }
    }

    /// Overrides the endpoint (useful for proxies and test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the map style (`roadmap`, `satellite`, `hybrid`, `terrain`).
    pub fn with_map_type(mut self, map_type: impl Into<String>) -> Self {
        self.map_type = map_type.into();
        self
    }

    /// Enables or disables the marker on the requested position.
    pub fn with_marker(mut self, marker: bool) -> Self {
        self.marker = marker;
        self
    }

    /// Builds the request URL for the given position and size.
    fn build_url(&self, position: Position, zoom: ZoomLevel, height: u32, width: u32) -> String {
        let mut url = format!(
            "{}?center={}&zoom={}&size={}x{}&maptype={}",
            self.base_url,
            position,
            zoom.map_zoom(),
            width,
            height,
            self.map_type
        );
        if self.marker {
            url.push_str(&format!("&markers={}", position));
        }
        url.push_str(&format!("&key={}", self.api_key));
        url
    }
}

impl<C: AsyncHttpClient> ImageryProvider for GoogleStaticMapsProvider<C> {
    fn fetch_image<'a>(
        &'a self,
        position: Position,
        zoom: ZoomLevel,
        height: u32,
        width: u32,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Bytes, ProviderError>> {
        Box::pin(async move {
            if height == 0 || width == 0 || height > MAX_EDGE_PIXELS || width > MAX_EDGE_PIXELS {
                return Err(ProviderError::InvalidRequest(format!(
                    "image size {}x{} outside 1..={}",
                    width, height, MAX_EDGE_PIXELS
                )));
            }

            let url = self.build_url(position, zoom, height, width);
            let body = self.http_client.get(&url, cancellation).await?;

            if body.is_empty() {
                return Err(ProviderError::InvalidResponse {
                    provider: PROVIDER_NAME.to_string(),
                    reason: "empty image body".to_string(),
                });
            }

            Ok(Bytes::from(body))
        })
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockAsyncHttpClient;

    fn png_bytes() -> Vec<u8> {
        vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]
    }

    fn amsterdam() -> Position {
        Position::new(52.3731, 4.8922).unwrap()
    }

    #[test]
    fn test_provider_name() {
        let provider =
            GoogleStaticMapsProvider::new(MockAsyncHttpClient::new(Ok(vec![])), "k".into());
        assert_eq!(provider.name(), "Google Static Maps");
    }

    #[test]
    fn test_url_construction() {
        let provider =
            GoogleStaticMapsProvider::new(MockAsyncHttpClient::new(Ok(vec![])), "test_key".into());

        let url = provider.build_url(amsterdam(), ZoomLevel::Street, 400, 600);
        assert_eq!(
            url,
            "https://maps.googleapis.com/maps/api/staticmap?center=52.373100,4.892200&zoom=17\
             &size=600x400&maptype=roadmap&markers=52.373100,4.892200&key=test_key"
        );
    }

    #[test]
    fn test_url_without_marker_and_custom_style() {
        let provider =
            GoogleStaticMapsProvider::new(MockAsyncHttpClient::new(Ok(vec![])), "k".into())
                .with_base_url("http://localhost:8080/static")
                .with_map_type("satellite")
                .with_marker(false);

        let url = provider.build_url(amsterdam(), ZoomLevel::City, 320, 320);
        assert!(url.starts_with("http://localhost:8080/static?"));
        assert!(url.contains("maptype=satellite"));
        assert!(url.contains("zoom=12"));
        assert!(!url.contains("markers="));
    }

    #[tokio::test]
    async fn test_fetch_image_success() {
        let provider =
            GoogleStaticMapsProvider::new(MockAsyncHttpClient::new(Ok(png_bytes())), "k".into());

        let image = provider
            .fetch_image(amsterdam(), ZoomLevel::House, 400, 640, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(image.as_ref(), png_bytes().as_slice());
    }

    #[tokio::test]
    async fn test_fetch_image_rejects_oversized_request() {
        let client = MockAsyncHttpClient::new(Ok(png_bytes()));
        let provider = GoogleStaticMapsProvider::new(client, "k".into());

        let result = provider
            .fetch_image(amsterdam(), ZoomLevel::House, 400, 2048, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ProviderError::InvalidRequest(_))));
        assert!(provider.http_client.last_url().is_none());
    }

    #[tokio::test]
    async fn test_fetch_image_empty_body() {
        let provider =
            GoogleStaticMapsProvider::new(MockAsyncHttpClient::new(Ok(vec![])), "k".into());

        let result = provider
            .fetch_image(amsterdam(), ZoomLevel::Area, 400, 400, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ProviderError::InvalidResponse { .. })));
    }

    #[tokio::test]
    async fn test_fetch_image_network_error() {
        let client = MockAsyncHttpClient::new(Err(ProviderError::HttpError(
            "Connection refused".to_string(),
        )));
        let provider = GoogleStaticMapsProvider::new(client, "k".into());

        let result = provider
            .fetch_image(amsterdam(), ZoomLevel::Area, 400, 400, &CancellationToken::new())
            .await;
        match result {
            Err(ProviderError::HttpError(msg)) => assert!(msg.contains("Connection refused")),
            other => panic!("Expected HttpError, got {:?}", other),
        }
    }
}
