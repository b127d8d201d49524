//! External geocoding and imagery providers
//!
//! This module provides the traits the retriever consumes, plus HTTP-backed
//! implementations for the PDOK Locatieserver (geocoding) and the Google
//! Static Maps API (imagery).
//!
//! ```ignore
//! use mapvault::provider::{GoogleStaticMapsProvider, PdokGeocoder, ReqwestHttpClient};
//!
//! let http_client = ReqwestHttpClient::new()?;
//! let geocoder = PdokGeocoder::new(http_client.clone());
//! let imagery = GoogleStaticMapsProvider::new(http_client, api_key);
//! ```

mod google;
mod http;
mod pdok;
mod types;

pub use google::{GoogleStaticMapsProvider, DEFAULT_STATIC_MAPS_URL, MAX_EDGE_PIXELS};
pub use http::{AsyncHttpClient, ReqwestHttpClient, DEFAULT_TIMEOUT_SECS};
pub use pdok::{PdokGeocoder, DEFAULT_PDOK_URL};
pub use types::{GeocodeProvider, ImageryProvider, ProviderError};

#[cfg(test)]
pub use http::tests::MockAsyncHttpClient;
