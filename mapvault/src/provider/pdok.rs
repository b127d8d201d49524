//! PDOK Locatieserver geocoder.
//!
//! Resolves Dutch postal codes (optionally with a house number) through the
//! free-text search endpoint of the PDOK Locatieserver. No API key needed.
//!
//! # API Endpoint
//!
//! `https://api.pdok.nl/bzk/locatieserver/search/v3_1/free?q=postcode:{pc} and huisnummer:{n}&fq=type:adres&rows=1&fl=centroide_ll`
//!
//! Matching documents carry a WKT point in `centroide_ll`, longitude first:
//! `POINT(4.8922 52.3731)`.

use futures::future::BoxFuture;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::coord::Position;
use crate::provider::{AsyncHttpClient, GeocodeProvider, ProviderError};

/// Default Locatieserver free-search endpoint.
pub const DEFAULT_PDOK_URL: &str = "https://api.pdok.nl/bzk/locatieserver/search/v3_1/free";

const PROVIDER_NAME: &str = "PDOK Locatieserver";

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    response: SearchResponse,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "numFound")]
    num_found: u64,
    #[serde(default)]
    docs: Vec<SearchDoc>,
}

#[derive(Debug, Deserialize)]
struct SearchDoc {
    centroide_ll: Option<String>,
}

/// Geocoder backed by the PDOK Locatieserver.
pub struct PdokGeocoder<C: AsyncHttpClient> {
    http_client: C,
    base_url: String,
}

impl<C: AsyncHttpClient> PdokGeocoder<C> {
    pub fn new(http_client: C) -> Self {
        Self {
            http_client,
            base_url: DEFAULT_PDOK_URL.to_string(),
        }
    }

    /// Overrides the endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_url(&self, postal_code: &str, house_number: Option<u32>) -> Result<String, ProviderError> {
        let postal_code: String = postal_code
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_uppercase();

        let (query, doc_type) = match house_number {
            Some(n) => (format!("postcode:{} and huisnummer:{}", postal_code, n), "type:adres"),
            None => (format!("postcode:{}", postal_code), "type:postcode"),
        };

        let url = reqwest::Url::parse_with_params(
            &self.base_url,
            &[
                ("q", query.as_str()),
                ("fq", doc_type),
                ("rows", "1"),
                ("fl", "centroide_ll"),
            ],
        )
        .map_err(|e| ProviderError::InvalidRequest(format!("bad geocoder URL: {}", e)))?;

        Ok(url.into())
    }

    fn parse_response(body: &[u8]) -> Result<Option<Position>, ProviderError> {
        let envelope: SearchEnvelope =
            serde_json::from_slice(body).map_err(|e| invalid_response(e.to_string()))?;

        if envelope.response.num_found == 0 {
            return Ok(None);
        }

        let Some(point) = envelope
            .response
            .docs
            .into_iter()
            .find_map(|doc| doc.centroide_ll)
        else {
            return Ok(None);
        };

        parse_wkt_point(&point).map(Some)
    }
}

fn invalid_response(reason: impl Into<String>) -> ProviderError {
    ProviderError::InvalidResponse {
        provider: PROVIDER_NAME.to_string(),
        reason: reason.into(),
    }
}

/// Parses `POINT(lon lat)`.
fn parse_wkt_point(wkt: &str) -> Result<Position, ProviderError> {
    let inner = wkt
        .trim()
        .strip_prefix("POINT(")
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| invalid_response(format!("unexpected geometry '{}'", wkt)))?;

    let mut parts = inner.split_whitespace();
    let (Some(lon), Some(lat), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid_response(format!("unexpected geometry '{}'", wkt)));
    };

    let lon: f64 = lon
        .parse()
        .map_err(|_| invalid_response(format!("bad longitude '{}'", lon)))?;
    let lat: f64 = lat
        .parse()
        .map_err(|_| invalid_response(format!("bad latitude '{}'", lat)))?;

    Position::new(lat, lon).map_err(|e| invalid_response(e.to_string()))
}

impl<C: AsyncHttpClient> GeocodeProvider for PdokGeocoder<C> {
    fn resolve<'a>(
        &'a self,
        postal_code: &'a str,
        house_number: Option<u32>,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Option<Position>, ProviderError>> {
        Box::pin(async move {
            let url = self.build_url(postal_code, house_number)?;
            let body = self.http_client.get(&url, cancellation).await?;
            let position = Self::parse_response(&body)?;

            debug!(
                postal_code,
                house_number,
                found = position.is_some(),
                "Geocoded address"
            );

            Ok(position)
        })
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }
}
