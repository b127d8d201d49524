//! Provider traits and error type.

use bytes::Bytes;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::coord::Position;
use crate::zoom::ZoomLevel;

/// Errors raised by geocoding and imagery providers.
///
/// `Clone` so one failure can be handed to every caller waiting on the same
/// fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Transport-level failure (DNS, TLS, connection reset, ...).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The provider answered with a non-success status.
    #[error("HTTP {status} from {provider}")]
    Status { provider: String, status: u16 },

    /// The request did not complete within the configured timeout.
    #[error("Request to {0} timed out")]
    Timeout(String),

    /// The provider answered but the body could not be understood.
    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    /// The request could not be built from the given arguments.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The request was abandoned because nobody is waiting for it anymore.
    #[error("Request cancelled")]
    Cancelled,
}

/// Resolves an address to a geographic position.
///
/// Implementations receive the postal code exactly as the caller supplied it;
/// geocoding wants full precision even when the cache key is coarser.
pub trait GeocodeProvider: Send + Sync {
    /// Looks up the position of an address.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(position))` if the address is known
    /// - `Ok(None)` if the address does not exist
    /// - `Err(_)` on transport or provider failure
    fn resolve<'a>(
        &'a self,
        postal_code: &'a str,
        house_number: Option<u32>,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Option<Position>, ProviderError>>;

    /// Human-readable provider name for logs.
    fn name(&self) -> &str;
}

/// Fetches a rendered map image around a position.
pub trait ImageryProvider: Send + Sync {
    /// Downloads an image of `width` x `height` pixels centered on `position`.
    fn fetch_image<'a>(
        &'a self,
        position: Position,
        zoom: ZoomLevel,
        height: u32,
        width: u32,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Bytes, ProviderError>>;

    /// Human-readable provider name for logs.
    fn name(&self) -> &str;
}
