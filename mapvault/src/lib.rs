//! MapVault - Static map images for postal addresses
//!
//! This library resolves a postal address to a rendered static map image,
//! serving repeat requests from a persistent cache and falling back to an
//! external geocoding + imagery provider on a miss.
//!
//! # Architecture
//!
//! ```text
//! get_image(postal, house, zoom)
//!        │
//!        ▼
//! ┌──────────────┐    hit     ┌────────────┐
//! │ KeyNormalizer│──► lookup ─►│ CacheStore │──► touch ──► bytes
//! └──────────────┘            └─────┬──────┘
//!                                   │ miss
//!                                   ▼
//!                          ┌─────────────────┐
//!                          │ RequestCoalescer│ (one fetch per key)
//!                          └────────┬────────┘
//!                                   ▼
//!                    Geocoder ──► Imagery ──► upsert ──► bytes
//!
//! CacheEvictionTask::run_sweep ──► delete_older_than(level, now - ttl)
//! ```

pub mod app;
pub mod clock;
pub mod coalesce;
pub mod config;
pub mod coord;
pub mod eviction;
pub mod key;
pub mod logging;
pub mod provider;
pub mod retriever;
pub mod store;
pub mod telemetry;
pub mod zoom;

/// Crate version, recorded in logs at startup.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use coord::Position;
pub use key::{CacheKey, KeyError};
pub use retriever::{MapImageRetriever, RetrieveError};
pub use zoom::ZoomLevel;
