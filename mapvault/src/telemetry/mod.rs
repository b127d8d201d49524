//! Retriever telemetry for observability and operator feedback.
//!
//! This module provides lock-free counters for the retrieval path. They are
//! cheap enough to bump on every request and can be read at any time without
//! blocking callers.
//!
//! # Architecture
//!
//! ```text
//! MapImageRetriever ─────► RetrieverMetrics ─────► TelemetrySnapshot ─────► Views
//!                          (atomic counters)       (point-in-time copy)     (CLI, logs)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use mapvault::telemetry::RetrieverMetrics;
//! use std::sync::Arc;
//!
//! let metrics = Arc::new(RetrieverMetrics::new());
//!
//! metrics.cache_hit();
//! metrics.cache_miss();
//! metrics.fetch_started();
//!
//! let snapshot = metrics.snapshot();
//! println!("Hit rate: {:.1}%", snapshot.hit_rate() * 100.0);
//! ```

mod metrics;
mod snapshot;

pub use metrics::RetrieverMetrics;
pub use snapshot::TelemetrySnapshot;
