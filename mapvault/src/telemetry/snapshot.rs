//! Point-in-time view of retrieval counters.

use std::fmt;
use std::time::Duration;

/// Copy of [`RetrieverMetrics`](super::RetrieverMetrics) at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TelemetrySnapshot {
    pub uptime: Duration,
    pub hits: u64,
    pub misses: u64,
    /// Misses served by a fetch another caller started.
    pub coalesced: u64,
    /// Provider round trips.
    pub fetches: u64,
    pub not_found: u64,
    pub upstream_failures: u64,
    pub storage_failures: u64,
}

impl TelemetrySnapshot {
    pub fn requests(&self) -> u64 {
        self.hits + self.misses
    }

    /// Fraction of requests served from the cache, `0.0` when idle.
    pub fn hit_rate(&self) -> f64 {
        let requests = self.requests();
        if requests == 0 {
            0.0
        } else {
            self.hits as f64 / requests as f64
        }
    }
}

impl fmt::Display for TelemetrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} requests ({} hits, {} misses, {:.1}% hit rate), {} fetches, {} coalesced, \
             {} not found, {} upstream errors, {} storage errors",
            self.requests(),
            self.hits,
            self.misses,
            self.hit_rate() * 100.0,
            self.fetches,
            self.coalesced,
            self.not_found,
            self.upstream_failures,
            self.storage_failures
        )
    }
}
