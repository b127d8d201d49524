//! Time-to-live eviction of cached images.
//!
//! [`CacheEvictionTask::run_sweep`] deletes, for every zoom level, the rows
//! whose last access is older than that level's retention window. The task
//! owns no timer; something outside (the CLI `sweep` command, a cron job)
//! decides when to call it.
//!
//! Each level is one set-based delete. A failing level is reported in the
//! [`SweepReport`] and the sweep moves on; cancellation stops the sweep
//! before the next level, keeping deletes that already ran.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::SettingsHandle;
use crate::store::{CacheStore, StoreError};
use crate::zoom::ZoomLevel;

/// Outcome of sweeping one zoom level.
#[derive(Debug, Clone)]
pub struct LevelSweep {
    pub zoom: ZoomLevel,
    pub ttl: Duration,
    /// Rows last accessed strictly before this were eligible.
    pub cutoff: DateTime<Utc>,
    pub result: Result<u64, StoreError>,
}

/// Result of one eviction sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    /// Levels that were swept, in sweep order.
    pub levels: Vec<LevelSweep>,
    /// True if cancellation stopped the sweep before every level was visited.
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl SweepReport {
    /// Rows deleted across all levels.
    pub fn total_deleted(&self) -> u64 {
        self.levels
            .iter()
            .filter_map(|level| level.result.as_ref().ok())
            .sum()
    }

    /// Rows deleted for one level, if it was swept successfully.
    pub fn deleted(&self, zoom: ZoomLevel) -> Option<u64> {
        self.levels
            .iter()
            .find(|level| level.zoom == zoom)
            .and_then(|level| level.result.as_ref().ok().copied())
    }

    /// Levels whose delete failed.
    pub fn failures(&self) -> impl Iterator<Item = (ZoomLevel, &StoreError)> {
        self.levels
            .iter()
            .filter_map(|level| level.result.as_ref().err().map(|e| (level.zoom, e)))
    }

    /// True if every level was swept without error.
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.levels.len() == ZoomLevel::COUNT && self.failures().next().is_none()
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Sweep: deleted {} entries across {} levels in {}ms",
            self.total_deleted(),
            self.levels.len(),
            self.duration_ms
        )?;
        let failed = self.failures().count();
        if failed > 0 {
            write!(f, ", {} failed", failed)?;
        }
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}

/// Deletes expired rows, one zoom level at a time.
pub struct CacheEvictionTask {
    store: Arc<dyn CacheStore>,
    settings: SettingsHandle,
    clock: Arc<dyn Clock>,
}

impl CacheEvictionTask {
    pub fn new(store: Arc<dyn CacheStore>, settings: SettingsHandle, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            settings,
            clock,
        }
    }

    /// Run one sweep with the retention policy in effect right now.
    pub async fn run_sweep(&self, cancellation: &CancellationToken) -> SweepReport {
        let start = Instant::now();
        let policy = self.settings.current().retention;
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for (zoom, ttl) in policy.iter() {
            if cancellation.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let cutoff = cutoff_for(now, ttl);
            let result = self.store.delete_older_than(zoom, cutoff).await;

            match &result {
                Ok(deleted) => {
                    debug!(zoom = %zoom, cutoff = %cutoff, deleted, "Swept zoom level");
                }
                Err(e) => {
                    warn!(zoom = %zoom, cutoff = %cutoff, error = %e, "Sweep failed for zoom level");
                }
            }

            report.levels.push(LevelSweep {
                zoom,
                ttl,
                cutoff,
                result,
            });
        }

        report.duration_ms = start.elapsed().as_millis() as u64;

        if report.cancelled {
            info!(
                deleted = report.total_deleted(),
                levels_swept = report.levels.len(),
                "Eviction sweep cancelled"
            );
        } else {
            info!(
                store = self.store.name(),
                deleted = report.total_deleted(),
                failed = report.failures().count(),
                duration_ms = report.duration_ms,
                "Eviction sweep complete"
            );
        }

        report
    }
}

/// `now - ttl`, clamped to the earliest representable time.
fn cutoff_for(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_sub_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
