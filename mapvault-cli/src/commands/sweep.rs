//! Sweep command - evict expired cache entries once or on an interval.

use std::time::Duration;

use mapvault::clock::system_clock;
use mapvault::config::SettingsHandle;
use mapvault::eviction::CacheEvictionTask;
use mapvault::store::open_store;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::CliError;
use crate::runner::CliRunner;

/// How often the sweep repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Sweep once and exit.
    Once,
    /// Repeat at the configured eviction interval, re-read before each wait.
    Configured,
    /// Repeat at a fixed interval.
    Every(Duration),
}

/// Run the sweep command.
pub fn run(schedule: Schedule, runner: &CliRunner) -> Result<(), CliError> {
    let shutdown = runner.shutdown_token();
    let settings = runner.settings().clone();

    runner.block_on(async {
        let store = open_store(&settings.current().store, system_clock()).await?;
        let task = CacheEvictionTask::new(store, settings.clone(), system_clock());

        loop {
            let report = task.run_sweep(&shutdown).await;
            println!("{}", report);
            for (zoom, error) in report.failures() {
                println!("  {}: {}", zoom, error);
            }

            let interval = match schedule {
                Schedule::Once => break,
                Schedule::Every(interval) => interval,
                Schedule::Configured => settings.current().eviction.interval,
            };

            if !wait(interval, &shutdown).await {
                break;
            }

            // Pick up retention changes made while waiting
            refresh(&settings);
        }

        Ok::<(), CliError>(())
    })?;

    info!("Sweep finished");
    Ok(())
}

/// Re-read the config file, keeping the current settings if it is unreadable.
fn refresh(settings: &SettingsHandle) {
    if settings.source().is_none() {
        return;
    }
    if let Err(e) = settings.reload() {
        debug!(error = %e, "Sweeping with previous settings");
    }
}

/// Sleep for `interval`; false if shutdown was requested first.
async fn wait(interval: Duration, shutdown: &CancellationToken) -> bool {
    info!(next_in = %humantime::format_duration(interval), "Waiting for next sweep");
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(interval) => true,
    }
}
