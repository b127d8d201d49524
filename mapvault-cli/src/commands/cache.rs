//! Cache inspection commands.

use clap::Subcommand;
use mapvault::clock::system_clock;
use mapvault::store::open_store;

use super::common::format_size;
use crate::error::CliError;
use crate::runner::CliRunner;

/// Cache subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show entry counts and sizes per zoom level
    Stats,
}

/// Run a cache subcommand.
pub fn run(action: CacheAction, runner: &CliRunner) -> Result<(), CliError> {
    match action {
        CacheAction::Stats => run_stats(runner),
    }
}

fn run_stats(runner: &CliRunner) -> Result<(), CliError> {
    let settings = runner.settings().current();

    let stats = runner.block_on(async {
        let store = open_store(&settings.store, system_clock()).await?;
        store.stats().await
    })?;

    println!(
        "Cache store: {} ({})",
        settings.store.backend,
        settings.store.path.display()
    );
    println!();
    println!("  {:<8} {:>10} {:>12}", "Zoom", "Entries", "Size");
    for level in &stats.levels {
        println!(
            "  {:<8} {:>10} {:>12}",
            level.zoom.as_str(),
            level.entries,
            format_size(level.payload_bytes)
        );
    }
    println!(
        "  {:<8} {:>10} {:>12}",
        "total",
        stats.total_entries(),
        format_size(stats.total_bytes())
    );
    Ok(())
}
