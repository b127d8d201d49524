//! MapVault CLI - Command-line interface
//!
//! Fetches static map images for postal addresses through the shared cache
//! and runs the eviction sweep, either once or on a schedule.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use mapvault::config::config_file_path;

use commands::cache::CacheAction;
use commands::common::parse_interval;
use commands::config::ConfigCommands;
use commands::fetch::FetchArgs;
use commands::sweep::Schedule;
use error::CliError;
use runner::CliRunner;

#[derive(Parser)]
#[command(name = "mapvault")]
#[command(version = mapvault::VERSION)]
#[command(about = "Static map images for postal addresses", long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.mapvault/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Fetch the map image for an address and save it
    Fetch {
        /// Postal code, e.g. "1012 JS"
        postal_code: String,

        /// House number, used at house and street zoom
        #[arg(long)]
        house_number: Option<u32>,

        /// Zoom level: house, street, area, city (or 0-3)
        #[arg(short, long, default_value = "house")]
        zoom: String,

        /// Output file (default: <postal code>-<zoom>.png)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete cache entries older than their zoom level's retention
    Sweep {
        /// Repeat at this interval, e.g. "30m" or "1h"
        #[arg(long, value_parser = parse_interval, conflicts_with = "watch")]
        every: Option<Duration>,

        /// Repeat at the interval from the [eviction] section
        #[arg(long)]
        watch: bool,
    },

    /// Inspect the cache store
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config_path = cli.config.clone().unwrap_or_else(config_file_path);

    match cli.command {
        Commands::Init { force } => commands::init::run(&config_path, force),
        Commands::Config { command } => commands::config::run(command, &config_path),
        Commands::Fetch {
            postal_code,
            house_number,
            zoom,
            output,
        } => {
            let runner = CliRunner::new(Some(config_path), cli.verbose)?;
            runner.log_startup("fetch");
            commands::fetch::run(
                FetchArgs {
                    postal_code,
                    house_number,
                    zoom,
                    output,
                },
                &runner,
            )
        }
        Commands::Sweep { every, watch } => {
            let runner = CliRunner::new(Some(config_path), cli.verbose)?;
            runner.log_startup("sweep");
            let schedule = match (every, watch) {
                (Some(interval), _) => Schedule::Every(interval),
                (None, true) => Schedule::Configured,
                (None, false) => Schedule::Once,
            };
            commands::sweep::run(schedule, &runner)
        }
        Commands::Cache { action } => {
            let runner = CliRunner::new(Some(config_path), cli.verbose)?;
            runner.log_startup("cache");
            commands::cache::run(action, &runner)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_fetch_defaults() {
        let cli = Cli::parse_from(["mapvault", "fetch", "1012 JS"]);
        match cli.command {
            Commands::Fetch {
                postal_code,
                house_number,
                zoom,
                output,
            } => {
                assert_eq!(postal_code, "1012 JS");
                assert_eq!(house_number, None);
                assert_eq!(zoom, "house");
                assert!(output.is_none());
            }
            _ => panic!("expected fetch"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "mapvault",
            "fetch",
            "1012JS",
            "--house-number",
            "7",
            "-z",
            "street",
            "--config",
            "/tmp/mapvault.ini",
            "-v",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/mapvault.ini")));
        assert!(matches!(
            cli.command,
            Commands::Fetch { house_number: Some(7), ref zoom, .. } if zoom == "street"
        ));
    }

    #[test]
    fn test_sweep_every_parses_duration() {
        let cli = Cli::parse_from(["mapvault", "sweep", "--every", "15m"]);
        assert!(matches!(
            cli.command,
            Commands::Sweep { every: Some(d), watch: false } if d == Duration::from_secs(900)
        ));
    }

    #[test]
    fn test_sweep_every_conflicts_with_watch() {
        let result = Cli::try_parse_from(["mapvault", "sweep", "--every", "1h", "--watch"]);
        assert!(result.is_err());
    }
}
