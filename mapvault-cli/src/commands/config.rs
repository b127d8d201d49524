//! Configuration inspection commands.

use std::io;
use std::path::Path;

use clap::Subcommand;
use mapvault::config::Settings;

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file path
    Path,

    /// Print the effective configuration, defaults included
    Show,
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands, path: &Path) -> Result<(), CliError> {
    match command {
        ConfigCommands::Path => {
            println!("{}", path.display());
            Ok(())
        }
        ConfigCommands::Show => run_show(path),
    }
}

fn run_show(path: &Path) -> Result<(), CliError> {
    let mut settings = Settings::load_or_default(path)?;
    if settings.imagery.api_key.is_some() {
        settings.imagery.api_key = Some("********".to_string());
    }

    let mut stdout = io::stdout().lock();
    settings.to_ini().write_to(&mut stdout)?;
    Ok(())
}
