//! Init command - write a default configuration file.

use std::path::Path;

use mapvault::config::Settings;

use crate::error::CliError;

/// Run the init command.
pub fn run(path: &Path, force: bool) -> Result<(), CliError> {
    let settings = Settings::write_default(path, force)?;

    println!("Configuration file: {}", path.display());
    println!("Cache database:     {}", settings.store.path.display());
    println!();
    println!("Set api_key in the [imagery] section before running 'mapvault fetch'.");
    println!("Retention per zoom level lives in the [retention] section.");
    Ok(())
}
