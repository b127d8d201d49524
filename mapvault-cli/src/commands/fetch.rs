//! Fetch command - retrieve one map image and write it to disk.

use std::fs;
use std::path::PathBuf;

use mapvault::app::MapVaultApp;

use super::common::format_size;
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the fetch command.
#[derive(Debug)]
pub struct FetchArgs {
    pub postal_code: String,
    pub house_number: Option<u32>,
    pub zoom: String,
    pub output: Option<PathBuf>,
}

impl FetchArgs {
    /// Output path, defaulting to `<postal code>-<zoom>.png` in the working directory.
    fn output_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            let postal: String = self
                .postal_code
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            PathBuf::from(format!("{}-{}.png", postal.to_uppercase(), self.zoom.trim()))
        })
    }
}

/// Run the fetch command.
pub fn run(args: FetchArgs, runner: &CliRunner) -> Result<(), CliError> {
    let shutdown = runner.shutdown_token();

    let image = runner.block_on(async {
        let app = MapVaultApp::start(runner.settings().clone()).await?;
        let result = app
            .retriever()
            .get_image_by_name(
                Some(&args.postal_code),
                args.house_number,
                &args.zoom,
                &shutdown,
            )
            .await;
        app.shutdown();
        result.map_err(CliError::from)
    })?;

    let Some(bytes) = image else {
        let address = match args.house_number {
            Some(number) => format!("{} {}", args.postal_code, number),
            None => args.postal_code.clone(),
        };
        return Err(CliError::NotFound(address));
    };

    let path = args.output_path();
    fs::write(&path, &bytes)?;
    println!("Wrote {} ({})", path.display(), format_size(bytes.len() as u64));
    Ok(())
}
