//! Shared setup for commands that touch the cache.
//!
//! `CliRunner` loads the settings, installs logging and owns the Tokio
//! runtime, so each command only has to describe its own work.

use std::future::Future;
use std::path::PathBuf;

use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use mapvault::config::{config_file_path, SettingsHandle};
use mapvault::logging::{init_logging, LoggingGuard};

use crate::error::CliError;

/// Runtime, settings and logging for one CLI invocation.
pub struct CliRunner {
    settings: SettingsHandle,
    runtime: Runtime,
    _logging: LoggingGuard,
}

impl CliRunner {
    /// Load settings from `config_path` (or the default location) and set up
    /// logging and the runtime.
    pub fn new(config_path: Option<PathBuf>, verbose: bool) -> Result<Self, CliError> {
        let path = config_path.unwrap_or_else(config_file_path);
        let settings = SettingsHandle::load(path)?;
        let logging = init_logging(&settings.current().logging, verbose)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("mapvault")
            .build()
            .map_err(|e| CliError::Runtime(e.to_string()))?;

        Ok(Self {
            settings,
            runtime,
            _logging: logging,
        })
    }

    /// Record which command is starting and with which config file.
    pub fn log_startup(&self, command: &str) {
        info!(
            version = mapvault::VERSION,
            command,
            config = ?self.settings.source(),
            "MapVault CLI starting"
        );
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    /// Run a future to completion on the runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Token that is cancelled when the user presses Ctrl-C.
    pub fn shutdown_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let trigger = token.clone();

        self.runtime.spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received, shutting down");
                    trigger.cancel();
                }
                Err(e) => warn!(error = %e, "Could not listen for Ctrl-C"),
            }
        });

        token
    }
}
