//! Logging setup.
//!
//! Events go to two sinks: stderr for the operator and a daily-rolling file
//! under the configured log directory. File writes go through a non-blocking
//! worker; keep the returned [`LoggingGuard`] alive for the lifetime of the
//! process or buffered lines are lost on exit.
//!
//! `RUST_LOG` takes precedence over the configured level.

use std::io;

use thiserror::Error;
use time::macros::format_description;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingSettings;

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to create log directory: {0}")]
    Directory(#[from] io::Error),

    #[error("Invalid log filter '{filter}': {reason}")]
    Filter { filter: String, reason: String },

    #[error("A global logger is already installed: {0}")]
    AlreadyInitialized(String),
}

/// Flushes buffered file output when dropped.
pub struct LoggingGuard {
    _file: WorkerGuard,
}

/// Install the global subscriber.
///
/// `verbose` raises the default level to `debug` for the `mapvault` crates.
pub fn init_logging(settings: &LoggingSettings, verbose: bool) -> Result<LoggingGuard, LoggingError> {
    std::fs::create_dir_all(&settings.directory)?;

    let filter = build_filter(&settings.level, verbose)?;

    let file_appender = tracing_appender::rolling::daily(&settings.directory, &settings.file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let timer = LocalTime::new(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
    ));

    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_timer(timer.clone())
        .with_target(false);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_timer(timer)
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    Ok(LoggingGuard { _file: guard })
}

fn build_filter(level: &str, verbose: bool) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let directive = if verbose {
        "mapvault=debug,mapvault_cli=debug,info".to_string()
    } else {
        level.to_string()
    };

    EnvFilter::try_new(&directive).map_err(|e| LoggingError::Filter {
        filter: directive.clone(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_accepts_levels() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert!(build_filter("info", false).is_ok());
        assert!(build_filter("mapvault=trace,warn", false).is_ok());
        assert!(build_filter("whatever", true).is_ok());
    }

    #[test]
    fn test_build_filter_rejects_garbage() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert!(matches!(
            build_filter("mapvault=loud", false),
            Err(LoggingError::Filter { .. })
        ));
    }
}
