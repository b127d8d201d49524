//! CLI error type.

use std::fmt;
use std::io;

use mapvault::app::AppError;
use mapvault::config::ConfigError;
use mapvault::logging::LoggingError;
use mapvault::store::StoreError;
use mapvault::RetrieveError;

/// Errors surfaced to the operator by a CLI command.
#[derive(Debug)]
pub enum CliError {
    /// Configuration missing, malformed, or refused.
    Config(String),

    /// Application failed to start.
    App(AppError),

    /// Image retrieval failed.
    Retrieve(RetrieveError),

    /// The address did not resolve to any location.
    NotFound(String),

    /// Cache store failed.
    Store(StoreError),

    /// Logging could not be set up.
    Logging(LoggingError),

    /// Failed to create the Tokio runtime.
    Runtime(String),

    /// Reading or writing a local file failed.
    Io(io::Error),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::App(e) => write!(f, "{}", e),
            CliError::Retrieve(e) => {
                if e.is_retryable() {
                    write!(f, "{} (temporary, try again later)", e)
                } else {
                    write!(f, "{}", e)
                }
            }
            CliError::NotFound(address) => write!(f, "No location found for {}", address),
            CliError::Store(e) => write!(f, "Cache store error: {}", e),
            CliError::Logging(e) => write!(f, "Logging setup failed: {}", e),
            CliError::Runtime(msg) => write!(f, "Failed to create Tokio runtime: {}", msg),
            CliError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::App(e) => Some(e),
            CliError::Retrieve(e) => Some(e),
            CliError::Store(e) => Some(e),
            CliError::Logging(e) => Some(e),
            CliError::Io(e) => Some(e),
            CliError::Config(_) | CliError::NotFound(_) | CliError::Runtime(_) => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<AppError> for CliError {
    fn from(e: AppError) -> Self {
        CliError::App(e)
    }
}

impl From<RetrieveError> for CliError {
    fn from(e: RetrieveError) -> Self {
        CliError::Retrieve(e)
    }
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        CliError::Store(e)
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::Logging(e)
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        CliError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapvault::provider::ProviderError;

    #[test]
    fn test_retryable_errors_say_so() {
        let err = CliError::from(RetrieveError::Upstream(ProviderError::Timeout(
            "api.pdok.nl".to_string(),
        )));
        assert!(err.to_string().contains("try again later"));

        let err = CliError::from(RetrieveError::InvalidArgument("bad".to_string()));
        assert!(!err.to_string().contains("try again later"));
    }

    #[test]
    fn test_storage_failures_are_temporary() {
        let err = CliError::from(RetrieveError::Storage(StoreError::Corrupt(
            "bad row".to_string(),
        )));
        assert!(err.to_string().contains("try again later"));
    }

    #[test]
    fn test_not_found_message() {
        let err = CliError::NotFound("9999ZZ".to_string());
        assert_eq!(err.to_string(), "No location found for 9999ZZ");
    }
}
