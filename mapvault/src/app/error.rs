//! Application error types.

use std::fmt;

use crate::config::ConfigError;
use crate::provider::ProviderError;
use crate::store::StoreError;

/// Errors that can occur during application lifecycle.
#[derive(Debug)]
pub enum AppError {
    /// Failed to open the cache store.
    StoreOpen(StoreError),

    /// Failed to build a provider client.
    ProviderSetup(ProviderError),

    /// Configuration could not be loaded or is incomplete.
    Config(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::StoreOpen(e) => {
                write!(f, "Failed to open cache store: {}", e)
            }
            AppError::ProviderSetup(e) => {
                write!(f, "Failed to set up provider: {}", e)
            }
            AppError::Config(msg) => {
                write!(f, "Configuration error: {}", msg)
            }
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::StoreOpen(e) => Some(e),
            AppError::ProviderSetup(e) => Some(e),
            AppError::Config(_) => None,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::StoreOpen(e)
    }
}

impl From<ProviderError> for AppError {
    fn from(e: ProviderError) -> Self {
        AppError::ProviderSetup(e)
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config("missing api key".to_string());
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("missing api key"));
    }

    #[test]
    fn test_app_error_from_store_error() {
        let store_err = StoreError::Corrupt("bad row".to_string());
        let app_err: AppError = store_err.into();
        assert!(matches!(app_err, AppError::StoreOpen(_)));
        assert!(std::error::Error::source(&app_err).is_some());
    }

    #[test]
    fn test_app_error_from_config_error() {
        let app_err: AppError = ConfigError::NoSource.into();
        assert!(matches!(app_err, AppError::Config(_)));
    }
}
