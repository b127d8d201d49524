//! Configuration for MapVault.
//!
//! Settings are read from an INI file (default `~/.mapvault/config.ini`) and
//! held behind a [`SettingsHandle`] so they can be swapped at runtime. The
//! retriever and the eviction sweep read `handle.current()` on every call,
//! so a reload takes effect on the next request or sweep.
//!
//! # Example File
//!
//! ```ini
//! [store]
//! backend = sqlite
//! path = /var/lib/mapvault/cache.db
//!
//! [imagery]
//! api_key = AIza...
//!
//! [retention]
//! house = 7d
//! street = 14d
//! area = 30d
//! city = 90d
//!
//! [dimensions]
//! city = 320x320
//! ```

mod file;
mod policy;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{info, warn};

use crate::provider::{DEFAULT_PDOK_URL, DEFAULT_STATIC_MAPS_URL};
use crate::zoom::ZoomLevel;

pub use file::{config_directory, config_file_path, DEFAULT_CONFIG_FILE};
pub use policy::{DimensionPolicy, ImageDimensions, ZoomLevelPolicy};

/// Errors that can occur while loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid value for [{section}] {key} = '{value}': {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    #[error("[{section}] does not list zoom level '{zoom}'")]
    MissingZoomLevel {
        section: &'static str,
        zoom: ZoomLevel,
    },

    #[error("[{section}] lists zoom level '{zoom}' more than once")]
    DuplicateZoomLevel {
        section: &'static str,
        zoom: ZoomLevel,
    },

    #[error("Config file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("Settings were not loaded from a file; nothing to reload")]
    NoSource,
}

/// Which [`CacheStore`](crate::store::CacheStore) backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Sqlite => "sqlite",
            StoreBackend::Memory => "memory",
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StoreBackend::Sqlite),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("expected 'sqlite' or 'memory', got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    /// SQLite database file.
    pub path: PathBuf,
    pub max_connections: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: config_directory().join("cache.db"),
            max_connections: crate::store::DEFAULT_MAX_CONNECTIONS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeocoderSettings {
    pub url: String,
    pub timeout: Duration,
}

impl Default for GeocoderSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_PDOK_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImagerySettings {
    pub url: String,
    /// Required before any image can be fetched.
    pub api_key: Option<String>,
    pub map_type: String,
    /// Draw a marker at the resolved position.
    pub marker: bool,
    pub timeout: Duration,
}

impl Default for ImagerySettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_STATIC_MAPS_URL.to_string(),
            api_key: None,
            map_type: "roadmap".to_string(),
            marker: true,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvictionSettings {
    /// Pause between sweeps when the CLI runs them repeatedly.
    pub interval: Duration,
}

impl Default for EvictionSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub directory: PathBuf,
    pub file_name: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: config_directory().join("logs"),
            file_name: "mapvault.log".to_string(),
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Settings {
    pub store: StoreSettings,
    pub geocoder: GeocoderSettings,
    pub imagery: ImagerySettings,
    pub retention: ZoomLevelPolicy,
    pub dimensions: DimensionPolicy,
    pub eviction: EvictionSettings,
    pub logging: LoggingSettings,
}

/// Shared, swappable settings.
///
/// Cloning the handle shares the same underlying settings.
#[derive(Clone)]
pub struct SettingsHandle {
    current: Arc<RwLock<Arc<Settings>>>,
    source: Option<PathBuf>,
}

impl SettingsHandle {
    /// Wrap settings that were not read from a file.
    pub fn new(settings: Settings) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(settings))),
            source: None,
        }
    }

    /// Load settings from `path` (defaults if the file does not exist) and
    /// remember the path for [`reload`](Self::reload).
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let settings = Settings::load_or_default(&path)?;
        Ok(Self {
            current: Arc::new(RwLock::new(Arc::new(settings))),
            source: Some(path),
        })
    }

    /// Snapshot of the current settings.
    pub fn current(&self) -> Arc<Settings> {
        self.current.read().clone()
    }

    /// Swap in new settings.
    pub fn replace(&self, settings: Settings) {
        *self.current.write() = Arc::new(settings);
    }

    /// Re-read the source file.
    ///
    /// On failure the previous settings stay in effect.
    pub fn reload(&self) -> Result<Arc<Settings>, ConfigError> {
        let path = self.source.as_deref().ok_or(ConfigError::NoSource)?;

        match Settings::load_or_default(path) {
            Ok(settings) => {
                let settings = Arc::new(settings);
                *self.current.write() = Arc::clone(&settings);
                info!(path = %path.display(), "Configuration reloaded");
                Ok(settings)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Configuration reload failed; keeping previous settings");
                Err(e)
            }
        }
    }

    /// File the settings were loaded from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

impl fmt::Debug for SettingsHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsHandle")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}
