//! INI file loading and saving.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::{Ini, Properties};
use tracing::debug;

use crate::config::{
    ConfigError, DimensionPolicy, ImageDimensions, Settings, StoreBackend, ZoomLevelPolicy,
};
use crate::zoom::ZoomLevel;

/// Config file name inside the config directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.ini";

/// `~/.mapvault`, or `./.mapvault` when no home directory is known.
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mapvault")
}

/// `~/.mapvault/config.ini`
pub fn config_file_path() -> PathBuf {
    config_directory().join(DEFAULT_CONFIG_FILE)
}

impl Settings {
    /// Load settings from `path`, falling back to defaults if it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file; using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Load settings from an existing file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|e| match e {
            ini::Error::Io(source) => ConfigError::Read {
                path: path.to_path_buf(),
                source,
            },
            ini::Error::Parse(e) => ConfigError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            },
        })?;
        Self::from_ini(&ini)
    }

    /// Parse settings from INI content.
    pub fn from_ini_str(content: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<string>"),
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    /// Build settings from parsed INI, starting from defaults.
    pub fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut settings = Settings::default();

        if let Some(section) = ini.section(Some("store")) {
            if let Some(v) = section.get("backend") {
                settings.store.backend = v
                    .parse::<StoreBackend>()
                    .map_err(|reason| invalid("store", "backend", v, reason))?;
            }
            if let Some(v) = section.get("path") {
                settings.store.path = expand_home(v);
            }
            if let Some(v) = section.get("max_connections") {
                settings.store.max_connections = parse_number("store", "max_connections", v)?;
            }
        }

        if let Some(section) = ini.section(Some("geocoder")) {
            if let Some(v) = section.get("url") {
                settings.geocoder.url = v.to_string();
            }
            if let Some(v) = section.get("timeout") {
                settings.geocoder.timeout = parse_duration("geocoder", "timeout", v)?;
            }
        }

        if let Some(section) = ini.section(Some("imagery")) {
            if let Some(v) = section.get("url") {
                settings.imagery.url = v.to_string();
            }
            if let Some(v) = section.get("api_key") {
                let v = v.trim();
                settings.imagery.api_key = (!v.is_empty()).then(|| v.to_string());
            }
            if let Some(v) = section.get("map_type") {
                settings.imagery.map_type = v.to_string();
            }
            if let Some(v) = section.get("marker") {
                settings.imagery.marker = parse_bool("imagery", "marker", v)?;
            }
            if let Some(v) = section.get("timeout") {
                settings.imagery.timeout = parse_duration("imagery", "timeout", v)?;
            }
        }

        if let Some(section) = ini.section(Some("retention")) {
            settings.retention = parse_retention(section)?;
        }

        if let Some(section) = ini.section(Some("dimensions")) {
            settings.dimensions = parse_dimensions(section)?;
        }

        if let Some(section) = ini.section(Some("eviction")) {
            if let Some(v) = section.get("interval") {
                settings.eviction.interval = parse_duration("eviction", "interval", v)?;
            }
        }

        if let Some(section) = ini.section(Some("logging")) {
            if let Some(v) = section.get("level") {
                settings.logging.level = v.to_string();
            }
            if let Some(v) = section.get("directory") {
                settings.logging.directory = expand_home(v);
            }
            if let Some(v) = section.get("file") {
                settings.logging.file_name = v.to_string();
            }
        }

        Ok(settings)
    }

    /// Render these settings as INI.
    pub fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();

        ini.with_section(Some("store"))
            .set("backend", self.store.backend.as_str())
            .set("path", self.store.path.display().to_string())
            .set("max_connections", self.store.max_connections.to_string());

        ini.with_section(Some("geocoder"))
            .set("url", self.geocoder.url.as_str())
            .set("timeout", format_duration(self.geocoder.timeout));

        ini.with_section(Some("imagery"))
            .set("url", self.imagery.url.as_str())
            .set("api_key", self.imagery.api_key.clone().unwrap_or_default())
            .set("map_type", self.imagery.map_type.as_str())
            .set("marker", self.imagery.marker.to_string())
            .set("timeout", format_duration(self.imagery.timeout));

        for (zoom, ttl) in self.retention.iter() {
            ini.with_section(Some("retention"))
                .set(zoom.as_str(), format_duration(ttl));
        }

        for zoom in ZoomLevel::ALL {
            ini.with_section(Some("dimensions"))
                .set(zoom.as_str(), self.dimensions.get(zoom).to_string());
        }

        ini.with_section(Some("eviction"))
            .set("interval", format_duration(self.eviction.interval));

        ini.with_section(Some("logging"))
            .set("level", self.logging.level.as_str())
            .set("directory", self.logging.directory.display().to_string())
            .set("file", self.logging.file_name.as_str());

        ini
    }

    /// Write these settings to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        self.to_ini().write_to_file(path).map_err(write_err)
    }

    /// Write a default config file.
    ///
    /// Refuses to overwrite an existing file unless `force` is set.
    pub fn write_default(path: &Path, force: bool) -> Result<Self, ConfigError> {
        if path.exists() && !force {
            return Err(ConfigError::AlreadyExists(path.to_path_buf()));
        }
        let settings = Settings::default();
        settings.save(path)?;
        Ok(settings)
    }
}

fn parse_retention(section: &Properties) -> Result<ZoomLevelPolicy, ConfigError> {
    let mut entries = Vec::new();
    for (key, value) in section.iter() {
        let zoom = parse_zoom_key("retention", key, value)?;
        entries.push((zoom, parse_duration("retention", key, value)?));
    }
    ZoomLevelPolicy::from_entries(entries)
}

/// Levels not listed keep their default dimensions.
fn parse_dimensions(section: &Properties) -> Result<DimensionPolicy, ConfigError> {
    let mut policy = DimensionPolicy::default();
    for (key, value) in section.iter() {
        let zoom = parse_zoom_key("dimensions", key, value)?;
        let dimensions: ImageDimensions = value
            .parse()
            .map_err(|reason| invalid("dimensions", key, value, reason))?;
        policy = policy.with(zoom, dimensions);
    }
    Ok(policy)
}

fn parse_zoom_key(section: &str, key: &str, value: &str) -> Result<ZoomLevel, ConfigError> {
    key.parse::<ZoomLevel>()
        .map_err(|e| invalid(section, key, value, e.to_string()))
}

fn parse_duration(section: &str, key: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|e| invalid(section, key, value, e.to_string()))
}

fn format_duration(duration: Duration) -> String {
    humantime::format_duration(duration).to_string()
}

fn parse_number(section: &str, key: &str, value: &str) -> Result<u32, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, "expected a positive integer"))
}

fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(invalid(section, key, value, "expected true or false")),
    }
}

fn invalid(section: &str, key: &str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Expands a leading `~/` to the home directory.
fn expand_home(value: &str) -> PathBuf {
    let value = value.trim();
    match (value.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(value),
    }
}
