//! Per-zoom-level policies: retention windows and image dimensions.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::config::ConfigError;
use crate::zoom::ZoomLevel;

/// Zoom level → retention duration.
///
/// Always covers every zoom level; construction from a partial list fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoomLevelPolicy {
    retention: [Duration; ZoomLevel::COUNT],
}

const DAY: u64 = 24 * 60 * 60;

impl ZoomLevelPolicy {
    pub fn new(retention: [Duration; ZoomLevel::COUNT]) -> Self {
        Self { retention }
    }

    /// Same retention for every level.
    pub fn uniform(ttl: Duration) -> Self {
        Self {
            retention: [ttl; ZoomLevel::COUNT],
        }
    }

    /// Build from `(level, ttl)` pairs, failing if any level is missing or
    /// listed twice.
    pub fn from_entries<I>(entries: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (ZoomLevel, Duration)>,
    {
        let mut slots: [Option<Duration>; ZoomLevel::COUNT] = [None; ZoomLevel::COUNT];

        for (zoom, ttl) in entries {
            let slot = &mut slots[zoom.index()];
            if slot.is_some() {
                return Err(ConfigError::DuplicateZoomLevel {
                    section: "retention",
                    zoom,
                });
            }
            *slot = Some(ttl);
        }

        let mut retention = [Duration::ZERO; ZoomLevel::COUNT];
        for zoom in ZoomLevel::ALL {
            retention[zoom.index()] = slots[zoom.index()].ok_or(ConfigError::MissingZoomLevel {
                section: "retention",
                zoom,
            })?;
        }

        Ok(Self { retention })
    }

    /// Retention window for `zoom`.
    pub fn ttl(&self, zoom: ZoomLevel) -> Duration {
        self.retention[zoom.index()]
    }

    /// Every level with its retention, finest first.
    pub fn iter(&self) -> impl Iterator<Item = (ZoomLevel, Duration)> + '_ {
        ZoomLevel::ALL.iter().map(|&zoom| (zoom, self.ttl(zoom)))
    }
}

impl Default for ZoomLevelPolicy {
    fn default() -> Self {
        Self::new([
            Duration::from_secs(7 * DAY),
            Duration::from_secs(14 * DAY),
            Duration::from_secs(30 * DAY),
            Duration::from_secs(90 * DAY),
        ])
    }
}

/// Requested image size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

impl ImageDimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for ImageDimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for ImageDimensions {
    type Err = String;

    /// Parses `WIDTHxHEIGHT`, e.g. `640x400`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;

        let width: u32 = w
            .trim()
            .parse()
            .map_err(|_| format!("invalid width '{}'", w))?;
        let height: u32 = h
            .trim()
            .parse()
            .map_err(|_| format!("invalid height '{}'", h))?;

        if width == 0 || height == 0 {
            return Err(format!("dimensions must be non-zero, got '{}'", s));
        }

        Ok(Self { width, height })
    }
}

/// Zoom level → requested image dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimensionPolicy {
    dimensions: [ImageDimensions; ZoomLevel::COUNT],
}

impl DimensionPolicy {
    pub fn uniform(dimensions: ImageDimensions) -> Self {
        Self {
            dimensions: [dimensions; ZoomLevel::COUNT],
        }
    }

    pub fn get(&self, zoom: ZoomLevel) -> ImageDimensions {
        self.dimensions[zoom.index()]
    }

    /// Override one level, keeping the rest.
    pub fn with(mut self, zoom: ZoomLevel, dimensions: ImageDimensions) -> Self {
        self.dimensions[zoom.index()] = dimensions;
        self
    }
}

impl Default for DimensionPolicy {
    fn default() -> Self {
        Self::uniform(ImageDimensions::new(640, 400))
    }
}
