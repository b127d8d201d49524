//! Discrete map zoom levels.
//!
//! A zoom level decides both the precision of the cache key and the map zoom
//! requested from the imagery provider. Levels are ordered from finest
//! (`House`) to coarsest (`City`).

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Error returned when a zoom level cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unsupported zoom level: {0}")]
pub struct UnsupportedZoomLevel(pub String);

/// Granularity of map detail for a cached image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ZoomLevel {
    /// A single building.
    House,
    /// The street around an address.
    Street,
    /// The surrounding neighbourhood.
    Area,
    /// The whole town or city.
    City,
}

impl ZoomLevel {
    /// Number of zoom levels.
    pub const COUNT: usize = 4;

    /// All zoom levels, finest first.
    pub const ALL: [ZoomLevel; Self::COUNT] = [
        ZoomLevel::House,
        ZoomLevel::Street,
        ZoomLevel::Area,
        ZoomLevel::City,
    ];

    /// Stable lowercase name used in configuration files and storage rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoomLevel::House => "house",
            ZoomLevel::Street => "street",
            ZoomLevel::Area => "area",
            ZoomLevel::City => "city",
        }
    }

    /// Position of this level in [`ZoomLevel::ALL`].
    pub fn index(&self) -> usize {
        match self {
            ZoomLevel::House => 0,
            ZoomLevel::Street => 1,
            ZoomLevel::Area => 2,
            ZoomLevel::City => 3,
        }
    }

    /// Whether the full postal code and house number take part in the cache key.
    pub fn is_fine_grained(&self) -> bool {
        matches!(self, ZoomLevel::House | ZoomLevel::Street)
    }

    /// Web map zoom requested from the imagery provider.
    pub fn map_zoom(&self) -> u8 {
        match self {
            ZoomLevel::House => 19,
            ZoomLevel::Street => 17,
            ZoomLevel::Area => 15,
            ZoomLevel::City => 12,
        }
    }
}

impl fmt::Display for ZoomLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ZoomLevel {
    type Err = UnsupportedZoomLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "house" | "0" => Ok(ZoomLevel::House),
            "street" | "1" => Ok(ZoomLevel::Street),
            "area" | "2" => Ok(ZoomLevel::Area),
            "city" | "3" => Ok(ZoomLevel::City),
            _ => Err(UnsupportedZoomLevel(s.to_string())),
        }
    }
}

impl TryFrom<u8> for ZoomLevel {
    type Error = UnsupportedZoomLevel;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| UnsupportedZoomLevel(value.to_string()))
    }
}
