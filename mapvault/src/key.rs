//! Cache key normalization.
//!
//! Translates a raw postal code, house number and zoom level into a
//! [`CacheKey`]. Coarse zoom levels only use the four-character numeric
//! prefix of the postal code so that every address in the same district
//! shares one cached image.
//!
//! # Key Format
//!
//! Storage keys follow `image:{zoom}:{postal}` for coarse levels and
//! `image:{zoom}:{postal}:{house}` for fine levels.
//! Example: `image:area:1234`, `image:house:1234AB:12`

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::zoom::ZoomLevel;

/// Number of postal code characters kept for coarse zoom levels.
pub const COARSE_PREFIX_LEN: usize = 4;

/// Errors produced while building a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// The postal code was not supplied.
    #[error("Postal code is required")]
    MissingPostalCode,

    /// The postal code does not look like a postal code.
    #[error("Malformed postal code: '{0}'")]
    MalformedPostalCode(String),
}

/// Strips whitespace from a postal code and trims it to the precision the
/// zoom level needs.
///
/// House and street levels keep the whole code; coarser levels keep the first
/// four characters.
pub fn normalize(raw_postal_code: Option<&str>, zoom: ZoomLevel) -> Result<String, KeyError> {
    let raw = raw_postal_code.ok_or(KeyError::MissingPostalCode)?;
    let stripped: String = raw.chars().filter(|c| !c.is_whitespace()).collect();

    if zoom.is_fine_grained() {
        Ok(stripped)
    } else {
        Ok(stripped.chars().take(COARSE_PREFIX_LEN).collect())
    }
}

fn postal_code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Four digit district, optional alphanumeric block suffix
        Regex::new(r"^[0-9]{4}[A-Za-z0-9]{0,6}$").expect("postal code pattern is valid")
    })
}

/// Checks that a postal code has a four-digit prefix and a short alphanumeric
/// suffix once whitespace is removed.
pub fn validate_postal_code(raw_postal_code: Option<&str>) -> Result<(), KeyError> {
    let raw = raw_postal_code.ok_or(KeyError::MissingPostalCode)?;
    let stripped: String = raw.chars().filter(|c| !c.is_whitespace()).collect();

    if postal_code_pattern().is_match(&stripped) {
        Ok(())
    } else {
        Err(KeyError::MalformedPostalCode(raw.to_string()))
    }
}

/// Identity of one cached image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    zoom: ZoomLevel,
    postal_code: String,
    house_number: Option<u32>,
}

impl CacheKey {
    /// Builds the key for a request, normalizing the postal code.
    ///
    /// The house number is dropped for coarse zoom levels.
    pub fn for_request(
        raw_postal_code: Option<&str>,
        house_number: Option<u32>,
        zoom: ZoomLevel,
    ) -> Result<Self, KeyError> {
        let postal_code = normalize(raw_postal_code, zoom)?;
        Ok(Self::from_parts(zoom, postal_code, house_number))
    }

    /// Builds a key from already-normalized parts.
    pub fn from_parts(zoom: ZoomLevel, postal_code: String, house_number: Option<u32>) -> Self {
        let house_number = if zoom.is_fine_grained() {
            house_number
        } else {
            None
        };

        Self {
            zoom,
            postal_code,
            house_number,
        }
    }

    pub fn zoom(&self) -> ZoomLevel {
        self.zoom
    }

    /// Normalized postal code fragment.
    pub fn postal_code(&self) -> &str {
        &self.postal_code
    }

    pub fn house_number(&self) -> Option<u32> {
        self.house_number
    }

    /// String form used as the unique storage key.
    pub fn storage_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.house_number {
            Some(house) => write!(f, "image:{}:{}:{}", self.zoom, self.postal_code, house),
            None => write!(f, "image:{}:{}", self.zoom, self.postal_code),
        }
    }
}
