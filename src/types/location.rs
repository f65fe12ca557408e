//! Position fix types

use serde::{Deserialize, Serialize};

/// Longitude carried by a fix that has no real position
pub const INVALID_LONGITUDE: f64 = 181.0;
/// Latitude carried by a fix that has no real position
pub const INVALID_LATITUDE: f64 = 91.0;

/// Map datum a fix is expressed in
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum CoordinateSystem {
    /// Native datum of GNSS, cell and Wi-Fi locators
    #[default]
    Wgs84,
    /// Chinese national datum used by domestic map providers
    Gcj02,
}

impl CoordinateSystem {
    /// Numeric code used in the `GeoLocation.CoordinateSystem` property
    pub fn code(self) -> u8 {
        match self {
            CoordinateSystem::Wgs84 => 1,
            CoordinateSystem::Gcj02 => 2,
        }
    }
}

impl std::fmt::Display for CoordinateSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinateSystem::Wgs84 => write!(f, "WGS84"),
            CoordinateSystem::Gcj02 => write!(f, "GCJ02"),
        }
    }
}

/// Which locator produced a fix
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LocationSource {
    Gps,
    Cellular,
    Wifi,
}

/// A resolved position.
///
/// `valid` is only set when a locator actually returned data. An invalid fix
/// carries out-of-range sentinel coordinates so consumers of the payload can
/// detect "no position" without an optional type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LocationFix {
    pub longitude: f64,
    pub latitude: f64,
    pub altitude: f64,
    pub speed: f64,
    pub coordinate_system: CoordinateSystem,
    pub source: Option<LocationSource>,
    pub valid: bool,
}

impl LocationFix {
    /// The "no location" fix
    pub fn invalid(coordinate_system: CoordinateSystem) -> Self {
        Self {
            longitude: INVALID_LONGITUDE,
            latitude: INVALID_LATITUDE,
            altitude: -1.0,
            speed: -1.0,
            coordinate_system,
            source: None,
            valid: false,
        }
    }
}

/// Decoded GNSS reading (NMEA decoding happens inside the GNSS driver)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GnssReading {
    pub longitude: f64,
    pub latitude: f64,
    pub altitude: f64,
    /// Ground speed, km/h
    pub speed: f64,
}

/// Coarse fix from a network-assisted locator (longitude, latitude)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CoarseFix {
    pub longitude: f64,
    pub latitude: f64,
}

impl CoarseFix {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }
}
