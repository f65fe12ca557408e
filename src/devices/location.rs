//! Positioning receivers and datum transform
//!
//! Receivers report WGS84. NMEA decoding happens inside the GNSS driver;
//! the engine only sees decoded readings.

use std::f64::consts::PI;
use std::time::Duration;

use async_trait::async_trait;

use crate::types::{CoarseFix, GnssReading};

#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    #[error("no fix within {0:?}")]
    Timeout(Duration),
    #[error("receiver unavailable: {0}")]
    Unavailable(String),
    #[error("malformed receiver data: {0}")]
    Malformed(String),
}

/// GNSS receiver
#[async_trait]
pub trait Gnss: Send + Sync {
    /// Wait up to `timeout` for a fix
    async fn read(&self, timeout: Duration) -> Result<GnssReading, LocationError>;
}

/// Cell-tower assisted locator
#[async_trait]
pub trait CellLocator: Send + Sync {
    async fn read(&self) -> Option<CoarseFix>;
}

/// Wi-Fi scan assisted locator
#[async_trait]
pub trait WifiLocator: Send + Sync {
    async fn read(&self) -> Option<CoarseFix>;
}

/// WGS84 -> GCJ02 conversion, substitutable per platform
pub trait CoordinateTransform: Send + Sync {
    /// Returns `(longitude, latitude)` in GCJ02
    fn wgs84_to_gcj02(&self, longitude: f64, latitude: f64) -> (f64, f64);
}

// ============================================================================
// Built-in GCJ02 transform
// ============================================================================

/// Krasovsky 1940 semi-major axis
const KRASOVSKY_A: f64 = 6_378_245.0;
/// Krasovsky 1940 first eccentricity squared
const KRASOVSKY_EE: f64 = 0.006_693_421_622_965_943;

/// Standard GCJ02 offset algorithm. Positions outside mainland China are
/// returned unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gcj02Transform;

impl Gcj02Transform {
    pub fn out_of_china(longitude: f64, latitude: f64) -> bool {
        !(72.004..=137.8347).contains(&longitude) || !(0.8293..=55.8271).contains(&latitude)
    }

    fn offset_lat(x: f64, y: f64) -> f64 {
        let mut ret = -100.0 + 2.0 * x + 3.0 * y + 0.2 * y * y + 0.1 * x * y + 0.2 * x.abs().sqrt();
        ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
        ret += (20.0 * (y * PI).sin() + 40.0 * (y / 3.0 * PI).sin()) * 2.0 / 3.0;
        ret += (160.0 * (y / 12.0 * PI).sin() + 320.0 * (y * PI / 30.0).sin()) * 2.0 / 3.0;
        ret
    }

    fn offset_lng(x: f64, y: f64) -> f64 {
        let mut ret = 300.0 + x + 2.0 * y + 0.1 * x * x + 0.1 * x * y + 0.1 * x.abs().sqrt();
        ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
        ret += (20.0 * (x * PI).sin() + 40.0 * (x / 3.0 * PI).sin()) * 2.0 / 3.0;
        ret += (150.0 * (x / 12.0 * PI).sin() + 300.0 * (x / 30.0 * PI).sin()) * 2.0 / 3.0;
        ret
    }
}

impl CoordinateTransform for Gcj02Transform {
    fn wgs84_to_gcj02(&self, longitude: f64, latitude: f64) -> (f64, f64) {
        if Self::out_of_china(longitude, latitude) {
            return (longitude, latitude);
        }

        let d_lat = Self::offset_lat(longitude - 105.0, latitude - 35.0);
        let d_lng = Self::offset_lng(longitude - 105.0, latitude - 35.0);

        let rad_lat = latitude / 180.0 * PI;
        let magic = 1.0 - KRASOVSKY_EE * rad_lat.sin() * rad_lat.sin();
        let sqrt_magic = magic.sqrt();

        let d_lat = (d_lat * 180.0) / ((KRASOVSKY_A * (1.0 - KRASOVSKY_EE)) / (magic * sqrt_magic) * PI);
        let d_lng = (d_lng * 180.0) / (KRASOVSKY_A / sqrt_magic * rad_lat.cos() * PI);

        (longitude + d_lng, latitude + d_lat)
    }
}
