//! Position resolution: GPS -> cellular -> Wi-Fi fallback chain

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::devices::{CellLocator, CoordinateTransform, Gnss, WifiLocator};
use crate::settings::LocationMethods;
use crate::types::{CoordinateSystem, LocationFix, LocationSource};

pub struct LocationResolver {
    gnss: Arc<dyn Gnss>,
    cell: Arc<dyn CellLocator>,
    wifi: Arc<dyn WifiLocator>,
    transform: Arc<dyn CoordinateTransform>,
}

impl LocationResolver {
    pub fn new(
        gnss: Arc<dyn Gnss>,
        cell: Arc<dyn CellLocator>,
        wifi: Arc<dyn WifiLocator>,
        transform: Arc<dyn CoordinateTransform>,
    ) -> Self {
        Self {
            gnss,
            cell,
            wifi,
            transform,
        }
    }

    /// Resolve one fix.
    ///
    /// Methods are tried in priority order and the first success wins. Only
    /// GNSS yields altitude and speed. No fix is not an error: the invalid
    /// sentinel fix is returned, tagged with the target system.
    pub async fn resolve(
        &self,
        methods: LocationMethods,
        gps_timeout: Duration,
        target: CoordinateSystem,
    ) -> LocationFix {
        let mut fix = LocationFix::invalid(target);

        if methods.gps {
            match self.gnss.read(gps_timeout).await {
                Ok(reading) => {
                    fix.longitude = reading.longitude;
                    fix.latitude = reading.latitude;
                    fix.altitude = reading.altitude;
                    fix.speed = reading.speed;
                    fix.source = Some(LocationSource::Gps);
                    fix.valid = true;
                }
                Err(e) => debug!(error = %e, "GNSS produced no fix"),
            }
        }

        if !fix.valid && methods.cellular {
            if let Some(coarse) = self.cell.read().await {
                fix.longitude = coarse.longitude;
                fix.latitude = coarse.latitude;
                fix.source = Some(LocationSource::Cellular);
                fix.valid = true;
            }
        }

        if !fix.valid && methods.wifi {
            if let Some(coarse) = self.wifi.read().await {
                fix.longitude = coarse.longitude;
                fix.latitude = coarse.latitude;
                fix.source = Some(LocationSource::Wifi);
                fix.valid = true;
            }
        }

        if !fix.valid {
            warn!(methods = methods.bits(), "No location fix this cycle");
            return fix;
        }

        if target == CoordinateSystem::Gcj02 {
            let (lng, lat) = self.transform.wgs84_to_gcj02(fix.longitude, fix.latitude);
            fix.longitude = lng;
            fix.latitude = lat;
        }

        debug!(
            source = ?fix.source,
            longitude = fix.longitude,
            latitude = fix.latitude,
            system = %target,
            "Location resolved"
        );
        fix
    }
}
