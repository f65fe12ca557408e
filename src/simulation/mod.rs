//! Simulated collaborators
//!
//! In-process stand-ins for the modem, cloud, receivers, sensors and power
//! primitives. They record every call so tests can assert on what the engine
//! did, and drive the `tracker-sim` binary with optional random failures.

mod cloud;
mod hardware;

pub use cloud::{CloudCall, SimCloud, SimNetwork};
pub use hardware::{
    SimAlarm, SimBattery, SimClimate, SimGnss, SimLocator, SimPower, SimUpgrader,
};

use std::sync::Arc;

use crate::devices::{ClimateReading, Gcj02Transform};
use crate::engine::Collaborators;
use crate::settings::SettingsStore;
use crate::storage::HistoryStore;
use crate::types::GnssReading;

/// Fix reported by the default simulated GNSS receiver (WGS84)
pub const DEFAULT_GNSS_READING: GnssReading = GnssReading {
    longitude: 117.1138,
    latitude: 31.8240,
    altitude: 35.0,
    speed: 12.0,
};

/// A full set of simulated devices sharing one scenario
pub struct SimulatedDevices {
    pub network: Arc<SimNetwork>,
    pub cloud: Arc<SimCloud>,
    pub upgrader: Arc<SimUpgrader>,
    pub gnss: Arc<SimGnss>,
    pub cell: Arc<SimLocator>,
    pub wifi: Arc<SimLocator>,
    pub battery: Arc<SimBattery>,
    pub climate: Arc<SimClimate>,
    pub power: Arc<SimPower>,
    pub alarm: Arc<SimAlarm>,
}

impl SimulatedDevices {
    /// Healthy device: attached network, reachable cloud, GNSS fix, full battery
    pub fn new(alarm: SimAlarm) -> Self {
        Self::with_cloud(alarm, SimCloud::new())
    }

    pub fn with_cloud(alarm: SimAlarm, cloud: SimCloud) -> Self {
        Self {
            network: Arc::new(SimNetwork::new(true)),
            cloud: Arc::new(cloud),
            upgrader: Arc::new(SimUpgrader::new(true)),
            gnss: Arc::new(SimGnss::new(Some(DEFAULT_GNSS_READING))),
            cell: Arc::new(SimLocator::new(None)),
            wifi: Arc::new(SimLocator::new(None)),
            battery: Arc::new(SimBattery::new(85, 3900)),
            climate: Arc::new(SimClimate::new(ClimateReading {
                temperature: Some(24.5),
                humidity: Some(48.0),
            })),
            power: Arc::new(SimPower::new()),
            alarm: Arc::new(alarm),
        }
    }

    /// Engine collaborators backed by these devices and the given stores
    pub fn collaborators(
        &self,
        settings: Arc<dyn SettingsStore>,
        history: Arc<dyn HistoryStore>,
    ) -> Collaborators {
        Collaborators {
            settings,
            history,
            network: self.network.clone(),
            cloud: self.cloud.clone(),
            upgrader: self.upgrader.clone(),
            gnss: self.gnss.clone(),
            cell: self.cell.clone(),
            wifi: self.wifi.clone(),
            transform: Arc::new(Gcj02Transform),
            battery: self.battery.clone(),
            climate: self.climate.clone(),
            power: self.power.clone(),
            alarm: self.alarm.clone(),
        }
    }
}
