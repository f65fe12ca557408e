//! Simulated receivers, sensors, power management, alarm and upgrader

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::devices::{
    Battery, CellLocator, ClimateReading, Gnss, LocationError, PowerError, PowerManager,
    TempHumiditySensor, UpgradeError, Upgrader, WakeAlarm, WakeCallback, WifiLocator,
};
use crate::types::{CoarseFix, GnssReading, OtaOffer};

// ============================================================================
// Positioning
// ============================================================================

/// GNSS receiver returning a scripted reading, optionally wandering
pub struct SimGnss {
    reading: Mutex<Option<GnssReading>>,
    drift: Option<Mutex<StdRng>>,
    reads: AtomicU32,
}

impl SimGnss {
    pub fn new(reading: Option<GnssReading>) -> Self {
        Self {
            reading: Mutex::new(reading),
            drift: None,
            reads: AtomicU32::new(0),
        }
    }

    /// Every read moves the position a little and varies the speed
    pub fn wandering(start: GnssReading, seed: u64) -> Self {
        Self {
            reading: Mutex::new(Some(start)),
            drift: Some(Mutex::new(StdRng::seed_from_u64(seed))),
            reads: AtomicU32::new(0),
        }
    }

    pub fn set_reading(&self, reading: Option<GnssReading>) {
        if let Ok(mut current) = self.reading.lock() {
            *current = reading;
        }
    }

    pub fn read_count(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Gnss for SimGnss {
    async fn read(&self, timeout: Duration) -> Result<GnssReading, LocationError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut current = self
            .reading
            .lock()
            .map_err(|e| LocationError::Unavailable(e.to_string()))?;
        let Some(reading) = current.as_mut() else {
            return Err(LocationError::Timeout(timeout));
        };

        if let Some(rng) = &self.drift {
            if let Ok(mut rng) = rng.lock() {
                reading.longitude += rng.gen_range(-0.001..0.001);
                reading.latitude += rng.gen_range(-0.001..0.001);
                reading.speed = rng.gen_range(0.0..80.0);
            }
        }
        Ok(*reading)
    }
}

/// Network-assisted locator; serves as both cell and Wi-Fi locator
pub struct SimLocator {
    fix: Mutex<Option<CoarseFix>>,
    reads: AtomicU32,
}

impl SimLocator {
    pub fn new(fix: Option<CoarseFix>) -> Self {
        Self {
            fix: Mutex::new(fix),
            reads: AtomicU32::new(0),
        }
    }

    pub fn set_fix(&self, fix: Option<CoarseFix>) {
        if let Ok(mut current) = self.fix.lock() {
            *current = fix;
        }
    }

    pub fn read_count(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    fn current(&self) -> Option<CoarseFix> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.fix.lock().ok().and_then(|f| *f)
    }
}

#[async_trait]
impl CellLocator for SimLocator {
    async fn read(&self) -> Option<CoarseFix> {
        self.current()
    }
}

#[async_trait]
impl WifiLocator for SimLocator {
    async fn read(&self) -> Option<CoarseFix> {
        self.current()
    }
}

// ============================================================================
// Sensors
// ============================================================================

pub struct SimBattery {
    energy: AtomicU8,
    voltage: AtomicU32,
}

impl SimBattery {
    pub fn new(energy: u8, voltage: u32) -> Self {
        Self {
            energy: AtomicU8::new(energy.min(100)),
            voltage: AtomicU32::new(voltage),
        }
    }

    pub fn set_energy(&self, energy: u8) {
        self.energy.store(energy.min(100), Ordering::SeqCst);
    }
}

impl Battery for SimBattery {
    fn energy(&self) -> u8 {
        self.energy.load(Ordering::SeqCst)
    }

    fn voltage(&self) -> u32 {
        self.voltage.load(Ordering::SeqCst)
    }
}

pub struct SimClimate {
    reading: Mutex<ClimateReading>,
}

impl SimClimate {
    pub fn new(reading: ClimateReading) -> Self {
        Self {
            reading: Mutex::new(reading),
        }
    }

    pub fn set_reading(&self, reading: ClimateReading) {
        if let Ok(mut current) = self.reading.lock() {
            *current = reading;
        }
    }
}

impl TempHumiditySensor for SimClimate {
    fn read(&self) -> ClimateReading {
        self.reading.lock().map(|r| *r).unwrap_or_default()
    }
}

// ============================================================================
// Power
// ============================================================================

/// Records every power-management call
#[derive(Default)]
pub struct SimPower {
    inhibit_depth: AtomicI32,
    max_inhibit_depth: AtomicI32,
    autosleep: AtomicBool,
    psm: Mutex<Option<(Duration, Duration)>>,
    restarts: AtomicU32,
}

impl SimPower {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inhibit_depth(&self) -> i32 {
        self.inhibit_depth.load(Ordering::SeqCst)
    }

    pub fn max_inhibit_depth(&self) -> i32 {
        self.max_inhibit_depth.load(Ordering::SeqCst)
    }

    pub fn autosleep(&self) -> bool {
        self.autosleep.load(Ordering::SeqCst)
    }

    /// `(tau, active_time)` when PSM is on
    pub fn psm(&self) -> Option<(Duration, Duration)> {
        self.psm.lock().ok().and_then(|p| *p)
    }

    pub fn restart_count(&self) -> u32 {
        self.restarts.load(Ordering::SeqCst)
    }
}

impl PowerManager for SimPower {
    fn inhibit_sleep(&self) {
        let depth = self.inhibit_depth.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_inhibit_depth.fetch_max(depth, Ordering::SeqCst);
    }

    fn allow_sleep(&self) {
        self.inhibit_depth.fetch_sub(1, Ordering::SeqCst);
    }

    fn set_autosleep(&self, enabled: bool) -> Result<(), PowerError> {
        self.autosleep.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn enable_psm(&self, tau: Duration, active_time: Duration) -> Result<(), PowerError> {
        let mut psm = self
            .psm
            .lock()
            .map_err(|e| PowerError::Rejected(e.to_string()))?;
        *psm = Some((tau, active_time));
        Ok(())
    }

    fn disable_psm(&self) -> Result<(), PowerError> {
        let mut psm = self
            .psm
            .lock()
            .map_err(|e| PowerError::Rejected(e.to_string()))?;
        *psm = None;
        Ok(())
    }

    fn restart(&self) {
        info!("Simulated restart");
        self.restarts.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Wake alarm
// ============================================================================

enum AlarmMode {
    /// Callback held until [`SimAlarm::fire`]
    Manual,
    /// Callback run on a tokio timer, delay multiplied by the scale
    Timer { time_scale: f64 },
}

pub struct SimAlarm {
    mode: AlarmMode,
    pending: Mutex<Option<(Duration, WakeCallback)>>,
    armed: AtomicU32,
}

impl SimAlarm {
    pub fn manual() -> Self {
        Self {
            mode: AlarmMode::Manual,
            pending: Mutex::new(None),
            armed: AtomicU32::new(0),
        }
    }

    /// Fire on a tokio timer; `time_scale` 0.01 turns a 30 s cycle into 300 ms
    pub fn timer(time_scale: f64) -> Self {
        Self {
            mode: AlarmMode::Timer {
                time_scale: time_scale.max(0.0),
            },
            pending: Mutex::new(None),
            armed: AtomicU32::new(0),
        }
    }

    /// Delay of the currently armed alarm (manual mode)
    pub fn armed_after(&self) -> Option<Duration> {
        self.pending
            .lock()
            .ok()
            .and_then(|p| p.as_ref().map(|(after, _)| *after))
    }

    pub fn arm_count(&self) -> u32 {
        self.armed.load(Ordering::SeqCst)
    }

    /// Run the armed callback now. Returns false if nothing was armed.
    pub fn fire(&self) -> bool {
        let pending = self.pending.lock().ok().and_then(|mut p| p.take());
        match pending {
            Some((_, callback)) => {
                callback();
                true
            }
            None => false,
        }
    }
}

impl WakeAlarm for SimAlarm {
    fn arm(&self, after: Duration, callback: WakeCallback) -> Result<(), PowerError> {
        self.armed.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            AlarmMode::Manual => {
                let mut pending = self
                    .pending
                    .lock()
                    .map_err(|e| PowerError::Alarm(e.to_string()))?;
                *pending = Some((after, callback));
            }
            AlarmMode::Timer { time_scale } => {
                let handle = tokio::runtime::Handle::try_current()
                    .map_err(|e| PowerError::Alarm(e.to_string()))?;
                let delay = after.mul_f64(time_scale);
                debug!(?after, ?delay, "Simulated alarm armed");
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    callback();
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Upgrader
// ============================================================================

pub struct SimUpgrader {
    succeed: AtomicBool,
    applied: Mutex<Vec<OtaOffer>>,
}

impl SimUpgrader {
    pub fn new(succeed: bool) -> Self {
        Self {
            succeed: AtomicBool::new(succeed),
            applied: Mutex::new(Vec::new()),
        }
    }

    pub fn set_succeed(&self, succeed: bool) {
        self.succeed.store(succeed, Ordering::SeqCst);
    }

    /// Offers handed to `apply`, successful or not
    pub fn attempts(&self) -> Vec<OtaOffer> {
        self.applied.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Upgrader for SimUpgrader {
    async fn apply(&self, offer: &OtaOffer) -> Result<(), UpgradeError> {
        if let Ok(mut applied) = self.applied.lock() {
            applied.push(offer.clone());
        }
        if self.succeed.load(Ordering::SeqCst) {
            info!(module = %offer.module, version = %offer.version, "Simulated upgrade applied");
            Ok(())
        } else {
            warn!(module = %offer.module, "Simulated upgrade failed");
            Err(UpgradeError::Verify("md5 mismatch".to_string()))
        }
    }
}
