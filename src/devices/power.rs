//! Low-power primitives, wake alarm and image upgrader

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::types::OtaOffer;

#[derive(Debug, thiserror::Error)]
pub enum PowerError {
    #[error("power management call rejected: {0}")]
    Rejected(String),
    #[error("alarm could not be armed: {0}")]
    Alarm(String),
}

#[derive(Debug, thiserror::Error)]
pub enum UpgradeError {
    #[error("download failed: {0}")]
    Download(String),
    #[error("image verification failed: {0}")]
    Verify(String),
    #[error("flash write failed: {0}")]
    Flash(String),
}

/// Modem power management
pub trait PowerManager: Send + Sync {
    /// Keep the module awake. Calls nest.
    fn inhibit_sleep(&self);

    /// Release one [`inhibit_sleep`](Self::inhibit_sleep)
    fn allow_sleep(&self);

    fn set_autosleep(&self, enabled: bool) -> Result<(), PowerError>;

    /// Enter power saving mode with the given inactive (`tau`) and active timers
    fn enable_psm(&self, tau: Duration, active_time: Duration) -> Result<(), PowerError>;

    fn disable_psm(&self) -> Result<(), PowerError>;

    /// Reboot into the freshly applied image
    fn restart(&self);
}

/// Holds a sleep inhibit for its lifetime.
pub struct SleepInhibitGuard {
    power: Arc<dyn PowerManager>,
}

impl SleepInhibitGuard {
    pub fn new(power: Arc<dyn PowerManager>) -> Self {
        power.inhibit_sleep();
        Self { power }
    }
}

impl Drop for SleepInhibitGuard {
    fn drop(&mut self) {
        self.power.allow_sleep();
    }
}

/// Callback run when the wake alarm fires
pub type WakeCallback = Box<dyn FnOnce() + Send + 'static>;

/// One-shot RTC alarm
pub trait WakeAlarm: Send + Sync {
    /// Fire `callback` once after `after`. Replaces any alarm already armed.
    fn arm(&self, after: Duration, callback: WakeCallback) -> Result<(), PowerError>;
}

/// Downloads, verifies and installs an offered image
#[async_trait]
pub trait Upgrader: Send + Sync {
    async fn apply(&self, offer: &OtaOffer) -> Result<(), UpgradeError>;
}
