//! Sleep helper: waits for the worker to drain, then arms the next wake
//!
//! Runs outside the worker (it waits for the worker to go idle, so running it
//! inline would never finish). The plan is recomputed from the `user` section
//! every time so a `property/set` received during the cycle takes effect
//! on the very next sleep.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::queue::IdleMonitor;
use super::EngineError;
use crate::config::SleepConfig;
use crate::devices::{PowerManager, WakeAlarm, WakeCallback};
use crate::settings::SettingsStore;
use crate::types::{LowPowerMode, SleepPlan};

pub struct SleepScheduler {
    settings: Arc<dyn SettingsStore>,
    power: Arc<dyn PowerManager>,
    alarm: Arc<dyn WakeAlarm>,
    monitor: IdleMonitor,
    config: SleepConfig,
}

impl SleepScheduler {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        power: Arc<dyn PowerManager>,
        alarm: Arc<dyn WakeAlarm>,
        monitor: IdleMonitor,
        config: SleepConfig,
    ) -> Self {
        Self {
            settings,
            power,
            alarm,
            monitor,
            config,
        }
    }

    /// Wait for idle, pick the low-power mode and arm `on_wake`
    pub async fn prepare_and_arm(&self, on_wake: WakeCallback) -> Result<SleepPlan, EngineError> {
        self.monitor.wait_idle(self.config.idle_poll()).await;

        let user = self.settings.user()?;
        let plan = SleepPlan::for_cycle(
            Duration::from_secs(user.work_cycle_period),
            Duration::from_secs(user.work_mode_timeline),
            self.config.psm_active_time(),
        );

        match plan.mode {
            LowPowerMode::AutoSleep => self.power.set_autosleep(true)?,
            LowPowerMode::Psm { tau, active_time } => self.power.enable_psm(tau, active_time)?,
        }
        self.alarm.arm(plan.wake_after, on_wake)?;

        info!(
            wake_after_secs = plan.wake_after.as_secs(),
            mode = ?plan.mode,
            "Entering low-power wait"
        );
        Ok(plan)
    }
}
