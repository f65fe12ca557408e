//! Sleep planning

use std::time::Duration;

/// Low-power mode selected for the idle period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LowPowerMode {
    /// Module-managed light sleep, radio stays registered
    AutoSleep,
    /// Power saving mode with the given inactive timer
    Psm { tau: Duration, active_time: Duration },
}

/// Next wake policy, computed fresh from configuration every cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepPlan {
    pub wake_after: Duration,
    pub mode: LowPowerMode,
}

impl SleepPlan {
    /// Choose the low-power mode for a work cycle.
    ///
    /// Cycles shorter than `timeline` use autosleep; longer ones use PSM
    /// with the cycle period as inactive timer.
    pub fn for_cycle(period: Duration, timeline: Duration, psm_active_time: Duration) -> Self {
        let mode = if period < timeline {
            LowPowerMode::AutoSleep
        } else {
            LowPowerMode::Psm {
                tau: period,
                active_time: psm_active_time,
            }
        };
        Self {
            wake_after: period,
            mode,
        }
    }
}
