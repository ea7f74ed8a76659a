//! Duty-cycle scheduler
//!
//! Two fixed tiers, picked from the battery voltage measured this cycle.

use core::time::Duration;

use crate::config::SleepSchedule;

impl SleepSchedule {
    /// Sleep interval for the given pack voltage.
    ///
    /// The boundary belongs to the long tier. A reading that is not a finite
    /// number (failed battery read) also gets the long tier.
    pub fn sleep_for(&self, battery_v: f32) -> Duration {
        if battery_v.is_finite() && battery_v > self.high_power_threshold_v {
            self.short
        } else {
            self.long
        }
    }
}

/// Next wake interval using the default short/long tiers.
pub fn next_sleep_duration(battery_v: f32, high_power_threshold_v: f32) -> Duration {
    SleepSchedule {
        high_power_threshold_v,
        ..SleepSchedule::default()
    }
    .sleep_for(battery_v)
}
