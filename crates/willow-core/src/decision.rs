//! Delta decision engine
//!
//! Uploads only when temperature or moisture moved further than its
//! threshold away from the last *transmitted* values. Either channel alone is
//! enough. There is no hysteresis band: the baseline is whatever was last
//! sent, never the last thing sampled.

use serde::{Deserialize, Serialize};

use crate::acquisition::FilteredSample;
use crate::config::{MOIST_THRESHOLD_PERCENT, TEMP_THRESHOLD_C};
use crate::scratch::ScratchState;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// °C
    pub temperature: f32,
    /// Percentage points of soil moisture
    pub moisture: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            temperature: TEMP_THRESHOLD_C,
            moisture: MOIST_THRESHOLD_PERCENT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UploadDecision {
    pub should_upload: bool,
    pub temp_delta: f32,
    pub moist_delta: f32,
}

/// Compare `current` against the last transmitted baseline.
///
/// Crossings are strict: a delta exactly equal to its threshold does not
/// trigger an upload. Humidity, light and battery never gate the decision.
pub fn decide(
    current: &FilteredSample,
    last: &ScratchState,
    thresholds: &Thresholds,
) -> UploadDecision {
    let temp_delta = (current.temperature - last.last_uploaded_temperature).abs();
    let moist_delta = (current.moisture - last.last_uploaded_moisture).abs();

    UploadDecision {
        should_upload: temp_delta > thresholds.temperature || moist_delta > thresholds.moisture,
        temp_delta,
        moist_delta,
    }
}
