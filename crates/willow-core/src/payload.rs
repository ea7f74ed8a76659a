//! Uplink payload encoding
//!
//! The broker expects a flat JSON object with exactly five numeric keys. There
//! is no timestamp or device identity in the message; an encoder that adds
//! them can be swapped in through [`PayloadEncoder`].

use alloc::vec::Vec;
use core::fmt::Write;

use log::error;
use serde::Serialize;
use thiserror_no_std::Error;

use crate::acquisition::FilteredSample;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload serialization failed: {0}")]
    Serialize(heapless::String<64>),
}

/// Wire shape of one upload.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Payload {
    pub temperature: f32,
    pub humidity: f32,
    pub moisture: f32,
    pub light: f32,
    /// Serialized as `null` when the battery could not be read.
    pub battery: f32,
}

impl From<&FilteredSample> for Payload {
    fn from(sample: &FilteredSample) -> Self {
        Self {
            temperature: sample.temperature,
            humidity: sample.humidity,
            moisture: sample.moisture,
            light: sample.light,
            battery: sample.battery,
        }
    }
}

pub trait PayloadEncoder {
    fn encode(&self, sample: &FilteredSample) -> Result<Vec<u8>, PayloadError>;
}

/// The default flat JSON encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPayload;

impl PayloadEncoder for JsonPayload {
    fn encode(&self, sample: &FilteredSample) -> Result<Vec<u8>, PayloadError> {
        serde_json::to_vec(&Payload::from(sample)).map_err(|e| {
            error!("Failed to serialize payload: {}", e);
            let mut message = heapless::String::new();
            // Truncated messages are fine here
            let _ = write!(message, "{}", e);
            PayloadError::Serialize(message)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use serde_json::Value;

    fn sample() -> FilteredSample {
        FilteredSample {
            temperature: 22.0,
            humidity: 55.5,
            moisture: 40.0,
            light: 320.0,
            battery: 7.5,
        }
    }

    #[test]
    fn test_flat_object_with_exact_keys() {
        let bytes = JsonPayload.encode(&sample()).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        let object = value.as_object().unwrap();

        let keys: Vec<&str> = object.keys().map(|k| k.as_str()).collect();
        assert_eq!(
            keys,
            ["battery", "humidity", "light", "moisture", "temperature"]
        );
        assert!(object.values().all(Value::is_number));
        assert_eq!(object["temperature"].as_f64(), Some(22.0));
        assert_eq!(object["moisture"].as_f64(), Some(40.0));
        assert_eq!(object["battery"].as_f64(), Some(7.5));
    }

    #[test]
    fn test_unreadable_battery_is_null() {
        let mut sample = sample();
        sample.battery = f32::NAN;

        let bytes = JsonPayload.encode(&sample).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        assert!(value["battery"].is_null());
        assert_eq!(value["light"].as_f64(), Some(320.0));
    }
}
