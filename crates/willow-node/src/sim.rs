//! Simulated sensor hardware and blocking delay for the host node

use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use embedded_hal::delay::DelayNs;
use willow_core::config::ADC_MAX;
use willow_core::sensors::{
    AnalogChannel, ClimateReading, LightSensor, SensorError, TemperatureHumidity,
};

fn epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Small deterministic wobble so consecutive sub-samples differ.
fn jitter(t: f64, period: f64, amplitude: f64) -> f64 {
    amplitude * (t / period).sin()
}

/// Climate sensor following a slow daily-ish curve.
pub struct MockClimate;

impl TemperatureHumidity for MockClimate {
    fn measure(&mut self) -> Result<ClimateReading, SensorError> {
        let t = epoch_secs();

        // Temperature: 18–28 °C over a ~2 h period
        let temperature = 23.0 + 5.0 * (t / 1200.0).sin() + jitter(t, 3.0, 0.05);
        // Humidity: 40–70 % with a different period
        let humidity = 55.0 + 15.0 * (t / 1800.0).cos() + jitter(t, 5.0, 0.2);

        Ok(ClimateReading {
            temperature_celsius: temperature as f32,
            humidity_percent: humidity as f32,
        })
    }
}

pub struct MockLight;

impl LightSensor for MockLight {
    fn read_lux(&mut self) -> Result<f32, SensorError> {
        let t = epoch_secs();
        let lux = (800.0 * (t / 2400.0).sin()).max(0.0) + 5.0 + jitter(t, 2.0, 1.0);
        Ok(lux.max(0.0) as f32)
    }
}

/// Soil sensor drying out slowly, raw ADC counts (dry reads high).
pub struct MockSoilMoisture;

impl AnalogChannel for MockSoilMoisture {
    fn read_raw(&mut self) -> Result<u16, SensorError> {
        let t = epoch_secs();
        let moisture = 45.0 + 10.0 * (t / 3600.0).sin() + jitter(t, 7.0, 0.3);
        let raw = (100.0 - moisture) / 100.0 * ADC_MAX as f64;
        Ok(raw.clamp(0.0, ADC_MAX as f64) as u16)
    }
}

/// Battery divider at a fixed pack voltage.
pub struct MockBattery {
    raw: u16,
}

impl MockBattery {
    pub fn new(volts: f32, full_scale_volts: f32) -> Self {
        let raw = (volts / full_scale_volts * ADC_MAX as f32).clamp(0.0, ADC_MAX as f32);
        Self { raw: raw as u16 }
    }
}

impl AnalogChannel for MockBattery {
    fn read_raw(&mut self) -> Result<u16, SensorError> {
        Ok(self.raw)
    }
}

/// `DelayNs` backed by `thread::sleep`, optionally compressed in time.
#[derive(Clone, Copy)]
pub struct ScaledDelay {
    scale: f64,
}

impl ScaledDelay {
    /// A negative or non-finite `scale` falls back to real time.
    pub fn new(scale: f64) -> Self {
        let scale = if scale.is_finite() && scale >= 0.0 {
            scale
        } else {
            1.0
        };
        Self { scale }
    }
}

impl DelayNs for ScaledDelay {
    fn delay_ns(&mut self, ns: u32) {
        let scaled = Duration::from_nanos(ns as u64).mul_f64(self.scale);
        if !scaled.is_zero() {
            thread::sleep(scaled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_battery_round_trips_through_the_pack_formula() {
        let pack = willow_core::config::BatteryPack::default();
        let mut battery = MockBattery::new(7.4, pack.max_volts());

        let volts = pack.volts(battery.read_raw().unwrap());

        assert!((volts - 7.4).abs() < 0.01);
    }

    #[test]
    fn test_mock_channels_stay_in_range() {
        let reading = MockClimate.measure().unwrap();
        assert!((17.5..=28.5).contains(&reading.temperature_celsius));
        assert!((0.0..=100.0).contains(&reading.humidity_percent));
        assert!(MockSoilMoisture.read_raw().unwrap() <= ADC_MAX);
        assert!(MockLight.read_lux().unwrap() >= 0.0);
    }

    #[test]
    fn test_zero_scale_does_not_sleep() {
        let start = std::time::Instant::now();
        ScaledDelay::new(0.0).delay_ms(10_000);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_unusable_scale_runs_in_real_time() {
        assert_eq!(ScaledDelay::new(f64::INFINITY).scale, 1.0);
        assert_eq!(ScaledDelay::new(f64::NAN).scale, 1.0);
        assert_eq!(ScaledDelay::new(-2.0).scale, 1.0);

        let start = std::time::Instant::now();
        ScaledDelay::new(f64::INFINITY).delay_us(1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
