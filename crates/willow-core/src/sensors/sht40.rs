use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use log::error;
use sht4x::Sht4x;

use super::{ClimateReading, SensorError, TemperatureHumidity};

pub struct SHT40Sensor<I, D> {
    sensor: Sht4x<I, D>,
    delay: D,
}

impl<I: I2c, D: DelayNs> SHT40Sensor<I, D> {
    pub fn new(i2c: I, delay: D) -> Self {
        Self {
            sensor: Sht4x::<I, D>::new(i2c),
            delay,
        }
    }
}

impl<I: I2c, D: DelayNs> TemperatureHumidity for SHT40Sensor<I, D> {
    fn measure(&mut self) -> Result<ClimateReading, SensorError> {
        let measurement = self
            .sensor
            .measure(sht4x::Precision::High, &mut self.delay)
            .map_err(|e| {
                error!("SHT40 measurement failed: {:?}", e);
                SensorError::ReadFailed {
                    sensor: "SHT40",
                    operation: "measure temperature/humidity",
                    details: "I2C communication error or sensor not responding",
                }
            })?;

        Ok(ClimateReading {
            temperature_celsius: measurement.temperature_celsius().to_num::<f32>(),
            humidity_percent: measurement.humidity_percent().to_num::<f32>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::tests::{FakeI2c, TallyDelay};

    // Raw temperature 0x6666 (25 °C) and humidity 0x8000 (56.5 %RH), each
    // followed by its CRC-8
    const RESPONSE: [u8; 6] = [0x66, 0x66, 0x93, 0x80, 0x00, 0xA2];

    #[test]
    fn test_high_precision_measurement_is_converted_to_f32() {
        let mut i2c = FakeI2c::answering(&RESPONSE);
        let mut delay = TallyDelay::default();

        let reading = SHT40Sensor::new(&mut i2c, &mut delay).measure().unwrap();

        assert!((reading.temperature_celsius - 25.0).abs() < 0.01);
        assert!((reading.humidity_percent - 56.5).abs() < 0.01);
        // 0xFD: measure T & RH with high precision
        assert_eq!(i2c.writes, [(0x44, alloc::vec![0xFD])]);
        assert!(delay.total_ns >= 9_000_000);
    }

    #[test]
    fn test_checksum_mismatch_is_a_read_failure() {
        let mut corrupted = RESPONSE;
        corrupted[2] ^= 0xFF;
        let mut i2c = FakeI2c::answering(&corrupted);
        let mut delay = TallyDelay::default();

        let result = SHT40Sensor::new(&mut i2c, &mut delay).measure();

        assert!(matches!(
            result,
            Err(SensorError::ReadFailed { sensor: "SHT40", .. })
        ));
    }

    #[test]
    fn test_bus_error_is_a_read_failure() {
        let mut i2c = FakeI2c::broken();
        let mut delay = TallyDelay::default();

        assert!(matches!(
            SHT40Sensor::new(&mut i2c, &mut delay).measure(),
            Err(SensorError::ReadFailed { sensor: "SHT40", .. })
        ));
    }
}
