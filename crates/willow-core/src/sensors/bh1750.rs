use bh1750_embedded::{Address, Resolution, blocking::Bh1750};
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use log::{debug, error};

use super::{LightSensor, SensorError};

/// BH1750 ambient light sensor driven in one-time measurement mode.
///
/// The chip powers itself down after each one-time measurement, which suits a
/// node that spends almost all of its life asleep.
pub struct BH1750Sensor<I, D> {
    sensor: Bh1750<I, D>,
}

impl<I: I2c, D: DelayNs> BH1750Sensor<I, D> {
    pub fn new(i2c: I, delay: D) -> Self {
        Self::with_address(i2c, delay, Address::Low)
    }

    pub fn with_address(i2c: I, delay: D, address: Address) -> Self {
        Self {
            sensor: Bh1750::new(i2c, delay, address),
        }
    }
}

impl<I: I2c, D: DelayNs> LightSensor for BH1750Sensor<I, D> {
    fn read_lux(&mut self) -> Result<f32, SensorError> {
        self.sensor
            .one_time_measurement(Resolution::High)
            .map(|lux| {
                debug!("BH1750: measured {} lux", lux);
                lux
            })
            .map_err(|e| {
                error!("BH1750 one_time_measurement failed: {:?}", e);
                SensorError::ReadFailed {
                    sensor: "BH1750",
                    operation: "one_time_measurement",
                    details: "Failed to read lux value during a single one-time measurement",
                }
            })
    }
}
