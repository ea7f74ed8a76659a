#[cfg(feature = "sensor-bh1750")]
mod bh1750;
#[cfg(feature = "sensor-sht40")]
mod sht40;

#[cfg(feature = "sensor-bh1750")]
pub use bh1750::BH1750Sensor;
#[cfg(feature = "sensor-sht40")]
pub use sht40::SHT40Sensor;

use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor}: {operation} failed ({details})")]
    ReadFailed {
        sensor: &'static str,
        operation: &'static str,
        details: &'static str,
    },
    #[error("{sensor}: timed out during {operation}")]
    Timeout {
        sensor: &'static str,
        operation: &'static str,
    },
    #[error("unknown sensor error")]
    UnknownError,
}

/// Combined temperature/humidity reading from a single measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateReading {
    pub temperature_celsius: f32,
    pub humidity_percent: f32,
}

/// A sensor that measures temperature and relative humidity together.
pub trait TemperatureHumidity {
    fn measure(&mut self) -> Result<ClimateReading, SensorError>;
}

pub trait LightSensor {
    fn read_lux(&mut self) -> Result<f32, SensorError>;
}

/// A single ADC channel returning raw counts in `[0, ADC_MAX]`.
pub trait AnalogChannel {
    fn read_raw(&mut self) -> Result<u16, SensorError>;
}

/// The node's view of its sensor hardware.
///
/// Every read is a blocking, instantaneous measurement of one channel.
pub trait SensorBus {
    fn read_temperature(&mut self) -> Result<f32, SensorError>;
    fn read_humidity(&mut self) -> Result<f32, SensorError>;
    fn read_raw_moisture(&mut self) -> Result<u16, SensorError>;
    fn read_light(&mut self) -> Result<f32, SensorError>;
    fn read_raw_battery(&mut self) -> Result<u16, SensorError>;
}

impl<T: SensorBus + ?Sized> SensorBus for &mut T {
    fn read_temperature(&mut self) -> Result<f32, SensorError> {
        (**self).read_temperature()
    }

    fn read_humidity(&mut self) -> Result<f32, SensorError> {
        (**self).read_humidity()
    }

    fn read_raw_moisture(&mut self) -> Result<u16, SensorError> {
        (**self).read_raw_moisture()
    }

    fn read_light(&mut self) -> Result<f32, SensorError> {
        (**self).read_light()
    }

    fn read_raw_battery(&mut self) -> Result<u16, SensorError> {
        (**self).read_raw_battery()
    }
}

/// Container for all sensor instances on the node
///
/// Ties one climate sensor, one light sensor and two ADC channels
/// (soil moisture sensor and battery divider) into a [`SensorBus`]. The climate
/// sensor measures temperature and humidity in one go, so a temperature read
/// caches the humidity half of the measurement for the following humidity
/// read.
pub struct NodeSensors<C, L, M, B> {
    climate: C,
    light: L,
    moisture: M,
    battery: B,
    pending_humidity: Option<f32>,
}

impl<C, L, M, B> NodeSensors<C, L, M, B>
where
    C: TemperatureHumidity,
    L: LightSensor,
    M: AnalogChannel,
    B: AnalogChannel,
{
    pub fn new(climate: C, light: L, moisture: M, battery: B) -> Self {
        Self {
            climate,
            light,
            moisture,
            battery,
            pending_humidity: None,
        }
    }
}

impl<C, L, M, B> SensorBus for NodeSensors<C, L, M, B>
where
    C: TemperatureHumidity,
    L: LightSensor,
    M: AnalogChannel,
    B: AnalogChannel,
{
    fn read_temperature(&mut self) -> Result<f32, SensorError> {
        let reading = self.climate.measure()?;
        self.pending_humidity = Some(reading.humidity_percent);
        Ok(reading.temperature_celsius)
    }

    fn read_humidity(&mut self) -> Result<f32, SensorError> {
        match self.pending_humidity.take() {
            Some(humidity) => Ok(humidity),
            None => Ok(self.climate.measure()?.humidity_percent),
        }
    }

    fn read_raw_moisture(&mut self) -> Result<u16, SensorError> {
        self.moisture.read_raw()
    }

    fn read_light(&mut self) -> Result<f32, SensorError> {
        self.light.read_lux()
    }

    fn read_raw_battery(&mut self) -> Result<u16, SensorError> {
        self.battery.read_raw()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloc::vec::Vec;
    use embedded_hal::delay::DelayNs;
    use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, Operation};

    /// I2C bus that records writes and answers every read from `response`.
    pub(crate) struct FakeI2c {
        pub(crate) writes: Vec<(u8, Vec<u8>)>,
        pub(crate) response: Vec<u8>,
        pub(crate) fail: bool,
    }

    impl FakeI2c {
        pub(crate) fn answering(response: &[u8]) -> Self {
            Self {
                writes: Vec::new(),
                response: response.to_vec(),
                fail: false,
            }
        }

        pub(crate) fn broken() -> Self {
            Self {
                writes: Vec::new(),
                response: Vec::new(),
                fail: true,
            }
        }
    }

    impl ErrorType for FakeI2c {
        type Error = ErrorKind;
    }

    impl I2c for FakeI2c {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            if self.fail {
                return Err(ErrorKind::Other);
            }
            for op in operations.iter_mut() {
                match op {
                    Operation::Write(bytes) => self.writes.push((address, bytes.to_vec())),
                    Operation::Read(buf) => {
                        buf.fill(0);
                        let n = buf.len().min(self.response.len());
                        buf[..n].copy_from_slice(&self.response[..n]);
                    }
                }
            }
            Ok(())
        }
    }

    /// Delay that only adds up what it was asked to wait.
    #[derive(Default)]
    pub(crate) struct TallyDelay {
        pub(crate) total_ns: u64,
    }

    impl DelayNs for TallyDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.total_ns += ns as u64;
        }
    }

    struct CountingClimate {
        measurements: u32,
    }

    impl TemperatureHumidity for CountingClimate {
        fn measure(&mut self) -> Result<ClimateReading, SensorError> {
            self.measurements += 1;
            Ok(ClimateReading {
                temperature_celsius: 20.0 + self.measurements as f32,
                humidity_percent: 50.0 + self.measurements as f32,
            })
        }
    }

    struct FixedLight(f32);

    impl LightSensor for FixedLight {
        fn read_lux(&mut self) -> Result<f32, SensorError> {
            Ok(self.0)
        }
    }

    struct FixedAdc(u16);

    impl AnalogChannel for FixedAdc {
        fn read_raw(&mut self) -> Result<u16, SensorError> {
            Ok(self.0)
        }
    }

    #[test]
    fn test_humidity_comes_from_the_same_measurement_as_temperature() {
        let mut sensors = NodeSensors::new(
            CountingClimate { measurements: 0 },
            FixedLight(120.0),
            FixedAdc(2000),
            FixedAdc(4000),
        );

        assert_eq!(sensors.read_temperature(), Ok(21.0));
        assert_eq!(sensors.read_humidity(), Ok(51.0));
        assert_eq!(sensors.climate.measurements, 1);

        // Without a preceding temperature read, humidity triggers its own measurement
        assert_eq!(sensors.read_humidity(), Ok(52.0));
        assert_eq!(sensors.climate.measurements, 2);
    }

    #[test]
    fn test_channels_are_routed() {
        let mut sensors = NodeSensors::new(
            CountingClimate { measurements: 0 },
            FixedLight(120.0),
            FixedAdc(2000),
            FixedAdc(4000),
        );

        assert_eq!(sensors.read_light(), Ok(120.0));
        assert_eq!(sensors.read_raw_moisture(), Ok(2000));
        assert_eq!(sensors.read_raw_battery(), Ok(4000));
    }
}
