//! Signal acquisition
//!
//! Reduces `N` raw sub-samples per channel, taken `T` apart, to one
//! [`FilteredSample`] per wake cycle. This is synchronous on purpose: nothing
//! else runs on the node while it is awake, so the sub-sample spacing is a
//! plain blocking delay.

use core::fmt;
use core::ops::RangeInclusive;

use embedded_hal::delay::DelayNs;
use log::{debug, info, warn};
use thiserror_no_std::Error;

use crate::config::{ADC_MAX, AcquisitionConfig, BatteryPack, FaultPolicy};
use crate::sensors::{SensorBus, SensorError};

/// Physical range of the climate sensor's temperature output (°C).
pub const TEMPERATURE_RANGE: RangeInclusive<f32> = -40.0..=125.0;
pub const HUMIDITY_RANGE: RangeInclusive<f32> = 0.0..=100.0;
/// Full 16-bit count range of the light sensor, in lux.
pub const LIGHT_RANGE: RangeInclusive<f32> = 0.0..=65535.0;

/// One filtered reading per wake cycle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FilteredSample {
    /// °C
    pub temperature: f32,
    /// %RH
    pub humidity: f32,
    /// Soil moisture, 0 (dry) to 100 (wet)
    pub moisture: f32,
    /// lux
    pub light: f32,
    /// Pack volts. NaN when the battery could not be read.
    pub battery: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Temperature,
    Humidity,
    Moisture,
    Light,
}

impl Channel {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Moisture => "moisture",
            Self::Light => "light",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum SensorFault {
    #[error("{channel} read failed: {error}")]
    Read { channel: Channel, error: SensorError },
    #[error("{channel} reading {value} is outside the sensor's range")]
    OutOfRange { channel: Channel, value: f32 },
    #[error("no valid {channel} sub-samples this cycle")]
    NoValidSamples { channel: Channel },
}

/// Running sum of the valid sub-samples of one channel.
struct ChannelMean {
    channel: Channel,
    range: RangeInclusive<f32>,
    sum: f32,
    count: usize,
}

impl ChannelMean {
    fn new(channel: Channel, range: RangeInclusive<f32>) -> Self {
        Self {
            channel,
            range,
            sum: 0.0,
            count: 0,
        }
    }

    fn push(
        &mut self,
        reading: Result<f32, SensorError>,
        policy: FaultPolicy,
    ) -> Result<(), SensorFault> {
        let fault = match reading {
            // NaN fails `contains`, so it is rejected along with out-of-range values
            Ok(value) if self.range.contains(&value) => {
                self.sum += value;
                self.count += 1;
                return Ok(());
            }
            Ok(value) => SensorFault::OutOfRange {
                channel: self.channel,
                value,
            },
            Err(error) => SensorFault::Read {
                channel: self.channel,
                error,
            },
        };

        match policy {
            FaultPolicy::SkipCycle => Err(fault),
            FaultPolicy::DiscardReading => {
                warn!("Discarding sub-sample: {}", fault);
                Ok(())
            }
        }
    }

    fn mean(&self) -> Result<f32, SensorFault> {
        if self.count == 0 {
            return Err(SensorFault::NoValidSamples {
                channel: self.channel,
            });
        }
        Ok(self.sum / self.count as f32)
    }
}

/// Map a raw moisture ADC mean onto 0-100 %, inverted: dry soil reads high.
pub fn moisture_percent(raw_mean: f32) -> f32 {
    100.0 - (raw_mean / ADC_MAX as f32) * 100.0
}

/// Single battery read, converted to pack volts.
///
/// Anything unusable comes back as NaN so the scheduler falls back to its
/// conservative tier instead of trusting a bogus voltage.
pub fn read_battery<S: SensorBus>(bus: &mut S, pack: &BatteryPack) -> f32 {
    match bus.read_raw_battery() {
        Ok(raw) if raw <= ADC_MAX => pack.volts(raw),
        Ok(raw) => {
            warn!("Battery ADC reading {} exceeds full scale {}", raw, ADC_MAX);
            f32::NAN
        }
        Err(e) => {
            warn!("Battery read failed: {}", e);
            f32::NAN
        }
    }
}

/// Take `config.samples` sub-samples of every channel and average them.
pub fn acquire<S, D>(
    bus: &mut S,
    delay: &mut D,
    config: &AcquisitionConfig,
) -> Result<FilteredSample, SensorFault>
where
    S: SensorBus,
    D: DelayNs,
{
    let policy = config.fault_policy;
    let interval_ms = u32::try_from(config.interval.as_millis()).unwrap_or(u32::MAX);

    let mut temperature = ChannelMean::new(Channel::Temperature, TEMPERATURE_RANGE);
    let mut humidity = ChannelMean::new(Channel::Humidity, HUMIDITY_RANGE);
    let mut moisture = ChannelMean::new(Channel::Moisture, 0.0..=ADC_MAX as f32);
    let mut light = ChannelMean::new(Channel::Light, LIGHT_RANGE);

    info!(
        "Acquiring {}-sample average ({} ms apart)",
        config.samples, interval_ms
    );

    for i in 0..config.samples {
        temperature.push(bus.read_temperature(), policy)?;
        humidity.push(bus.read_humidity(), policy)?;
        moisture.push(bus.read_raw_moisture().map(f32::from), policy)?;
        light.push(bus.read_light(), policy)?;

        debug!("Sub-sample {}/{} taken", i + 1, config.samples);

        if i + 1 < config.samples || config.trailing_delay {
            delay.delay_ms(interval_ms);
        }
    }

    let sample = FilteredSample {
        temperature: temperature.mean()?,
        humidity: humidity.mean()?,
        moisture: moisture_percent(moisture.mean()?),
        light: light.mean()?,
        battery: read_battery(bus, &config.battery),
    };

    info!(
        "Filtered sample: {} °C, {} %RH, {} % moisture, {} lux, {} V",
        sample.temperature, sample.humidity, sample.moisture, sample.light, sample.battery
    );

    Ok(sample)
}
