//! Compile-time configuration for the node
//!
//! None of these values are reloadable at runtime: a wake cycle starts from a
//! cold logical state and reads them straight out of flash.

use core::time::Duration;

use serde::{Deserialize, Serialize};

/// Full scale of the 12-bit ADC.
pub const ADC_MAX: u16 = 4095;

/// Number of sub-samples averaged per channel.
pub const SAMPLE_COUNT: usize = 5;
/// Delay between sub-samples.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(2000);

pub const TEMP_THRESHOLD_C: f32 = 0.5;
pub const MOIST_THRESHOLD_PERCENT: f32 = 2.0;

pub const HIGH_POWER_THRESHOLD_V: f32 = 4.0;
pub const SHORT_SLEEP: Duration = Duration::from_secs(5 * 60);
pub const LONG_SLEEP: Duration = Duration::from_secs(60 * 60);

pub const PUBLISH_TOPIC: &str = "willow/sensors/data";
/// Downlink topic. Not consumed by the wake cycle.
pub const SUBSCRIBE_TOPIC: &str = "willow/sensors/downlink";
pub const MQTT_CLIENT_ID: &str = "ESP32_Willow_Device";
pub const MQTT_PORT: u16 = 1883;
pub const MQTT_TLS_PORT: u16 = 8883;
pub const MQTT_KEEP_ALIVE_SECS: u16 = 60;

/// Physical topology of the battery pack feeding the divider on the battery ADC pin.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct BatteryPack {
    /// Voltage of a single fully charged cell.
    pub cell_max_v: f32,
    pub cells_in_series: u8,
}

impl BatteryPack {
    /// Convert a raw battery ADC reading into pack volts.
    pub fn volts(&self, raw: u16) -> f32 {
        (raw as f32 / ADC_MAX as f32) * self.cell_max_v * self.cells_in_series as f32
    }

    /// Highest voltage the pack can legitimately report.
    pub fn max_volts(&self) -> f32 {
        self.cell_max_v * self.cells_in_series as f32
    }
}

impl Default for BatteryPack {
    fn default() -> Self {
        Self {
            cell_max_v: 4.2,
            cells_in_series: 2,
        }
    }
}

/// What to do with a sub-sample that failed to read or is out of range.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultPolicy {
    /// Abandon the sample. The cycle uploads nothing and goes back to sleep.
    #[default]
    SkipCycle,
    /// Drop the bad sub-sample and average what is left. Only a channel with
    /// no valid sub-sample at all faults the cycle.
    DiscardReading,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionConfig {
    pub samples: usize,
    pub interval: Duration,
    /// Also wait `interval` after the final sub-sample. Off by default, since
    /// it only extends the time spent awake.
    pub trailing_delay: bool,
    pub fault_policy: FaultPolicy,
    pub battery: BatteryPack,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            samples: SAMPLE_COUNT,
            interval: SAMPLE_INTERVAL,
            trailing_delay: false,
            fault_policy: FaultPolicy::default(),
            battery: BatteryPack::default(),
        }
    }
}

/// Two-tier sleep schedule.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct SleepSchedule {
    /// Battery voltage above which the short interval is used.
    pub high_power_threshold_v: f32,
    pub short: Duration,
    pub long: Duration,
}

impl Default for SleepSchedule {
    fn default() -> Self {
        Self {
            high_power_threshold_v: HIGH_POWER_THRESHOLD_V,
            short: SHORT_SLEEP,
            long: LONG_SLEEP,
        }
    }
}

/// Bounded retry with exponential backoff for the uplink connect.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Total time the node may spend waiting between attempts.
    pub budget: Duration,
}

impl RetryPolicy {
    /// Backoff to wait after the given failed attempt (0-based).
    pub fn backoff(&self, attempt: u8) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(4),
            budget: Duration::from_secs(15),
        }
    }
}

/// PEM-encoded material for mutual TLS with the broker.
///
/// The broker is verified against `ca_cert_pem`; the node authenticates with
/// its own certificate chain and private key.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(bound(deserialize = "'de: 'a"))]
pub struct TlsCredentials<'a> {
    pub ca_cert_pem: &'a str,
    pub client_cert_pem: &'a str,
    pub client_key_pem: &'a str,
}

impl core::fmt::Debug for TlsCredentials<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TlsCredentials")
            .field("ca_cert_pem", &self.ca_cert_pem.len())
            .field("client_cert_pem", &self.client_cert_pem.len())
            .field("client_key_pem", &"<redacted>")
            .finish()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(bound(deserialize = "'de: 'a"))]
pub struct MqttConfig<'a> {
    pub endpoint: &'a str,
    pub port: u16,
    pub client_id: &'a str,
    pub username: Option<&'a str>,
    pub password: Option<&'a str>,
    pub keep_alive_secs: u16,
    pub publish_topic: &'a str,
    pub subscribe_topic: &'a str,
    /// Mutual TLS material. `None` means a plaintext session.
    pub tls: Option<TlsCredentials<'a>>,
}

impl<'a> MqttConfig<'a> {
    /// Switch to mutual TLS on the standard secure port.
    pub fn with_tls(self, credentials: TlsCredentials<'a>) -> Self {
        Self {
            port: MQTT_TLS_PORT,
            tls: Some(credentials),
            ..self
        }
    }
}

impl Default for MqttConfig<'_> {
    fn default() -> Self {
        Self {
            endpoint: "localhost",
            port: MQTT_PORT,
            client_id: MQTT_CLIENT_ID,
            username: None,
            password: None,
            keep_alive_secs: MQTT_KEEP_ALIVE_SECS,
            publish_topic: PUBLISH_TOPIC,
            subscribe_topic: SUBSCRIBE_TOPIC,
            tls: None,
        }
    }
}

/// Everything a wake cycle needs to know, apart from its collaborators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeConfig<'a> {
    pub acquisition: AcquisitionConfig,
    pub thresholds: crate::decision::Thresholds,
    pub schedule: SleepSchedule,
    pub retry: RetryPolicy,
    pub publish_topic: &'a str,
}

impl Default for NodeConfig<'_> {
    fn default() -> Self {
        Self {
            acquisition: AcquisitionConfig::default(),
            thresholds: crate::decision::Thresholds::default(),
            schedule: SleepSchedule::default(),
            retry: RetryPolicy::default(),
            publish_topic: PUBLISH_TOPIC,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_battery_full_scale() {
        let pack = BatteryPack::default();
        assert!((pack.volts(ADC_MAX) - 8.4).abs() < 1e-5);
        assert_eq!(pack.volts(0), 0.0);
    }

    #[test]
    fn test_plaintext_by_default_tls_on_secure_port() {
        let plain = MqttConfig::default();
        assert_eq!(plain.port, MQTT_PORT);
        assert!(plain.tls.is_none());

        let credentials = TlsCredentials {
            ca_cert_pem: "ca",
            client_cert_pem: "cert",
            client_key_pem: "key",
        };
        let secured = plain.with_tls(credentials);
        assert_eq!(secured.port, MQTT_TLS_PORT);
        assert_eq!(secured.tls, Some(credentials));
        assert_eq!(secured.client_id, plain.client_id);
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff(2), Duration::from_millis(2000));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(9), Duration::from_secs(4));
    }
}
