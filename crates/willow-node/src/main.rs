//! Host runner for the willow telemetry node.
//!
//! Runs exactly one wake cycle per process against simulated sensors, keeps
//! the scratch region in a file, and publishes over MQTT, plain or mutual
//! TLS (or logs the payload when offline). Exiting stands in for deep sleep.
//!
//! # Environment
//!
//! | Variable                  | Default               |
//! |---------------------------|-----------------------|
//! | `WILLOW_MQTT_HOST`        | unset, runs offline   |
//! | `WILLOW_MQTT_PORT`        | `1883`, `8883` on TLS |
//! | `WILLOW_CLIENT_ID`        | `ESP32_Willow_Device` |
//! | `WILLOW_MQTT_USERNAME`    | unset                 |
//! | `WILLOW_MQTT_PASSWORD`    | unset                 |
//! | `WILLOW_TLS_CA_CERT`      | unset, plaintext      |
//! | `WILLOW_TLS_CLIENT_CERT`  | unset, plaintext      |
//! | `WILLOW_TLS_CLIENT_KEY`   | unset, plaintext      |
//! | `WILLOW_OFFLINE`          | `false`               |
//! | `WILLOW_SCRATCH_PATH`     | `willow-scratch.bin`  |
//! | `WILLOW_TIME_SCALE`       | `1.0`                 |
//! | `WILLOW_NET_TIMEOUT_SECS` | `5`                   |
//! | `RUST_LOG`                | `info`                |

mod env;
mod net;
mod power;
mod scratch_file;
mod sim;
mod tls;

use std::time::Duration;

use log::{error, info};

use willow_core::config::{MqttConfig, NodeConfig};
use willow_core::sensors::NodeSensors;
use willow_core::WakeCycle;

use crate::env::NodeEnv;
use crate::net::{NodeUplink, OfflineUplink};
use crate::power::ProcessPowerDown;
use crate::scratch_file::FileScratchStore;
use crate::sim::{MockBattery, MockClimate, MockLight, MockSoilMoisture, ScaledDelay};

/// Simulated pack voltage. Above the high-power threshold, so the node
/// wakes on the short interval.
const SIMULATED_PACK_VOLTS: f32 = 7.4;

fn uplink(settings: &NodeEnv) -> NodeUplink<'_> {
    if settings.offline {
        return NodeUplink::Offline(OfflineUplink);
    }

    let mut mqtt = MqttConfig {
        endpoint: &settings.mqtt_host,
        client_id: &settings.client_id,
        username: settings.username.as_deref(),
        password: settings.password.as_deref(),
        ..MqttConfig::default()
    };
    if let Some(files) = &settings.tls {
        mqtt = mqtt.with_tls(files.credentials());
    }
    mqtt.port = settings.mqtt_port;

    info!(
        "Publishing to {}:{} as {}{}",
        mqtt.endpoint,
        mqtt.port,
        mqtt.client_id,
        if mqtt.tls.is_some() { " over mutual TLS" } else { "" }
    );
    NodeUplink::mqtt(mqtt, Duration::from_secs(settings.net_timeout_secs)).unwrap_or_else(|e| {
        error!("TLS setup failed, running offline: {}", e);
        NodeUplink::Offline(OfflineUplink)
    })
}

fn main() {
    let settings = NodeEnv::load();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    settings.log_warnings();

    let config = NodeConfig::default();
    let battery = MockBattery::new(
        SIMULATED_PACK_VOLTS,
        config.acquisition.battery.max_volts(),
    );
    let sensors = NodeSensors::new(MockClimate, MockLight, MockSoilMoisture, battery);
    let delay = ScaledDelay::new(settings.time_scale);
    let store = FileScratchStore::new(&settings.scratch_path);

    let mut power = ProcessPowerDown::default();
    WakeCycle::new(config, sensors, delay, uplink(&settings), store).run_to_sleep(&mut power)
}

#[cfg(test)]
mod tests {
    use super::*;
    use willow_core::CycleOutcome;
    use willow_core::uplink::UplinkError;

    #[test]
    fn test_offline_cycle_leaves_the_scratch_file_untouched() {
        let path = std::env::temp_dir().join(format!(
            "willow-offline-{}.bin",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let config = NodeConfig::default();
        let battery = MockBattery::new(
            SIMULATED_PACK_VOLTS,
            config.acquisition.battery.max_volts(),
        );
        let sensors = NodeSensors::new(MockClimate, MockLight, MockSoilMoisture, battery);
        let mut cycle = WakeCycle::new(
            config,
            sensors,
            ScaledDelay::new(0.0),
            NodeUplink::Offline(OfflineUplink),
            FileScratchStore::new(&path),
        );

        let report = cycle.run();

        assert_eq!(
            report.outcome,
            CycleOutcome::UploadFailed(UplinkError::NotConnected)
        );
        assert!(!path.exists());
    }
}
