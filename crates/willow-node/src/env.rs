//! Deployment settings for the host node, read from the environment
//!
//! A `.env` file in the working directory is honoured. Everything has a
//! default so a bare `willow-node` runs one offline cycle.

use std::env;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use log::warn;
use willow_core::config::{MQTT_CLIENT_ID, MQTT_PORT, MQTT_TLS_PORT, TlsCredentials};

const DEFAULT_SCRATCH_PATH: &str = "willow-scratch.bin";

/// PEM material read from the files named in the environment.
#[derive(Clone)]
pub struct TlsFiles {
    pub ca_cert_pem: String,
    pub client_cert_pem: String,
    pub client_key_pem: String,
}

impl TlsFiles {
    pub fn credentials(&self) -> TlsCredentials<'_> {
        TlsCredentials {
            ca_cert_pem: &self.ca_cert_pem,
            client_cert_pem: &self.client_cert_pem,
            client_key_pem: &self.client_key_pem,
        }
    }
}

#[derive(Clone)]
pub struct NodeEnv {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Mutual TLS material; `None` for a plaintext session.
    pub tls: Option<TlsFiles>,
    /// No broker: the payload is logged and the baseline stays put.
    pub offline: bool,
    pub scratch_path: PathBuf,
    /// Multiplier on every blocking delay. `0.0` runs a cycle instantly.
    pub time_scale: f64,
    /// Socket connect/read timeout in seconds.
    pub net_timeout_secs: u64,
    /// Problems found while loading, held until the logger is up.
    pub warnings: Vec<String>,
}

/// Reads variables through `lookup` and records what it had to ignore.
struct Reader<F> {
    lookup: F,
    warnings: Vec<String>,
}

impl<F: Fn(&str) -> Option<String>> Reader<F> {
    fn var(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn parsed<T: FromStr>(&mut self, key: &str) -> Option<T> {
        let raw = self.var(key)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                self.warnings
                    .push(format!("Ignoring unparsable {}={:?}", key, raw));
                None
            }
        }
    }

    fn flag(&self, key: &str) -> bool {
        matches!(
            self.var(key).as_deref().map(str::trim),
            Some("1" | "true" | "yes" | "on")
        )
    }

    fn file(&mut self, key: &str) -> Option<String> {
        let path = self.var(key)?;
        match fs::read_to_string(&path) {
            Ok(contents) => Some(contents),
            Err(e) => {
                self.warnings
                    .push(format!("Cannot read {}={}: {}", key, path, e));
                None
            }
        }
    }

    fn tls(&mut self) -> Result<Option<TlsFiles>, ()> {
        const KEYS: [&str; 3] = [
            "WILLOW_TLS_CA_CERT",
            "WILLOW_TLS_CLIENT_CERT",
            "WILLOW_TLS_CLIENT_KEY",
        ];
        if KEYS.iter().all(|key| self.var(key).is_none()) {
            return Ok(None);
        }

        let [ca, cert, key] = KEYS.map(|key| self.file(key));
        match (ca, cert, key) {
            (Some(ca_cert_pem), Some(client_cert_pem), Some(client_key_pem)) => {
                Ok(Some(TlsFiles {
                    ca_cert_pem,
                    client_cert_pem,
                    client_key_pem,
                }))
            }
            _ => {
                self.warnings.push(String::from(
                    "Mutual TLS needs WILLOW_TLS_CA_CERT, WILLOW_TLS_CLIENT_CERT and \
                     WILLOW_TLS_CLIENT_KEY; running offline",
                ));
                Err(())
            }
        }
    }
}

impl NodeEnv {
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut reader = Reader {
            lookup,
            warnings: Vec::new(),
        };

        let mqtt_host = reader.var("WILLOW_MQTT_HOST");
        let (tls, tls_unusable) = match reader.tls() {
            Ok(tls) => (tls, false),
            Err(()) => (None, true),
        };
        let offline = reader.flag("WILLOW_OFFLINE") || mqtt_host.is_none() || tls_unusable;
        let default_port = if tls.is_some() { MQTT_TLS_PORT } else { MQTT_PORT };

        let time_scale = match reader.parsed::<f64>("WILLOW_TIME_SCALE") {
            Some(scale) if scale.is_finite() && scale >= 0.0 => scale,
            Some(scale) => {
                reader
                    .warnings
                    .push(format!("Ignoring WILLOW_TIME_SCALE={}, using 1.0", scale));
                1.0
            }
            None => 1.0,
        };

        Self {
            mqtt_host: mqtt_host.unwrap_or_else(|| String::from("localhost")),
            mqtt_port: reader.parsed("WILLOW_MQTT_PORT").unwrap_or(default_port),
            client_id: reader
                .var("WILLOW_CLIENT_ID")
                .unwrap_or_else(|| String::from(MQTT_CLIENT_ID)),
            username: reader.var("WILLOW_MQTT_USERNAME"),
            password: reader.var("WILLOW_MQTT_PASSWORD"),
            tls,
            offline,
            scratch_path: reader
                .var("WILLOW_SCRATCH_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SCRATCH_PATH)),
            time_scale,
            net_timeout_secs: reader.parsed("WILLOW_NET_TIMEOUT_SECS").unwrap_or(5),
            warnings: reader.warnings,
        }
    }

    /// Emit what loading had to ignore. Call once the logger is installed.
    pub fn log_warnings(&self) {
        for warning in &self.warnings {
            warn!("{}", warning);
        }
    }
}
