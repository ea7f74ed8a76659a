//! Uplink session contract and connect retry
//!
//! The cycle only ever calls [`Uplink::connect`], [`Uplink::publish`] and
//! [`Uplink::disconnect`]. How the link comes up (Wi-Fi association, TLS,
//! MQTT handshake) is the implementation's business.

pub mod mqtt;

pub use mqtt::{Connector, MqttSession};

use core::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_io::ErrorKind;
use log::{info, warn};
use thiserror_no_std::Error;

use crate::config::RetryPolicy;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkError {
    #[error("transport error: {0:?}")]
    Transport(ErrorKind),
    #[error("connection closed by peer")]
    Closed,
    #[error("broker refused connection (return code {0})")]
    Refused(u8),
    #[error("protocol violation: {0}")]
    Protocol(&'static str),
    #[error("packet exceeds the header buffer")]
    PacketTooLarge,
    #[error("publish was not acknowledged")]
    NotAcknowledged,
    #[error("not connected")]
    NotConnected,
    #[error("gave up after {attempts} connect attempts")]
    RetriesExhausted { attempts: u8 },
}

pub trait Uplink {
    /// Bring the session up. Blocking.
    fn connect(&mut self) -> Result<(), UplinkError>;

    /// Publish `payload` on `topic`. `Ok` only once the broker confirmed it.
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), UplinkError>;

    /// Tear the session down. Best effort.
    fn disconnect(&mut self) {}
}

impl<T: Uplink + ?Sized> Uplink for &mut T {
    fn connect(&mut self) -> Result<(), UplinkError> {
        (**self).connect()
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), UplinkError> {
        (**self).publish(topic, payload)
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }
}

/// Connect with bounded retries and exponential backoff.
///
/// Stops after `policy.max_attempts` attempts, or earlier when the next
/// backoff would push the total waiting time past `policy.budget`. Returns
/// the number of attempts it took.
pub fn connect_with_retry<U, D>(
    uplink: &mut U,
    policy: &RetryPolicy,
    delay: &mut D,
) -> Result<u8, UplinkError>
where
    U: Uplink,
    D: DelayNs,
{
    let mut waited = Duration::ZERO;
    let mut attempts = 0u8;

    while attempts < policy.max_attempts {
        attempts += 1;

        match uplink.connect() {
            Ok(()) => {
                info!("Uplink connected (attempt {})", attempts);
                return Ok(attempts);
            }
            Err(e) => warn!(
                "Uplink connect attempt {}/{} failed: {}",
                attempts, policy.max_attempts, e
            ),
        }

        if attempts == policy.max_attempts {
            break;
        }

        let backoff = policy.backoff(attempts - 1);
        if waited + backoff > policy.budget {
            warn!(
                "Connect budget of {} ms exhausted",
                policy.budget.as_millis()
            );
            break;
        }
        delay.delay_ms(u32::try_from(backoff.as_millis()).unwrap_or(u32::MAX));
        waited += backoff;
    }

    Err(UplinkError::RetriesExhausted { attempts })
}
