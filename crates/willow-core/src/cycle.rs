//! Wake cycle orchestration
//!
//! A node has two states. **Awake** is one call to [`WakeCycle::run`]:
//! acquisition, delta decision, an upload when warranted, and scheduling.
//! **Asleep** is the powered-down interval after
//! [`WakeCycle::run_to_sleep`], which never returns. Every wake does exactly
//! one pass, whatever happened during it, and the next wake starts from a cold
//! logical state apart from the scratch store.

use core::time::Duration;

use embedded_hal::delay::DelayNs;
use log::{error, info, warn};

use crate::acquisition::{self, FilteredSample, SensorFault};
use crate::config::NodeConfig;
use crate::decision::{UploadDecision, decide};
use crate::payload::{JsonPayload, PayloadEncoder, PayloadError};
use crate::power::{PowerDown, enter_deep_sleep};
use crate::scratch::{ScratchError, ScratchState, ScratchStore};
use crate::sensors::SensorBus;
use crate::uplink::{Uplink, UplinkError, connect_with_retry};

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Delta below both thresholds, network untouched.
    Skipped,
    /// Broker confirmed the publish and the baseline moved.
    Uploaded,
    /// Broker confirmed the publish but the new baseline could not be
    /// stored, so the previous one stays in effect.
    UploadedNotPersisted(ScratchError),
    /// The sample was unusable, nothing was sent.
    SensorFault(SensorFault),
    /// Payload could not be built, nothing was sent.
    EncodeFailed(PayloadError),
    /// Connect or publish failed; the baseline is unchanged.
    UploadFailed(UplinkError),
}

/// What one wake cycle did. Useful for logging and tests; the node itself
/// keeps nothing of it across sleep.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub sample: Option<FilteredSample>,
    pub decision: Option<UploadDecision>,
    pub outcome: CycleOutcome,
    /// Baseline in effect when the cycle ended.
    pub scratch: ScratchState,
    pub sleep: Duration,
}

/// One wake cycle with its collaborators.
///
/// All hardware handles are owned here for the duration of the cycle; there
/// is no global device state.
pub struct WakeCycle<'a, S, D, U, K, E = JsonPayload> {
    config: NodeConfig<'a>,
    sensors: S,
    delay: D,
    uplink: U,
    store: K,
    encoder: E,
}

impl<'a, S, D, U, K> WakeCycle<'a, S, D, U, K, JsonPayload>
where
    S: SensorBus,
    D: DelayNs,
    U: Uplink,
    K: ScratchStore,
{
    pub fn new(config: NodeConfig<'a>, sensors: S, delay: D, uplink: U, store: K) -> Self {
        Self {
            config,
            sensors,
            delay,
            uplink,
            store,
            encoder: JsonPayload,
        }
    }
}

impl<'a, S, D, U, K, E> WakeCycle<'a, S, D, U, K, E>
where
    S: SensorBus,
    D: DelayNs,
    U: Uplink,
    K: ScratchStore,
    E: PayloadEncoder,
{
    /// Replace the payload encoder, e.g. to add a device id or timestamp.
    pub fn with_encoder<E2: PayloadEncoder>(self, encoder: E2) -> WakeCycle<'a, S, D, U, K, E2> {
        WakeCycle {
            config: self.config,
            sensors: self.sensors,
            delay: self.delay,
            uplink: self.uplink,
            store: self.store,
            encoder,
        }
    }

    /// Run the awake pass and report what happened. Never fails: every fault
    /// is local to the cycle and ends up in the report.
    pub fn run(&mut self) -> CycleReport {
        info!("Wake cycle started");

        let baseline = match self.store.load() {
            Ok(state) => state,
            Err(e) => {
                warn!("Scratch state unreadable ({}), using cold-start baseline", e);
                ScratchState::default()
            }
        };

        let sample = match acquisition::acquire(
            &mut self.sensors,
            &mut self.delay,
            &self.config.acquisition,
        ) {
            Ok(sample) => sample,
            Err(fault) => {
                warn!("Sensor fault, skipping upload this cycle: {}", fault);
                let battery =
                    acquisition::read_battery(&mut self.sensors, &self.config.acquisition.battery);
                return self.finish(None, None, CycleOutcome::SensorFault(fault), baseline, battery);
            }
        };

        let decision = decide(&sample, &baseline, &self.config.thresholds);
        info!(
            "Delta: {} °C, {} % moisture (upload: {})",
            decision.temp_delta, decision.moist_delta, decision.should_upload
        );

        let (outcome, scratch) = if decision.should_upload {
            self.upload(&sample, baseline)
        } else {
            info!("Delta small, skipping upload");
            (CycleOutcome::Skipped, baseline)
        };

        self.finish(Some(sample), Some(decision), outcome, scratch, sample.battery)
    }

    /// Run the awake pass, then arm the wake timer and power down.
    pub fn run_to_sleep<P: PowerDown + ?Sized>(mut self, power: &mut P) -> ! {
        let report = self.run();
        enter_deep_sleep(power, report.sleep)
    }

    fn upload(
        &mut self,
        sample: &FilteredSample,
        baseline: ScratchState,
    ) -> (CycleOutcome, ScratchState) {
        let payload = match self.encoder.encode(sample) {
            Ok(payload) => payload,
            Err(e) => return (CycleOutcome::EncodeFailed(e), baseline),
        };

        let published = connect_with_retry(&mut self.uplink, &self.config.retry, &mut self.delay)
            .and_then(|_| self.uplink.publish(self.config.publish_topic, &payload));
        self.uplink.disconnect();

        if let Err(e) = published {
            error!("Upload failed, keeping previous baseline: {}", e);
            return (CycleOutcome::UploadFailed(e), baseline);
        }

        info!("Upload confirmed on {}", self.config.publish_topic);
        let uploaded = ScratchState::from_upload(sample);
        if let Err(e) = self.store.save(&uploaded) {
            // The next cycle compares against the older baseline and uploads again
            error!("Failed to persist scratch state: {}", e);
            return (CycleOutcome::UploadedNotPersisted(e), baseline);
        }

        (CycleOutcome::Uploaded, uploaded)
    }

    fn finish(
        &self,
        sample: Option<FilteredSample>,
        decision: Option<UploadDecision>,
        outcome: CycleOutcome,
        scratch: ScratchState,
        battery: f32,
    ) -> CycleReport {
        let sleep = self.config.schedule.sleep_for(battery);
        info!(
            "Cycle finished ({:?}), battery {} V, next wake in {} s",
            outcome,
            battery,
            sleep.as_secs()
        );

        CycleReport {
            sample,
            decision,
            outcome,
            scratch,
            sleep,
        }
    }
}
