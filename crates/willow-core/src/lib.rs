//! Hardware-independent core library for the willow telemetry node
//!
//! The node wakes from deep sleep, runs exactly one pass of:
//! signal acquisition, delta decision, (optional) uplink, and duty-cycle
//! scheduling, then powers down again. Everything that survives the power-down
//! boundary lives in the scratch store.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets and desktop hosts (for the node runner and tests).

#![no_std]

extern crate alloc;

pub mod acquisition;
pub mod config;
pub mod cycle;
pub mod decision;
pub mod payload;
pub mod power;
pub mod scheduler;
pub mod scratch;
pub mod sensors;
pub mod uplink;

pub use acquisition::{FilteredSample, SensorFault};
pub use config::NodeConfig;
pub use cycle::{CycleOutcome, CycleReport, WakeCycle};
pub use decision::{Thresholds, UploadDecision, decide};
pub use scheduler::next_sleep_duration;
pub use scratch::{ScratchState, ScratchStore};
