//! Power-down primitive

use core::time::Duration;

use log::info;

/// Arms the wake timer and powers the node down.
///
/// `halt_and_sleep` never returns: the next wake is a fresh boot, not a
/// resumed execution.
pub trait PowerDown {
    fn arm_timer_wake(&mut self, micros: u64);
    fn halt_and_sleep(&mut self) -> !;
}

/// Arm the wake timer for `duration` and power down.
pub fn enter_deep_sleep<P: PowerDown + ?Sized>(power: &mut P, duration: Duration) -> ! {
    let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
    info!("Entering deep sleep for {} s", duration.as_secs());
    power.arm_timer_wake(micros);
    power.halt_and_sleep()
}
