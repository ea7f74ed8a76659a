use std::process;
use std::time::Duration;

use log::info;
use willow_core::power::PowerDown;

/// Ends the process in place of a deep sleep. Whatever schedules the node
/// (cron, a systemd timer, a shell loop) starts the next wake cycle.
#[derive(Default)]
pub struct ProcessPowerDown {
    armed: Option<Duration>,
}

impl PowerDown for ProcessPowerDown {
    fn arm_timer_wake(&mut self, micros: u64) {
        self.armed = Some(Duration::from_micros(micros));
    }

    fn halt_and_sleep(&mut self) -> ! {
        match self.armed {
            Some(wake) => info!("Next wake in {} s, exiting", wake.as_secs()),
            None => info!("No wake timer armed, exiting"),
        }
        log::logger().flush();
        process::exit(0)
    }
}
