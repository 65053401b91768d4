//! Timing constants for the control loop and device session.
//!
//! Every wait in the controller is derived from these values.

use std::time::Duration;

const fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    /// Pause between polls while a virtual push completes.
    pub button_poll_delay: Duration,
    pub button_poll_attempts: u32,
    /// Pause between status and screen polls in every wait loop.
    pub status_poll: Duration,
    /// Ceiling for one calibrating/heating/rinsing phase.
    pub initialization_timeout: Duration,
    pub progress_bar_appear_timeout: Duration,
    /// Pushes a navigation helper tries before giving up.
    pub navigation_attempts: u32,
    /// Settle time after a navigation push before checking for a new screen.
    pub navigation_settle: Duration,
    pub return_home_timeout: Duration,
    pub switching_timeout: Duration,
    /// Time the display takes to show a new frame.
    pub screen_refresh: Duration,
    /// Lifetime of transient confirmation screens.
    pub temporary_screen: Duration,
    /// Quiet period required after a manual button push.
    pub manual_settle: Duration,
    pub main_loop: Duration,
    pub fatal_idle: Duration,
    pub reset_low: Duration,
    pub reset_settle: Duration,
    pub power_on_settle: Duration,
    /// Upper bound for a procedure already running when a reset starts.
    pub max_procedure_wait: Duration,
    pub espresso: Duration,
    pub coffee: Duration,
    pub americano: Duration,
    pub hot_water: Duration,
    pub aroma_attempts: u32,
    pub temperature_attempts: u32,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            button_poll_delay: ms(50),
            button_poll_attempts: 20,
            status_poll: ms(500),
            initialization_timeout: ms(25_000),
            progress_bar_appear_timeout: ms(5_000),
            navigation_attempts: 3,
            navigation_settle: ms(500),
            return_home_timeout: ms(10_000),
            switching_timeout: ms(5_000),
            screen_refresh: ms(1_500),
            temporary_screen: ms(5_000),
            manual_settle: ms(5_000),
            main_loop: ms(500),
            fatal_idle: ms(1_000),
            reset_low: ms(500),
            reset_settle: ms(1_500),
            power_on_settle: ms(1_000),
            max_procedure_wait: ms(120_000),
            espresso: ms(60_000),
            coffee: ms(65_000),
            americano: ms(100_000),
            hot_water: ms(50_000),
            aroma_attempts: 5,
            temperature_attempts: 2,
        }
    }
}
