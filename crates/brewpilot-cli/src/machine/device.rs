//! Device session: polling, virtual button pushes, and screen waits.
//!
//! Every query polls the microcontroller before answering, so results always
//! reflect the current register state. The most recent framebuffer is kept
//! so callers can compare consecutive polls.

use std::sync::Arc;
use std::time::Duration;

use brewpilot_core::catalog::names::{
    INITIALIZATION_CALIBRATING, INITIALIZATION_HEATING, INITIALIZATION_RINSING, PROGRESS_BAR,
};
use brewpilot_core::catalog::PatternCatalog;
use brewpilot_core::registers::{
    assemble_framebuffer, Button, CommandRegister, InputRegister, HOLDING_REGISTER_ADDRESS,
    INPUT_REGISTER_ADDRESS, SCREEN_BLOCK_ADDRESSES, SCREEN_BLOCK_LEN,
};
use brewpilot_core::screen::Screen;
use tracing::debug;

use super::bus::{BusError, RegisterBus};
use super::event_log::EventLog;
use super::fault::{Fault, FaultResult, RegisterSnapshot};
use super::timings::Timings;

/// Returned by [`DeviceSession::error_state`] for an error screen that no
/// cataloged pattern matches.
pub const UNKNOWN_ERROR: &str = "Unknown!";

/// Busy phases the appliance walks through after power-on or a cleaning.
const INITIALIZATION_PHASES: [(&str, &str); 3] = [
    (INITIALIZATION_CALIBRATING, "calibrating"),
    (INITIALIZATION_HEATING, "heating"),
    (INITIALIZATION_RINSING, "rinsing"),
];

/// Blocking sleep, swappable in tests.
pub trait Delay: Send {
    fn sleep(&mut self, duration: Duration);
}

pub struct ThreadDelay;

impl Delay for ThreadDelay {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

pub struct DeviceSession {
    bus: Box<dyn RegisterBus>,
    delay: Box<dyn Delay>,
    catalog: PatternCatalog,
    timings: Timings,
    events: Arc<EventLog>,
    input: InputRegister,
    command: CommandRegister,
    screen: Screen,
}

impl DeviceSession {
    pub fn new(
        bus: Box<dyn RegisterBus>,
        delay: Box<dyn Delay>,
        catalog: PatternCatalog,
        timings: Timings,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            bus,
            delay,
            catalog,
            timings,
            events,
            input: InputRegister::default(),
            command: CommandRegister::new(),
            screen: Screen::blank(),
        }
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    pub fn catalog(&self) -> &PatternCatalog {
        &self.catalog
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    /// Framebuffer from the most recent screen poll.
    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    pub fn snapshot(&self) -> RegisterSnapshot {
        RegisterSnapshot {
            input: self.input,
            command: self.command,
        }
    }

    pub fn sleep(&mut self, duration: Duration) {
        self.delay.sleep(duration);
    }

    pub fn soft_panic(&self, message: impl Into<String>) -> Fault {
        Fault::SoftPanic {
            message: message.into(),
            snapshot: self.snapshot(),
        }
    }

    fn device_fault(&self, message: impl Into<String>) -> Fault {
        Fault::Device {
            message: message.into(),
            snapshot: self.snapshot(),
        }
    }

    fn bus_fault(&self, err: BusError) -> Fault {
        match Fault::from(err) {
            Fault::Device { message, .. } => self.device_fault(message),
            other => other,
        }
    }

    /// Poll the status register.
    ///
    /// A manual push while the screen is lit invalidates whatever the caller
    /// assumed about the appliance, so it is raised as a fault.
    pub fn read_status(&mut self) -> FaultResult<InputRegister> {
        let words = self
            .bus
            .read_input_registers(INPUT_REGISTER_ADDRESS, 1)
            .map_err(|e| self.bus_fault(e))?;
        let Some(&raw) = words.first() else {
            return Err(self.device_fault("Empty status response!"));
        };
        self.input = InputRegister::new(raw);

        if self.input.is_active() && self.input.manual_push_detected() {
            return Err(Fault::ManualInterference {
                snapshot: self.snapshot(),
            });
        }
        if self.input.is_active() && self.input.push_failed() {
            self.events
                .warn(format!("Button push failed! [{}]", self.snapshot()));
        }
        Ok(self.input)
    }

    /// Poll the status register, then the framebuffer.
    pub fn read_screen(&mut self) -> FaultResult<&Screen> {
        let input = self.read_status()?;
        if input.is_running_screen() && !input.capture_healthy() {
            return Err(self.device_fault("Screen capture failed!"));
        }
        if input.is_running_screen() && !input.register_handler_healthy() {
            return Err(self.device_fault("Register reading failed!"));
        }

        let mut blocks = Vec::with_capacity(SCREEN_BLOCK_ADDRESSES.len());
        for address in SCREEN_BLOCK_ADDRESSES {
            let block = self
                .bus
                .read_input_registers(address, SCREEN_BLOCK_LEN)
                .map_err(|e| self.bus_fault(e))?;
            if block.len() != usize::from(SCREEN_BLOCK_LEN) {
                return Err(self.device_fault(format!(
                    "Screen block {} returned {} registers!",
                    address,
                    block.len()
                )));
            }
            blocks.push(block);
        }
        self.screen = assemble_framebuffer(&blocks);
        Ok(&self.screen)
    }

    pub fn is_powered(&mut self) -> FaultResult<bool> {
        Ok(self.read_status()?.is_powered())
    }

    pub fn is_standby(&mut self) -> FaultResult<bool> {
        Ok(self.read_status()?.is_standby())
    }

    pub fn is_active(&mut self) -> FaultResult<bool> {
        Ok(self.read_status()?.is_active())
    }

    pub fn is_error(&mut self) -> FaultResult<bool> {
        Ok(self.read_status()?.is_error_screen())
    }

    pub fn is_running(&mut self) -> FaultResult<bool> {
        Ok(self.read_status()?.is_running_screen())
    }

    /// Whether the last polled screen shows pattern `id`.
    pub fn shows(&self, id: &str) -> FaultResult<bool> {
        self.catalog
            .get(id)
            .map(|pattern| pattern.fits(&self.screen))
            .ok_or_else(|| Fault::fatal(format!("Pattern {id} is not in the database!")))
    }

    /// Poll, then test the screen against one pattern.
    pub fn check_screen(&mut self, id: &str) -> FaultResult<bool> {
        self.read_screen()?;
        self.shows(id)
    }

    /// Poll, then test the screen against any of `ids`.
    pub fn check_any(&mut self, ids: &[&str]) -> FaultResult<bool> {
        self.read_screen()?;
        for id in ids {
            if self.shows(id)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Poll and report whether the framebuffer differs from the previous poll.
    pub fn check_screen_updated(&mut self) -> FaultResult<bool> {
        let previous = self.screen.clone();
        let current = self.read_screen()?;
        Ok(*current != previous)
    }

    fn write_command(&mut self, value: u16) -> FaultResult<()> {
        self.bus
            .write_holding_register(HOLDING_REGISTER_ADDRESS, value)
            .map_err(|e| self.bus_fault(e))
    }

    /// Press `button` and wait for the microcontroller to press and release it.
    fn send_push(&mut self, button: Button) -> FaultResult<()> {
        self.command.push(button);
        let value = self.command.raw();
        self.command.release(button);
        self.write_command(value)?;
        debug!("pushed {} (command 0x{:04x})", button, value);

        let attempts = self.timings.button_poll_attempts;
        let pause = self.timings.button_poll_delay;
        for _ in 0..attempts {
            if self.read_status()?.is_pushed(button) {
                break;
            }
            self.sleep(pause);
        }
        for _ in 0..attempts {
            if !self.read_status()?.is_pushed(button) {
                return Ok(());
            }
            self.sleep(pause);
        }
        Err(self.device_fault("Button push operation timed out!"))
    }

    /// Push a navigation button if the screen allows it.
    ///
    /// Returns `Ok(false)` without touching the bus when `button` is the
    /// power button or the screen does not show `required`.
    pub fn push_button(&mut self, button: Button, required: &str) -> FaultResult<bool> {
        self.read_screen()?;
        if button == Button::Power || !self.shows(required)? {
            return Ok(false);
        }
        self.send_push(button)?;
        Ok(true)
    }

    /// Wait out a calibrating, heating or rinsing phase if one is showing.
    ///
    /// Each phase is a distinct screen, so callers loop until this returns
    /// `false` to get past all of them. Returns whether any waiting happened.
    pub fn wait_for_initialization(&mut self) -> FaultResult<bool> {
        self.read_screen()?;
        let mut phase = None;
        for (id, label) in INITIALIZATION_PHASES {
            if self.shows(id)? {
                phase = Some((id, label));
                break;
            }
        }
        let Some((id, label)) = phase else {
            return Ok(false);
        };

        let poll = self.timings.status_poll;
        let mut waited = Duration::ZERO;
        while waited < self.timings.initialization_timeout {
            if !self.check_screen(id)? {
                return Ok(waited > Duration::ZERO);
            }
            if self.input.is_error_screen() {
                return Err(self.soft_panic(format!("Error occurred during {label}!")));
            }
            self.sleep(poll);
            waited += poll;
        }
        Err(self.soft_panic(format!("Operation {label} timed out!")))
    }

    /// Poll until pattern `id` shows, sitting out initialization phases.
    pub fn wait_for_mask(&mut self, id: &str, timeout: Duration) -> FaultResult<()> {
        let poll = self.timings.status_poll;
        let mut waited = Duration::ZERO;
        while waited < timeout {
            if self.check_screen(id)? {
                return Ok(());
            }
            self.wait_for_initialization()?;
            if self.input.is_error_screen() {
                return Err(self.soft_panic(format!("Error occurred while waiting for {id}!")));
            }
            self.sleep(poll);
            waited += poll;
        }
        Err(self.soft_panic(format!("Waiting for {id} timed out!")))
    }

    /// Poll until pattern `id` is gone.
    pub fn wait_while(&mut self, id: &str, timeout: Duration) -> FaultResult<()> {
        let poll = self.timings.status_poll;
        let mut waited = Duration::ZERO;
        while waited < timeout {
            if !self.check_screen(id)? {
                return Ok(());
            }
            if self.input.is_error_screen() {
                return Err(self.soft_panic(format!("Error occurred during {id}!")));
            }
            self.sleep(poll);
            waited += poll;
        }
        Err(self.soft_panic(format!("{id} did not finish in time!")))
    }

    /// Wait for the progress bar to appear, then for it to disappear.
    pub fn wait_until_done(&mut self, timeout: Duration) -> FaultResult<()> {
        let appear = self.timings.progress_bar_appear_timeout;
        if let Err(fault) = self.wait_for_mask(PROGRESS_BAR, appear) {
            if !fault.is_soft_panic() {
                return Err(fault);
            }
            self.events.warn(format!("wait_until_done: {fault}"));
            return Err(self.soft_panic("Waiting for progress bar timed out!"));
        }

        let poll = self.timings.status_poll;
        let mut waited = Duration::ZERO;
        while waited < timeout {
            if !self.check_screen(PROGRESS_BAR)? {
                return Ok(());
            }
            if self.input.is_error_screen() {
                return Err(self.soft_panic("Error occurred during progress bar!"));
            }
            self.sleep(poll);
            waited += poll;
        }
        Err(self.soft_panic("Progress bar timed out!"))
    }

    /// Name of the error the appliance shows, or an empty string.
    pub fn error_state(&mut self) -> FaultResult<String> {
        self.read_screen()?;
        if !self.input.is_error_screen() {
            return Ok(String::new());
        }
        Ok(self
            .catalog
            .first_error_fit(&self.screen)
            .map(|pattern| pattern.id().to_string())
            .unwrap_or_else(|| UNKNOWN_ERROR.to_string()))
    }

    /// Wake the appliance from standby.
    ///
    /// Returns `Ok(false)` when there is no mains power.
    pub fn power_on(&mut self) -> FaultResult<bool> {
        let input = self.read_status()?;
        if input.is_running_screen() || input.is_error_screen() {
            return Ok(true);
        }
        if !input.is_standby() {
            return Ok(false);
        }
        self.send_push(Button::Power)?;
        Ok(true)
    }

    pub fn power_off(&mut self) -> FaultResult<()> {
        if !self.is_powered()? {
            return Ok(());
        }
        self.send_push(Button::Power)
    }

    /// Poll the screen and add it to the catalog if it is new.
    ///
    /// The partition follows the error bit of the same poll.
    pub fn archive_current_screen(&mut self) -> FaultResult<Option<String>> {
        self.read_screen()?;
        let is_error = self.input.is_error_screen();
        let id = self.catalog.archive(&self.screen, is_error);
        if let Some(id) = &id {
            self.events
                .info(format!("Archived unknown screen as {id} (error: {is_error})"));
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::sim::{self, SimBus, SimFrame, RUNNING, STANDBY};
    use brewpilot_core::catalog::names::*;

    fn session(bus: &SimBus) -> (DeviceSession, sim::RecordingDelay) {
        let delay = sim::RecordingDelay::default();
        let session = DeviceSession::new(
            Box::new(bus.clone()),
            Box::new(delay.clone()),
            sim::catalog(),
            Timings::default(),
            Arc::new(EventLog::in_memory()),
        );
        (session, delay)
    }

    #[test]
    fn home_screen_reports_no_error() {
        let bus = SimBus::new(vec![SimFrame::running(&[DEFAULT_SCREEN])]);
        let (mut session, _) = session(&bus);
        assert_eq!(session.error_state().unwrap(), "");
        assert!(session.check_screen(DEFAULT_SCREEN).unwrap());
    }

    #[test]
    fn error_screen_named_by_first_fit() {
        let bus = SimBus::new(vec![SimFrame::error(&[ERROR_NO_WATER, ERROR_NO_COFFEE])]);
        let (mut session, _) = session(&bus);
        assert_eq!(session.error_state().unwrap(), ERROR_NO_WATER);
    }

    #[test]
    fn unknown_error_screen() {
        let bus = SimBus::new(vec![SimFrame::error(&[ICON_BACK])]);
        let (mut session, _) = session(&bus);
        assert_eq!(session.error_state().unwrap(), UNKNOWN_ERROR);

        let id = session.archive_current_screen().unwrap().expect("archived");
        assert_eq!(session.error_state().unwrap(), id);
        assert_eq!(session.archive_current_screen().unwrap(), None);
    }

    #[test]
    fn push_refused_when_required_pattern_missing() {
        let bus = SimBus::new(vec![SimFrame::running(&[MENU_1_MENU])]);
        let (mut session, _) = session(&bus);
        assert!(!session.push_button(Button::Espresso, DEFAULT_SCREEN).unwrap());
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn power_button_never_pushed_through_navigation() {
        let bus = SimBus::new(vec![SimFrame::running(&[DEFAULT_SCREEN])]);
        let (mut session, _) = session(&bus);
        assert!(!session.push_button(Button::Power, DEFAULT_SCREEN).unwrap());
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn push_writes_single_button_bit() {
        let bus = SimBus::new(vec![SimFrame::running(&[DEFAULT_SCREEN])]);
        let (mut session, delay) = session(&bus);
        assert!(session.push_button(Button::Aroma, DEFAULT_SCREEN).unwrap());
        assert_eq!(bus.writes(), vec![1 << 6]);
        // Pressed on the first poll, released on the second: no waiting.
        assert!(delay.sleeps().is_empty());
    }

    #[test]
    fn stuck_button_is_device_fault() {
        let bus = SimBus::new(vec![SimFrame::running(&[DEFAULT_SCREEN])]);
        bus.set_stuck_buttons(true);
        let (mut session, delay) = session(&bus);
        let fault = session.push_button(Button::Menu, DEFAULT_SCREEN).unwrap_err();
        match fault {
            Fault::Device { message, snapshot } => {
                assert_eq!(message, "Button push operation timed out!");
                assert!(snapshot.input.is_pushed(Button::Menu));
            }
            other => panic!("expected device fault, got {other:?}"),
        }
        assert_eq!(delay.sleeps().len(), 20);
    }

    #[test]
    fn manual_push_raises_interference() {
        let bus = SimBus::new(vec![SimFrame::running(&[DEFAULT_SCREEN]).manual()]);
        let (mut session, _) = session(&bus);
        assert!(matches!(
            session.read_status(),
            Err(Fault::ManualInterference { .. })
        ));
    }

    #[test]
    fn manual_bit_ignored_while_screen_dark() {
        let bus = SimBus::new(vec![SimFrame::with_status(STANDBY | sim::MANUAL_PUSH, &[])]);
        let (mut session, _) = session(&bus);
        assert!(session.is_standby().unwrap());
    }

    #[test]
    fn unhealthy_capture_is_device_fault() {
        let bus = SimBus::new(vec![SimFrame::with_status(
            RUNNING & !sim::CAPTURE_HEALTHY,
            &[DEFAULT_SCREEN],
        )]);
        let (mut session, _) = session(&bus);
        match session.read_screen() {
            Err(Fault::Device { message, .. }) => assert_eq!(message, "Screen capture failed!"),
            other => panic!("expected device fault, got {other:?}"),
        }
    }

    #[test]
    fn bus_timeout_surfaces_as_timeout() {
        let bus = SimBus::new(vec![SimFrame::running(&[DEFAULT_SCREEN])]);
        bus.set_timeout(true);
        let (mut session, _) = session(&bus);
        assert!(matches!(session.read_status(), Err(Fault::Timeout(_))));
    }

    #[test]
    fn heating_that_clears_after_two_intervals() {
        let heating = SimFrame::running(&[INITIALIZATION_HEATING]);
        let bus = SimBus::new(vec![
            heating.clone(),
            heating.clone(),
            heating,
            SimFrame::running(&[DEFAULT_SCREEN]),
        ]);
        let (mut session, delay) = session(&bus);

        assert!(session.wait_for_initialization().unwrap());
        assert_eq!(delay.sleeps(), vec![Duration::from_millis(500); 2]);
        assert!(!session.wait_for_initialization().unwrap());
    }

    #[test]
    fn initialization_not_showing() {
        let bus = SimBus::new(vec![SimFrame::running(&[DEFAULT_SCREEN])]);
        let (mut session, delay) = session(&bus);
        assert!(!session.wait_for_initialization().unwrap());
        assert!(delay.sleeps().is_empty());
    }

    #[test]
    fn initialization_timeout_is_soft_panic() {
        let bus = SimBus::new(vec![SimFrame::running(&[INITIALIZATION_RINSING])]);
        let (mut session, delay) = session(&bus);
        match session.wait_for_initialization() {
            Err(Fault::SoftPanic { message, .. }) => {
                assert_eq!(message, "Operation rinsing timed out!")
            }
            other => panic!("expected soft panic, got {other:?}"),
        }
        assert_eq!(delay.total(), Duration::from_secs(25));
    }

    #[test]
    fn wait_for_mask_times_out() {
        let bus = SimBus::new(vec![SimFrame::running(&[DEFAULT_SCREEN])]);
        let (mut session, delay) = session(&bus);
        let fault = session
            .wait_for_mask(MAKING_ESPRESSO, Duration::from_millis(1500))
            .unwrap_err();
        assert!(fault.is_soft_panic());
        assert_eq!(delay.sleeps().len(), 3);
    }

    #[test]
    fn wait_for_mask_panics_on_error_screen() {
        let bus = SimBus::new(vec![SimFrame::error(&[ERROR_NO_WATER])]);
        let (mut session, _) = session(&bus);
        let fault = session
            .wait_for_mask(MAKING_ESPRESSO, Duration::from_secs(5))
            .unwrap_err();
        assert!(fault.to_string().starts_with("Error occurred while waiting"));
    }

    #[test]
    fn wait_until_done_follows_progress_bar() {
        let brewing = SimFrame::running(&[MAKING_ESPRESSO, PROGRESS_BAR]);
        let bus = SimBus::new(vec![
            brewing.clone(),
            brewing.clone(),
            brewing,
            SimFrame::running(&[DEFAULT_SCREEN]),
        ]);
        let (mut session, delay) = session(&bus);
        session.wait_until_done(Duration::from_secs(60)).unwrap();
        assert_eq!(delay.sleeps().len(), 2);
    }

    #[test]
    fn wait_while_returns_once_screen_changes() {
        let making = SimFrame::running(&[MAKING_HOT_WATER]);
        let bus = SimBus::new(vec![making.clone(), making, SimFrame::running(&[DEFAULT_SCREEN])]);
        let (mut session, delay) = session(&bus);
        session
            .wait_while(MAKING_HOT_WATER, Duration::from_secs(60))
            .unwrap();
        assert_eq!(delay.sleeps().len(), 2);
    }

    #[test]
    fn missing_progress_bar_is_soft_panic() {
        let bus = SimBus::new(vec![SimFrame::running(&[DEFAULT_SCREEN])]);
        let (mut session, _) = session(&bus);
        match session.wait_until_done(Duration::from_secs(60)) {
            Err(Fault::SoftPanic { message, .. }) => {
                assert_eq!(message, "Waiting for progress bar timed out!")
            }
            other => panic!("expected soft panic, got {other:?}"),
        }
    }

    #[test]
    fn screen_updated_compares_against_previous_poll() {
        let bus = SimBus::new(vec![
            SimFrame::running(&[DEFAULT_SCREEN]),
            SimFrame::running(&[MENU_1_MENU]),
        ]);
        let (mut session, _) = session(&bus);
        session.read_screen().unwrap();
        assert!(session.check_screen_updated().unwrap());
        assert!(!session.check_screen_updated().unwrap());
    }

    #[test]
    fn power_on_from_standby_pushes_power() {
        let bus = SimBus::new(vec![SimFrame::with_status(STANDBY, &[])]);
        let (mut session, _) = session(&bus);
        assert!(session.power_on().unwrap());
        assert_eq!(bus.writes(), vec![1 << 8]);
    }

    #[test]
    fn power_on_without_mains() {
        let bus = SimBus::new(vec![SimFrame::with_status(0, &[])]);
        let (mut session, _) = session(&bus);
        assert!(!session.power_on().unwrap());
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn power_on_when_already_running() {
        let bus = SimBus::new(vec![SimFrame::running(&[DEFAULT_SCREEN])]);
        let (mut session, _) = session(&bus);
        assert!(session.power_on().unwrap());
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn power_off_is_noop_when_unpowered() {
        let bus = SimBus::new(vec![SimFrame::with_status(STANDBY, &[])]);
        let (mut session, _) = session(&bus);
        session.power_off().unwrap();
        assert!(bus.writes().is_empty());
    }
}
