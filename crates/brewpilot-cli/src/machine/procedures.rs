//! Appliance procedures built from navigation pushes and screen waits.
//!
//! Each drink or setting request is a fixed walk through the appliance
//! menus. A walk that hits an unexpected screen fails the request (the
//! soft panic is logged and the procedure returns `false`); every other
//! fault propagates to the control loop.

use std::time::Duration;

use brewpilot_core::catalog::names::*;
use brewpilot_core::registers::Button;
use brewpilot_core::state::ApplianceState;

use super::controller::Controller;
use super::fault::{Fault, FaultResult};

/// Prompts the milk carafe leaves behind when it is not attached.
const CARAFE_PROMPTS: [&str; 6] = [
    MILK_CARAFE_ATTACH,
    MILK_CARAFE_SPOUT_CLOSED,
    MILK_CARAFE_SPOUT_OPENED,
    MILK_CARAFE_CLEAN_REQUEST,
    MILK_CARAFE_PUT_CUP_UNDER,
    MILK_CARAFE_HOT_STEAM,
];

const AROMA_TARGETS: [&str; 6] = [
    INTENSITY_GROUND_COFFEE,
    INTENSITY_1,
    INTENSITY_2,
    INTENSITY_3,
    INTENSITY_4,
    INTENSITY_5,
];

const TEMPERATURE_TARGETS: [&str; 3] = [COFFEE_TEMP_MIN, COFFEE_TEMP_MED, COFFEE_TEMP_MAX];

const POWER_ON_FAILED: &str = "Unknown state during powering on the device!";
const POWER_OFF_FAILED: &str = "Unknown state during powering off the device!";

/// A navigation push and the screen element it needs.
///
/// The appliance reuses its physical buttons for menu navigation, so
/// `Back` is the espresso button and `Down` the menu button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Nav {
    Espresso,
    Coffee,
    Aroma,
    Menu,
    Acknowledge,
    Back,
    Up,
    Down,
}

impl Nav {
    fn button(self) -> Button {
        match self {
            Nav::Espresso | Nav::Back => Button::Espresso,
            Nav::Coffee => Button::Coffee,
            Nav::Aroma | Nav::Acknowledge => Button::Aroma,
            Nav::Menu | Nav::Down => Button::Menu,
            Nav::Up => Button::Cappuccino,
        }
    }

    fn required(self) -> &'static str {
        match self {
            Nav::Espresso | Nav::Coffee | Nav::Aroma | Nav::Menu => DEFAULT_SCREEN,
            Nav::Acknowledge => ICON_ACKNOWLEDGE,
            Nav::Back => ICON_BACK,
            Nav::Up => ICON_UP,
            Nav::Down => ICON_DOWN,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Nav::Espresso => "Espresso",
            Nav::Coffee => "Coffee",
            Nav::Aroma => "Aroma",
            Nav::Menu => "Menu",
            Nav::Acknowledge => "Acknowledge",
            Nav::Back => "Back",
            Nav::Up => "Up",
            Nav::Down => "Down",
        }
    }
}

impl Controller {
    /// Push `nav` and wait for the screen to change.
    pub(super) fn navigate(&mut self, nav: Nav) -> FaultResult<()> {
        let attempts = self.session.timings().navigation_attempts;
        let settle = self.session.timings().navigation_settle;
        for _ in 0..attempts {
            if !self.session.push_button(nav.button(), nav.required())? {
                return Err(self
                    .session
                    .soft_panic(format!("{} push failed!", nav.label())));
            }
            self.session.sleep(settle);
            if self.session.check_screen_updated()? {
                return Ok(());
            }
        }
        Err(self
            .session
            .soft_panic(format!("{} push timeout!", nav.label())))
    }

    pub(super) fn go_back(&mut self) -> FaultResult<()> {
        self.navigate(Nav::Back)
    }

    /// Push `nav`, then wait for `id` to show.
    fn step_to(&mut self, nav: Nav, id: &str) -> FaultResult<()> {
        self.navigate(nav)?;
        let refresh = self.session.timings().screen_refresh;
        self.session.wait_for_mask(id, refresh)
    }

    /// Turn a soft panic into a failed procedure; other faults propagate.
    fn absorb(&self, procedure: &str, outcome: FaultResult<()>) -> FaultResult<bool> {
        match outcome {
            Ok(()) => Ok(true),
            Err(fault) if fault.is_soft_panic() => {
                self.session.events().warn(format!("{procedure}: {fault}"));
                Ok(false)
            }
            Err(fault) => Err(fault),
        }
    }

    /// Whether the appliance sits at a home screen. Updates the
    /// out-of-coffee flag from which home screen shows.
    pub(super) fn is_home_screen(&mut self) -> FaultResult<bool> {
        if self.session.check_screen(DEFAULT_SCREEN)? {
            self.set_out_of_coffee(false);
            return Ok(true);
        }
        if self.session.shows(DEFAULT_SCREEN_NO_COFFEE)? {
            self.set_out_of_coffee(true);
            return Ok(true);
        }
        Ok(false)
    }

    /// Back out of menus until a home screen shows.
    pub(super) fn return_home(&mut self) -> FaultResult<bool> {
        let step = self.session.timings().navigation_settle;
        let limit = self.session.timings().return_home_timeout;
        let mut elapsed = Duration::ZERO;
        while elapsed < limit {
            if self.is_home_screen()? {
                return Ok(true);
            }
            self.session.wait_for_initialization()?;
            let back = self.go_back();
            if !self.absorb("return home", back)? {
                return Ok(false);
            }
            elapsed += step;
        }
        Ok(false)
    }

    /// Dismiss milk carafe prompts when no carafe is fitted.
    pub(super) fn guard_carafe(&mut self) -> FaultResult<()> {
        if self.carafe_attached {
            return Ok(());
        }
        if self.session.check_any(&CARAFE_PROMPTS)? {
            let back = self.go_back();
            self.absorb("guard carafe", back)?;
        }
        Ok(())
    }

    /// Read the error text, archiving the screen when no pattern names it.
    pub(super) fn read_error_state(&mut self) -> FaultResult<String> {
        let error = self.session.error_state()?;
        if error == super::device::UNKNOWN_ERROR {
            self.session.archive_current_screen()?;
        }
        Ok(error)
    }

    /// Derive the appliance state from the status register.
    pub(super) fn diagnose(&mut self) -> FaultResult<()> {
        if self.session.is_active()? {
            if self.session.is_error()? {
                self.set_state(ApplianceState::Error);
                let error = self.read_error_state()?;
                self.set_error(error);
            } else if self.session.is_running()? {
                self.set_error("");
                self.set_state(ApplianceState::Running);
            } else {
                return Err(Fault::fatal("Unknown standard state!"));
            }
        } else if !self.session.is_standby()? {
            self.set_error("");
            self.set_state(ApplianceState::Disconnected);
        } else {
            self.set_error("");
            self.set_state(ApplianceState::Off);
        }
        Ok(())
    }

    pub(super) fn power_on(&mut self) -> FaultResult<bool> {
        if self.session.is_active()? {
            if self.session.is_error()? {
                self.set_state(ApplianceState::Error);
                let error = self.read_error_state()?;
                self.set_error(error);
                return Ok(true);
            }
            if !self.return_home()? {
                return Ok(false);
            }
            self.set_state(ApplianceState::Idle);
            return Ok(true);
        }

        if !self.session.power_on()? {
            self.set_state(ApplianceState::Disconnected);
            return Ok(true);
        }

        let poll = self.session.timings().status_poll;
        let limit = self.session.timings().switching_timeout;
        let mut elapsed = Duration::ZERO;
        while elapsed < limit {
            self.session.sleep(poll);
            if self.session.is_error()? {
                self.set_state(ApplianceState::Error);
                let error = self.read_error_state()?;
                self.set_error(error);
                return Ok(true);
            }
            if self.session.is_running()? {
                let settle = self.session.timings().power_on_settle;
                self.session.sleep(settle);
                match self.finish_power_on() {
                    Ok(true) => {
                        self.set_state(ApplianceState::Idle);
                        return Ok(true);
                    }
                    Ok(false) => {}
                    Err(fault) if fault.is_soft_panic() => {
                        self.session.events().error(format!("power on: {fault}"));
                        return Err(Fault::fatal(POWER_ON_FAILED));
                    }
                    Err(fault) => return Err(fault),
                }
            }
            elapsed += poll;
        }
        Err(Fault::fatal(POWER_ON_FAILED))
    }

    /// Leave any leftover screen and sit out the warm-up phases.
    fn finish_power_on(&mut self) -> FaultResult<bool> {
        if self.session.check_screen(ICON_BACK)? {
            self.go_back()?;
        }
        while self.session.wait_for_initialization()? {}
        self.session.check_screen(DEFAULT_SCREEN)
    }

    pub(super) fn power_off(&mut self) -> FaultResult<()> {
        if !self.session.is_powered()? {
            return self.diagnose();
        }
        if self.session.is_running()? {
            self.return_home()?;
        }
        self.session.power_off()?;

        let poll = self.session.timings().status_poll;
        let limit = self.session.timings().switching_timeout;
        let mut elapsed = Duration::ZERO;
        while elapsed < limit {
            self.session.sleep(poll);
            while self.session.wait_for_initialization()? {}
            if !self.session.is_powered()? {
                self.set_state(ApplianceState::Off);
                return Ok(());
            }
            elapsed += poll;
        }
        Err(Fault::fatal(POWER_OFF_FAILED))
    }

    /// Brew a single-button drink: push, see it start, wait it out.
    fn brew(&mut self, nav: Nav, making: &str, duration: Duration) -> FaultResult<()> {
        let refresh = self.session.timings().screen_refresh;
        self.step_to(nav, making)?;
        self.session.wait_until_done(duration)?;
        self.session.wait_for_mask(DEFAULT_SCREEN, refresh)
    }

    pub(super) fn make_espresso(&mut self) -> FaultResult<bool> {
        if self.out_of_coffee {
            return Ok(false);
        }
        let duration = self.session.timings().espresso;
        let outcome = self.brew(Nav::Espresso, MAKING_ESPRESSO, duration);
        if !self.absorb("espresso", outcome)? {
            return Ok(false);
        }
        self.is_home_screen()
    }

    pub(super) fn make_coffee(&mut self) -> FaultResult<bool> {
        if self.out_of_coffee {
            return Ok(false);
        }
        let duration = self.session.timings().coffee;
        let outcome = self.brew(Nav::Coffee, MAKING_COFFEE, duration);
        if !self.absorb("coffee", outcome)? {
            return Ok(false);
        }
        self.is_home_screen()
    }

    fn americano_steps(&mut self) -> FaultResult<()> {
        self.step_to(Nav::Menu, MENU_1_MENU)?;
        self.step_to(Nav::Down, MENU_1_DRINKS)?;
        self.step_to(Nav::Acknowledge, DRINK_AMERICANO)?;
        self.step_to(Nav::Acknowledge, MAKING_AMERICANO)?;
        let duration = self.session.timings().americano;
        let refresh = self.session.timings().screen_refresh;
        self.session.wait_until_done(duration)?;
        self.session.wait_for_mask(DEFAULT_SCREEN, refresh)
    }

    pub(super) fn make_americano(&mut self) -> FaultResult<bool> {
        if self.out_of_coffee {
            return Ok(false);
        }
        let outcome = self.americano_steps();
        if !self.absorb("americano", outcome)? {
            return Ok(false);
        }
        self.is_home_screen()
    }

    fn hot_water_steps(&mut self) -> FaultResult<()> {
        self.step_to(Nav::Menu, MENU_1_MENU)?;
        self.step_to(Nav::Down, MENU_1_DRINKS)?;
        self.step_to(Nav::Acknowledge, DRINK_AMERICANO)?;
        self.step_to(Nav::Down, DRINK_HOT_WATER)?;
        self.step_to(Nav::Acknowledge, ATTACH_HOT_WATER_SPOUT)?;
        self.step_to(Nav::Acknowledge, MAKING_HOT_WATER)?;

        // No progress bar here; the screen stays until the water stops.
        let refresh = self.session.timings().screen_refresh;
        let duration = self.session.timings().hot_water;
        let mut elapsed = Duration::ZERO;
        while elapsed < duration {
            if !self.session.check_screen(MAKING_HOT_WATER)? {
                return Err(self
                    .session
                    .soft_panic("Unknown state occurred during hot water making!"));
            }
            self.session.sleep(refresh);
            elapsed += refresh;
        }
        self.navigate(Nav::Acknowledge)
    }

    /// Dispense hot water. Refused while the milk carafe is fitted, since
    /// the hot water spout shares its outlet.
    pub(super) fn make_hot_water(&mut self) -> FaultResult<bool> {
        if self.carafe_attached {
            return Ok(false);
        }
        let outcome = self.hot_water_steps();
        if !self.absorb("hot water", outcome)? {
            return Ok(false);
        }
        let linger = self.session.timings().temporary_screen;
        self.session.sleep(linger);
        self.is_home_screen()
    }

    /// Cycle the aroma button until the intensity for `level` shows.
    pub(super) fn set_aroma(&mut self, level: i32) -> FaultResult<bool> {
        let Some(target) = usize::try_from(level)
            .ok()
            .and_then(|index| AROMA_TARGETS.get(index).copied())
        else {
            return Ok(false);
        };

        let attempts = self.session.timings().aroma_attempts;
        let mut pushes = 0;
        while !self.session.check_screen(target)? {
            pushes += 1;
            if pushes > attempts {
                return Ok(false);
            }
            let pushed = self.navigate(Nav::Aroma);
            if !self.absorb("set aroma", pushed)? {
                return Ok(false);
            }
        }
        self.is_home_screen()
    }

    fn temperature_steps(&mut self, target: &str) -> FaultResult<bool> {
        self.step_to(Nav::Menu, MENU_1_MENU)?;
        self.step_to(Nav::Acknowledge, MENU_2_QUICK_CLEAN)?;
        self.step_to(Nav::Down, MENU_2_COFFEE_TEMP)?;
        let settle = self.session.timings().navigation_settle;
        self.session.sleep(settle);
        self.step_to(Nav::Acknowledge, COFFEE_TEMP_SELECTION)?;

        let attempts = self.session.timings().temperature_attempts;
        let mut pushes = 0;
        while !self.session.check_screen(target)? {
            pushes += 1;
            if pushes > attempts {
                return Ok(false);
            }
            self.navigate(Nav::Down)?;
        }

        let refresh = self.session.timings().screen_refresh;
        let linger = self.session.timings().temporary_screen;
        self.navigate(Nav::Acknowledge)?;
        self.session.wait_for_mask(ACKNOWLEDGED, refresh)?;
        self.session.wait_for_mask(ICON_BACK, linger)?;
        Ok(true)
    }

    /// Select coffee temperature 0 (min), 1 (medium) or 2 (max).
    pub(super) fn set_temperature(&mut self, level: i32) -> FaultResult<bool> {
        let Some(target) = usize::try_from(level)
            .ok()
            .and_then(|index| TEMPERATURE_TARGETS.get(index).copied())
        else {
            return Ok(false);
        };

        match self.temperature_steps(target) {
            Ok(true) => {}
            Ok(false) => return Ok(false),
            Err(fault) if fault.is_soft_panic() => {
                self.session
                    .events()
                    .warn(format!("set temperature: {fault}"));
                return Ok(false);
            }
            Err(fault) => return Err(fault),
        }
        self.return_home()
    }
}
