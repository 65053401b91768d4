//! Appliance states, request kinds, and the published status snapshot.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What the controller believes the appliance is doing.
///
/// `FatalError` is terminal for the lifetime of a controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplianceState {
    /// Powered but in standby.
    Off,
    /// No mains power.
    Disconnected,
    /// Screen lit, not necessarily at the home screen.
    Running,
    /// At the home screen, ready for drink and setting requests.
    Idle,
    /// Powering on or off.
    Switching,
    Configuring,
    Brewing,
    /// Resynchronizing with the appliance after startup or a failure.
    #[default]
    Resetting,
    /// The appliance shows an error screen.
    Error,
    FatalError,
}

impl fmt::Display for ApplianceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ApplianceState::Off => "off",
            ApplianceState::Disconnected => "disconnected",
            ApplianceState::Running => "running",
            ApplianceState::Idle => "idle",
            ApplianceState::Switching => "switching",
            ApplianceState::Configuring => "configuring",
            ApplianceState::Brewing => "brewing",
            ApplianceState::Resetting => "resetting",
            ApplianceState::Error => "error",
            ApplianceState::FatalError => "fatal_error",
        };
        f.write_str(name)
    }
}

/// Operations an outside submitter can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    GetState,
    PowerOn,
    PowerOff,
    Espresso,
    Coffee,
    Americano,
    HotWater,
    /// Parameter 0 selects ground coffee, 1..=5 the bean intensity.
    SetAroma,
    /// Parameter 0..=2 selects min, medium, max.
    SetTemperature,
}

impl RequestKind {
    /// Accepted regardless of the current state (except `FatalError`).
    pub fn allowed_from_any_state(self) -> bool {
        matches!(
            self,
            RequestKind::GetState | RequestKind::PowerOn | RequestKind::PowerOff
        )
    }

    /// State shown while the request runs.
    pub fn working_state(self) -> ApplianceState {
        match self {
            RequestKind::GetState => ApplianceState::Resetting,
            RequestKind::PowerOn | RequestKind::PowerOff => ApplianceState::Switching,
            RequestKind::Espresso
            | RequestKind::Coffee
            | RequestKind::Americano
            | RequestKind::HotWater => ApplianceState::Brewing,
            RequestKind::SetAroma | RequestKind::SetTemperature => ApplianceState::Configuring,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestKind::GetState => "get_state",
            RequestKind::PowerOn => "power_on",
            RequestKind::PowerOff => "power_off",
            RequestKind::Espresso => "espresso",
            RequestKind::Coffee => "coffee",
            RequestKind::Americano => "americano",
            RequestKind::HotWater => "hot_water",
            RequestKind::SetAroma => "set_aroma",
            RequestKind::SetTemperature => "set_temperature",
        };
        f.write_str(name)
    }
}

/// A request accepted by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub kind: RequestKind,
    #[serde(default)]
    pub parameter: i32,
}

impl Request {
    pub fn new(kind: RequestKind, parameter: i32) -> Self {
        Self { kind, parameter }
    }
}

/// Snapshot of everything the controller publishes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: ApplianceState,
    /// Error text, empty when there is none.
    pub error: String,
    /// A request is accepted and not yet finished.
    pub busy: bool,
    pub out_of_coffee: bool,
}
