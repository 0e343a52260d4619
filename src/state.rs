//! System state owned by the coordinator, and the values exchanged with it.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Window angle in degrees (0 = closed, 90 = fully open).
pub type Degree = i16;

pub const WINDOW_CLOSED: Degree = 0;
pub const WINDOW_FULLY_OPEN: Degree = 90;

/// Thermal policy state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Normal,
    Hot,
    TooHot,
    Alarm,
}

impl Status {
    /// Code sent to the actuator.
    pub fn code(self) -> i16 {
        match self {
            Status::Normal => 0,
            Status::Hot => 1,
            Status::TooHot => 2,
            Status::Alarm => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Normal => "NORMAL",
            Status::Hot => "HOT",
            Status::TooHot => "TOO-HOT",
            Status::Alarm => "ALARM",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperativeMode {
    Manual,
    Automatic,
}

impl OperativeMode {
    pub fn code(self) -> i16 {
        match self {
            OperativeMode::Manual => 0,
            OperativeMode::Automatic => 1,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            OperativeMode::Manual => OperativeMode::Automatic,
            OperativeMode::Automatic => OperativeMode::Manual,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperativeMode::Manual => "MANUAL",
            OperativeMode::Automatic => "AUTOMATIC",
        }
    }
}

impl fmt::Display for OperativeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Devices whose liveness is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    Server,
    BusPeer,
    Actuator,
}

/// One-shot manual window action, consumed by the next command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowAction {
    #[default]
    None,
    Open,
    Close,
}

impl WindowAction {
    pub fn code(self) -> i16 {
        match self {
            WindowAction::None => 0,
            WindowAction::Open => 1,
            WindowAction::Close => 2,
        }
    }
}

/// Commands accepted from the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ToggleMode,
    OpenWindow,
    CloseWindow,
    ResetAlarm,
}

/// Canonical system state. Only the coordinator mutates it; everyone else
/// receives copies.
#[derive(Debug, Clone, Serialize)]
pub struct SystemState {
    pub current_temp: f64,
    pub average_temp: f64,
    pub min_temp: f64,
    pub max_temp: f64,
    pub status: Status,
    pub status_string: &'static str,
    #[serde(rename = "sampling_interval_ms", serialize_with = "serialize_millis")]
    pub sampling_interval: Duration,
    pub operative_mode: OperativeMode,
    pub operative_mode_string: &'static str,
    pub window_position: Degree,
    pub command_window_position: Degree,
    pub devices_online: BTreeMap<Device, bool>,
    /// Start of the current continuous too-hot dwell.
    #[serde(skip)]
    pub too_hot_entered_at: Option<Instant>,
}

fn serialize_millis<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
}

impl SystemState {
    pub fn new(sampling_interval: Duration) -> Self {
        Self {
            current_temp: 0.0,
            average_temp: 0.0,
            min_temp: f64::INFINITY,
            max_temp: f64::NEG_INFINITY,
            status: Status::Normal,
            status_string: Status::Normal.as_str(),
            sampling_interval,
            operative_mode: OperativeMode::Automatic,
            operative_mode_string: OperativeMode::Automatic.as_str(),
            window_position: WINDOW_CLOSED,
            command_window_position: WINDOW_CLOSED,
            devices_online: BTreeMap::from([
                (Device::Server, true),
                (Device::BusPeer, false),
                (Device::Actuator, false),
            ]),
            too_hot_entered_at: None,
        }
    }

    pub fn is_online(&self, device: Device) -> bool {
        self.devices_online.get(&device).copied().unwrap_or(false)
    }

    /// Returns true if the flag actually changed.
    pub fn set_online(&mut self, device: Device, online: bool) -> bool {
        self.devices_online.insert(device, online) != Some(online)
    }

    pub fn set_status(&mut self, status: Status) {
        self.status = status;
        self.status_string = status.as_str();
    }

    pub fn toggle_mode(&mut self) {
        self.operative_mode = self.operative_mode.toggled();
        self.operative_mode_string = self.operative_mode.as_str();
        tracing::info!("Operative mode is now {}", self.operative_mode);
    }
}

/// Decoded reading from the actuator, one per read cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorReading {
    pub window_position: Degree,
    /// True only on the cycle where the button went from released to pressed.
    pub button_pressed: bool,
}

/// Command frame contents sent to the actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorCommand {
    pub temperature: i16,
    pub operative_mode: i16,
    pub window_action: i16,
    pub system_status: i16,
    pub window_angle: Degree,
}

impl ActuatorCommand {
    pub fn from_state(state: &SystemState, action: WindowAction) -> Self {
        Self {
            temperature: state.current_temp as i16,
            operative_mode: state.operative_mode.code(),
            window_action: action.code(),
            system_status: state.status.code(),
            window_angle: state.command_window_position,
        }
    }
}
