// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! User settings snapshot consumed by the watcher.

use crate::schedule::{ScheduleWindow, MINUTES_PER_DAY};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("Minute of day out of range: {0} (expected 0..1440)")]
    MinuteOutOfRange(u32),
    #[error("Unknown setting: {0}")]
    UnknownField(String),
    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },
}

/// When force mute applies once enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForceMuteMode {
    AlwaysOn,
    #[default]
    Scheduled,
}

impl ForceMuteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForceMuteMode::AlwaysOn => "always_on",
            ForceMuteMode::Scheduled => "scheduled",
        }
    }
}

impl FromStr for ForceMuteMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always_on" => Ok(ForceMuteMode::AlwaysOn),
            "scheduled" => Ok(ForceMuteMode::Scheduled),
            _ => Err(()),
        }
    }
}

/// Watcher settings.
///
/// Minutes are validated when settings enter the process; code past that
/// boundary assumes they are in `0..1440`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub service_enabled: bool,
    /// Keep showing notices while a headset is connected.
    pub enable_on_headset: bool,
    pub show_output_device_notice: bool,
    pub show_volume_notice: bool,
    pub force_mute_enabled: bool,
    pub force_mute_mode: ForceMuteMode,
    pub force_mute_from: u16,
    pub force_mute_to: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service_enabled: true,
            enable_on_headset: false,
            show_output_device_notice: true,
            show_volume_notice: true,
            force_mute_enabled: false,
            force_mute_mode: ForceMuteMode::Scheduled,
            force_mute_from: 22 * 60,
            force_mute_to: 7 * 60,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        check_minute(u32::from(self.force_mute_from))?;
        check_minute(u32::from(self.force_mute_to))?;
        Ok(())
    }

    pub fn window(&self) -> ScheduleWindow {
        ScheduleWindow::clamped(self.force_mute_from, self.force_mute_to)
    }

    /// Apply a single field change.
    pub fn apply(&mut self, change: &SettingsChange) {
        match *change {
            SettingsChange::ServiceEnabled(v) => self.service_enabled = v,
            SettingsChange::EnableOnHeadset(v) => self.enable_on_headset = v,
            SettingsChange::ShowOutputDeviceNotice(v) => self.show_output_device_notice = v,
            SettingsChange::ShowVolumeNotice(v) => self.show_volume_notice = v,
            SettingsChange::ForceMuteEnabled(v) => self.force_mute_enabled = v,
            SettingsChange::ForceMuteMode(v) => self.force_mute_mode = v,
            SettingsChange::ForceMuteFrom(v) => self.force_mute_from = v,
            SettingsChange::ForceMuteTo(v) => self.force_mute_to = v,
        }
    }
}

fn check_minute(minute: u32) -> Result<u16, SettingsError> {
    if minute >= u32::from(MINUTES_PER_DAY) {
        return Err(SettingsError::MinuteOutOfRange(minute));
    }
    Ok(minute as u16)
}

/// A change to one settings field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsChange {
    ServiceEnabled(bool),
    EnableOnHeadset(bool),
    ShowOutputDeviceNotice(bool),
    ShowVolumeNotice(bool),
    ForceMuteEnabled(bool),
    ForceMuteMode(ForceMuteMode),
    ForceMuteFrom(u16),
    ForceMuteTo(u16),
}

impl SettingsChange {
    /// Parse a `field`/`value` pair as received from a client.
    ///
    /// Field names match the keys of the settings file.
    pub fn parse(field: &str, value: &str) -> Result<Self, SettingsError> {
        let invalid = || SettingsError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        };
        let flag = || value.trim().parse::<bool>().map_err(|_| invalid());
        let minute = || {
            let minute = value.trim().parse::<u32>().map_err(|_| invalid())?;
            check_minute(minute)
        };

        Ok(match field {
            "service_enabled" => SettingsChange::ServiceEnabled(flag()?),
            "enable_on_headset" => SettingsChange::EnableOnHeadset(flag()?),
            "show_output_device_notice" => SettingsChange::ShowOutputDeviceNotice(flag()?),
            "show_volume_notice" => SettingsChange::ShowVolumeNotice(flag()?),
            "force_mute_enabled" => SettingsChange::ForceMuteEnabled(flag()?),
            "force_mute_mode" => {
                SettingsChange::ForceMuteMode(value.trim().parse().map_err(|_| invalid())?)
            }
            "force_mute_from" => SettingsChange::ForceMuteFrom(minute()?),
            "force_mute_to" => SettingsChange::ForceMuteTo(minute()?),
            other => return Err(SettingsError::UnknownField(other.to_string())),
        })
    }

    pub fn field(&self) -> &'static str {
        match self {
            SettingsChange::ServiceEnabled(_) => "service_enabled",
            SettingsChange::EnableOnHeadset(_) => "enable_on_headset",
            SettingsChange::ShowOutputDeviceNotice(_) => "show_output_device_notice",
            SettingsChange::ShowVolumeNotice(_) => "show_volume_notice",
            SettingsChange::ForceMuteEnabled(_) => "force_mute_enabled",
            SettingsChange::ForceMuteMode(_) => "force_mute_mode",
            SettingsChange::ForceMuteFrom(_) => "force_mute_from",
            SettingsChange::ForceMuteTo(_) => "force_mute_to",
        }
    }

    /// Whether the change can move the force-mute window or its alarms.
    pub fn affects_force_mute(&self) -> bool {
        matches!(
            self,
            SettingsChange::ForceMuteEnabled(_)
                | SettingsChange::ForceMuteMode(_)
                | SettingsChange::ForceMuteFrom(_)
                | SettingsChange::ForceMuteTo(_)
        )
    }
}

impl fmt::Display for SettingsChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsChange::ServiceEnabled(v)
            | SettingsChange::EnableOnHeadset(v)
            | SettingsChange::ShowOutputDeviceNotice(v)
            | SettingsChange::ShowVolumeNotice(v)
            | SettingsChange::ForceMuteEnabled(v) => write!(f, "{}={}", self.field(), v),
            SettingsChange::ForceMuteMode(m) => write!(f, "{}={}", self.field(), m.as_str()),
            SettingsChange::ForceMuteFrom(m) | SettingsChange::ForceMuteTo(m) => {
                write!(f, "{}={}", self.field(), m)
            }
        }
    }
}
