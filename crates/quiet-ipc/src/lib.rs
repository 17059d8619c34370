// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Shared IPC types and D-Bus interface definitions for Quiet.
//!
//! This crate defines the protocol between the Quiet daemon and the platform
//! bridge that feeds it volume, headset and call events.

use quiet::{PresentationUpdate, WatcherSnapshot};
use serde::{Deserialize, Serialize};
use zbus::zvariant::Type;

/// D-Bus service name for the Quiet daemon.
pub const DBUS_NAME: &str = "org.quiet.Watcher";

/// D-Bus object path for the watcher interface.
pub const DBUS_PATH: &str = "/org/quiet/Watcher";

/// D-Bus interface name.
pub const DBUS_INTERFACE: &str = "org.quiet.Watcher";

/// Notification-relevant state, as sent with `PresentationChanged`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Type)]
pub struct PresentationInfo {
    /// Whether the output-device notice should be shown.
    pub output_device_visible: bool,
    /// Whether the volume-level notice should be shown.
    pub volume_visible: bool,
    /// Only one notice is shown, so it carries both device and volume.
    pub unified_text: bool,
    /// Whether the "force mute active" notice should be shown.
    pub force_mute_visible: bool,
    /// Media volume level to display.
    pub volume: u32,
    /// Current output device: "speaker" or "headset".
    pub device: String,
}

impl From<&PresentationUpdate> for PresentationInfo {
    fn from(update: &PresentationUpdate) -> Self {
        Self {
            output_device_visible: update.output_device_visible,
            volume_visible: update.volume_visible,
            unified_text: update.unified_text,
            force_mute_visible: update.force_mute_visible,
            volume: update.displayed_volume,
            device: update.displayed_device.as_str().to_string(),
        }
    }
}

/// Full watcher status returned by `GetStatus`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Type)]
pub struct StatusInfo {
    /// Current media volume level.
    pub media_volume: u32,
    pub headset_connected: bool,
    pub call_active: bool,
    /// Whether the clock is inside the force-mute window.
    pub force_mute_window_active: bool,
    /// Whether the user switched force mute off until the next window start.
    pub force_mute_suspended: bool,
    /// Whether force-mute alarms are armed.
    pub alarms_armed: bool,
    /// Whether the current state calls for muting.
    pub should_mute: bool,
    pub presentation: PresentationInfo,
}

impl From<&WatcherSnapshot> for StatusInfo {
    fn from(snapshot: &WatcherSnapshot) -> Self {
        let presentation = PresentationUpdate::from(&snapshot.decision);
        Self {
            media_volume: snapshot.state.media_volume,
            headset_connected: snapshot.state.headset_connected,
            call_active: snapshot.state.call_active,
            force_mute_window_active: snapshot.state.force_mute_window_active,
            force_mute_suspended: snapshot.state.force_mute_suspended,
            alarms_armed: snapshot.alarms_armed,
            should_mute: snapshot.decision.should_mute_now,
            presentation: PresentationInfo::from(&presentation),
        }
    }
}

/// Error types for daemon operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DaemonError {
    #[error("Watcher not running")]
    WatcherUnavailable,
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Config error: {0}")]
    Config(String),
}

impl From<DaemonError> for zbus::fdo::Error {
    fn from(e: DaemonError) -> Self {
        match e {
            DaemonError::InvalidArgument(msg) => zbus::fdo::Error::InvalidArgs(msg),
            other => zbus::fdo::Error::Failed(other.to_string()),
        }
    }
}
