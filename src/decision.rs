// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Mute decision engine.
//!
//! [`evaluate`] is a pure function of the aggregated signal state and the
//! settings. Rules, highest priority first:
//!
//! 1. A disabled service does nothing.
//! 2. During a call both volume notices are hidden. Calls never force a mute.
//! 3. Force mute is wanted when enabled and either always on or inside the window.
//! 4. Mute only when force mute is wanted, no headset is connected and there is
//!    audible volume to silence.
//! 5. Notices follow their toggles, gated on `enable_on_headset` while a headset
//!    is connected; the volume notice also needs a non-zero volume.

use crate::settings::{ForceMuteMode, Settings};
use crate::signals::SignalState;
use std::fmt;

/// Where media audio is currently going.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputDevice {
    #[default]
    Speaker,
    Headset,
}

impl OutputDevice {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputDevice::Speaker => "speaker",
            OutputDevice::Headset => "headset",
        }
    }
}

impl fmt::Display for OutputDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one evaluation. Recomputed on every update, never retained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Decision {
    pub should_mute_now: bool,
    pub output_device_notice_visible: bool,
    pub volume_notice_visible: bool,
    /// Exactly one notice is visible, so its text carries both device and volume.
    pub unified_text: bool,
    pub force_mute_notice_visible: bool,
    pub displayed_volume: u32,
    pub displayed_device: OutputDevice,
}

pub fn evaluate(state: &SignalState, settings: &Settings) -> Decision {
    let displayed_device = if state.headset_connected {
        OutputDevice::Headset
    } else {
        OutputDevice::Speaker
    };
    let mut decision = Decision {
        displayed_volume: state.media_volume,
        displayed_device,
        ..Decision::default()
    };

    if !settings.service_enabled {
        return decision;
    }

    let want_force_mute = settings.force_mute_enabled
        && !state.force_mute_suspended
        && (settings.force_mute_mode == ForceMuteMode::AlwaysOn
            || state.force_mute_window_active);
    decision.force_mute_notice_visible = want_force_mute;
    decision.should_mute_now =
        want_force_mute && !state.headset_connected && state.media_volume > 0;

    if state.call_active {
        return decision;
    }

    let headset_allows = !state.headset_connected || settings.enable_on_headset;
    decision.output_device_notice_visible = settings.show_output_device_notice && headset_allows;
    decision.volume_notice_visible =
        settings.show_volume_notice && state.media_volume > 0 && headset_allows;
    decision.unified_text =
        decision.output_device_notice_visible != decision.volume_notice_visible;

    decision
}

/// Notification-relevant fields handed to the presentation collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationUpdate {
    pub output_device_visible: bool,
    pub volume_visible: bool,
    pub unified_text: bool,
    pub force_mute_visible: bool,
    pub displayed_volume: u32,
    pub displayed_device: OutputDevice,
}

impl From<&Decision> for PresentationUpdate {
    fn from(decision: &Decision) -> Self {
        Self {
            output_device_visible: decision.output_device_notice_visible,
            volume_visible: decision.volume_notice_visible,
            unified_text: decision.unified_text,
            force_mute_visible: decision.force_mute_notice_visible,
            displayed_volume: decision.displayed_volume,
            displayed_device: decision.displayed_device,
        }
    }
}
