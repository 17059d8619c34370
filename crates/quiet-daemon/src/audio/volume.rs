// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Default sink volume control using wpctl.

use std::process::Command;
use thiserror::Error;
use tracing::{debug, error, info};

const DEFAULT_SINK: &str = "@DEFAULT_AUDIO_SINK@";

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("Failed to execute wpctl: {0}")]
    WpctlFailed(String),
    #[error("Volume operation failed: {0}")]
    OperationFailed(String),
}

fn wpctl(args: &[&str]) -> Result<String, VolumeError> {
    let output = Command::new("wpctl").args(args).output().map_err(|e| {
        error!("Failed to execute wpctl: {}", e);
        VolumeError::WpctlFailed(e.to_string())
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(VolumeError::OperationFailed(format!(
            "wpctl {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Set volume on the default sink (linear scale: 0.0 = silent, 1.0 = 100%).
pub fn set_default_sink_volume(volume: f32) -> Result<(), VolumeError> {
    let volume_clamped = volume.clamp(0.0, 1.5);
    info!("wpctl set-volume {} {:.2}", DEFAULT_SINK, volume_clamped);
    wpctl(&["set-volume", DEFAULT_SINK, &format!("{:.2}", volume_clamped)])?;
    Ok(())
}

/// Get current volume of the default sink. Returns (volume, is_muted).
pub fn get_default_sink_volume() -> Result<(f32, bool), VolumeError> {
    let stdout = wpctl(&["get-volume", DEFAULT_SINK])?;
    Ok(parse_volume(&stdout))
}

/// Properties of the default sink as printed by `wpctl inspect`.
pub fn inspect_default_sink() -> Result<String, VolumeError> {
    wpctl(&["inspect", DEFAULT_SINK])
}

/// Parse `wpctl get-volume` output, e.g. `Volume: 0.40 [MUTED]`.
pub fn parse_volume(stdout: &str) -> (f32, bool) {
    let mut volume = 1.0;
    let mut muted = false;

    for part in stdout.split_whitespace() {
        if let Ok(v) = part.parse::<f32>() {
            volume = v;
        }
        if part.contains("MUTED") {
            muted = true;
        }
    }

    (volume, muted)
}

/// Convert a linear volume to the integer level the watcher tracks (percent).
pub fn volume_to_level(volume: f32, muted: bool) -> u32 {
    if muted || volume <= 0.0 {
        0
    } else {
        (volume * 100.0).round() as u32
    }
}

/// Whether `wpctl inspect` output describes headphones or a headset.
///
/// Bluetooth sinks count as headsets, as do sinks whose form factor or
/// description mentions headphones.
pub fn is_headset_sink(inspect: &str) -> bool {
    for line in inspect.lines() {
        let line = line.trim().trim_start_matches('*').trim();
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim().trim_matches('"').to_lowercase();

        let hit = match key {
            "node.name" | "device.api" => value.contains("bluez"),
            "device.form-factor" => {
                matches!(value.as_str(), "headphone" | "headset" | "hands-free")
            }
            "node.description" | "device.description" => {
                value.contains("headphone") || value.contains("headset")
            }
            _ => false,
        };
        if hit {
            debug!("Default sink looks like a headset ({} = {})", key, value);
            return true;
        }
    }
    false
}
