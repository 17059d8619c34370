// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Audio-side collaborators: the stream being watched, the mute sink and the
//! probe used to seed state at startup.

use std::fmt;
use std::str::FromStr;

/// An output stream as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioStream {
    Media,
    Ring,
    Voice,
    Alarm,
    Notification,
    System,
}

impl AudioStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioStream::Media => "media",
            AudioStream::Ring => "ring",
            AudioStream::Voice => "voice",
            AudioStream::Alarm => "alarm",
            AudioStream::Notification => "notification",
            AudioStream::System => "system",
        }
    }

    pub fn is_media(&self) -> bool {
        *self == AudioStream::Media
    }
}

impl fmt::Display for AudioStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioStream {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "media" | "music" => Ok(AudioStream::Media),
            "ring" => Ok(AudioStream::Ring),
            "voice" | "call" => Ok(AudioStream::Voice),
            "alarm" => Ok(AudioStream::Alarm),
            "notification" => Ok(AudioStream::Notification),
            "system" => Ok(AudioStream::System),
            _ => Err(()),
        }
    }
}

/// "Set this stream's volume to zero now."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuteCommand {
    pub stream: AudioStream,
}

impl MuteCommand {
    pub fn media() -> Self {
        Self {
            stream: AudioStream::Media,
        }
    }
}

/// Receives mute commands. Implementations log their own failures.
pub trait MediaOutput: Send {
    /// Returns whether the stream was actually muted.
    fn mute(&mut self, command: MuteCommand) -> bool;
}

/// Live system queries used once when the watcher starts.
pub trait SystemProbe: Send {
    /// Current media volume level, or `None` if it cannot be read.
    fn media_volume(&self) -> Option<u32>;
    fn headset_connected(&self) -> bool;
    fn call_active(&self) -> bool;
}
