// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Audio collaborators for the watcher, backed by WirePlumber's `wpctl`.

pub mod monitor;
pub mod volume;

use crate::service::BusSignal;
use quiet::{MediaOutput, MuteCommand, SystemProbe};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

/// Mutes the default sink and announces it on the bus.
pub struct WpctlOutput {
    signal_tx: UnboundedSender<BusSignal>,
}

impl WpctlOutput {
    pub fn new(signal_tx: UnboundedSender<BusSignal>) -> Self {
        Self { signal_tx }
    }
}

impl MediaOutput for WpctlOutput {
    fn mute(&mut self, command: MuteCommand) -> bool {
        if !command.stream.is_media() {
            debug!("Ignoring mute for non-media stream {}", command.stream);
            return false;
        }
        match volume::set_default_sink_volume(0.0) {
            Ok(()) => {
                let _ = self.signal_tx.send(BusSignal::MuteIssued(command.stream));
                true
            }
            Err(e) => {
                warn!("Failed to mute default sink: {}", e);
                false
            }
        }
    }
}

/// Reads the default sink's state, at watcher start and from the monitor.
///
/// Call state is not observable here; it starts inactive and is reported by
/// the bridge over D-Bus.
#[derive(Debug, Default)]
pub struct WpctlProbe;

impl SystemProbe for WpctlProbe {
    fn media_volume(&self) -> Option<u32> {
        match volume::get_default_sink_volume() {
            Ok((level, muted)) => Some(volume::volume_to_level(level, muted)),
            Err(e) => {
                warn!("Failed to read default sink volume: {}", e);
                None
            }
        }
    }

    fn headset_connected(&self) -> bool {
        match volume::inspect_default_sink() {
            Ok(inspect) => volume::is_headset_sink(&inspect),
            Err(e) => {
                warn!("Failed to inspect default sink: {}", e);
                false
            }
        }
    }

    fn call_active(&self) -> bool {
        false
    }
}
