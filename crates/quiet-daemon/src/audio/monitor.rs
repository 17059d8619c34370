// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Default sink change monitor.
//!
//! Follows `pactl subscribe` (served by pipewire-pulse) and, after each burst
//! of sink, card or server events, re-reads the default sink and feeds the
//! differences to the watcher as volume and headset events.

use super::WpctlProbe;
use crate::service::DaemonService;
use quiet::{AudioStream, SignalEvent, SystemProbe};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{ChildStdout, Command};
use tracing::{debug, info, warn};

/// Delay before respawning `pactl subscribe` after it exits.
const RESPAWN_DELAY: Duration = Duration::from_secs(5);

/// Quiet period that ends a burst of events.
const COALESCE_WINDOW: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Failed to run pactl subscribe: {0}")]
    Io(#[from] std::io::Error),
    #[error("pactl subscribe has no stdout")]
    NoStdout,
}

/// Whether a `pactl subscribe` line can change the default sink's level or identity.
pub fn is_sink_event(line: &str) -> bool {
    let Some(rest) = line.trim().strip_prefix("Event '") else {
        return false;
    };
    let Some((kind, target)) = rest.split_once("' on ") else {
        return false;
    };
    let facility = target.split_whitespace().next().unwrap_or("");
    matches!(kind, "new" | "change" | "remove") && matches!(facility, "sink" | "card" | "server")
}

/// The default sink as the watcher sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkReading {
    pub level: Option<u32>,
    pub headset: bool,
}

impl SinkReading {
    /// Read the default sink through wpctl. Blocks on child processes.
    pub fn read() -> Self {
        let probe = WpctlProbe;
        Self {
            level: probe.media_volume(),
            headset: probe.headset_connected(),
        }
    }
}

/// Turns successive readings into watcher events, dropping repeats.
#[derive(Debug, Default)]
pub struct SinkTracker {
    last: Option<SinkReading>,
}

impl SinkTracker {
    /// Events for whatever changed since the previous reading.
    ///
    /// Volume is reported before the headset so that unplugging onto an
    /// audible speaker produces a single mute.
    pub fn update(&mut self, reading: SinkReading) -> Vec<SignalEvent> {
        let mut events = Vec::new();
        let last = self.last.replace(reading);

        if reading.level.is_some() && last.map(|l| l.level) != Some(reading.level) {
            events.push(SignalEvent::VolumeChanged {
                stream: AudioStream::Media,
                level: reading.level,
            });
        }
        if last.map(|l| l.headset) != Some(reading.headset) {
            events.push(SignalEvent::HeadsetChanged {
                connected: reading.headset,
            });
        }
        events
    }
}

/// Follow the default sink for the life of the daemon.
pub async fn run(service: Arc<DaemonService>) {
    let mut tracker = SinkTracker::default();
    loop {
        match watch(&service, &mut tracker).await {
            Ok(()) => warn!("pactl subscribe exited"),
            Err(e) => warn!("Sink monitor failed: {}", e),
        }
        tokio::time::sleep(RESPAWN_DELAY).await;
    }
}

async fn watch(service: &DaemonService, tracker: &mut SinkTracker) -> Result<(), MonitorError> {
    let mut child = Command::new("pactl")
        .arg("subscribe")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;
    let stdout = child.stdout.take().ok_or(MonitorError::NoStdout)?;
    let mut lines = BufReader::new(stdout).lines();
    info!("Watching default sink via pactl subscribe");

    // Catch up on anything missed while unsubscribed.
    refresh(service, tracker).await;

    while let Some(line) = lines.next_line().await? {
        if !is_sink_event(&line) {
            continue;
        }
        drain_burst(&mut lines).await?;
        refresh(service, tracker).await;
    }
    Ok(())
}

/// Swallow the rest of an event burst so it costs one re-read.
async fn drain_burst(lines: &mut Lines<BufReader<ChildStdout>>) -> Result<(), MonitorError> {
    while let Ok(next) = tokio::time::timeout(COALESCE_WINDOW, lines.next_line()).await {
        if next?.is_none() {
            break;
        }
    }
    Ok(())
}

async fn refresh(service: &DaemonService, tracker: &mut SinkTracker) {
    let reading = match tokio::task::spawn_blocking(SinkReading::read).await {
        Ok(reading) => reading,
        Err(e) => {
            warn!("Default sink read failed: {}", e);
            return;
        }
    };
    forward(service, tracker, reading).await;
}

/// Send the watcher whatever changed in `reading`.
async fn forward(service: &DaemonService, tracker: &mut SinkTracker, reading: SinkReading) {
    debug!(
        "Default sink: level={:?} headset={}",
        reading.level, reading.headset
    );
    for event in tracker.update(reading) {
        if let Err(e) = service.signal(event).await {
            debug!("Dropping sink event {:?}: {}", event, e);
        }
    }
}
