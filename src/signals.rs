// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Signal aggregation.
//!
//! The aggregator owns the current value of every watched signal and is the
//! only place that mutates it. Each event updates its field, the decision is
//! re-derived, and a mute command is issued on entry into the muted condition.

use crate::audio::{AudioStream, MediaOutput, MuteCommand, SystemProbe};
use crate::decision::{evaluate, Decision};
use crate::schedule::{minute_of_day, Clock};
use crate::settings::{Settings, SettingsChange};
use tracing::{debug, info, warn};

/// An external event, serialized into the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// A stream's volume changed. `level` is `None` when the report carried no level.
    VolumeChanged {
        stream: AudioStream,
        level: Option<u32>,
    },
    HeadsetChanged {
        connected: bool,
    },
    CallStateChanged {
        active: bool,
    },
    /// A force-mute window edge was reached.
    WindowToggled {
        now_active: bool,
    },
    /// The user turned force mute off until the next window start.
    ForceMuteStopped,
    SettingsChanged(SettingsChange),
}

/// Current value of every watched signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalState {
    pub media_volume: u32,
    pub headset_connected: bool,
    pub call_active: bool,
    pub force_mute_window_active: bool,
    /// Force mute was switched off by the user; cleared by the next window
    /// start or a force-mute settings change.
    pub force_mute_suspended: bool,
}

impl SignalState {
    /// Seed state from live system queries.
    pub fn probe(probe: &dyn SystemProbe) -> Self {
        Self {
            media_volume: probe.media_volume().unwrap_or(0),
            headset_connected: probe.headset_connected(),
            call_active: probe.call_active(),
            force_mute_window_active: false,
            force_mute_suspended: false,
        }
    }
}

pub struct SignalAggregator<C: Clock> {
    settings: Settings,
    state: SignalState,
    clock: C,
    output: Box<dyn MediaOutput>,
    /// A mute has been issued for the current muting episode.
    mute_issued: bool,
}

impl<C: Clock> SignalAggregator<C> {
    pub fn new(
        settings: Settings,
        initial: SignalState,
        clock: C,
        output: Box<dyn MediaOutput>,
    ) -> Self {
        let mut aggregator = Self {
            settings,
            state: initial,
            clock,
            output,
            mute_issued: false,
        };
        aggregator.refresh_window();
        aggregator
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state(&self) -> &SignalState {
        &self.state
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Current decision, without side effects.
    pub fn decision(&self) -> Decision {
        evaluate(&self.state, &self.settings)
    }

    /// Re-derive whether the clock is inside the configured window.
    pub fn refresh_window(&mut self) {
        let now = minute_of_day(&self.clock.now());
        self.state.force_mute_window_active = self.settings.window().contains(now);
    }

    /// Apply one event and return the resulting decision.
    pub fn apply_event(&mut self, event: SignalEvent) -> Decision {
        let mut audible_report = false;

        match event {
            SignalEvent::VolumeChanged {
                stream: AudioStream::Media,
                level: Some(level),
            } => {
                self.state.media_volume = level;
                audible_report = level > 0;
            }
            SignalEvent::VolumeChanged { stream, level } => {
                debug!("Ignoring volume change for {} (level {:?})", stream, level);
            }
            SignalEvent::HeadsetChanged { connected } => {
                self.state.headset_connected = connected;
            }
            SignalEvent::CallStateChanged { active } => {
                self.state.call_active = active;
            }
            SignalEvent::WindowToggled { now_active } => {
                self.state.force_mute_window_active = now_active;
                if now_active {
                    self.state.force_mute_suspended = false;
                }
            }
            SignalEvent::ForceMuteStopped => {
                info!("Force mute stopped by user");
                self.state.force_mute_window_active = false;
                self.state.force_mute_suspended = true;
            }
            SignalEvent::SettingsChanged(change) => {
                self.settings.apply(&change);
                if change.affects_force_mute() {
                    self.state.force_mute_suspended = false;
                }
                self.refresh_window();
            }
        }

        self.settle(audible_report)
    }

    /// Evaluate without a new event, muting if the current state calls for it.
    pub fn reconcile(&mut self) -> Decision {
        self.settle(false)
    }

    /// Mute the media stream regardless of the decision.
    pub fn mute_now(&mut self) {
        info!("Muting media volume on request");
        if !self.output.mute(MuteCommand::media()) {
            warn!("Requested mute did not take effect");
        }
    }

    fn settle(&mut self, audible_report: bool) -> Decision {
        let decision = self.decision();
        if decision.should_mute_now {
            if !self.mute_issued || audible_report {
                info!(
                    "Force muting media volume (level {})",
                    self.state.media_volume
                );
                // A failed mute leaves the episode open so the next event retries.
                self.mute_issued = self.output.mute(MuteCommand::media());
            }
        } else {
            self.mute_issued = false;
        }
        decision
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FailingOutput, FixedProbe, ManualClock, RecordingOutput};
    use super::*;
    use crate::settings::ForceMuteMode;
    use chrono::{TimeZone, Utc};

    fn noon() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap())
    }

    fn aggregator(settings: Settings) -> (SignalAggregator<ManualClock>, RecordingOutput) {
        let output = RecordingOutput::default();
        let agg = SignalAggregator::new(
            settings,
            SignalState::default(),
            noon(),
            Box::new(output.clone()),
        );
        (agg, output)
    }

    fn always_on() -> Settings {
        Settings {
            force_mute_enabled: true,
            force_mute_mode: ForceMuteMode::AlwaysOn,
            ..Settings::default()
        }
    }

    fn media(level: u32) -> SignalEvent {
        SignalEvent::VolumeChanged {
            stream: AudioStream::Media,
            level: Some(level),
        }
    }

    #[test]
    fn test_mutes_once_and_not_after_silence() {
        let (mut agg, output) = aggregator(always_on());

        let d = agg.apply_event(media(5));
        assert!(d.should_mute_now);
        assert_eq!(output.count(), 1);
        assert_eq!(output.commands.lock()[0], MuteCommand::media());

        let d = agg.apply_event(media(0));
        assert!(!d.should_mute_now);
        assert_eq!(output.count(), 1);
    }

    #[test]
    fn test_unrelated_events_do_not_remute() {
        let (mut agg, output) = aggregator(always_on());
        agg.apply_event(media(5));
        agg.apply_event(SignalEvent::CallStateChanged { active: true });
        agg.apply_event(SignalEvent::CallStateChanged { active: false });
        assert_eq!(output.count(), 1);
    }

    #[test]
    fn test_audible_report_while_muting_remutes() {
        let (mut agg, output) = aggregator(always_on());
        agg.apply_event(media(5));
        // A late corrective report of the old level.
        agg.apply_event(media(5));
        assert_eq!(output.count(), 2);
        assert_eq!(agg.state().media_volume, 5);
    }

    #[test]
    fn test_raising_volume_after_mute_remutes() {
        let (mut agg, output) = aggregator(always_on());
        agg.apply_event(media(5));
        agg.apply_event(media(0));
        agg.apply_event(media(2));
        assert_eq!(output.count(), 2);
    }

    #[test]
    fn test_irrelevant_volume_events_are_noops() {
        let (mut agg, output) = aggregator(always_on());
        agg.apply_event(media(0));
        let before = *agg.state();

        let d = agg.apply_event(SignalEvent::VolumeChanged {
            stream: AudioStream::Ring,
            level: Some(7),
        });
        assert_eq!(*agg.state(), before);
        assert!(!d.should_mute_now);

        agg.apply_event(SignalEvent::VolumeChanged {
            stream: AudioStream::Media,
            level: None,
        });
        assert_eq!(*agg.state(), before);
        assert_eq!(output.count(), 0);
    }

    #[test]
    fn test_headset_blocks_mute() {
        let (mut agg, output) = aggregator(always_on());
        agg.apply_event(SignalEvent::HeadsetChanged { connected: true });
        let d = agg.apply_event(media(8));
        assert!(!d.should_mute_now);
        assert_eq!(output.count(), 0);

        // Unplugging with audible volume mutes.
        let d = agg.apply_event(SignalEvent::HeadsetChanged { connected: false });
        assert!(d.should_mute_now);
        assert_eq!(output.count(), 1);
    }

    #[test]
    fn test_window_toggle_drives_scheduled_mute() {
        let settings = Settings {
            force_mute_enabled: true,
            ..Settings::default()
        };
        let (mut agg, output) = aggregator(settings);
        assert!(!agg.state().force_mute_window_active);

        agg.apply_event(media(4));
        assert_eq!(output.count(), 0);

        let d = agg.apply_event(SignalEvent::WindowToggled { now_active: true });
        assert!(d.should_mute_now);
        assert_eq!(output.count(), 1);

        let d = agg.apply_event(SignalEvent::WindowToggled { now_active: false });
        assert!(!d.should_mute_now);
    }

    #[test]
    fn test_settings_change_rederives_window() {
        let settings = Settings {
            force_mute_enabled: true,
            force_mute_from: 600,
            force_mute_to: 660,
            ..Settings::default()
        };
        let (mut agg, _output) = aggregator(settings);
        assert!(!agg.state().force_mute_window_active);

        agg.apply_event(SignalEvent::SettingsChanged(SettingsChange::ForceMuteTo(780)));
        assert!(agg.state().force_mute_window_active);

        agg.clock().set(Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap());
        agg.apply_event(SignalEvent::SettingsChanged(
            SettingsChange::ShowVolumeNotice(false),
        ));
        assert!(!agg.state().force_mute_window_active);
    }

    #[test]
    fn test_initial_window_from_clock() {
        let settings = Settings {
            force_mute_from: 660,
            force_mute_to: 780,
            ..Settings::default()
        };
        let (agg, _output) = aggregator(settings);
        assert!(agg.state().force_mute_window_active);
    }

    #[test]
    fn test_reconcile_mutes_initial_state() {
        let output = RecordingOutput::default();
        let probe = FixedProbe {
            volume: Some(9),
            headset: false,
            call: false,
        };
        let mut agg = SignalAggregator::new(
            always_on(),
            SignalState::probe(&probe),
            noon(),
            Box::new(output.clone()),
        );
        assert!(agg.reconcile().should_mute_now);
        assert!(agg.reconcile().should_mute_now);
        assert_eq!(output.count(), 1);
    }

    #[test]
    fn test_failed_mute_is_retried() {
        let output = FailingOutput::default();
        let mut agg = SignalAggregator::new(
            always_on(),
            SignalState::default(),
            noon(),
            Box::new(output.clone()),
        );
        agg.apply_event(media(5));
        assert_eq!(*output.attempts.lock(), 1);

        // No new audible report, but the earlier mute never landed.
        agg.apply_event(SignalEvent::CallStateChanged { active: true });
        assert_eq!(*output.attempts.lock(), 2);
    }

    #[test]
    fn test_user_stop_suspends_until_window_start() {
        let settings = Settings {
            force_mute_enabled: true,
            force_mute_from: 660,
            force_mute_to: 780,
            ..Settings::default()
        };
        let (mut agg, output) = aggregator(settings);
        assert!(agg.apply_event(media(4)).should_mute_now);
        assert_eq!(output.count(), 1);

        let d = agg.apply_event(SignalEvent::ForceMuteStopped);
        assert!(!d.should_mute_now);
        assert!(!d.force_mute_notice_visible);
        agg.apply_event(media(6));
        assert_eq!(output.count(), 1);

        let d = agg.apply_event(SignalEvent::WindowToggled { now_active: true });
        assert!(d.should_mute_now);
        assert_eq!(output.count(), 2);
    }

    #[test]
    fn test_user_stop_covers_always_on() {
        let (mut agg, output) = aggregator(always_on());
        agg.apply_event(SignalEvent::ForceMuteStopped);
        assert!(!agg.apply_event(media(5)).should_mute_now);

        // Unrelated settings keep the suspension.
        agg.apply_event(SignalEvent::SettingsChanged(
            SettingsChange::ShowVolumeNotice(false),
        ));
        assert!(!agg.decision().should_mute_now);

        agg.apply_event(SignalEvent::SettingsChanged(
            SettingsChange::ForceMuteMode(ForceMuteMode::AlwaysOn),
        ));
        assert!(agg.decision().should_mute_now);
        assert_eq!(output.count(), 1);
    }

    #[test]
    fn test_mute_now_is_unconditional() {
        let (mut agg, output) = aggregator(Settings::default());
        agg.mute_now();
        assert_eq!(output.count(), 1);
    }
}
