// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Quiet - keeps media volume silent when it should be.
//!
//! The core of the watcher service: it fuses volume, headset, call and
//! schedule signals into a single "mute now?" decision plus the state the
//! notices should show. Everything platform-specific (how volume is read or
//! muted, how notices are drawn, how settings are stored) sits behind the
//! collaborator traits in [`audio`] and [`debounce`].

pub mod audio;
pub mod debounce;
pub mod decision;
pub mod lifecycle;
pub mod schedule;
pub mod settings;
pub mod signals;
pub mod watcher;

pub use audio::{AudioStream, MediaOutput, MuteCommand, SystemProbe};
pub use debounce::{DebounceNotifier, Presenter};
pub use decision::{evaluate, Decision, OutputDevice, PresentationUpdate};
pub use lifecycle::{AfterStop, ServiceLifecycle};
pub use schedule::{Clock, ScheduleWindow, Scheduler, SystemClock};
pub use settings::{ForceMuteMode, Settings, SettingsChange, SettingsError};
pub use signals::{SignalAggregator, SignalEvent, SignalState};
pub use watcher::{Watcher, WatcherCommand, WatcherError, WatcherHandle, WatcherSnapshot};
