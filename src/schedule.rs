// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Daily force-mute windows and the alarms that track their edges.
//!
//! A window is expressed in minutes since local midnight and may wrap past
//! midnight (`22:00 → 07:00`). The [`Scheduler`] keeps the next absolute
//! instant of each edge so the watcher can sleep until the earliest one.

use crate::settings::{ForceMuteMode, Settings};
use crate::signals::SignalEvent;
use chrono::{DateTime, Duration, Local, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use tracing::debug;

/// Number of minutes in a day. Valid minute-of-day values are `0..MINUTES_PER_DAY`.
pub const MINUTES_PER_DAY: u16 = 1440;

/// Source of wall-clock time.
pub trait Clock: Send + 'static {
    type Tz: TimeZone + Send + 'static;

    fn now(&self) -> DateTime<Self::Tz>;
}

/// The system's local clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    type Tz = Local;

    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A daily time-of-day interval `[from, to)`.
///
/// Equal bounds describe an empty window that is never active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleWindow {
    from: u16,
    to: u16,
}

impl ScheduleWindow {
    /// Build a window, returning `None` if either bound is not a valid minute of day.
    pub fn new(from: u16, to: u16) -> Option<Self> {
        if from >= MINUTES_PER_DAY || to >= MINUTES_PER_DAY {
            return None;
        }
        Some(Self { from, to })
    }

    /// Build a window, clamping out-of-range bounds to the last minute of the day.
    pub fn clamped(from: u16, to: u16) -> Self {
        Self {
            from: from.min(MINUTES_PER_DAY - 1),
            to: to.min(MINUTES_PER_DAY - 1),
        }
    }

    pub fn from_minute(&self) -> u16 {
        self.from
    }

    pub fn to_minute(&self) -> u16 {
        self.to
    }

    pub fn is_empty(&self) -> bool {
        self.from == self.to
    }

    /// Whether the given minute of day falls inside the window.
    pub fn contains(&self, minute: u16) -> bool {
        is_within_window(self, minute)
    }
}

/// Whether `now_minute` falls inside `window`, handling windows that wrap midnight.
pub fn is_within_window(window: &ScheduleWindow, now_minute: u16) -> bool {
    let (from, to) = (window.from, window.to);
    if from < to {
        from <= now_minute && now_minute < to
    } else if from > to {
        now_minute >= from || now_minute < to
    } else {
        false
    }
}

/// Minutes since local midnight for the given instant.
pub fn minute_of_day<Tz: TimeZone>(at: &DateTime<Tz>) -> u16 {
    (at.hour() * 60 + at.minute()) as u16
}

/// The next instant strictly after `now` whose local time of day is `minute`.
///
/// Today's occurrence is used when it is still in the future, otherwise the
/// occurrence rolls forward to tomorrow.
pub fn next_occurrence<Tz: TimeZone>(minute: u16, now: &DateTime<Tz>) -> DateTime<Tz> {
    let minute = minute.min(MINUTES_PER_DAY - 1);
    let tz = now.timezone();
    let today = now.date_naive();

    let candidate = at_minute(&tz, today, minute);
    if candidate > *now {
        return candidate;
    }

    let tomorrow = today.succ_opt().unwrap_or(today);
    at_minute(&tz, tomorrow, minute)
}

fn at_minute<Tz: TimeZone>(tz: &Tz, date: NaiveDate, minute: u16) -> DateTime<Tz> {
    let naive = date
        .and_hms_opt(u32::from(minute / 60), u32::from(minute % 60), 0)
        .unwrap_or_else(|| date.and_time(chrono::NaiveTime::MIN));
    resolve_local(tz, naive)
}

/// Map a local wall-clock time onto the timeline.
///
/// Ambiguous times (clocks going back) pick the earlier instant; times that
/// do not exist (clocks going forward) are pushed past the gap.
fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(t) => t,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
            .unwrap_or_else(|| tz.from_utc_datetime(&naive)),
    }
}

/// Which edge of the force-mute window an alarm marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEdge {
    Start,
    End,
}

impl WindowEdge {
    /// The window state this edge transitions into.
    pub fn activates(self) -> bool {
        matches!(self, WindowEdge::Start)
    }
}

#[derive(Debug, Clone)]
struct Alarms<Tz: TimeZone> {
    window: ScheduleWindow,
    start: DateTime<Tz>,
    end: DateTime<Tz>,
}

/// Holds the two recurring daily wake instants for the force-mute window.
#[derive(Debug, Clone)]
pub struct Scheduler<Tz: TimeZone> {
    alarms: Option<Alarms<Tz>>,
}

impl<Tz: TimeZone> Default for Scheduler<Tz> {
    fn default() -> Self {
        Self { alarms: None }
    }
}

impl<Tz: TimeZone> Scheduler<Tz> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-arm or cancel the alarms to match `settings`. Returns whether alarms are armed.
    pub fn reschedule(&mut self, settings: &Settings, now: &DateTime<Tz>) -> bool {
        let window = settings.window();
        let wanted = settings.force_mute_enabled
            && settings.force_mute_mode == ForceMuteMode::Scheduled
            && !window.is_empty();

        if !wanted {
            if self.alarms.take().is_some() {
                debug!("Force mute alarms cancelled");
            }
            return false;
        }

        let start = next_occurrence(window.from_minute(), now);
        let end = next_occurrence(window.to_minute(), now);
        debug!("Force mute alarms armed: start={:?} end={:?}", start, end);
        self.alarms = Some(Alarms { window, start, end });
        true
    }

    /// Drop both alarms.
    pub fn cancel(&mut self) {
        self.alarms = None;
    }

    pub fn is_armed(&self) -> bool {
        self.alarms.is_some()
    }

    /// The earliest pending alarm, if any.
    pub fn next_wake(&self) -> Option<(WindowEdge, DateTime<Tz>)> {
        let alarms = self.alarms.as_ref()?;
        if alarms.start <= alarms.end {
            Some((WindowEdge::Start, alarms.start.clone()))
        } else {
            Some((WindowEdge::End, alarms.end.clone()))
        }
    }

    /// Consume an alarm firing: roll that edge forward a day and produce the
    /// window toggle for the aggregator. Returns `None` when nothing is armed.
    pub fn fire(&mut self, edge: WindowEdge) -> Option<SignalEvent> {
        let alarms = self.alarms.as_mut()?;
        // Roll from the configured minute, not the fired instant, which may
        // have been pushed past a DST gap.
        let (slot, minute) = match edge {
            WindowEdge::Start => (&mut alarms.start, alarms.window.from_minute()),
            WindowEdge::End => (&mut alarms.end, alarms.window.to_minute()),
        };
        *slot = next_occurrence(minute, slot);
        debug!("Force mute {:?} alarm fired, next at {:?}", edge, slot);
        Some(SignalEvent::WindowToggled {
            now_active: edge.activates(),
        })
    }
}
