// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Presentation debouncing.
//!
//! Each request is shown immediately and then re-applied once more after
//! [`TRAILING_DELAY`], so the last state always lands even if a notification
//! backend drops updates that arrive in quick succession. A newer request
//! replaces the pending trailing one.
//!
//! The notifier holds no timer of its own: the owner sleeps until
//! [`DebounceNotifier::next_due`] and then calls [`DebounceNotifier::fire_due`].

use crate::decision::{Decision, PresentationUpdate};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Delay before the trailing re-apply.
pub const TRAILING_DELAY: Duration = Duration::from_millis(1000);

/// Consumes presentation updates (notification rendering, D-Bus signals, ...).
pub trait Presenter: Send {
    fn present(&mut self, update: &PresentationUpdate);
}

#[derive(Debug, Clone, Copy)]
struct Trailing {
    due: Instant,
    update: PresentationUpdate,
}

pub struct DebounceNotifier {
    presenter: Box<dyn Presenter>,
    delay: Duration,
    pending: Option<Trailing>,
    last_applied: Option<Instant>,
}

impl DebounceNotifier {
    pub fn new(presenter: Box<dyn Presenter>) -> Self {
        Self::with_delay(presenter, TRAILING_DELAY)
    }

    pub fn with_delay(presenter: Box<dyn Presenter>, delay: Duration) -> Self {
        Self {
            presenter,
            delay,
            pending: None,
            last_applied: None,
        }
    }

    /// Apply `decision` now and (re)arm the trailing re-apply.
    pub fn request(&mut self, decision: &Decision, now: Instant) {
        let update = PresentationUpdate::from(decision);
        self.apply(&update, now);
        self.pending = Some(Trailing {
            due: now + self.delay,
            update,
        });
    }

    /// Deadline of the pending trailing re-apply.
    pub fn next_due(&self) -> Option<Instant> {
        self.pending.map(|t| t.due)
    }

    /// Run the trailing re-apply if its deadline has passed. Returns whether it ran.
    pub fn fire_due(&mut self, now: Instant) -> bool {
        match self.pending {
            Some(trailing) if trailing.due <= now => {
                self.pending = None;
                trace!("Trailing presentation re-apply");
                self.apply(&trailing.update, now);
                true
            }
            _ => false,
        }
    }

    /// Drop any pending trailing re-apply.
    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn last_applied(&self) -> Option<Instant> {
        self.last_applied
    }

    fn apply(&mut self, update: &PresentationUpdate, now: Instant) {
        self.presenter.present(update);
        self.last_applied = Some(now);
    }
}
