// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Service lifecycle: tells a user-requested stop apart from an unexpected one.

use std::time::Duration;
use tracing::{info, warn};

/// Delay before restarting a service that stopped without being asked to.
pub const RESTART_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterStop {
    Exit,
    RestartAfter(Duration),
}

#[derive(Debug, Default)]
pub struct ServiceLifecycle {
    stop_triggered_by_user: bool,
}

impl ServiceLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the user asked the service to stop.
    pub fn mark_user_stop(&mut self) {
        self.stop_triggered_by_user = true;
    }

    pub fn stop_triggered_by_user(&self) -> bool {
        self.stop_triggered_by_user
    }

    /// Decide what happens after the service terminated, and reset for the next run.
    pub fn on_terminated(&mut self) -> AfterStop {
        let by_user = std::mem::take(&mut self.stop_triggered_by_user);
        if by_user {
            info!("Service stopped by user");
            AfterStop::Exit
        } else {
            warn!(
                "Service stopped unexpectedly, restarting in {:?}",
                RESTART_DELAY
            );
            AfterStop::RestartAfter(RESTART_DELAY)
        }
    }
}
