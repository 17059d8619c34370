// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The watcher task.
//!
//! All core state lives inside one tokio task. Commands arrive over an mpsc
//! channel; the debounce trailing update and the force-mute alarms are timers
//! polled by the same `select!`, so nothing here needs a lock. Dropping out of
//! the loop cancels every pending timer with it.

use crate::debounce::DebounceNotifier;
use crate::decision::Decision;
use crate::schedule::{Clock, Scheduler, WindowEdge};
use crate::settings::Settings;
use crate::signals::{SignalAggregator, SignalEvent, SignalState};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Capacity of the command channel.
const COMMAND_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Watcher is not running")]
    Closed,
}

/// Requests handled by the watcher task.
#[derive(Debug)]
pub enum WatcherCommand {
    Signal(SignalEvent),
    /// Mute media volume now, whatever the decision says.
    MuteNow,
    /// Turn force mute off until the next window start.
    StopForceMute,
    Snapshot(oneshot::Sender<WatcherSnapshot>),
    Stop,
}

/// Point-in-time view of the watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherSnapshot {
    pub settings: Settings,
    pub state: SignalState,
    pub decision: Decision,
    pub alarms_armed: bool,
}

/// Sending half of the command channel.
#[derive(Debug, Clone)]
pub struct WatcherHandle {
    tx: mpsc::Sender<WatcherCommand>,
}

impl WatcherHandle {
    pub async fn send(&self, command: WatcherCommand) -> Result<(), WatcherError> {
        self.tx.send(command).await.map_err(|_| WatcherError::Closed)
    }

    pub async fn signal(&self, event: SignalEvent) -> Result<(), WatcherError> {
        self.send(WatcherCommand::Signal(event)).await
    }

    pub async fn snapshot(&self) -> Result<WatcherSnapshot, WatcherError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(WatcherCommand::Snapshot(reply_tx)).await?;
        reply_rx.await.map_err(|_| WatcherError::Closed)
    }

    pub async fn stop(&self) -> Result<(), WatcherError> {
        self.send(WatcherCommand::Stop).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct Watcher<C: Clock> {
    aggregator: SignalAggregator<C>,
    scheduler: Scheduler<C::Tz>,
    notifier: DebounceNotifier,
}

impl<C: Clock> Watcher<C> {
    pub fn new(aggregator: SignalAggregator<C>, notifier: DebounceNotifier) -> Self {
        Self {
            aggregator,
            scheduler: Scheduler::new(),
            notifier,
        }
    }

    /// Spawn the watcher on the current runtime.
    pub fn spawn(self) -> (WatcherHandle, JoinHandle<()>)
    where
        Self: Send + 'static,
    {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let task = tokio::spawn(self.run(rx));
        (WatcherHandle { tx }, task)
    }

    /// Process commands and timers until stopped or every sender is dropped.
    pub async fn run(mut self, mut commands: mpsc::Receiver<WatcherCommand>) {
        self.start();

        loop {
            let trailing = self.notifier.next_due();
            let alarm = self.next_alarm();

            tokio::select! {
                command = commands.recv() => match command {
                    Some(WatcherCommand::Stop) => {
                        info!("Watcher stop requested");
                        break;
                    }
                    Some(command) => self.handle(command),
                    None => {
                        debug!("Watcher command channel closed");
                        break;
                    }
                },
                _ = sleep_until_opt(trailing) => {
                    self.notifier.fire_due(Instant::now());
                }
                _ = sleep_until_opt(alarm.map(|(_, at)| at)) => {
                    if let Some((edge, _)) = alarm {
                        self.fire_alarm(edge);
                    }
                }
            }
        }

        self.shutdown();
    }

    fn start(&mut self) {
        let decision = self.aggregator.reconcile();
        self.reschedule();
        info!(
            "Watcher started: volume={} headset={} call={} force_mute={}",
            self.aggregator.state().media_volume,
            self.aggregator.state().headset_connected,
            self.aggregator.state().call_active,
            decision.force_mute_notice_visible
        );
        self.notifier.request(&decision, Instant::now());
    }

    fn handle(&mut self, command: WatcherCommand) {
        match command {
            WatcherCommand::Signal(event) => self.apply(event),
            WatcherCommand::MuteNow => self.aggregator.mute_now(),
            WatcherCommand::StopForceMute => self.apply(SignalEvent::ForceMuteStopped),
            WatcherCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            WatcherCommand::Stop => {}
        }
    }

    fn apply(&mut self, event: SignalEvent) {
        debug!("Applying {:?}", event);
        let decision = self.aggregator.apply_event(event);
        if let SignalEvent::SettingsChanged(change) = event {
            if change.affects_force_mute() {
                self.reschedule();
            }
        }
        self.notifier.request(&decision, Instant::now());
    }

    fn fire_alarm(&mut self, edge: WindowEdge) {
        if let Some(event) = self.scheduler.fire(edge) {
            self.apply(event);
        }
    }

    fn reschedule(&mut self) {
        let now = self.aggregator.clock().now();
        self.scheduler.reschedule(self.aggregator.settings(), &now);
    }

    /// The earliest alarm as a deadline on the runtime's clock.
    fn next_alarm(&self) -> Option<(WindowEdge, Instant)> {
        let (edge, at) = self.scheduler.next_wake()?;
        let wait = (at - self.aggregator.clock().now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        Some((edge, Instant::now() + wait))
    }

    fn snapshot(&self) -> WatcherSnapshot {
        WatcherSnapshot {
            settings: self.aggregator.settings().clone(),
            state: *self.aggregator.state(),
            decision: self.aggregator.decision(),
            alarms_armed: self.scheduler.is_armed(),
        }
    }

    fn shutdown(&mut self) {
        self.notifier.cancel();
        self.scheduler.cancel();
        info!("Watcher stopped");
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioStream;
    use crate::debounce::testing::RecordingPresenter;
    use crate::debounce::TRAILING_DELAY;
    use crate::settings::{ForceMuteMode, SettingsChange};
    use crate::signals::testing::{ManualClock, RecordingOutput};
    use chrono::{TimeZone, Utc};

    struct Harness {
        handle: WatcherHandle,
        task: JoinHandle<()>,
        output: RecordingOutput,
        presenter: RecordingPresenter,
    }

    fn start(settings: Settings, initial: SignalState, h: u32, m: u32) -> Harness {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 15, h, m, 0).unwrap());
        let output = RecordingOutput::default();
        let presenter = RecordingPresenter::default();
        let aggregator =
            SignalAggregator::new(settings, initial, clock, Box::new(output.clone()));
        let notifier = DebounceNotifier::new(Box::new(presenter.clone()));
        let (handle, task) = Watcher::new(aggregator, notifier).spawn();
        Harness {
            handle,
            task,
            output,
            presenter,
        }
    }

    fn media(level: u32) -> SignalEvent {
        SignalEvent::VolumeChanged {
            stream: AudioStream::Media,
            level: Some(level),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_on_scenario() {
        let settings = Settings {
            force_mute_enabled: true,
            force_mute_mode: ForceMuteMode::AlwaysOn,
            ..Settings::default()
        };
        let h = start(settings, SignalState::default(), 12, 0);

        h.handle.signal(media(5)).await.unwrap();
        let snap = h.handle.snapshot().await.unwrap();
        assert!(snap.decision.should_mute_now);
        assert_eq!(h.output.count(), 1);

        h.handle.signal(media(0)).await.unwrap();
        let snap = h.handle.snapshot().await.unwrap();
        assert!(!snap.decision.should_mute_now);
        assert_eq!(h.output.count(), 1);
        assert!(!snap.alarms_armed);

        h.handle.stop().await.unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_mutes_initial_volume() {
        let settings = Settings {
            force_mute_enabled: true,
            force_mute_mode: ForceMuteMode::AlwaysOn,
            ..Settings::default()
        };
        let initial = SignalState {
            media_volume: 6,
            ..SignalState::default()
        };
        let h = start(settings, initial, 12, 0);
        h.handle.snapshot().await.unwrap();
        assert_eq!(h.output.count(), 1);
        assert_eq!(h.presenter.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_updates_coalesce_trailing() {
        let h = start(Settings::default(), SignalState::default(), 12, 0);
        h.handle.snapshot().await.unwrap();
        // Initial presentation.
        assert_eq!(h.presenter.count(), 1);

        h.handle.signal(media(3)).await.unwrap();
        h.handle.snapshot().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.handle.signal(media(4)).await.unwrap();
        h.handle.snapshot().await.unwrap();
        let second = Instant::now();
        assert_eq!(h.presenter.count(), 3);

        tokio::time::sleep(TRAILING_DELAY * 3).await;
        let updates = h.presenter.updates.lock().clone();
        assert_eq!(updates.len(), 4);
        assert_eq!(updates[3].0 - second, TRAILING_DELAY);
        assert_eq!(updates[3].1.displayed_volume, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_alarm_starts_force_mute_window() {
        let settings = Settings {
            force_mute_enabled: true,
            force_mute_mode: ForceMuteMode::Scheduled,
            force_mute_from: 22 * 60,
            force_mute_to: 7 * 60,
            ..Settings::default()
        };
        let initial = SignalState {
            media_volume: 5,
            ..SignalState::default()
        };
        let h = start(settings, initial, 21, 59);
        let snap = h.handle.snapshot().await.unwrap();
        assert!(snap.alarms_armed);
        assert!(!snap.state.force_mute_window_active);
        assert_eq!(h.output.count(), 0);

        // The manual clock stays put, so the alarm is due 60s after each wakeup.
        tokio::time::sleep(Duration::from_secs(120)).await;

        let snap = h.handle.snapshot().await.unwrap();
        assert!(snap.state.force_mute_window_active);
        assert!(snap.decision.should_mute_now);
        assert_eq!(h.output.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_change_rearms_alarms() {
        let h = start(Settings::default(), SignalState::default(), 12, 0);
        assert!(!h.handle.snapshot().await.unwrap().alarms_armed);

        h.handle
            .signal(SignalEvent::SettingsChanged(
                SettingsChange::ForceMuteEnabled(true),
            ))
            .await
            .unwrap();
        let snap = h.handle.snapshot().await.unwrap();
        assert!(snap.alarms_armed);
        assert!(snap.settings.force_mute_enabled);

        h.handle
            .signal(SignalEvent::SettingsChanged(SettingsChange::ForceMuteMode(
                ForceMuteMode::AlwaysOn,
            )))
            .await
            .unwrap();
        assert!(!h.handle.snapshot().await.unwrap().alarms_armed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_work() {
        let h = start(Settings::default(), SignalState::default(), 12, 0);
        h.handle.signal(media(3)).await.unwrap();
        h.handle.snapshot().await.unwrap();
        let before = h.presenter.count();

        h.handle.stop().await.unwrap();
        h.task.await.unwrap();
        tokio::time::sleep(TRAILING_DELAY * 2).await;

        assert_eq!(h.presenter.count(), before);
        assert!(h.handle.is_closed());
        assert!(h.handle.snapshot().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_force_mute_until_next_start() {
        let settings = Settings {
            force_mute_enabled: true,
            force_mute_mode: ForceMuteMode::Scheduled,
            force_mute_from: 22 * 60,
            force_mute_to: 7 * 60,
            ..Settings::default()
        };
        let initial = SignalState {
            media_volume: 5,
            ..SignalState::default()
        };
        let h = start(settings, initial, 22, 30);
        assert!(h.handle.snapshot().await.unwrap().decision.should_mute_now);
        assert_eq!(h.output.count(), 1);

        h.handle.send(WatcherCommand::StopForceMute).await.unwrap();
        let snap = h.handle.snapshot().await.unwrap();
        assert!(!snap.decision.should_mute_now);
        assert!(!snap.decision.force_mute_notice_visible);
        assert!(snap.alarms_armed);

        // The clock is frozen at 22:30: the end alarm is 8.5h out, the next
        // start 23.5h after that.
        tokio::time::sleep(Duration::from_secs(9 * 3600)).await;
        assert!(!h.handle.snapshot().await.unwrap().decision.should_mute_now);

        tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        let snap = h.handle.snapshot().await.unwrap();
        assert!(snap.state.force_mute_window_active);
        assert!(snap.decision.should_mute_now);
        assert_eq!(h.output.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mute_now_command() {
        let h = start(Settings::default(), SignalState::default(), 12, 0);
        h.handle.send(WatcherCommand::MuteNow).await.unwrap();
        h.handle.snapshot().await.unwrap();
        assert_eq!(h.output.count(), 1);
    }
}
