// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Daemon service: owns the running watcher, persists settings and restarts
//! the watcher when it dies without being asked to.

use crate::audio::{WpctlOutput, WpctlProbe};
use crate::config::{ConfigError, ConfigManager};
use parking_lot::{Mutex, RwLock};
use quiet::{
    AfterStop, AudioStream, Clock, DebounceNotifier, PresentationUpdate, Presenter,
    ServiceLifecycle, Settings, SettingsChange, SettingsError, SignalAggregator, SignalEvent,
    SignalState, SystemClock, Watcher, WatcherCommand, WatcherError, WatcherHandle,
    WatcherSnapshot,
};
use quiet_ipc::{DaemonError, PresentationInfo};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

/// D-Bus signal events that need to be emitted.
#[derive(Debug, Clone)]
pub enum BusSignal {
    PresentationChanged(PresentationInfo),
    MuteIssued(AudioStream),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Invalid setting: {0}")]
    Setting(#[from] SettingsError),
    #[error("Watcher not running")]
    WatcherUnavailable,
}

impl From<WatcherError> for ServiceError {
    fn from(_: WatcherError) -> Self {
        ServiceError::WatcherUnavailable
    }
}

impl From<ServiceError> for DaemonError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Setting(e) => DaemonError::InvalidArgument(e.to_string()),
            ServiceError::Config(e) => DaemonError::Config(e.to_string()),
            ServiceError::WatcherUnavailable => DaemonError::WatcherUnavailable,
        }
    }
}

/// Forwards presentation updates to the D-Bus signal task.
pub struct BusPresenter {
    signal_tx: UnboundedSender<BusSignal>,
}

impl BusPresenter {
    pub fn new(signal_tx: UnboundedSender<BusSignal>) -> Self {
        Self { signal_tx }
    }
}

impl Presenter for BusPresenter {
    fn present(&mut self, update: &PresentationUpdate) {
        let info = PresentationInfo::from(update);
        let _ = self.signal_tx.send(BusSignal::PresentationChanged(info));
    }
}

pub struct DaemonService {
    config: ConfigManager,
    settings: Mutex<Settings>,
    lifecycle: Mutex<ServiceLifecycle>,
    watcher: RwLock<Option<WatcherHandle>>,
    signal_tx: UnboundedSender<BusSignal>,
}

impl DaemonService {
    pub fn new(
        config: ConfigManager,
        settings: Settings,
        signal_tx: UnboundedSender<BusSignal>,
    ) -> Self {
        Self {
            config,
            settings: Mutex::new(settings),
            lifecycle: Mutex::new(ServiceLifecycle::new()),
            watcher: RwLock::new(None),
            signal_tx,
        }
    }

    pub fn settings(&self) -> Settings {
        self.settings.lock().clone()
    }

    fn handle(&self) -> Result<WatcherHandle, ServiceError> {
        self.watcher
            .read()
            .clone()
            .ok_or(ServiceError::WatcherUnavailable)
    }

    /// Forward an external event to the watcher.
    pub async fn signal(&self, event: SignalEvent) -> Result<(), ServiceError> {
        self.handle()?.signal(event).await?;
        Ok(())
    }

    /// Change one setting, apply it to the running watcher and persist it.
    pub async fn set_setting(&self, field: &str, value: &str) -> Result<(), ServiceError> {
        let change = SettingsChange::parse(field, value)?;
        self.update_settings(change).await
    }

    async fn update_settings(&self, change: SettingsChange) -> Result<(), ServiceError> {
        info!("Setting changed: {}", change);
        let updated = {
            let mut settings = self.settings.lock();
            settings.apply(&change);
            settings.clone()
        };
        if let Ok(handle) = self.handle() {
            handle.signal(SignalEvent::SettingsChanged(change)).await?;
        }
        self.config.save_settings(&updated)?;
        Ok(())
    }

    pub async fn mute_now(&self) -> Result<(), ServiceError> {
        self.handle()?.send(WatcherCommand::MuteNow).await?;
        Ok(())
    }

    /// Turn force mute off until the next scheduled window start.
    pub async fn stop_force_mute(&self) -> Result<(), ServiceError> {
        self.handle()?.send(WatcherCommand::StopForceMute).await?;
        Ok(())
    }

    pub async fn status(&self) -> Result<WatcherSnapshot, ServiceError> {
        Ok(self.handle()?.snapshot().await?)
    }

    /// Mark the service enabled at startup.
    pub async fn enable(&self) -> Result<(), ServiceError> {
        if self.settings.lock().service_enabled {
            return Ok(());
        }
        self.update_settings(SettingsChange::ServiceEnabled(true)).await
    }

    /// User-requested stop: disable the service and let the supervisor exit.
    ///
    /// Succeeds while the watcher is down for a restart; the supervisor
    /// then exits instead of respawning it.
    pub async fn stop(&self) -> Result<(), ServiceError> {
        info!("Stopping service on user request");
        self.lifecycle.lock().mark_user_stop();
        if let Err(e) = self
            .update_settings(SettingsChange::ServiceEnabled(false))
            .await
        {
            warn!("Failed to persist disabled state: {}", e);
        }
        if let Ok(handle) = self.handle() {
            if handle.stop().await.is_err() {
                debug!("Watcher already gone");
            }
        }
        Ok(())
    }

    /// Process shutdown: stop the watcher for good but keep the service enabled.
    pub async fn shutdown(&self) {
        self.lifecycle.lock().mark_user_stop();
        if let Ok(handle) = self.handle() {
            let _ = handle.stop().await;
        }
    }

    /// Build a watcher wired to wpctl and the D-Bus signal channel.
    fn build_watcher(&self, settings: Settings) -> Watcher<SystemClock> {
        let initial = SignalState::probe(&WpctlProbe);
        let output = WpctlOutput::new(self.signal_tx.clone());
        let aggregator = SignalAggregator::new(settings, initial, SystemClock, Box::new(output));
        let notifier = DebounceNotifier::new(Box::new(BusPresenter::new(self.signal_tx.clone())));
        Watcher::new(aggregator, notifier)
    }

    /// Run the wpctl-backed watcher until the user stops it.
    pub async fn run(&self) {
        self.supervise(|settings| self.build_watcher(settings)).await;
    }

    /// Run watchers built by `build`, restarting after unexpected termination.
    pub async fn supervise<C, F>(&self, mut build: F)
    where
        C: Clock,
        F: FnMut(Settings) -> Watcher<C>,
        Watcher<C>: Send + 'static,
    {
        loop {
            let (handle, task) = build(self.settings()).spawn();
            *self.watcher.write() = Some(handle);

            if let Err(e) = task.await {
                error!("Watcher task failed: {}", e);
            }
            self.watcher.write().take();

            let after = self.lifecycle.lock().on_terminated();
            match after {
                AfterStop::Exit => break,
                AfterStop::RestartAfter(delay) => {
                    tokio::time::sleep(delay).await;
                    if self.lifecycle.lock().stop_triggered_by_user() {
                        info!("Stop requested during restart delay, not restarting");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiet::lifecycle::RESTART_DELAY;
    use quiet::{ForceMuteMode, MediaOutput, MuteCommand};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Panics on the first mute of the first watcher only.
    struct FlakyOutput {
        panic: bool,
    }

    impl MediaOutput for FlakyOutput {
        fn mute(&mut self, _command: MuteCommand) -> bool {
            if self.panic {
                panic!("audio backend went away");
            }
            true
        }
    }

    fn service() -> (
        Arc<DaemonService>,
        mpsc::UnboundedReceiver<BusSignal>,
        tempfile::TempDir,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigManager::with_dir(dir.path()).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Arc::new(DaemonService::new(config, Settings::default(), tx));
        (service, rx, dir)
    }

    fn spawn_supervisor(service: &Arc<DaemonService>, builds: Arc<AtomicUsize>) {
        let svc = service.clone();
        let signal_tx = service.signal_tx.clone();
        tokio::spawn(async move {
            svc.supervise(move |settings| {
                let n = builds.fetch_add(1, Ordering::SeqCst);
                let output = FlakyOutput { panic: n == 0 };
                let aggregator = SignalAggregator::new(
                    settings,
                    SignalState::default(),
                    SystemClock,
                    Box::new(output),
                );
                let presenter = BusPresenter::new(signal_tx.clone());
                let notifier = DebounceNotifier::new(Box::new(presenter));
                Watcher::new(aggregator, notifier)
            })
            .await;
        });
    }

    #[tokio::test]
    async fn test_no_watcher_is_unavailable() {
        let (service, _rx, _dir) = service();
        assert!(matches!(
            service.mute_now().await,
            Err(ServiceError::WatcherUnavailable)
        ));
        assert!(matches!(
            service.set_setting("force_mute_to", "9999").await,
            Err(ServiceError::Setting(SettingsError::MinuteOutOfRange(9999)))
        ));
    }

    #[tokio::test]
    async fn test_set_setting_persists_without_watcher() {
        let (service, _rx, dir) = service();
        service
            .set_setting("force_mute_mode", "always_on")
            .await
            .unwrap();
        assert_eq!(service.settings().force_mute_mode, ForceMuteMode::AlwaysOn);

        let reloaded = ConfigManager::with_dir(dir.path())
            .unwrap()
            .load_settings()
            .unwrap();
        assert_eq!(reloaded.force_mute_mode, ForceMuteMode::AlwaysOn);
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervisor_restarts_after_crash_and_exits_on_stop() {
        let (service, mut rx, _dir) = service();
        let builds = Arc::new(AtomicUsize::new(0));
        spawn_supervisor(&service, builds.clone());

        // Let the first watcher start and push its initial presentation.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(matches!(
            rx.recv().await,
            Some(BusSignal::PresentationChanged(_))
        ));

        // Crash it, then wait out the restart delay.
        service.mute_now().await.unwrap();
        tokio::time::sleep(RESTART_DELAY + Duration::from_millis(10)).await;
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert!(service.status().await.is_ok());

        service.stop().await.unwrap();
        tokio::time::sleep(RESTART_DELAY * 2).await;
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert!(matches!(
            service.status().await,
            Err(ServiceError::WatcherUnavailable)
        ));
        assert!(!service.settings().service_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_restart_delay_exits() {
        let (service, _rx, _dir) = service();
        let builds = Arc::new(AtomicUsize::new(0));
        spawn_supervisor(&service, builds.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;

        service.mute_now().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(service.stop().await.is_ok());

        tokio::time::sleep(RESTART_DELAY * 2).await;
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(matches!(
            service.status().await,
            Err(ServiceError::WatcherUnavailable)
        ));
        assert!(!service.settings().service_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_force_mute_reaches_watcher() {
        let (service, _rx, _dir) = service();
        service
            .set_setting("force_mute_mode", "always_on")
            .await
            .unwrap();
        service
            .set_setting("force_mute_enabled", "true")
            .await
            .unwrap();
        spawn_supervisor(&service, Arc::new(AtomicUsize::new(1)));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(service.status().await.unwrap().decision.force_mute_notice_visible);
        service.stop_force_mute().await.unwrap();
        let snapshot = service.status().await.unwrap();
        assert!(snapshot.state.force_mute_suspended);
        assert!(!snapshot.decision.force_mute_notice_visible);
    }

    #[tokio::test]
    async fn test_presenter_forwards_presentation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut presenter = BusPresenter::new(tx);
        let update = PresentationUpdate::from(&quiet::Decision {
            volume_notice_visible: true,
            displayed_volume: 12,
            ..quiet::Decision::default()
        });
        presenter.present(&update);
        match rx.recv().await {
            Some(BusSignal::PresentationChanged(info)) => {
                assert!(info.volume_visible);
                assert_eq!(info.volume, 12);
            }
            other => panic!("unexpected signal: {:?}", other),
        }
    }
}
