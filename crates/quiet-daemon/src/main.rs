// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Quiet Daemon - Background media-volume watcher.
//!
//! This daemon keeps the watcher running, mutes the default sink when the
//! watcher decides to, and exposes a D-Bus interface that the platform bridge
//! reports volume, headset and call changes through.

mod audio;
mod config;
mod dbus;
mod service;

use dbus::QuietDbusService;
use quiet_ipc::{DBUS_NAME, DBUS_PATH};
use service::BusSignal;
use std::sync::Arc;
use tokio::sync::{mpsc as tokio_mpsc, oneshot};
use tracing::{error, info, warn};
use zbus::connection::Builder;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("quiet=debug".parse()?)
                .add_directive("quiet_daemon=debug".parse()?)
                .add_directive("zbus=warn".parse()?),
        )
        .init();

    info!("Quiet Daemon starting...");

    // Load configuration
    let config_manager = config::ConfigManager::new()?;
    let settings = config_manager.load_settings().unwrap_or_else(|e| {
        warn!("Ignoring unusable settings file: {}", e);
        Default::default()
    });

    info!(
        "Loaded settings: force mute {} ({}, {}..{})",
        if settings.force_mute_enabled { "on" } else { "off" },
        settings.force_mute_mode.as_str(),
        settings.force_mute_from,
        settings.force_mute_to
    );

    // Create signal channel for D-Bus signal events
    let (signal_tx, signal_rx) = tokio_mpsc::unbounded_channel::<BusSignal>();

    let service = Arc::new(service::DaemonService::new(
        config_manager,
        settings,
        signal_tx,
    ));

    // Starting the daemon is the user starting the service.
    if let Err(e) = service.enable().await {
        warn!("Failed to persist enabled state: {}", e);
    }

    // Create D-Bus interface
    let dbus_service = QuietDbusService::new(service.clone());

    // Build D-Bus connection
    let connection = Builder::session()?
        .name(DBUS_NAME)?
        .serve_at(DBUS_PATH, dbus_service)?
        .build()
        .await?;

    info!("D-Bus service registered at {}", DBUS_NAME);

    // Spawn the watcher supervisor
    let service_run = service.clone();
    let mut watcher_task = tokio::spawn(async move {
        service_run.run().await;
    });

    // Spawn the default sink monitor
    let monitor_task = tokio::spawn(audio::monitor::run(service.clone()));

    info!("Quiet Daemon ready");

    // Spawn task to emit D-Bus signals from the signal channel
    let (signal_shutdown_tx, signal_shutdown_rx) = oneshot::channel::<()>();
    let signal_task = tokio::spawn(async move {
        dbus::pump_signals(signal_rx, signal_shutdown_rx, |event| {
            dbus::emit_bus_signal(&connection, event)
        })
        .await;
    });

    // Handle shutdown signals
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down...");
        }
        result = &mut watcher_task => {
            if let Err(e) = result {
                error!("Watcher supervisor failed: {}", e);
            }
            info!("Watcher stopped on request, shutting down...");
        }
    }

    // Stop the watcher and wait for it (with timeout)
    monitor_task.abort();
    service.shutdown().await;
    if !watcher_task.is_finished() {
        let _ = tokio::time::timeout(tokio::time::Duration::from_secs(2), watcher_task).await;
    }

    // Flush queued signals and stop emitting.
    let _ = signal_shutdown_tx.send(());
    let _ = tokio::time::timeout(tokio::time::Duration::from_secs(1), signal_task).await;

    info!("Quiet Daemon stopped");
    Ok(())
}
