// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! D-Bus interface implementation for the daemon.

use crate::service::{BusSignal, DaemonService};
use quiet::{AudioStream, SignalEvent};
use quiet_ipc::{DaemonError, PresentationInfo, StatusInfo, DBUS_INTERFACE, DBUS_PATH};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use zbus::interface;

/// Input validation helpers for D-Bus method arguments.
mod validate {
    /// Validate a setting name or value: non-empty, max 64 chars, no control characters.
    pub fn validate_setting_arg(what: &str, arg: &str) -> Result<(), zbus::fdo::Error> {
        if arg.is_empty() {
            return Err(zbus::fdo::Error::InvalidArgs(format!(
                "Setting {} must not be empty",
                what
            )));
        }
        if arg.len() > 64 {
            return Err(zbus::fdo::Error::InvalidArgs(format!(
                "Setting {} exceeds 64 character limit (got {})",
                what,
                arg.len()
            )));
        }
        if arg.chars().any(|c| c.is_control()) {
            return Err(zbus::fdo::Error::InvalidArgs(format!(
                "Setting {} must not contain control characters",
                what
            )));
        }
        Ok(())
    }

    /// A negative level means the caller had no reading.
    pub fn level(level: i32) -> Option<u32> {
        u32::try_from(level).ok()
    }
}

fn to_fdo(e: crate::service::ServiceError) -> zbus::fdo::Error {
    DaemonError::from(e).into()
}

/// The D-Bus interface implementation.
pub struct QuietDbusService {
    service: Arc<DaemonService>,
}

impl QuietDbusService {
    pub fn new(service: Arc<DaemonService>) -> Self {
        Self { service }
    }
}

#[interface(name = "org.quiet.Watcher")]
impl QuietDbusService {
    /// Report a stream volume change.
    async fn volume_changed(&self, stream: &str, level: i32) -> zbus::fdo::Result<()> {
        debug!("D-Bus: volume_changed({}, {})", stream, level);
        let Ok(stream) = stream.parse::<AudioStream>() else {
            debug!("Ignoring volume change for unknown stream {:?}", stream);
            return Ok(());
        };
        let event = SignalEvent::VolumeChanged {
            stream,
            level: validate::level(level),
        };
        self.service.signal(event).await.map_err(to_fdo)
    }

    /// Report a headset connect or disconnect.
    async fn headset_changed(&self, connected: bool) -> zbus::fdo::Result<()> {
        debug!("D-Bus: headset_changed({})", connected);
        self.service
            .signal(SignalEvent::HeadsetChanged { connected })
            .await
            .map_err(to_fdo)
    }

    /// Report a call starting or ending.
    async fn call_state_changed(&self, active: bool) -> zbus::fdo::Result<()> {
        debug!("D-Bus: call_state_changed({})", active);
        self.service
            .signal(SignalEvent::CallStateChanged { active })
            .await
            .map_err(to_fdo)
    }

    /// Change one setting and persist it.
    async fn set_setting(&self, field: &str, value: &str) -> zbus::fdo::Result<()> {
        validate::validate_setting_arg("field", field)?;
        validate::validate_setting_arg("value", value)?;
        debug!("D-Bus: set_setting({}, {})", field, value);
        self.service.set_setting(field, value).await.map_err(to_fdo)
    }

    /// Mute media immediately.
    async fn mute_now(&self) -> zbus::fdo::Result<()> {
        debug!("D-Bus: mute_now()");
        self.service.mute_now().await.map_err(to_fdo)
    }

    /// Turn force mute off until the next scheduled window start.
    async fn stop_force_mute(&self) -> zbus::fdo::Result<()> {
        debug!("D-Bus: stop_force_mute()");
        self.service.stop_force_mute().await.map_err(to_fdo)
    }

    /// Get the watcher's current state and decision.
    async fn get_status(&self) -> zbus::fdo::Result<StatusInfo> {
        let snapshot = self.service.status().await.map_err(to_fdo)?;
        Ok(StatusInfo::from(&snapshot))
    }

    /// Stop the watcher without restarting it.
    async fn stop(&self) -> zbus::fdo::Result<()> {
        debug!("D-Bus: stop()");
        self.service.stop().await.map_err(to_fdo)
    }

    // ==================== Signals ====================

    /// Emitted when the notices should change.
    #[zbus(signal)]
    async fn presentation_changed(
        ctx: &zbus::SignalContext<'_>,
        info: PresentationInfo,
    ) -> zbus::Result<()>;

    /// Emitted after a stream has been muted.
    #[zbus(signal)]
    async fn mute_issued(ctx: &zbus::SignalContext<'_>, stream: &str) -> zbus::Result<()>;
}

// ==================== Public Signal Emission Helpers ====================

/// Emit PresentationChanged signal.
pub async fn emit_presentation_changed(
    ctx: &zbus::SignalContext<'_>,
    info: PresentationInfo,
) -> zbus::Result<()> {
    ctx.connection()
        .emit_signal(
            ctx.destination(),
            ctx.path(),
            DBUS_INTERFACE,
            "PresentationChanged",
            &(info,),
        )
        .await
}

/// Emit MuteIssued signal.
pub async fn emit_mute_issued(ctx: &zbus::SignalContext<'_>, stream: &str) -> zbus::Result<()> {
    ctx.connection()
        .emit_signal(
            ctx.destination(),
            ctx.path(),
            DBUS_INTERFACE,
            "MuteIssued",
            &(stream,),
        )
        .await
}

/// Emit one queued bus signal from the daemon's signal task.
pub async fn emit_bus_signal(connection: &zbus::Connection, event: BusSignal) {
    let object_server = connection.object_server();
    let iface_ref = match object_server
        .interface::<_, QuietDbusService>(DBUS_PATH)
        .await
    {
        Ok(iface) => iface,
        Err(e) => {
            warn!("Failed to get D-Bus interface for signal: {}", e);
            return;
        }
    };
    let ctx = iface_ref.signal_context();
    match event {
        BusSignal::PresentationChanged(info) => {
            debug!("Emitting D-Bus PresentationChanged signal: {:?}", info);
            if let Err(e) = emit_presentation_changed(ctx, info).await {
                warn!("Failed to emit PresentationChanged signal: {}", e);
            }
        }
        BusSignal::MuteIssued(stream) => {
            debug!("Emitting D-Bus MuteIssued signal: {}", stream);
            if let Err(e) = emit_mute_issued(ctx, stream.as_str()).await {
                warn!("Failed to emit MuteIssued signal: {}", e);
            }
        }
    }
}

/// Feed queued bus signals to `emit` until `shutdown` fires, then flush the
/// queue and return. Senders may still be alive at that point.
pub async fn pump_signals<F, Fut>(
    mut signal_rx: mpsc::UnboundedReceiver<BusSignal>,
    mut shutdown: oneshot::Receiver<()>,
    mut emit: F,
) where
    F: FnMut(BusSignal) -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        tokio::select! {
            Some(event) = signal_rx.recv() => emit(event).await,
            _ = &mut shutdown => {
                while let Ok(event) = signal_rx.try_recv() {
                    emit(event).await;
                }
                break;
            }
        }
    }
}
