//! Library surface for the loopback DNS forwarder service, split out from
//! the `sdfw` binary so integration tests can exercise real components (a
//! real bound socket, a real settings file) without going through the CLI.

pub mod adapter_controller;
pub mod control;
pub mod forwarder;
pub mod health;
pub mod ipc;
pub mod settings;
pub mod signals;
pub mod upstream;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use model::ConnectionStatus;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use adapter_controller::AdapterController;
use control::ControlStateMachine;
use health::HealthMonitor;
use ipc::{IpcContext, IpcServer, ServerResponse};
use settings::SettingsStore;
use upstream::UpstreamTransport;

/// The composition root (§4.9, C9): constructs and wires C2 through C8,
/// relays their change notifications into C8's broadcast channel, drives a
/// boot-time `Start` when configured to, and blocks until a termination
/// signal arrives.
pub async fn run(config_dir: PathBuf) -> Result<()> {
    let settings = SettingsStore::load(&config_dir).await?;
    let adapters = Arc::new(AdapterController::new(settings.clone()));
    let transport = Arc::new(UpstreamTransport::new());
    let control = Arc::new(ControlStateMachine::new(transport, adapters.clone(), settings.clone()));

    let (notify, _) = broadcast::channel(64);
    relay_settings_changes(settings.clone(), notify.clone());

    let (health_tx, health_rx) = tokio::sync::watch::channel(None);
    let health = HealthMonitor::start(control.clone(), health_tx);
    relay_health_changes(health_rx, notify.clone());

    let ipc_context = IpcContext {
        settings: settings.clone(),
        adapters: adapters.clone(),
        control: control.clone(),
        notify: notify.clone(),
    };

    let runtime_dir = known_dirs::ipc_runtime_dir().context("Could not determine the IPC runtime directory")?;
    let ipc_server = IpcServer::bind(&runtime_dir, ipc_context)
        .await
        .context("Failed to bind IPC endpoint")?;

    let cancel = CancellationToken::new();
    let ipc_task = tokio::spawn(ipc_server.serve(cancel.clone()));

    maybe_start_on_boot(&settings, &adapters, &control).await;

    let mut terminate = signals::Terminate::new().context("Failed to install signal handlers")?;
    terminate.recv().await;
    tracing::info!("Caught termination signal, shutting down");

    cancel.cancel();
    ipc_task.await.ok();
    health.stop().await;
    control.stop().await;

    Ok(())
}

/// §4.9: "if `AppSettings.enabled` and `AppSettings.applyOnBoot` are both
/// true, it drives C6's `Start` transition against the default profile
/// automatically." Most platform adapter settings (e.g. Linux's
/// `resolvectl`) don't survive a reboot, so this first re-takes-over the
/// profile's adapters, exactly as `ApplyProfile` does over IPC, instead of
/// assuming they're still pointed at the loopback forwarder.
async fn maybe_start_on_boot(
    settings: &Arc<SettingsStore>,
    adapters: &Arc<AdapterController>,
    control: &Arc<ControlStateMachine>,
) {
    let snapshot = settings.snapshot().await;
    if !(snapshot.enabled && snapshot.apply_on_boot) {
        return;
    }

    let Some(profile) = snapshot.default_profile else {
        tracing::warn!("`enabled` and `applyOnBoot` are set, but there is no default profile");
        return;
    };

    let Some(provider) = snapshot.providers.into_iter().find(|p| p.id == profile.provider_id) else {
        tracing::warn!(provider_id = %profile.provider_id, "Default profile references a provider that no longer exists");
        return;
    };

    let applied = match adapters.take_over(&profile.adapter_ids).await {
        Ok(applied) => applied,
        Err(e) => {
            tracing::error!("Failed to take over adapters on boot: {e:#}");
            return;
        }
    };
    if applied == 0 {
        tracing::warn!("No adapters were successfully taken over on boot, not starting");
        return;
    }

    if let Err(e) = control.start(Arc::new(provider)).await {
        tracing::error!("Failed to start on boot: {e:#}");
    }
}

/// Bridges C2's settings-change broadcast into the IPC notify channel as a
/// `ConfigChanged` push, so connected clients don't need to poll `GetConfig`.
fn relay_settings_changes(settings: Arc<SettingsStore>, notify: broadcast::Sender<ServerResponse>) {
    let mut changes = settings.subscribe();
    tokio::spawn(async move {
        while changes.recv().await.is_ok() {
            notify.send(ServerResponse::ConfigChanged).ok();
        }
    });
}

/// Bridges C7's health-check outcomes into the IPC notify channel as a
/// `StatusChanged` push (§4.7: "the monitor only reports").
fn relay_health_changes(
    mut health_rx: tokio::sync::watch::Receiver<Option<health::StatusChanged>>,
    notify: broadcast::Sender<ServerResponse>,
) {
    tokio::spawn(async move {
        while health_rx.changed().await.is_ok() {
            if let Some(change) = *health_rx.borrow_and_update() {
                notify
                    .send(ServerResponse::StatusChanged {
                        status: change.to,
                        active_provider_id: None,
                    })
                    .ok();
                debug_assert_eq!(change.from, ConnectionStatus::Connected);
            }
        }
    });
}
