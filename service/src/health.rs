//! Health monitor (§4.7): a single recurring background task that re-runs
//! the synthetic test against the active provider while status is
//! `Connected`, demoting to `Error` on failure. It only reports — it never
//! drives retries or reconnection itself.

use std::{sync::Arc, time::Duration};

use model::ConnectionStatus;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::control::{ControlStateMachine, TEST_DOMAIN};

/// §4.7 default check interval; overridable via `AppSettings.extra` in a
/// future revision, but no control surface exposes that knob yet.
const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const SHUTDOWN_JOIN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChanged {
    pub from: ConnectionStatus,
    pub to: ConnectionStatus,
}

pub struct HealthMonitor {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl HealthMonitor {
    pub fn start(
        control: Arc<ControlStateMachine>,
        notify: watch::Sender<Option<StatusChanged>>,
    ) -> Self {
        Self::start_with_interval(control, notify, DEFAULT_CHECK_INTERVAL)
    }

    pub fn start_with_interval(
        control: Arc<ControlStateMachine>,
        notify: watch::Sender<Option<StatusChanged>>,
        interval: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }

                let (status, active, _, _) = control.status_snapshot().await;
                let ConnectionStatus::Connected = status else {
                    continue;
                };
                let Some(provider) = active else { continue };

                if let Err(e) = control.test_provider(&provider, TEST_DOMAIN).await {
                    tracing::warn!(provider = %provider.name, "Health check failed: {e:#}");
                    control.mark_unhealthy(format!("{e:#}")).await;
                    notify
                        .send(Some(StatusChanged {
                            from: ConnectionStatus::Connected,
                            to: ConnectionStatus::Error,
                        }))
                        .ok();
                }
            }
        });

        Self { cancel, task }
    }

    /// Cooperative stop with up to [`SHUTDOWN_JOIN`] before abandoning the task.
    pub async fn stop(self) {
        self.cancel.cancel();
        if tokio::time::timeout(SHUTDOWN_JOIN, self.task).await.is_err() {
            tracing::warn!("Health monitor did not stop within the drain window");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{adapter_controller::AdapterController, settings::SettingsStore, upstream::UpstreamTransport};
    use model::{Provider, ProviderId, ProviderKind};

    async fn idle_control() -> Arc<ControlStateMachine> {
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsStore::load(dir.path()).await.unwrap();
        let adapters = Arc::new(AdapterController::new(settings.clone()));
        let transport = Arc::new(UpstreamTransport::new());
        Arc::new(ControlStateMachine::new(transport, adapters, settings))
    }

    fn unreachable_provider() -> Arc<Provider> {
        Arc::new(Provider {
            id: ProviderId::random(),
            name: "Empty".into(),
            description: None,
            is_built_in: false,
            kind: ProviderKind::Standard {
                primary_ipv4: None,
                secondary_ipv4: None,
                primary_ipv6: None,
                secondary_ipv6: None,
            },
        })
    }

    #[tokio::test]
    async fn a_failed_check_demotes_connected_to_error_and_notifies() {
        let control = idle_control().await;
        control
            .force_status_for_test(ConnectionStatus::Connected, Some(unreachable_provider()))
            .await;

        let (tx, mut rx) = watch::channel(None);
        let monitor = HealthMonitor::start_with_interval(control.clone(), tx, Duration::from_millis(20));

        rx.changed().await.expect("the monitor task should still be alive");
        let change = (*rx.borrow_and_update()).expect("a status change should have been sent");
        assert_eq!(
            change,
            StatusChanged {
                from: ConnectionStatus::Connected,
                to: ConnectionStatus::Error,
            }
        );

        let (status, ..) = control.status_snapshot().await;
        assert_eq!(status, ConnectionStatus::Error);

        monitor.stop().await;
    }

    #[tokio::test]
    async fn an_inactive_session_is_left_alone() {
        let control = idle_control().await;
        let (tx, rx) = watch::channel(None);
        let monitor = HealthMonitor::start_with_interval(control, tx, Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(rx.borrow().is_none());

        monitor.stop().await;
    }
}
