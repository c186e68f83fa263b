//! Control state machine (§4.6): Inactive/Connecting/Testing/Connected/Error,
//! with the default-vs-temporary active-provider distinction.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use model::{ConnectionStatus, Provider, ProviderId};
use tokio::sync::{watch, Mutex};

use crate::{
    adapter_controller::AdapterController, forwarder::Forwarder, settings::SettingsStore,
    upstream::UpstreamTransport,
};

pub(crate) const TEST_DOMAIN: &str = "example.com";

pub struct ControlState {
    pub status: ConnectionStatus,
    pub active: Option<Arc<Provider>>,
    pub default: Option<ProviderId>,
    pub is_temporary: bool,
    pub last_error: Option<String>,
    pub last_health_check: Option<chrono::DateTime<chrono::Utc>>,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Inactive,
            active: None,
            default: None,
            is_temporary: false,
            last_error: None,
            last_health_check: None,
        }
    }
}

/// Serializes Start/Switch/RevertToDefault/Disable/Stop requests (§4.6:
/// "Concurrent Switch requests are serialized; the last one wins").
pub struct ControlStateMachine {
    state: Mutex<ControlState>,
    active_tx: watch::Sender<Arc<Provider>>,
    transport: Arc<UpstreamTransport>,
    adapters: Arc<AdapterController>,
    settings: Arc<SettingsStore>,
    forwarder: Mutex<Option<Forwarder>>,
}

/// Placeholder active-provider value before the first Start, never queried
/// in practice since the forwarder only exists from Start onward.
fn no_provider() -> Arc<Provider> {
    Arc::new(Provider {
        id: ProviderId::random(),
        name: "none".into(),
        description: None,
        is_built_in: false,
        kind: model::ProviderKind::Standard {
            primary_ipv4: Some(std::net::Ipv4Addr::LOCALHOST),
            secondary_ipv4: None,
            primary_ipv6: None,
            secondary_ipv6: None,
        },
    })
}

impl ControlStateMachine {
    pub fn new(
        transport: Arc<UpstreamTransport>,
        adapters: Arc<AdapterController>,
        settings: Arc<SettingsStore>,
    ) -> Self {
        let (active_tx, _) = watch::channel(no_provider());

        Self {
            state: Mutex::new(ControlState::default()),
            active_tx,
            transport,
            adapters,
            settings,
            forwarder: Mutex::new(None),
        }
    }

    pub async fn status_snapshot(&self) -> (ConnectionStatus, Option<Arc<Provider>>, bool, Option<String>) {
        let state = self.state.lock().await;
        (
            state.status,
            state.active.clone(),
            state.is_temporary,
            state.last_error.clone(),
        )
    }

    pub async fn queries_handled(&self) -> u64 {
        self.forwarder
            .lock()
            .await
            .as_ref()
            .map(Forwarder::queries_handled)
            .unwrap_or(0)
    }

    /// Start(provider): per §4.6, "a Start while not-Inactive is treated as
    /// Stop-then-Start".
    pub async fn start(&self, provider: Arc<Provider>) -> Result<()> {
        if !matches!(self.state.lock().await.status, ConnectionStatus::Inactive) {
            self.stop().await;
        }

        {
            let mut state = self.state.lock().await;
            state.status = ConnectionStatus::Connecting;
            state.default = Some(provider.id);
            state.is_temporary = false;
        }

        self.active_tx.send(provider.clone()).ok();

        let forwarder = match Forwarder::start(self.transport.clone(), self.active_tx.subscribe()).await
        {
            Ok(f) => f,
            Err(e) => {
                let mut state = self.state.lock().await;
                state.status = ConnectionStatus::Inactive;
                state.last_error = Some(format!("{e:#}"));
                return Err(e).context("Failed to bind loopback listeners");
            }
        };
        *self.forwarder.lock().await = Some(forwarder);

        {
            let mut state = self.state.lock().await;
            state.status = ConnectionStatus::Testing;
            state.active = Some(provider.clone());
        }

        self.run_synthetic_test(provider).await;

        Ok(())
    }

    /// Switch(provider, isTemporary).
    pub async fn switch(&self, provider: Arc<Provider>, is_temporary: bool) -> Result<()> {
        if matches!(self.state.lock().await.status, ConnectionStatus::Inactive) {
            bail!("Cannot Switch while Inactive");
        }

        {
            let mut state = self.state.lock().await;
            state.status = ConnectionStatus::Testing;
            state.active = Some(provider.clone());
            state.is_temporary = is_temporary;
            if !is_temporary {
                state.default = Some(provider.id);
            }
        }
        self.active_tx.send(provider.clone()).ok();

        self.run_synthetic_test(provider).await;

        Ok(())
    }

    pub async fn revert_to_default(&self) -> Result<()> {
        let default_id = self.state.lock().await.default;
        let Some(default_id) = default_id else {
            bail!("No default provider to revert to");
        };

        let provider = self.find_provider(default_id).await?;
        self.switch(provider, false).await
    }

    /// Disable(restoreDns): Stop the forwarder, optionally restore adapter
    /// backups, and persist `enabled=false`.
    pub async fn disable(&self, restore_dns: bool) -> Result<()> {
        self.stop().await;

        if restore_dns {
            self.adapters.restore_all().await?;
        }

        self.settings.mutate(|s| s.enabled = false).await?;

        Ok(())
    }

    /// Stop: unconditional teardown regardless of current state.
    pub async fn stop(&self) {
        if let Some(forwarder) = self.forwarder.lock().await.take() {
            forwarder.stop().await;
        }

        let mut state = self.state.lock().await;
        state.status = ConnectionStatus::Inactive;
        state.active = None;
        state.is_temporary = false;
    }

    /// One-shot latency check against `test_domain`; never mutates state
    /// (§4.8 `TestProvider`).
    pub async fn test_provider(&self, provider: &Provider, test_domain: &str) -> Result<std::time::Duration> {
        let start = std::time::Instant::now();
        let query = dns_types::Query::new(test_domain, dns_types::rtype::A)
            .context("Failed to build synthetic test query")?;
        let response = self.transport.query(provider, query.as_bytes()).await?;
        dns_types::parse_response(&response).context("Synthetic test response was malformed")?;

        Ok(start.elapsed())
    }

    /// Demotes `Connected` to `Error` after a failed health-monitor check
    /// (§4.7). The monitor only reports; this is the one place it's allowed
    /// to mutate state, and only along that single edge.
    pub async fn mark_unhealthy(&self, message: String) {
        let mut state = self.state.lock().await;
        if matches!(state.status, ConnectionStatus::Connected) {
            state.status = ConnectionStatus::Error;
            state.last_error = Some(message);
        }
    }

    async fn run_synthetic_test(&self, provider: Arc<Provider>) {
        let outcome = self.test_provider(&provider, TEST_DOMAIN).await;
        let mut state = self.state.lock().await;
        state.last_health_check = Some(chrono::Utc::now());

        match outcome {
            Ok(_) => {
                state.status = ConnectionStatus::Connected;
                state.last_error = None;
            }
            Err(e) => {
                state.status = ConnectionStatus::Error;
                state.last_error = Some(format!("{e:#}"));
            }
        }
    }

    async fn find_provider(&self, id: ProviderId) -> Result<Arc<Provider>> {
        let settings = self.settings.snapshot().await;
        settings
            .providers
            .into_iter()
            .find(|p| p.id == id)
            .map(Arc::new)
            .with_context(|| format!("Provider '{id}' not found"))
    }
}

/// Lets other modules' tests (e.g. the health monitor's) drive this machine
/// into a state reachable only via a real network query in production.
#[cfg(test)]
impl ControlStateMachine {
    pub(crate) async fn force_status_for_test(&self, status: ConnectionStatus, active: Option<Arc<Provider>>) {
        let mut state = self.state.lock().await;
        state.status = status;
        state.active = active;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter_controller::AdapterController;

    async fn machine() -> ControlStateMachine {
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsStore::load(dir.path()).await.unwrap();
        let adapters = Arc::new(AdapterController::new(settings.clone()));
        let transport = Arc::new(UpstreamTransport::new());
        ControlStateMachine::new(transport, adapters, settings)
    }

    #[tokio::test]
    async fn initial_state_is_inactive() {
        let machine = machine().await;
        let (status, active, is_temporary, last_error) = machine.status_snapshot().await;
        assert_eq!(status, ConnectionStatus::Inactive);
        assert!(active.is_none());
        assert!(!is_temporary);
        assert!(last_error.is_none());
        assert_eq!(machine.queries_handled().await, 0);
    }

    #[tokio::test]
    async fn switch_while_inactive_is_rejected() {
        let machine = machine().await;
        let err = machine.switch(no_provider(), false).await.unwrap_err();
        assert!(err.to_string().contains("Inactive"));
    }

    #[tokio::test]
    async fn revert_to_default_without_a_default_errors() {
        let machine = machine().await;
        let err = machine.revert_to_default().await.unwrap_err();
        assert!(err.to_string().contains("No default provider"));
    }

    #[tokio::test]
    async fn mark_unhealthy_only_demotes_a_connected_session() {
        let machine = machine().await;

        machine.mark_unhealthy("boom".into()).await;
        assert_eq!(machine.status_snapshot().await.0, ConnectionStatus::Inactive);

        machine.state.lock().await.status = ConnectionStatus::Connected;
        machine.mark_unhealthy("boom".into()).await;
        let (status, _, _, last_error) = machine.status_snapshot().await;
        assert_eq!(status, ConnectionStatus::Error);
        assert_eq!(last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn find_provider_reports_a_missing_id() {
        let machine = machine().await;
        let err = machine.find_provider(ProviderId::random()).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
