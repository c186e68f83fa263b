//! Orchestrates [`bin_shared`]'s per-adapter primitives against the settings
//! store (§4.3). Error semantics: a single adapter's failure is logged and
//! does not abort the operation; the settings' backup list remains the
//! source of truth for what still needs restoring, including across a
//! crash.

use std::sync::Arc;

use anyhow::Result;
use bin_shared::HostAdapter;
use model::AdapterId;

use crate::settings::SettingsStore;

pub struct AdapterController {
    settings: Arc<SettingsStore>,
}

impl AdapterController {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self { settings }
    }

    pub async fn list_adapters(&self) -> Result<Vec<HostAdapter>> {
        bin_shared::enumerate_adapters().await
    }

    /// Applies loopback DNS to every adapter in `target_ids`, capturing a
    /// backup first if one doesn't already exist for that adapter.
    /// Returns the number of adapters successfully updated.
    pub async fn take_over(&self, target_ids: &[AdapterId]) -> Result<usize> {
        let adapters = self.list_adapters().await?;
        let mut applied = 0usize;

        for id in target_ids {
            let Some(adapter) = adapters.iter().find(|a| &a.id == id) else {
                tracing::warn!(%id, "Adapter not found during takeover, skipping");
                continue;
            };

            if let Err(e) = self.ensure_backup(adapter).await {
                tracing::error!(%id, "Failed to back up adapter DNS: {e:#}");
                continue;
            }

            match bin_shared::apply_loopback(adapter).await {
                Ok(()) => applied += 1,
                Err(e) => tracing::error!(%id, "Failed to apply loopback DNS: {e:#}"),
            }
        }

        Ok(applied)
    }

    async fn ensure_backup(&self, adapter: &HostAdapter) -> Result<()> {
        let already_backed_up = self
            .settings
            .snapshot()
            .await
            .adapter_backups
            .iter()
            .any(|b| b.adapter_id == adapter.id);
        if already_backed_up {
            return Ok(());
        }

        let backup = bin_shared::capture_backup(adapter).await?;
        self.settings
            .mutate(|s| s.adapter_backups.push(backup))
            .await?;
        Ok(())
    }

    /// Restores every backed-up adapter. Nonfatal per-adapter failures are
    /// logged and skipped, and that adapter's backup entry is kept so a
    /// subsequent retry (e.g. after a reboot) still has the DNS state it
    /// needs to restore from; only entries that were actually restored (or
    /// whose adapter no longer exists) are dropped from the settings
    /// document.
    pub async fn restore_all(&self) -> Result<()> {
        let backups = self.settings.snapshot().await.adapter_backups;
        if backups.is_empty() {
            return Ok(());
        }

        let adapters = self.list_adapters().await?;
        let mut still_pending = std::collections::HashSet::new();

        for backup in &backups {
            let Some(adapter) = adapters.iter().find(|a| a.id == backup.adapter_id) else {
                tracing::warn!(adapter_id = %backup.adapter_id, "Adapter gone, dropping stale backup");
                continue;
            };

            if let Err(e) = bin_shared::restore(adapter, backup).await {
                tracing::error!(adapter_id = %backup.adapter_id, "Failed to restore adapter DNS: {e:#}");
                still_pending.insert(backup.adapter_id.clone());
            }
        }

        self.settings
            .mutate(|s| s.adapter_backups.retain(|b| still_pending.contains(&b.adapter_id)))
            .await?;

        Ok(())
    }

    pub async fn flush_dns_cache(&self) -> Result<()> {
        bin_shared::flush_dns_cache().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn restore_all_is_a_no_op_with_no_backups() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsStore::load(dir.path()).await.unwrap();
        let controller = AdapterController::new(settings);

        controller.restore_all().await.unwrap();
    }
}
