//! Persistent configuration store (§4.2 "Settings store").
//!
//! The document lives at `known_dirs::config_dir()/config.json` and is
//! guarded by a single coarse `tokio::sync::Mutex`: readers see a committed
//! snapshot or the previous committed snapshot, never a torn write, because
//! every write goes through [`atomicwrites::AtomicFile`] (write-temp,
//! fsync, rename).

use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use atomicwrites::{AtomicFile, OverwriteBehavior};
use model::{builtin_providers, AppSettings};
use tokio::sync::{broadcast, Mutex};

const CONFIG_FILE_NAME: &str = "config.json";

/// Broadcast to every IPC client whenever a write commits, so C8 can relay a
/// `SettingsChanged` notification without polling.
#[derive(Debug, Clone)]
pub struct SettingsChanged;

pub struct SettingsStore {
    path: PathBuf,
    state: Mutex<AppSettings>,
    changes: broadcast::Sender<SettingsChanged>,
}

impl SettingsStore {
    /// Loads the document at `config_dir/config.json`, seeding it with the
    /// built-in provider catalogue if the file doesn't exist yet (§4.2).
    pub async fn load(config_dir: &Path) -> Result<Arc<Self>> {
        tokio::fs::create_dir_all(config_dir)
            .await
            .with_context(|| format!("Failed to create {}", config_dir.display()))?;
        let path = config_dir.join(CONFIG_FILE_NAME);

        let settings = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("Failed to parse {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let seeded = AppSettings::seed_default(builtin_providers());
                write_atomically(&path, &seeded)?;
                seeded
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };

        let (changes, _) = broadcast::channel(16);

        Ok(Arc::new(Self {
            path,
            state: Mutex::new(settings),
            changes,
        }))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettingsChanged> {
        self.changes.subscribe()
    }

    pub async fn snapshot(&self) -> AppSettings {
        self.state.lock().await.clone()
    }

    /// Replaces the whole document and persists it atomically. Used by both
    /// `SaveConfig` and the internal mutators below, so every write goes
    /// through the same commit path.
    pub async fn replace(&self, settings: AppSettings) -> Result<()> {
        write_atomically(&self.path, &settings)?;
        *self.state.lock().await = settings;
        // No receivers is not an error; it just means nobody's listening yet.
        self.changes.send(SettingsChanged).ok();
        Ok(())
    }

    pub async fn mutate<F>(&self, f: F) -> Result<AppSettings>
    where
        F: FnOnce(&mut AppSettings),
    {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        f(&mut next);
        write_atomically(&self.path, &next)?;
        *guard = next.clone();
        self.changes.send(SettingsChanged).ok();
        Ok(next)
    }
}

fn write_atomically(path: &Path, settings: &AppSettings) -> Result<()> {
    let json = serde_json::to_vec_pretty(settings).context("Failed to serialize settings")?;
    let file = AtomicFile::new(path, OverwriteBehavior::AllowOverwrite);
    file.write(|f| f.write_all(&json))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_load_seeds_the_builtin_catalogue() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path()).await.unwrap();

        let settings = store.snapshot().await;
        assert!(!settings.providers.is_empty());
        assert!(!settings.enabled);
        assert!(settings.apply_on_boot);
        assert!(dir.path().join(CONFIG_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn second_load_reads_back_what_was_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path()).await.unwrap();
        store.mutate(|s| s.enabled = true).await.unwrap();

        let store2 = SettingsStore::load(dir.path()).await.unwrap();
        assert!(store2.snapshot().await.enabled);
    }

    #[tokio::test]
    async fn unknown_top_level_fields_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let mut seeded = AppSettings::seed_default(builtin_providers());
        seeded
            .extra
            .insert("futureField".into(), serde_json::json!(42));
        write_atomically(&path, &seeded).unwrap();

        let store = SettingsStore::load(dir.path()).await.unwrap();
        let settings = store.snapshot().await;
        assert_eq!(settings.extra.get("futureField"), Some(&serde_json::json!(42)));
    }

    #[tokio::test]
    async fn mutation_broadcasts_a_change_notification() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path()).await.unwrap();
        let mut rx = store.subscribe();

        store.mutate(|s| s.enabled = true).await.unwrap();

        rx.try_recv().expect("a change notification should be queued");
    }
}
