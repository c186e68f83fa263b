use serde::{Deserialize, Serialize};

use crate::{AdapterBackup, Profile, Provider};

pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// The single persisted JSON document (§6 "Persistent configuration").
///
/// `extra` captures any top-level keys this version of the core doesn't know
/// about, so a round trip through an older/newer control surface never drops
/// data (§6: "unknown fields must be preserved on round-trip").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub version: u32,
    pub providers: Vec<Provider>,
    pub default_profile: Option<Profile>,
    pub enabled: bool,
    pub apply_on_boot: bool,
    pub adapter_backups: Vec<AdapterBackup>,
    #[serde(default)]
    pub ui_settings: UiSettings,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Opaque to the core (§3 "AppSettings"): the control surface reads and
/// writes whatever shape it wants here, we just round-trip it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct UiSettings(pub serde_json::Map<String, serde_json::Value>);

impl AppSettings {
    /// The document seeded on first run, per §4.2: built-in catalogue,
    /// disabled, `applyOnBoot = true`.
    pub fn seed_default(providers: Vec<Provider>) -> Self {
        Self {
            version: CURRENT_SCHEMA_VERSION,
            providers,
            default_profile: None,
            enabled: false,
            apply_on_boot: true,
            adapter_backups: Vec::new(),
            ui_settings: UiSettings::default(),
            extra: serde_json::Map::new(),
        }
    }
}
