use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

const SETTINGS_SCHEMA_VERSION: u32 = 1;
const MAX_GAIN: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SettingsKey {
    MonitorVol,
    MuteVol,
    ListenVol,
    DimVol,
}

impl SettingsKey {
    pub const ALL: [Self; 4] = [Self::MonitorVol, Self::MuteVol, Self::ListenVol, Self::DimVol];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::MonitorVol => "monitor-vol",
            Self::MuteVol => "mute-vol",
            Self::ListenVol => "listen-vol",
            Self::DimVol => "dim-vol",
        }
    }

    #[must_use]
    pub const fn default_value(self) -> f32 {
        match self {
            Self::MonitorVol | Self::ListenVol => 1.0,
            Self::MuteVol => 0.0,
            Self::DimVol => 0.1,
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.name() == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct SettingsFile {
    schema_version: u32,
    values: BTreeMap<String, f32>,
}

/// Named float settings for the monitor section.
///
/// Writes go to memory and mark the store dirty; [`SettingsStore::save`]
/// persists them. Nothing here is touched from the audio thread.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: Option<PathBuf>,
    values: BTreeMap<SettingsKey, f32>,
    dirty: bool,
}

pub type SharedSettings = Arc<Mutex<SettingsStore>>;

impl Default for SettingsStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl SettingsStore {
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Loads `path`, or starts from defaults when the file does not exist yet.
    #[instrument(fields(path = %path.display()))]
    pub fn open(path: &Path) -> Result<Self> {
        let mut store = Self {
            path: Some(path.to_path_buf()),
            values: BTreeMap::new(),
            dirty: false,
        };
        if !path.exists() {
            debug!("settings file missing, using defaults");
            return Ok(store);
        }

        let bytes = fs::read(path)
            .with_context(|| format!("failed to read settings: {}", path.display()))?;
        store.values = parse_settings(&bytes)
            .with_context(|| format!("invalid settings file: {}", path.display()))?;
        info!(count = store.values.len(), "settings loaded");
        Ok(store)
    }

    #[must_use]
    pub fn into_shared(self) -> SharedSettings {
        Arc::new(Mutex::new(self))
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn get(&self, key: SettingsKey) -> f32 {
        self.values
            .get(&key)
            .copied()
            .unwrap_or_else(|| key.default_value())
    }

    pub fn set(&mut self, key: SettingsKey, value: f32) {
        if !value.is_finite() {
            return;
        }
        let value = value.clamp(0.0, MAX_GAIN);
        if self.values.insert(key, value) != Some(value) {
            self.dirty = true;
        }
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        let file = SettingsFile {
            schema_version: SETTINGS_SCHEMA_VERSION,
            values: self
                .values
                .iter()
                .map(|(key, value)| (key.name().to_string(), *value))
                .collect(),
        };
        serde_json::to_vec_pretty(&file).context("failed to serialize settings")
    }

    /// Writes through a temp file in the target directory so a crash never
    /// leaves a half-written settings file behind. No-op for in-memory stores.
    #[instrument(skip(self), fields(path = ?self.path))]
    pub fn save(&mut self) -> Result<()> {
        let Some(path) = self.path.clone() else {
            self.dirty = false;
            return Ok(());
        };
        let parent = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        fs::create_dir_all(&parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;

        let json = self.to_json()?;
        let mut temp_file = tempfile::NamedTempFile::new_in(&parent)
            .context("failed to create temp settings file")?;
        temp_file
            .write_all(&json)
            .context("failed to write temp settings file")?;
        temp_file
            .persist(&path)
            .map_err(|error| anyhow::anyhow!(error.error))
            .with_context(|| format!("failed to persist settings: {}", path.display()))?;

        self.dirty = false;
        info!("settings saved");
        Ok(())
    }
}

fn parse_settings(bytes: &[u8]) -> Result<BTreeMap<SettingsKey, f32>> {
    let file: SettingsFile = serde_json::from_slice(bytes).context("invalid settings json")?;
    if file.schema_version != SETTINGS_SCHEMA_VERSION {
        anyhow::bail!("unsupported settings schema {}", file.schema_version);
    }

    let mut values = BTreeMap::new();
    for (name, value) in file.values {
        let Some(key) = SettingsKey::from_name(&name) else {
            debug!(%name, "ignoring unknown setting");
            continue;
        };
        if !value.is_finite() || !(0.0..=MAX_GAIN).contains(&value) {
            anyhow::bail!("setting {name} out of range: {value}");
        }
        values.insert(key, value);
    }
    Ok(values)
}
