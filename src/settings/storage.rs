//! Durable storage for voice settings
//!
//! Settings are persisted as a named, versioned JSON blob:
//!
//! ```json
//! { "version": 1, "state": { "voiceInputEnabled": true, ... } }
//! ```
//!
//! Older blobs are upgraded by [`migrate`] at load time.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::VoiceSettings;
use crate::{Error, Result};

/// Storage key for the settings blob
pub const SETTINGS_KEY: &str = "credora-voice-settings";

/// Current settings schema version
pub const SETTINGS_VERSION: u32 = 1;

/// Version 0 names for the speech parameters
const LEGACY_KEYS: &[(&str, &str)] = &[
    ("rate", "speechRate"),
    ("pitch", "speechPitch"),
    ("volume", "speechVolume"),
];

/// Durable key-value medium
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    ///
    /// # Errors
    ///
    /// Returns error if the medium cannot be read
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value
    ///
    /// # Errors
    ///
    /// Returns error if the medium cannot be written
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value
    ///
    /// # Errors
    ///
    /// Returns error if the medium cannot be written
    fn remove(&self, key: &str) -> Result<()>;
}

/// One JSON file per key in a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    #[must_use]
    pub const fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Store under the platform config dir: `~/.config/credora/voice/`
    #[must_use]
    pub fn default_location() -> Self {
        Self::new(default_settings_dir())
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

/// Default directory for persisted settings
#[must_use]
pub fn default_settings_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".config/credora/voice"),
        |d| d.config_dir().join("credora").join("voice"),
    )
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path(key);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path(key);
        // Write-then-rename so a crash never leaves a truncated blob
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.path(key)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// In-memory store for tests and ephemeral hosts
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| Error::Settings(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .map_err(|e| Error::Settings(e.to_string()))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries
            .lock()
            .map_err(|e| Error::Settings(e.to_string()))?
            .remove(key);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredSettings {
    #[serde(default)]
    version: u32,
    state: Value,
}

/// Loads and saves [`VoiceSettings`] under a named key
#[derive(Clone)]
pub struct SettingsRepository {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl SettingsRepository {
    /// Repository over `store` using [`SETTINGS_KEY`]
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(store, SETTINGS_KEY)
    }

    #[must_use]
    pub fn with_key(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Load settings, migrating old versions
    ///
    /// Missing or unreadable data yields defaults.
    #[must_use]
    pub fn load(&self) -> VoiceSettings {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::debug!(key = %self.key, "no stored voice settings, using defaults");
                return VoiceSettings::default();
            }
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "failed to read voice settings");
                return VoiceSettings::default();
            }
        };

        let parsed = serde_json::from_str::<StoredSettings>(&raw)
            .map_err(Error::from)
            .and_then(|stored| migrate(stored.version, stored.state));

        match parsed {
            Ok(settings) => {
                tracing::info!(key = %self.key, "loaded voice settings");
                settings
            }
            Err(e) => {
                tracing::warn!(
                    key = %self.key,
                    error = %e,
                    "failed to parse voice settings, using defaults"
                );
                VoiceSettings::default()
            }
        }
    }

    /// Persist settings at the current schema version
    ///
    /// # Errors
    ///
    /// Returns error if serialization or the write fails
    pub fn save(&self, settings: &VoiceSettings) -> Result<()> {
        let stored = StoredSettings {
            version: SETTINGS_VERSION,
            state: serde_json::to_value(settings)?,
        };
        self.store.set(&self.key, &serde_json::to_string(&stored)?)?;
        tracing::debug!(key = %self.key, "voice settings saved");
        Ok(())
    }

    /// Delete the persisted blob
    ///
    /// # Errors
    ///
    /// Returns error if the medium cannot be written
    pub fn clear(&self) -> Result<()> {
        self.store.remove(&self.key)
    }
}

/// Upgrade a stored settings object from `version` to the current schema
///
/// Version 0 stored the speech parameters as `rate`, `pitch` and `volume`.
/// Missing fields take their defaults and numeric fields are clamped.
///
/// # Errors
///
/// Returns error if `state` is not an object, or if `version` is newer than
/// this build understands
pub fn migrate(version: u32, state: Value) -> Result<VoiceSettings> {
    if version > SETTINGS_VERSION {
        return Err(Error::Settings(format!(
            "settings version {version} is newer than supported version {SETTINGS_VERSION}"
        )));
    }

    let Value::Object(mut map) = state else {
        return Err(Error::Settings("settings state is not an object".to_string()));
    };

    if version < 1 {
        for (old, new) in LEGACY_KEYS {
            if let Some(value) = map.remove(*old) {
                map.entry((*new).to_string()).or_insert(value);
            }
        }
        tracing::info!(from = version, to = SETTINGS_VERSION, "migrated voice settings");
    }

    let settings: VoiceSettings = serde_json::from_value(Value::Object(map))?;
    Ok(settings.clamped())
}
