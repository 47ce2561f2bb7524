//! Persisted voice settings
//!
//! A process-wide [`SettingsStore`] holds the user's [`VoiceSettings`].
//! Every setter re-persists through the [`SettingsRepository`] before
//! returning, and subscribers are notified through a `watch` channel.
//!
//! Initialize once at startup with [`init_global`], then read it anywhere
//! through [`global`].

mod storage;

use std::ops::RangeInclusive;
use std::sync::{Mutex, OnceLock, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

pub use storage::{
    FileStore, KeyValueStore, MemoryStore, SETTINGS_KEY, SETTINGS_VERSION, SettingsRepository,
    default_settings_dir, migrate,
};

use crate::Result;

/// Allowed speaking rate
pub const SPEECH_RATE_RANGE: RangeInclusive<f32> = 0.5..=2.0;

/// Allowed pitch
pub const SPEECH_PITCH_RANGE: RangeInclusive<f32> = 0.0..=2.0;

/// Allowed volume
pub const SPEECH_VOLUME_RANGE: RangeInclusive<f32> = 0.0..=1.0;

/// Process-wide settings store
static GLOBAL: OnceLock<SettingsStore> = OnceLock::new();

/// User-facing voice preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VoiceSettings {
    pub voice_input_enabled: bool,
    /// BCP 47 language tag for recognition
    pub language: String,
    pub voice_output_enabled: bool,
    /// Speak assistant responses without an explicit play action
    pub auto_play_responses: bool,
    pub speech_rate: f32,
    pub speech_pitch: f32,
    pub speech_volume: f32,
    /// Preferred synthesis voice; `None` uses the engine default
    pub selected_voice_id: Option<String>,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            voice_input_enabled: true,
            language: "en-US".to_string(),
            voice_output_enabled: true,
            auto_play_responses: false,
            speech_rate: 1.0,
            speech_pitch: 1.0,
            speech_volume: 1.0,
            selected_voice_id: None,
        }
    }
}

impl VoiceSettings {
    /// Clamp numeric fields into their allowed ranges
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.speech_rate = clamp(self.speech_rate, &SPEECH_RATE_RANGE, 1.0);
        self.speech_pitch = clamp(self.speech_pitch, &SPEECH_PITCH_RANGE, 1.0);
        self.speech_volume = clamp(self.speech_volume, &SPEECH_VOLUME_RANGE, 1.0);
        if self.language.trim().is_empty() {
            self.language = Self::default().language;
        }
        self
    }
}

fn clamp(value: f32, range: &RangeInclusive<f32>, fallback: f32) -> f32 {
    if value.is_nan() {
        return fallback;
    }
    value.clamp(*range.start(), *range.end())
}

/// Shared, persisted settings
pub struct SettingsStore {
    repository: SettingsRepository,
    current: watch::Sender<VoiceSettings>,
    /// Held across read, mutate, publish and save
    writer: Mutex<()>,
}

impl SettingsStore {
    /// Load settings from the repository
    #[must_use]
    pub fn load(repository: SettingsRepository) -> Self {
        let settings = repository.load();
        let (current, _) = watch::channel(settings);
        Self {
            repository,
            current,
            writer: Mutex::new(()),
        }
    }

    /// Snapshot of the current settings
    #[must_use]
    pub fn get(&self) -> VoiceSettings {
        self.current.borrow().clone()
    }

    /// Subscribe to settings changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<VoiceSettings> {
        self.current.subscribe()
    }

    /// Apply a mutation, clamp, notify subscribers and persist
    ///
    /// # Errors
    ///
    /// Returns error if the settings cannot be written; the in-memory value
    /// is updated regardless
    pub fn update(&self, mutate: impl FnOnce(&mut VoiceSettings)) -> Result<()> {
        // The guard protects no data, so a poisoned lock is still usable
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = self.get();
        mutate(&mut next);
        let next = next.clamped();
        self.current.send_replace(next.clone());
        self.repository.save(&next)
    }

    /// # Errors
    ///
    /// Returns error if the settings cannot be persisted
    pub fn set_voice_input_enabled(&self, enabled: bool) -> Result<()> {
        self.update(|s| s.voice_input_enabled = enabled)
    }

    /// # Errors
    ///
    /// Returns error if the settings cannot be persisted
    pub fn set_language(&self, language: impl Into<String>) -> Result<()> {
        let language = language.into();
        self.update(|s| s.language = language)
    }

    /// # Errors
    ///
    /// Returns error if the settings cannot be persisted
    pub fn set_voice_output_enabled(&self, enabled: bool) -> Result<()> {
        self.update(|s| s.voice_output_enabled = enabled)
    }

    /// # Errors
    ///
    /// Returns error if the settings cannot be persisted
    pub fn set_auto_play_responses(&self, enabled: bool) -> Result<()> {
        self.update(|s| s.auto_play_responses = enabled)
    }

    /// Set the speaking rate, clamped to 0.5..=2.0
    ///
    /// # Errors
    ///
    /// Returns error if the settings cannot be persisted
    pub fn set_speech_rate(&self, rate: f32) -> Result<()> {
        self.update(|s| s.speech_rate = rate)
    }

    /// Set the pitch, clamped to 0.0..=2.0
    ///
    /// # Errors
    ///
    /// Returns error if the settings cannot be persisted
    pub fn set_speech_pitch(&self, pitch: f32) -> Result<()> {
        self.update(|s| s.speech_pitch = pitch)
    }

    /// Set the volume, clamped to 0.0..=1.0
    ///
    /// # Errors
    ///
    /// Returns error if the settings cannot be persisted
    pub fn set_speech_volume(&self, volume: f32) -> Result<()> {
        self.update(|s| s.speech_volume = volume)
    }

    /// # Errors
    ///
    /// Returns error if the settings cannot be persisted
    pub fn set_selected_voice_id(&self, voice_id: Option<String>) -> Result<()> {
        self.update(|s| s.selected_voice_id = voice_id)
    }

    /// Restore defaults
    ///
    /// # Errors
    ///
    /// Returns error if the settings cannot be persisted
    pub fn reset(&self) -> Result<()> {
        tracing::info!("voice settings reset to defaults");
        self.update(|s| *s = VoiceSettings::default())
    }
}

/// Install the process-wide store
///
/// Returns the already-installed store if called more than once.
pub fn init_global(store: SettingsStore) -> &'static SettingsStore {
    if GLOBAL.get().is_some() {
        tracing::warn!("settings store already initialized");
    }
    GLOBAL.get_or_init(|| store)
}

/// The process-wide store, if installed
#[must_use]
pub fn global() -> Option<&'static SettingsStore> {
    GLOBAL.get()
}
