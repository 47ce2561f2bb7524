//! TOML configuration file loading
//!
//! Supports `~/.config/credora/voice/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VoiceConfigFile {
    /// Recognition language tag (e.g. "en-US")
    #[serde(default)]
    pub language: Option<String>,

    /// Directory holding persisted settings
    #[serde(default)]
    pub settings_dir: Option<String>,

    /// Recognition retry behaviour
    #[serde(default)]
    pub retry: RetryFileConfig,

    /// Wake word detector tuning
    #[serde(default)]
    pub wake: WakeFileConfig,

    /// Voice agent timing
    #[serde(default)]
    pub agent: AgentFileConfig,

    /// Speech output
    #[serde(default)]
    pub synthesis: SynthesisFileConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct RetryFileConfig {
    /// Attempts after the initial failure
    pub max_attempts: Option<u32>,

    /// Backoff schedule in milliseconds; the last entry repeats
    pub delays_ms: Option<Vec<u64>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WakeFileConfig {
    /// Replaces the built-in phrase list
    pub phrases: Option<Vec<String>>,

    pub cooldown_ms: Option<u64>,

    pub restart_delay_ms: Option<u64>,

    /// Restart delay after `no-speech`, `aborted` or `audio-capture`
    pub error_restart_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AgentFileConfig {
    /// Silence after the last final fragment that ends a turn
    pub silence_threshold_ms: Option<u64>,

    /// Pause between a finished response and listening again
    pub restart_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SynthesisFileConfig {
    /// Maximum characters per spoken chunk
    pub chunk_limit: Option<usize>,
}

/// Load the TOML config file from the standard path
///
/// Returns `VoiceConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> VoiceConfigFile {
    config_file_path().map_or_else(VoiceConfigFile::default, |path| load_config_from(&path))
}

/// Load a TOML config file from `path`
///
/// Missing or malformed files yield defaults.
pub fn load_config_from(path: &Path) -> VoiceConfigFile {
    if !path.exists() {
        return VoiceConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match parse_config(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                VoiceConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            VoiceConfigFile::default()
        }
    }
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the TOML is malformed or a field has the wrong type
pub fn parse_config(content: &str) -> crate::Result<VoiceConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/credora/voice/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("credora")
            .join("voice")
            .join("config.toml")
    })
}
