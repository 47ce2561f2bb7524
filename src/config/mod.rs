//! Configuration management for the voice layer

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::settings::default_settings_dir;
use crate::voice::{
    DEFAULT_CHUNK_LIMIT, DEFAULT_WAKE_PHRASES, MAX_RETRY_ATTEMPTS, RETRY_DELAYS_MS, RetryPolicy,
};
use crate::{Error, Result};

use self::file::VoiceConfigFile;

/// Prefix for environment overrides
const ENV_PREFIX: &str = "CREDORA_VOICE_";

/// Voice layer configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Recognition language tag
    pub language: String,

    /// Recognition retry behaviour
    pub retry: RetryPolicy,

    /// Wake phrases, matched case-insensitively
    pub wake_phrases: Vec<String>,

    /// Ignore further wake phrases for this long after a detection
    pub wake_cooldown: Duration,

    /// Wake detector restart delay after a normal end
    pub wake_restart_delay: Duration,

    /// Wake detector restart delay after a transient error
    pub wake_error_restart_delay: Duration,

    /// Agent turn ends after this much silence
    pub silence_threshold: Duration,

    /// Agent pause between a finished response and listening again
    pub agent_restart_delay: Duration,

    /// Maximum characters per spoken chunk
    pub chunk_limit: usize,

    /// Directory holding persisted settings
    pub settings_dir: PathBuf,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            retry: RetryPolicy::default(),
            wake_phrases: DEFAULT_WAKE_PHRASES.iter().map(ToString::to_string).collect(),
            wake_cooldown: Duration::from_millis(3000),
            wake_restart_delay: Duration::from_millis(500),
            wake_error_restart_delay: Duration::from_millis(1000),
            silence_threshold: Duration::from_millis(800),
            agent_restart_delay: Duration::from_millis(500),
            chunk_limit: DEFAULT_CHUNK_LIMIT,
            settings_dir: default_settings_dir(),
        }
    }
}

impl VoiceConfig {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if a resolved value is invalid
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::resolve(fc, |name| std::env::var(format!("{ENV_PREFIX}{name}")).ok())
    }

    /// Merge a config file with overrides looked up by `env`
    ///
    /// `env` receives the variable name without the `CREDORA_VOICE_` prefix.
    ///
    /// # Errors
    ///
    /// Returns error if a numeric override does not parse or a value is
    /// out of range
    pub fn resolve(fc: VoiceConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let default = Self::default();

        let language = env("LANGUAGE")
            .or(fc.language)
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(default.language);

        let retry = {
            let max_attempts = parse_env::<u32>(&env, "MAX_RETRIES")?
                .or(fc.retry.max_attempts)
                .unwrap_or(MAX_RETRY_ATTEMPTS);
            let delays = fc
                .retry
                .delays_ms
                .unwrap_or_else(|| RETRY_DELAYS_MS.to_vec())
                .into_iter()
                .map(Duration::from_millis)
                .collect();
            RetryPolicy {
                max_attempts,
                delays,
            }
        };

        let wake_phrases = env("WAKE_PHRASES")
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect::<Vec<_>>()
            })
            .or(fc.wake.phrases)
            .unwrap_or(default.wake_phrases);
        if wake_phrases.is_empty() {
            return Err(Error::Config("at least one wake phrase is required".to_string()));
        }

        let wake_cooldown = millis(&env, "WAKE_COOLDOWN_MS", fc.wake.cooldown_ms)?
            .unwrap_or(default.wake_cooldown);
        let wake_restart_delay = millis(&env, "WAKE_RESTART_DELAY_MS", fc.wake.restart_delay_ms)?
            .unwrap_or(default.wake_restart_delay);
        let wake_error_restart_delay = millis(
            &env,
            "WAKE_ERROR_RESTART_DELAY_MS",
            fc.wake.error_restart_delay_ms,
        )?
        .unwrap_or(default.wake_error_restart_delay);

        let silence_threshold =
            millis(&env, "SILENCE_THRESHOLD_MS", fc.agent.silence_threshold_ms)?
                .unwrap_or(default.silence_threshold);
        let agent_restart_delay =
            millis(&env, "AGENT_RESTART_DELAY_MS", fc.agent.restart_delay_ms)?
                .unwrap_or(default.agent_restart_delay);

        let chunk_limit = parse_env::<usize>(&env, "CHUNK_LIMIT")?
            .or(fc.synthesis.chunk_limit)
            .unwrap_or(default.chunk_limit);
        if chunk_limit == 0 {
            return Err(Error::Config("chunk_limit must be greater than zero".to_string()));
        }

        let settings_dir = env("SETTINGS_DIR")
            .or(fc.settings_dir)
            .map_or(default.settings_dir, PathBuf::from);

        let config = Self {
            language,
            retry,
            wake_phrases,
            wake_cooldown,
            wake_restart_delay,
            wake_error_restart_delay,
            silence_threshold,
            agent_restart_delay,
            chunk_limit,
            settings_dir,
        };

        tracing::debug!(
            language = %config.language,
            max_retries = config.retry.max_attempts,
            wake_phrases = config.wake_phrases.len(),
            chunk_limit = config.chunk_limit,
            "voice config resolved"
        );

        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>> {
    env(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid {ENV_PREFIX}{name}: {raw}")))
        })
        .transpose()
}

fn millis(
    env: &impl Fn(&str) -> Option<String>,
    name: &str,
    file_value: Option<u64>,
) -> Result<Option<Duration>> {
    Ok(parse_env::<u64>(env, name)?
        .or(file_value)
        .map(Duration::from_millis))
}
