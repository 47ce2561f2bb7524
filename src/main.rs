use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use credora_voice::settings::{FileStore, SettingsRepository, SettingsStore};
use credora_voice::voice::{self, HostGlobals};
use credora_voice::{VoiceConfig, VoiceSettings};

/// Credora Voice - inspect and configure the Credora voice layer
#[derive(Parser)]
#[command(name = "credora-voice", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report host voice support
    Support {
        /// Host user agent string
        #[arg(long, env = "CREDORA_VOICE_USER_AGENT", default_value = "")]
        user_agent: String,
        /// Host exposes speech recognition
        #[arg(long, env = "CREDORA_VOICE_HAS_STT")]
        stt: bool,
        /// Host exposes speech synthesis
        #[arg(long, env = "CREDORA_VOICE_HAS_TTS")]
        tts: bool,
        /// Host exposes microphone capture
        #[arg(long, env = "CREDORA_VOICE_HAS_MIC")]
        mic: bool,
    },
    /// Classify a raw recognition error code
    Classify {
        /// Platform error code (e.g. "not-allowed")
        code: String,
        /// Platform error message
        #[arg(default_value = "")]
        message: String,
    },
    /// Split text into speakable chunks
    Chunk {
        /// Text to split
        text: String,
        /// Maximum characters per chunk (defaults to config)
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Check a transcript for a wake phrase
    Wake {
        /// Transcript to check
        text: String,
    },
    /// Show or change persisted voice settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Print the resolved configuration
    Config,
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print current settings as JSON
    Show,
    /// Change one setting
    Set {
        field: SettingField,
        value: String,
    },
    /// Restore defaults
    Reset,
}

#[derive(Clone, Copy, ValueEnum)]
enum SettingField {
    VoiceInput,
    Language,
    VoiceOutput,
    AutoPlay,
    Rate,
    Pitch,
    Volume,
    Voice,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,credora_voice=info",
        1 => "info,credora_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Support {
            user_agent,
            stt,
            tts,
            mic,
        } => cmd_support(HostGlobals {
            speech_recognition: stt,
            speech_synthesis: tts,
            media_devices: mic,
            user_agent,
        }),
        Command::Classify { code, message } => cmd_classify(&code, &message),
        Command::Chunk { text, limit } => cmd_chunk(&text, limit),
        Command::Wake { text } => cmd_wake(&text),
        Command::Settings { action } => cmd_settings(action),
        Command::Config => cmd_config(),
    }
}

fn cmd_support(globals: HostGlobals) -> anyhow::Result<()> {
    let support = voice::detect(&globals);
    println!("{}", serde_json::to_string_pretty(&support)?);

    if !voice::is_supported(&support) {
        println!();
        println!("{}", voice::unsupported_message(&support));
    }
    Ok(())
}

fn cmd_classify(code: &str, message: &str) -> anyhow::Result<()> {
    let error = voice::classify(code, message);
    let notification = voice::to_notification(&error, None);

    let output = serde_json::json!({
        "error": error,
        "retryable": voice::should_retry(&error),
        "notification": notification,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn cmd_chunk(text: &str, limit: Option<usize>) -> anyhow::Result<()> {
    let limit = match limit {
        Some(limit) => limit,
        None => VoiceConfig::load()?.chunk_limit,
    };

    for (i, chunk) in voice::chunk_for_speech(text, limit).iter().enumerate() {
        println!("{:>3} [{:>3}] {chunk}", i + 1, chunk.chars().count());
    }
    Ok(())
}

fn cmd_wake(text: &str) -> anyhow::Result<()> {
    let config = VoiceConfig::load()?;
    match voice::match_wake_phrase(text, &config.wake_phrases) {
        Some(phrase) => println!("detected: {phrase}"),
        None => println!("no wake phrase"),
    }
    Ok(())
}

fn cmd_settings(action: SettingsAction) -> anyhow::Result<()> {
    let config = VoiceConfig::load()?;
    let backing = Arc::new(FileStore::new(config.settings_dir.clone()));
    let store = SettingsStore::load(SettingsRepository::new(backing));

    match action {
        SettingsAction::Show => {}
        SettingsAction::Set { field, value } => set_field(&store, field, &value)?,
        SettingsAction::Reset => store.reset()?,
    }

    print_settings(&store.get())
}

fn set_field(store: &SettingsStore, field: SettingField, value: &str) -> anyhow::Result<()> {
    match field {
        SettingField::VoiceInput => store.set_voice_input_enabled(parse_bool(value)?)?,
        SettingField::Language => store.set_language(value)?,
        SettingField::VoiceOutput => store.set_voice_output_enabled(parse_bool(value)?)?,
        SettingField::AutoPlay => store.set_auto_play_responses(parse_bool(value)?)?,
        SettingField::Rate => store.set_speech_rate(parse_number(value)?)?,
        SettingField::Pitch => store.set_speech_pitch(parse_number(value)?)?,
        SettingField::Volume => store.set_speech_volume(parse_number(value)?)?,
        SettingField::Voice => {
            let voice_id = (!value.is_empty() && value != "default").then(|| value.to_string());
            store.set_selected_voice_id(voice_id)?;
        }
    }
    Ok(())
}

fn parse_bool(value: &str) -> anyhow::Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        _ => bail!("expected a boolean, got {value:?}"),
    }
}

fn parse_number(value: &str) -> anyhow::Result<f32> {
    value
        .parse()
        .with_context(|| format!("expected a number, got {value:?}"))
}

fn print_settings(settings: &VoiceSettings) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(settings)?);
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = VoiceConfig::load()?;

    println!("language:                 {}", config.language);
    println!("max retries:              {}", config.retry.max_attempts);
    println!("retry delays:             {:?}", config.retry.delays);
    println!("wake phrases:             {}", config.wake_phrases.join(", "));
    println!("wake cooldown:            {:?}", config.wake_cooldown);
    println!("wake restart delay:       {:?}", config.wake_restart_delay);
    println!("wake error restart delay: {:?}", config.wake_error_restart_delay);
    println!("silence threshold:        {:?}", config.silence_threshold);
    println!("agent restart delay:      {:?}", config.agent_restart_delay);
    println!("chunk limit:              {}", config.chunk_limit);
    println!("settings dir:             {}", config.settings_dir.display());
    if let Some(path) = credora_voice::config::file::config_file_path() {
        println!("config file:              {}", path.display());
    }
    Ok(())
}
