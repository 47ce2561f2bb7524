//! Credora Voice - Voice interaction layer for the Credora assistant
//!
//! This library provides:
//! - Capability detection for host speech engines
//! - Speech recognition sessions with retry and backoff
//! - Always-on wake word detection
//! - Chunked speech synthesis with queued playback
//! - A turn-taking voice agent
//! - Persisted user voice settings
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Consumers                       │
//! │   Chat UI  │  Settings panel  │  CLI                │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Credora Voice                      │
//! │  Wake Word │ Recognition │ Synthesis │ Agent │ Settings │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │               Platform capabilities                 │
//! │  SpeechInput  │  SpeechOutput  │  PermissionGate    │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod settings;
pub mod voice;

pub use config::VoiceConfig;
pub use error::{Error, Result};
pub use settings::{SettingsStore, VoiceSettings};
