//! TOML configuration file loading
//!
//! Supports `~/.config/kaiwa/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct KaiwaConfigFile {
    /// Chat completion configuration
    #[serde(default)]
    pub chat: ChatFileConfig,

    /// Speech input/output configuration
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// Directory holding the preference database
    #[serde(default)]
    pub data_dir: Option<String>,
}

/// Chat completion configuration
#[derive(Debug, Default, Deserialize)]
pub struct ChatFileConfig {
    /// Completion endpoint URL
    pub endpoint: Option<String>,

    /// Model identifier (e.g. "gpt-3.5-turbo")
    pub model: Option<String>,

    /// Sampling temperature
    pub temperature: Option<f32>,

    /// Maximum reply length in tokens
    pub max_tokens: Option<u32>,

    /// Bearer credential; `OPENAI_API_KEY` takes precedence
    pub api_key: Option<String>,
}

/// Speech configuration
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// Recognition locale (e.g. "ja-JP")
    pub locale: Option<String>,

    /// Playback language
    pub language: Option<String>,

    /// Playback pitch multiplier
    pub pitch: Option<f32>,

    /// Playback rate multiplier
    pub rate: Option<f32>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// Interval between partial recognition results
    pub partial_interval_ms: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `KaiwaConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> KaiwaConfigFile {
    config_file_path().map_or_else(KaiwaConfigFile::default, |path| load_config_from(&path))
}

/// Load a TOML config file from an explicit path
///
/// Missing or unparsable files yield the defaults.
pub fn load_config_from(path: &Path) -> KaiwaConfigFile {
    if !path.exists() {
        return KaiwaConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
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
                KaiwaConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            KaiwaConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/kaiwa/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("kaiwa").join("config.toml"))
}
