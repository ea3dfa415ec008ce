//! Configuration management for kaiwa
//!
//! Values are layered: built-in defaults, then `~/.config/kaiwa/config.toml`,
//! then environment variables.

pub mod file;

use std::path::PathBuf;

use secrecy::SecretString;

use crate::voice::SpeechOptions;
use crate::{Error, Result};

use file::KaiwaConfigFile;

/// Default completion endpoint
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Default completion model
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// kaiwa configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Chat completion configuration
    pub chat: ChatConfig,

    /// Speech configuration
    pub speech: SpeechConfig,

    /// Path to data directory (preference database)
    pub data_dir: PathBuf,
}

/// Chat completion configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Completion endpoint URL
    pub endpoint: String,

    /// Model identifier
    pub model: String,

    /// Sampling temperature (0.0 to 2.0)
    pub temperature: f32,

    /// Maximum reply length in tokens
    pub max_tokens: u32,

    /// Static bearer credential
    pub api_key: Option<SecretString>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 1000,
            api_key: None,
        }
    }
}

/// Speech input/output configuration
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// Recognition locale
    pub locale: String,

    /// Playback language
    pub language: String,

    /// Playback pitch multiplier
    pub pitch: f32,

    /// Playback rate multiplier
    pub rate: f32,

    /// STT model for Whisper
    pub stt_model: String,

    /// TTS model
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// Interval between partial recognition results
    pub partial_interval_ms: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            locale: "ja-JP".to_string(),
            language: "ja-JP".to_string(),
            pitch: 1.0,
            rate: 1.0,
            stt_model: "whisper-1".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            partial_interval_ms: 1500,
        }
    }
}

impl SpeechConfig {
    /// Playback options handed to the synthesizer
    #[must_use]
    pub fn options(&self) -> SpeechOptions {
        SpeechOptions {
            language: self.language.clone(),
            pitch: self.pitch,
            rate: self.rate,
        }
    }
}

/// Return the default data directory (`~/.local/share/kaiwa` on Linux)
pub fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map_or_else(|| PathBuf::from(".kaiwa"), |d| d.data_dir().join("kaiwa"))
}

impl Config {
    /// Load configuration from the config file and the process environment
    ///
    /// # Errors
    ///
    /// Returns error if a value is out of range or an environment override
    /// cannot be parsed
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        let config = Self::resolve(fc, |key| std::env::var(key).ok())?;

        if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
            tracing::warn!(
                path = %config.data_dir.display(),
                error = %e,
                "failed to create data directory"
            );
        }

        Ok(config)
    }

    /// Merge a parsed config file with environment lookups
    ///
    /// # Errors
    ///
    /// Returns error if a value is out of range or an environment override
    /// cannot be parsed
    pub fn resolve<F>(fc: KaiwaConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let chat_default = ChatConfig::default();
        let chat = ChatConfig {
            endpoint: env("KAIWA_CHAT_ENDPOINT")
                .or(fc.chat.endpoint)
                .unwrap_or(chat_default.endpoint),
            model: env("KAIWA_MODEL")
                .or(fc.chat.model)
                .unwrap_or(chat_default.model),
            temperature: parse_env(&env, "KAIWA_TEMPERATURE")?
                .or(fc.chat.temperature)
                .unwrap_or(chat_default.temperature),
            max_tokens: parse_env(&env, "KAIWA_MAX_TOKENS")?
                .or(fc.chat.max_tokens)
                .unwrap_or(chat_default.max_tokens),
            api_key: env("OPENAI_API_KEY")
                .or(fc.chat.api_key)
                .filter(|k| !k.is_empty())
                .map(SecretString::from),
        };

        let speech_default = SpeechConfig::default();
        let speech = SpeechConfig {
            locale: env("KAIWA_LOCALE")
                .or(fc.speech.locale)
                .unwrap_or(speech_default.locale),
            language: fc.speech.language.unwrap_or(speech_default.language),
            pitch: fc.speech.pitch.unwrap_or(speech_default.pitch),
            rate: fc.speech.rate.unwrap_or(speech_default.rate),
            stt_model: fc.speech.stt_model.unwrap_or(speech_default.stt_model),
            tts_model: fc.speech.tts_model.unwrap_or(speech_default.tts_model),
            tts_voice: fc.speech.tts_voice.unwrap_or(speech_default.tts_voice),
            partial_interval_ms: fc
                .speech
                .partial_interval_ms
                .unwrap_or(speech_default.partial_interval_ms),
        };

        let data_dir = env("KAIWA_DATA_DIR")
            .or(fc.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);

        let config = Self {
            chat,
            speech,
            data_dir,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if self.chat.model.trim().is_empty() {
            return Err(Error::Config("chat model must not be empty".to_string()));
        }
        if !(0.0..=2.0).contains(&self.chat.temperature) {
            return Err(Error::Config(format!(
                "temperature must be within 0.0..=2.0, got {}",
                self.chat.temperature
            )));
        }
        if self.chat.max_tokens == 0 {
            return Err(Error::Config("max_tokens must be positive".to_string()));
        }
        if self.speech.partial_interval_ms == 0 {
            return Err(Error::Config(
                "partial_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Path of the preference database
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("kaiwa.db")
    }
}

fn parse_env<F, T>(env: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    env(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid value for {key}: {raw}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_file_or_env() {
        let config = Config::resolve(KaiwaConfigFile::default(), env_of(&[])).unwrap();

        assert_eq!(config.chat.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.chat.model, "gpt-3.5-turbo");
        assert!((config.chat.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.chat.max_tokens, 1000);
        assert!(config.chat.api_key.is_none());
        assert_eq!(config.speech.locale, "ja-JP");
    }

    #[test]
    fn env_overrides_file() {
        let mut fc = KaiwaConfigFile::default();
        fc.chat.model = Some("from-file".to_string());
        fc.chat.api_key = Some("file-key".to_string());

        let config = Config::resolve(
            fc,
            env_of(&[("KAIWA_MODEL", "from-env"), ("OPENAI_API_KEY", "env-key")]),
        )
        .unwrap();

        assert_eq!(config.chat.model, "from-env");
        assert_eq!(
            config.chat.api_key.as_ref().map(ExposeSecret::expose_secret),
            Some("env-key")
        );
    }

    #[test]
    fn file_used_when_env_absent() {
        let mut fc = KaiwaConfigFile::default();
        fc.chat.max_tokens = Some(256);
        fc.data_dir = Some("/tmp/kaiwa-test".to_string());

        let config = Config::resolve(fc, env_of(&[])).unwrap();
        assert_eq!(config.chat.max_tokens, 256);
        assert_eq!(config.database_path(), PathBuf::from("/tmp/kaiwa-test/kaiwa.db"));
    }

    #[test]
    fn unparsable_env_is_rejected() {
        let result = Config::resolve(
            KaiwaConfigFile::default(),
            env_of(&[("KAIWA_MAX_TOKENS", "lots")]),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn out_of_range_temperature_is_rejected() {
        let mut fc = KaiwaConfigFile::default();
        fc.chat.temperature = Some(3.5);
        assert!(Config::resolve(fc, env_of(&[])).is_err());
    }

    #[test]
    fn empty_api_key_is_treated_as_missing() {
        let config =
            Config::resolve(KaiwaConfigFile::default(), env_of(&[("OPENAI_API_KEY", "")]))
                .unwrap();
        assert!(config.chat.api_key.is_none());
    }
}
