//! Text-to-speech (TTS) processing

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};

use super::{AudioPlayback, SpeechOptions, SpeechSynthesizer};
use crate::{Error, Result};

const SPEECH_ENDPOINT: &str = "https://api.openai.com/v1/audio/speech";

/// Speed range accepted by the `OpenAI` speech endpoint
const MIN_SPEED: f32 = 0.25;
const MAX_SPEED: f32 = 4.0;

/// Synthesizes speech from text with `OpenAI` TTS
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: SecretString,
    voice: String,
    model: String,
}

impl TextToSpeech {
    /// Create a new TTS instance using `OpenAI`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(api_key: Option<SecretString>, voice: String, model: String) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.expose_secret().is_empty())
            .ok_or_else(|| Error::Config("OpenAI API key required for TTS".to_string()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice,
            model,
        })
    }

    /// Synthesize text to MP3 audio
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    pub async fn synthesize(&self, text: &str, speed: f32) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: clamp_speed(speed),
        };

        let response = self
            .client
            .post(SPEECH_ENDPOINT)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(audio.to_vec())
    }
}

fn clamp_speed(rate: f32) -> f32 {
    if rate.is_finite() {
        rate.clamp(MIN_SPEED, MAX_SPEED)
    } else {
        1.0
    }
}

/// Speaks text through `OpenAI` TTS and the default output device
///
/// Each call runs independently, so playbacks may overlap.
pub struct OpenAiSynthesizer {
    tts: Arc<TextToSpeech>,
}

impl OpenAiSynthesizer {
    #[must_use]
    pub fn new(tts: TextToSpeech) -> Self {
        Self { tts: Arc::new(tts) }
    }
}

impl SpeechSynthesizer for OpenAiSynthesizer {
    fn speak(&self, text: &str, options: &SpeechOptions) -> Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }

        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::SpeechService(format!("no runtime for playback: {e}")))?;

        // The voice decides pronunciation; pitch has no equivalent here
        tracing::debug!(
            language = %options.language,
            pitch = options.pitch,
            rate = options.rate,
            "speaking reply"
        );

        let tts = Arc::clone(&self.tts);
        let text = text.to_string();
        let speed = options.rate;

        handle.spawn(async move {
            let audio = match tts.synthesize(&text, speed).await {
                Ok(audio) => audio,
                Err(e) => {
                    tracing::warn!(error = %e, "speech synthesis failed");
                    return;
                }
            };

            let played = tokio::task::spawn_blocking(move || {
                AudioPlayback::new()?.play_mp3_blocking(&audio)
            })
            .await;

            match played {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "speech playback failed"),
                Err(e) => tracing::warn!(error = %e, "speech playback task failed"),
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_is_clamped_to_endpoint_range() {
        assert!((clamp_speed(1.0) - 1.0).abs() < f32::EPSILON);
        assert!((clamp_speed(0.0) - MIN_SPEED).abs() < f32::EPSILON);
        assert!((clamp_speed(9.0) - MAX_SPEED).abs() < f32::EPSILON);
        assert!((clamp_speed(f32::NAN) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn tts_requires_api_key() {
        let result = TextToSpeech::new_openai(None, "alloy".to_string(), "tts-1".to_string());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn blank_text_is_not_spoken() {
        let tts = TextToSpeech::new_openai(
            Some(SecretString::from("sk-test".to_string())),
            "alloy".to_string(),
            "tts-1".to_string(),
        )
        .unwrap();
        // No runtime here; blank text returns before one is needed
        let synth = OpenAiSynthesizer::new(tts);
        assert!(synth.speak("   ", &SpeechOptions::default()).is_ok());
    }
}
