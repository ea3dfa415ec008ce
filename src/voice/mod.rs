//! Speech input and output
//!
//! The session only sees the two collaborator traits below. Concrete
//! implementations capture from the microphone and transcribe with Whisper,
//! and synthesize replies with `OpenAI` TTS played on the default speaker.

mod capture;
mod playback;
mod stt;
mod tts;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{Error, Result};

pub use capture::{Microphone, SAMPLE_RATE, SampleBuffer, Utterance, samples_to_wav};
pub use playback::AudioPlayback;
pub use stt::{SpeechToText, WhisperRecognizer, language_code};
pub use tts::{OpenAiSynthesizer, TextToSpeech};

/// A recognized utterance; each one replaces the previous text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recognition {
    pub text: String,
    pub is_final: bool,
}

/// Channel end a recognizer delivers results into
pub type RecognitionSink = mpsc::UnboundedSender<Recognition>;

/// Playback parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechOptions {
    pub language: String,
    pub pitch: f32,
    pub rate: f32,
}

impl Default for SpeechOptions {
    fn default() -> Self {
        Self {
            language: "ja-JP".to_string(),
            pitch: 1.0,
            rate: 1.0,
        }
    }
}

/// Speech-to-text capture
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Begin capturing; results are sent to `sink` until [`stop`](Self::stop)
    ///
    /// # Errors
    ///
    /// Returns `Error::SpeechService` if capture cannot start
    async fn start(&self, locale: &str, sink: RecognitionSink) -> Result<()>;

    /// Stop capturing
    ///
    /// Any final result is in the sink by the time this returns.
    ///
    /// # Errors
    ///
    /// Returns `Error::SpeechService` if capture cannot be stopped cleanly
    async fn stop(&self) -> Result<()>;

    /// Stop capturing when no final result is wanted
    ///
    /// Implementations may skip producing the final result. Anything still
    /// delivered to the sink is discarded by the caller.
    ///
    /// # Errors
    ///
    /// Returns `Error::SpeechService` if capture cannot be stopped cleanly
    async fn cancel(&self) -> Result<()> {
        self.stop().await
    }
}

/// Text-to-speech playback
pub trait SpeechSynthesizer: Send + Sync {
    /// Schedule `text` for playback and return without waiting for it
    ///
    /// # Errors
    ///
    /// Returns `Error::SpeechService` if playback cannot be scheduled
    fn speak(&self, text: &str, options: &SpeechOptions) -> Result<()>;
}

/// Recognizer used when voice input is disabled
#[derive(Debug, Default)]
pub struct DisabledRecognizer;

#[async_trait]
impl SpeechRecognizer for DisabledRecognizer {
    async fn start(&self, _locale: &str, _sink: RecognitionSink) -> Result<()> {
        Err(Error::SpeechService("voice input is disabled".to_string()))
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Synthesizer used when voice output is disabled
#[derive(Debug, Default)]
pub struct SilentSynthesizer;

impl SpeechSynthesizer for SilentSynthesizer {
    fn speak(&self, text: &str, _options: &SpeechOptions) -> Result<()> {
        tracing::debug!(chars = text.chars().count(), "voice output disabled, not speaking");
        Ok(())
    }
}
