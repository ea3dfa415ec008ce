//! Speech-to-text (STT) processing

use std::sync::Arc;
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::capture::{Microphone, Utterance};
use super::{Recognition, RecognitionSink, SAMPLE_RATE, SpeechRecognizer, samples_to_wav};
use crate::{Error, Result};

const WHISPER_ENDPOINT: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Utterances shorter than this are not worth a transcription call (0.3 seconds)
const MIN_SPEECH_SAMPLES: usize = 4800;

/// Upper bound on one transcription round trip
const TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Response from `OpenAI` Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcribes WAV audio with `OpenAI` Whisper
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
}

impl SpeechToText {
    /// Create a new Whisper transcriber
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_whisper(api_key: Option<SecretString>, model: String) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.expose_secret().is_empty())
            .ok_or_else(|| Error::Config("OpenAI API key required for Whisper".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(TRANSCRIBE_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            model,
        })
    }

    /// Transcribe audio to text
    ///
    /// # Arguments
    ///
    /// * `audio` - WAV audio bytes
    /// * `language` - ISO-639-1 hint (e.g. "ja"), if known
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    pub async fn transcribe(&self, audio: &[u8], language: Option<&str>) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::SpeechService(e.to_string()))?,
            )
            .text("model", self.model.clone());
        if let Some(language) = language {
            form = form.text("language", language.to_string());
        }

        let response = self
            .client
            .post(WHISPER_ENDPOINT)
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                Error::Transport(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let result: WhisperResponse = response
            .json()
            .await
            .map_err(|e| Error::MalformedResponse(format!("Whisper response: {e}")))?;

        tracing::debug!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}

/// Primary language subtag of a locale ("ja-JP" becomes "ja")
#[must_use]
pub fn language_code(locale: &str) -> Option<String> {
    locale
        .split(['-', '_'])
        .next()
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_lowercase)
}

/// Audio captured so far in the current utterance
struct Snapshot {
    samples: Vec<f32>,
    is_final: bool,
}

struct ActiveCapture {
    /// `true` asks for a final result, `false` discards the utterance
    stop_tx: std_mpsc::Sender<bool>,
    worker: JoinHandle<()>,
}

/// Microphone recognizer backed by Whisper
///
/// The microphone runs on a dedicated thread. Every `partial_interval` the
/// whole utterance so far is transcribed and delivered as a partial result;
/// stopping delivers one final result.
pub struct WhisperRecognizer {
    stt: Arc<SpeechToText>,
    partial_interval: Duration,
    active: Mutex<Option<ActiveCapture>>,
}

impl WhisperRecognizer {
    #[must_use]
    pub fn new(stt: SpeechToText, partial_interval: Duration) -> Self {
        Self {
            stt: Arc::new(stt),
            partial_interval,
            active: Mutex::new(None),
        }
    }

    async fn shutdown(&self, flush: bool) -> Result<()> {
        let Some(capture) = self.active.lock().await.take() else {
            return Ok(());
        };

        // The thread also stops if the sender is gone
        let _ = capture.stop_tx.send(flush);
        if !flush {
            capture.worker.abort();
        }

        match capture.worker.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                return Err(Error::SpeechService(format!("transcription worker failed: {e}")));
            }
        }

        tracing::info!(flush, "speech capture stopped");
        Ok(())
    }
}

#[async_trait]
impl SpeechRecognizer for WhisperRecognizer {
    async fn start(&self, locale: &str, sink: RecognitionSink) -> Result<()> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(Error::SpeechService("capture already running".to_string()));
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let (snapshot_tx, snapshot_rx) = mpsc::unbounded_channel();
        let interval = self.partial_interval;

        std::thread::Builder::new()
            .name("kaiwa-capture".to_string())
            .spawn(move || capture_thread(ready_tx, &stop_rx, &snapshot_tx, interval))
            .map_err(|e| Error::SpeechService(format!("failed to spawn capture thread: {e}")))?;

        ready_rx
            .await
            .map_err(|_| Error::SpeechService("capture thread exited".to_string()))?
            .map_err(|e| Error::SpeechService(e.to_string()))?;

        let worker = tokio::spawn(transcribe_loop(
            Arc::clone(&self.stt),
            language_code(locale),
            snapshot_rx,
            sink,
        ));

        *active = Some(ActiveCapture { stop_tx, worker });
        tracing::info!(locale, "speech capture started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.shutdown(true).await
    }

    async fn cancel(&self) -> Result<()> {
        self.shutdown(false).await
    }
}

fn capture_thread(
    ready: oneshot::Sender<Result<()>>,
    stop_rx: &std_mpsc::Receiver<bool>,
    snapshots: &mpsc::UnboundedSender<Snapshot>,
    interval: Duration,
) {
    let opened = Microphone::open().and_then(|mut mic| {
        mic.start()?;
        Ok(mic)
    });
    let mut mic = match opened {
        Ok(mic) => mic,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        mic.stop();
        return;
    }

    let mut utterance = Utterance::new(mic.buffer(), MIN_SPEECH_SAMPLES);
    let flush = loop {
        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                if let Some(samples) = utterance.partial()
                    && snapshots
                        .send(Snapshot {
                            samples,
                            is_final: false,
                        })
                        .is_err()
                {
                    break false;
                }
            }
            Ok(flush) => break flush,
            Err(RecvTimeoutError::Disconnected) => break false,
        }
    };

    mic.stop();
    if flush && let Some(samples) = utterance.finish() {
        let _ = snapshots.send(Snapshot {
            samples,
            is_final: true,
        });
    }
}

async fn transcribe_loop(
    stt: Arc<SpeechToText>,
    language: Option<String>,
    mut snapshots: mpsc::UnboundedReceiver<Snapshot>,
    sink: RecognitionSink,
) {
    while let Some(mut snapshot) = snapshots.recv().await {
        // Skip partials that were overtaken while the last call was in flight
        while !snapshot.is_final {
            match snapshots.try_recv() {
                Ok(newer) => snapshot = newer,
                Err(_) => break,
            }
        }

        let text = match samples_to_wav(&snapshot.samples, SAMPLE_RATE) {
            Ok(wav) => stt.transcribe(&wav, language.as_deref()).await,
            Err(e) => Err(e),
        };

        match text {
            Ok(text) => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    continue;
                }
                if sink
                    .send(Recognition {
                        text,
                        is_final: snapshot.is_final,
                    })
                    .is_err()
                {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, is_final = snapshot.is_final, "transcription failed");
            }
        }
    }
}
