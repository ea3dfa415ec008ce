//! Voice component integration tests
//!
//! Tests voice components without requiring audio hardware

use std::io::Cursor;
use std::time::Duration;

use kaiwa::voice::{
    DisabledRecognizer, SAMPLE_RATE, SilentSynthesizer, SpeechOptions, SpeechToText,
    WhisperRecognizer, language_code, samples_to_wav,
};
use kaiwa::{Error, SpeechRecognizer, SpeechSynthesizer};
use secrecy::SecretString;
use tokio::sync::mpsc;

/// Generate sine wave audio samples
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

#[test]
fn test_samples_to_wav() {
    let samples = generate_sine_samples(440.0, 0.1, 0.5);
    let wav_data = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

    // Check WAV header magic
    assert_eq!(&wav_data[0..4], b"RIFF");
    assert_eq!(&wav_data[8..12], b"WAVE");

    // 16-bit mono after the 44 byte header
    assert_eq!(wav_data.len(), 44 + samples.len() * 2);
}

#[test]
fn test_wav_readback() {
    let original_samples: Vec<f32> = vec![0.0, 0.5, -0.5, 1.0, -1.0, 0.25];
    let wav_data = samples_to_wav(&original_samples, SAMPLE_RATE).unwrap();

    let mut reader = hound::WavReader::new(Cursor::new(wav_data)).unwrap();

    let spec = reader.spec();
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.bits_per_sample, 16);

    let read_samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(read_samples.len(), original_samples.len());
    assert_eq!(read_samples[0], 0);
    assert!(read_samples[3] > 32000);
    assert!(read_samples[4] < -32000);
}

#[test]
fn test_language_code_for_whisper() {
    assert_eq!(language_code("ja-JP").as_deref(), Some("ja"));
    assert_eq!(language_code("EN-us").as_deref(), Some("en"));
    assert_eq!(language_code("fr").as_deref(), Some("fr"));
    assert_eq!(language_code(""), None);
}

#[tokio::test]
async fn test_disabled_recognizer_refuses_to_start() {
    let (sink, mut rx) = mpsc::unbounded_channel();

    let err = DisabledRecognizer.start("ja-JP", sink).await.unwrap_err();
    assert!(matches!(err, Error::SpeechService(_)));
    assert!(DisabledRecognizer.stop().await.is_ok());

    // Nothing was delivered and the sink was dropped
    assert!(rx.recv().await.is_none());
}

#[test]
fn test_silent_synthesizer_accepts_text() {
    let options = SpeechOptions::default();
    assert!(SilentSynthesizer.speak("こんにちは", &options).is_ok());
}

#[test]
fn test_default_speech_options() {
    let options = SpeechOptions::default();
    assert_eq!(options.language, "ja-JP");
    assert!((options.pitch - 1.0).abs() < f32::EPSILON);
    assert!((options.rate - 1.0).abs() < f32::EPSILON);
}

#[tokio::test]
async fn test_whisper_stop_without_start_is_noop() {
    let stt = SpeechToText::new_whisper(
        Some(SecretString::from("sk-test".to_string())),
        "whisper-1".to_string(),
    )
    .unwrap();
    let recognizer = WhisperRecognizer::new(stt, Duration::from_millis(500));

    assert!(recognizer.stop().await.is_ok());
}
