//! Microphone capture into an utterance buffer

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, StreamConfig};

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Mono samples appended by the input stream, readable from other threads
#[derive(Clone, Default)]
pub struct SampleBuffer {
    samples: Arc<Mutex<Vec<f32>>>,
}

impl SampleBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking reader cannot leave the samples half-written
    fn lock(&self) -> MutexGuard<'_, Vec<f32>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append interleaved frames, averaging channels down to mono
    pub fn append_frames(&self, data: &[f32], channels: u16) {
        let mut samples = self.lock();
        if channels <= 1 {
            samples.extend_from_slice(data);
        } else {
            let width = usize::from(channels);
            let scale = f32::from(channels);
            samples.extend(
                data.chunks_exact(width)
                    .map(|frame| frame.iter().sum::<f32>() / scale),
            );
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of everything captured so far
    #[must_use]
    pub fn snapshot(&self) -> Vec<f32> {
        self.lock().clone()
    }

    /// Everything captured so far, leaving the buffer empty
    #[must_use]
    pub fn drain(&self) -> Vec<f32> {
        std::mem::take(&mut *self.lock())
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// One utterance growing in a [`SampleBuffer`]
///
/// Hands out the audio so far for partial transcription, and all of it once
/// the speaker is done. Audio shorter than `min_samples` is never returned.
pub struct Utterance {
    buffer: SampleBuffer,
    min_samples: usize,
    reported: usize,
}

impl Utterance {
    #[must_use]
    pub const fn new(buffer: SampleBuffer, min_samples: usize) -> Self {
        Self {
            buffer,
            min_samples,
            reported: 0,
        }
    }

    /// Audio so far, if long enough and longer than at the previous call
    pub fn partial(&mut self) -> Option<Vec<f32>> {
        let samples = self.buffer.snapshot();
        if samples.len() < self.min_samples || samples.len() == self.reported {
            return None;
        }
        self.reported = samples.len();
        Some(samples)
    }

    /// Close the utterance and take its audio
    #[must_use]
    pub fn finish(self) -> Option<Vec<f32>> {
        let samples = self.buffer.drain();
        (samples.len() >= self.min_samples).then_some(samples)
    }
}

/// Default input device streaming into a [`SampleBuffer`]
///
/// Holds a `cpal::Stream`, which is not `Send`; keep an instance on the
/// thread that opened it.
pub struct Microphone {
    device: Device,
    config: StreamConfig,
    buffer: SampleBuffer,
    stream: Option<Stream>,
}

impl Microphone {
    /// Open the default input device at [`SAMPLE_RATE`]
    ///
    /// Mono is preferred; devices that only record several channels are
    /// downmixed.
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if there is no input device or none of its
    /// configurations can record `f32` samples at 16kHz
    pub fn open() -> Result<Self> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let rate = SampleRate(SAMPLE_RATE);
        let config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .filter(|c| {
                c.sample_format() == SampleFormat::F32
                    && c.min_sample_rate() <= rate
                    && c.max_sample_rate() >= rate
            })
            .min_by_key(cpal::SupportedStreamConfigRange::channels)
            .ok_or_else(|| Error::Audio(format!("input device cannot record at {SAMPLE_RATE}Hz")))?
            .with_sample_rate(rate)
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            channels = config.channels,
            "microphone opened"
        );

        Ok(Self {
            device,
            config,
            buffer: SampleBuffer::new(),
            stream: None,
        })
    }

    /// Start recording into an emptied buffer; no-op while already live
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if the input stream cannot be built or started
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        self.buffer.clear();

        let buffer = self.buffer.clone();
        let channels = self.config.channels;
        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| buffer.append_frames(data, channels),
                |err| tracing::error!(error = %err, "microphone stream error"),
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;
        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        self.stream = Some(stream);
        tracing::debug!("microphone live");
        Ok(())
    }

    /// Stop recording; captured samples stay in the buffer
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!(samples = self.buffer.len(), "microphone stopped");
        }
    }

    /// Handle to the buffer this microphone records into
    #[must_use]
    pub fn buffer(&self) -> SampleBuffer {
        self.buffer.clone()
    }

    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.stream.is_some()
    }
}

/// Encode mono samples as 16-bit PCM WAV, the format Whisper accepts
///
/// # Errors
///
/// Returns `Error::Audio` if encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut wav = std::io::Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    let mut writer = hound::WavWriter::new(&mut wav, spec).map_err(audio_error)?;
    for &sample in samples {
        writer.write_sample(to_pcm16(sample)).map_err(audio_error)?;
    }
    writer.finalize().map_err(audio_error)?;

    Ok(wav.into_inner())
}

#[allow(clippy::cast_possible_truncation)]
fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}

fn audio_error(e: hound::Error) -> Error {
    Error::Audio(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereo_frames_are_averaged() {
        let buffer = SampleBuffer::new();
        buffer.append_frames(&[0.5, -0.5, 1.0, 0.0, 0.2], 2);

        // The trailing half frame is dropped
        assert_eq!(buffer.snapshot(), vec![0.0, 0.5]);
    }

    #[test]
    fn mono_frames_are_copied() {
        let buffer = SampleBuffer::new();
        buffer.append_frames(&[0.1, 0.2], 1);
        buffer.append_frames(&[0.3], 1);
        assert_eq!(buffer.snapshot(), vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn drain_empties_buffer() {
        let buffer = SampleBuffer::new();
        buffer.append_frames(&[0.1; 8], 1);

        assert_eq!(buffer.drain().len(), 8);
        assert!(buffer.is_empty());
    }

    #[test]
    fn partial_waits_for_enough_audio() {
        let buffer = SampleBuffer::new();
        let mut utterance = Utterance::new(buffer.clone(), 4);

        buffer.append_frames(&[0.1; 3], 1);
        assert!(utterance.partial().is_none());

        buffer.append_frames(&[0.1; 2], 1);
        assert_eq!(utterance.partial().map(|s| s.len()), Some(5));
    }

    #[test]
    fn partial_skips_unchanged_audio() {
        let buffer = SampleBuffer::new();
        let mut utterance = Utterance::new(buffer.clone(), 1);

        buffer.append_frames(&[0.1; 4], 1);
        assert!(utterance.partial().is_some());
        assert!(utterance.partial().is_none());

        buffer.append_frames(&[0.1], 1);
        assert!(utterance.partial().is_some());
    }

    #[test]
    fn finish_drops_short_utterances() {
        let buffer = SampleBuffer::new();
        buffer.append_frames(&[0.1; 3], 1);
        assert!(Utterance::new(buffer.clone(), 4).finish().is_none());
        assert!(buffer.is_empty());

        buffer.append_frames(&[0.1; 4], 1);
        assert_eq!(Utterance::new(buffer, 4).finish().map(|s| s.len()), Some(4));
    }

    #[test]
    fn pcm_conversion_clamps() {
        assert_eq!(to_pcm16(0.0), 0);
        assert_eq!(to_pcm16(1.0), i16::MAX);
        assert_eq!(to_pcm16(2.0), i16::MAX);
        assert_eq!(to_pcm16(-2.0), -i16::MAX);
    }
}
