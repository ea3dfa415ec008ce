use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use kaiwa::session::{SessionRuntime, SessionServices, SessionSettings};
use kaiwa::voice::{
    AudioPlayback, DisabledRecognizer, Microphone, OpenAiSynthesizer, SAMPLE_RATE, SilentSynthesizer,
    SpeechRecognizer, SpeechSynthesizer, SpeechToText, TextToSpeech, WhisperRecognizer,
};
use kaiwa::{Config, OpenAiChatClient, SpeechPreference, SqlitePreferenceStore, db};

mod console;

/// kaiwa - chat with an assistant, by keyboard or by voice
#[derive(Parser)]
#[command(name = "kaiwa", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Disable microphone and speaker
    #[arg(long, env = "KAIWA_NO_VOICE", global = true)]
    no_voice: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat (default)
    Chat,
    /// Show or change persisted settings
    Settings {
        #[command(subcommand)]
        setting: Setting,
    },
    /// Show microphone input levels
    TestMic {
        /// Seconds to record
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Speak a line through the configured voice
    TestTts {
        /// Text to speak
        #[arg(default_value = "こんにちは。読み上げのテストです。")]
        text: String,
    },
}

#[derive(Subcommand)]
enum Setting {
    /// Read replies aloud
    Speech {
        /// New value; omit to show the current one
        value: Option<Toggle>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity; RUST_LOG wins when set
    let filter = match cli.verbose {
        0 => "warn,kaiwa=info",
        1 => "info,kaiwa=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => chat(&config, cli.no_voice).await,
        Command::Settings {
            setting: Setting::Speech { value },
        } => speech_setting(&config, value),
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestTts { text } => test_tts(&config, &text).await,
    }
}

fn open_speech_preference(config: &Config) -> anyhow::Result<SpeechPreference> {
    let pool = db::init(config.database_path())?;
    Ok(SpeechPreference::load(Arc::new(SqlitePreferenceStore::new(pool))))
}

async fn chat(config: &Config, no_voice: bool) -> anyhow::Result<()> {
    let speech = Arc::new(open_speech_preference(config)?);
    let chat = Arc::new(OpenAiChatClient::new(&config.chat)?);
    let (recognizer, synthesizer) = voice_services(config, no_voice);

    let services = SessionServices {
        chat,
        recognizer,
        synthesizer,
    };
    let (runtime, handle) = SessionRuntime::new(
        services,
        SessionSettings::from(&config.speech),
        speech.subscribe(),
    );
    let session = tokio::spawn(runtime.run());

    console::run(handle, speech).await?;

    // Dropping the last handle ends the session loop
    session.await?;
    Ok(())
}

fn voice_services(
    config: &Config,
    no_voice: bool,
) -> (Arc<dyn SpeechRecognizer>, Arc<dyn SpeechSynthesizer>) {
    if no_voice {
        tracing::info!("voice explicitly disabled via --no-voice");
        return (Arc::new(DisabledRecognizer), Arc::new(SilentSynthesizer));
    }

    let recognizer: Arc<dyn SpeechRecognizer> =
        match SpeechToText::new_whisper(config.chat.api_key.clone(), config.speech.stt_model.clone()) {
            Ok(stt) => Arc::new(WhisperRecognizer::new(
                stt,
                Duration::from_millis(config.speech.partial_interval_ms),
            )),
            Err(e) => {
                tracing::warn!(error = %e, "speech input unavailable");
                Arc::new(DisabledRecognizer)
            }
        };

    let synthesizer: Arc<dyn SpeechSynthesizer> = match TextToSpeech::new_openai(
        config.chat.api_key.clone(),
        config.speech.tts_voice.clone(),
        config.speech.tts_model.clone(),
    ) {
        Ok(tts) => Arc::new(OpenAiSynthesizer::new(tts)),
        Err(e) => {
            tracing::warn!(error = %e, "speech output unavailable");
            Arc::new(SilentSynthesizer)
        }
    };

    (recognizer, synthesizer)
}

fn speech_setting(config: &Config, value: Option<Toggle>) -> anyhow::Result<()> {
    let speech = open_speech_preference(config)?;
    if let Some(value) = value {
        speech.set_enabled(matches!(value, Toggle::On))?;
    }
    println!("speech: {}", if speech.enabled() { "on" } else { "off" });
    Ok(())
}

/// Level below which a second of audio counts as silence
const SILENCE_RMS: f32 = 0.01;

/// Show the input level once per second
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    let mut mic = Microphone::open()?;
    let buffer = mic.buffer();
    mic.start()?;
    println!("Recording for {duration}s at {SAMPLE_RATE}Hz, say something...\n");

    let mut loudest = 0.0f32;
    for second in 1..=duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let level = Level::of(&buffer.drain());
        loudest = loudest.max(level.rms);
        println!("{second:>3}s  {}  rms {:.4}  peak {:.4}", level.meter(40), level.rms, level.peak);
    }
    mic.stop();

    if loudest < SILENCE_RMS {
        println!("\nOnly silence was recorded. Check that the right input device is the default one.");
    } else {
        println!("\nThe microphone is picking up sound.");
    }
    Ok(())
}

/// Loudness of a block of samples
struct Level {
    rms: f32,
    peak: f32,
}

impl Level {
    #[allow(clippy::cast_precision_loss)]
    fn of(samples: &[f32]) -> Self {
        if samples.is_empty() {
            return Self { rms: 0.0, peak: 0.0 };
        }
        let energy: f32 = samples.iter().map(|s| s * s).sum();
        Self {
            rms: (energy / samples.len() as f32).sqrt(),
            peak: samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs())),
        }
    }

    /// Bar of `width` cells; full scale is an rms of 0.5
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn meter(&self, width: usize) -> String {
        let filled = ((self.rms / 0.5) * width as f32).clamp(0.0, width as f32) as usize;
        format!("[{}{}]", "=".repeat(filled), " ".repeat(width - filled))
    }
}

/// Synthesize `text` and play it on the default output device
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    let tts = TextToSpeech::new_openai(
        config.chat.api_key.clone(),
        config.speech.tts_voice.clone(),
        config.speech.tts_model.clone(),
    )?;

    let audio = tts.synthesize(text, config.speech.rate).await?;
    println!("{text}\n({} bytes of mp3 at rate {})", audio.len(), config.speech.rate);

    tokio::task::spawn_blocking(move || AudioPlayback::new()?.play_mp3_blocking(&audio)).await??;
    println!("Playback finished.");
    Ok(())
}
