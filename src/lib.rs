//! kaiwa - voice-enabled chat with a diary mode
//!
//! This library provides the pieces behind the `kaiwa` console:
//! - Conversation session (transcript, pending input, diary mode)
//! - Chat completion client for `OpenAI`-compatible endpoints
//! - Speech input (microphone + Whisper) and output (`OpenAI` TTS)
//! - Durable speech on/off preference
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                Console / other UI                    │
//! └────────────────────┬────────────────────────────────┘
//!                      │ commands, snapshots, events
//! ┌────────────────────▼────────────────────────────────┐
//! │                SessionRuntime                        │
//! │   ConversationState  │  effects  │  one reply slot  │
//! └──────┬──────────────────┬─────────────────┬─────────┘
//!        │                  │                 │
//! ┌──────▼──────┐   ┌───────▼───────┐  ┌──────▼────────┐
//! │ ChatClient  │   │ Recognizer /  │  │ SpeechPref    │
//! │ (completion)│   │ Synthesizer   │  │ (SQLite)      │
//! └─────────────┘   └───────────────┘  └───────────────┘
//! ```

pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod preferences;
pub mod session;
pub mod voice;

pub use chat::{ChatClient, Message, OpenAiChatClient, Role};
pub use config::Config;
pub use db::DbPool;
pub use error::{Error, Result};
pub use preferences::{
    MemoryPreferenceStore, PreferenceStore, SpeechPreference, SqlitePreferenceStore,
};
pub use session::{
    ConversationState, SessionEvent, SessionHandle, SessionRuntime, SessionServices,
    SessionSettings, SessionSnapshot,
};
pub use voice::{Recognition, SpeechOptions, SpeechRecognizer, SpeechSynthesizer};
