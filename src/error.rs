//! Error types for kaiwa

use thiserror::Error;

/// Result type alias for kaiwa operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in kaiwa
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Caller passed input that violates an operation's contract
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No response was received from a remote service
    #[error("transport error: {0}")]
    Transport(String),

    /// Remote service answered with a non-success status
    #[error("http error {status}: {body}")]
    HttpStatus {
        /// HTTP status code
        status: u16,
        /// Response body, if any
        body: String,
    },

    /// Response body did not have the expected shape
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Preference read/write failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Speech capture or playback service failure
    #[error("speech service error: {0}")]
    SpeechService(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Short, stable name of the failure kind, used in logs and session events
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::InvalidInput(_) => "invalid_input",
            Self::Transport(_) => "transport",
            Self::HttpStatus { .. } => "http_status",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Storage(_) => "storage",
            Self::SpeechService(_) | Self::Audio(_) => "speech_service",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Toml(_) => "toml",
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<r2d2::Error> for Error {
    fn from(e: r2d2::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
