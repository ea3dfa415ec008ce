//! Chat messages and the completion client seam

mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

pub use openai::OpenAiChatClient;

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Wire name of the role
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in a transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Produces one assistant reply for a transcript
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Run a single completion over the whole transcript
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` when no response arrives, `Error::HttpStatus`
    /// for non-2xx answers and `Error::MalformedResponse` when the body lacks
    /// a first choice with message content
    async fn complete(&self, transcript: &[Message]) -> Result<Message>;
}
