//! `OpenAI`-compatible chat completion client

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{ChatClient, Message};
use crate::config::ChatConfig;
use crate::{Error, Result};

/// Sends the transcript to a `/v1/chat/completions` style endpoint
pub struct OpenAiChatClient {
    client: Client,
    endpoint: String,
    api_key: SecretString,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl std::fmt::Debug for OpenAiChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiChatClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl OpenAiChatClient {
    /// Create a client from chat configuration
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| Error::Config("OpenAI API key required for chat".to_string()))?;

        Ok(Self {
            client: Client::new(),
            endpoint: config.endpoint.clone(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn build_request<'a>(&'a self, transcript: &'a [Message]) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.model,
            messages: transcript,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[async_trait]
impl ChatClient for OpenAiChatClient {
    async fn complete(&self, transcript: &[Message]) -> Result<Message> {
        validate_transcript(transcript)?;

        tracing::debug!(
            messages = transcript.len(),
            model = %self.model,
            "sending completion request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&self.build_request(transcript))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "completion request failed");
                Error::Transport(e.to_string())
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        if !status.is_success() {
            tracing::error!(status = %status, body = %body, "completion API error");
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let reply = parse_reply(&body)?;
        tracing::info!(chars = reply.content.chars().count(), "completion received");
        Ok(reply)
    }
}

fn validate_transcript(transcript: &[Message]) -> Result<()> {
    if transcript.is_empty() {
        return Err(Error::InvalidInput("transcript must not be empty".to_string()));
    }
    if let Some(idx) = transcript.iter().position(|m| m.content.is_empty()) {
        return Err(Error::InvalidInput(format!(
            "message {idx} has empty content"
        )));
    }
    Ok(())
}

/// Extract `choices[0].message.content` as an assistant message
fn parse_reply(body: &str) -> Result<Message> {
    let parsed: ChatCompletionResponse = serde_json::from_str(body)
        .map_err(|e| Error::MalformedResponse(format!("invalid completion body: {e}")))?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .filter(|content| !content.trim().is_empty())
        .map(Message::assistant)
        .ok_or_else(|| Error::MalformedResponse("no message content in first choice".to_string()))
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
