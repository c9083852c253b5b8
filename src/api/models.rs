//! API request and response models.
//!
//! This module defines the client-facing contract of the proxy and the
//! payload sent to the provider's chat completion endpoint.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::core::{AppConfig, AppError};

/// Instruction prepended to the email when no messages are supplied.
pub const REPLY_PROMPT: &str = "Write a concise reply for this email:";

/// Completion count used when the client only sets `multiple`.
pub const MULTIPLE_COMPLETIONS: u32 = 2;

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({"role": "user", "content": "Hello!"}))]
pub struct ChatMessage {
    /// Message role (system, user, assistant)
    pub role: String,

    /// Message content; a string or a list of content parts
    #[schema(value_type = Object)]
    pub content: Value,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Value::String(content.into()),
        }
    }
}

/// Build the single user message used when the client sends only an email.
pub fn synthesize_message(email_content: &str) -> ChatMessage {
    ChatMessage::user(format!("{}\n\n{}", REPLY_PROMPT, email_content))
}

/// Body of `POST /generate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "emailContent": "Hi, are we still on for Friday?",
    "max_tokens": 400,
    "multiple": true
}))]
pub struct GenerateRequest {
    /// Email to reply to; used when `messages` is absent
    #[serde(default, rename = "emailContent")]
    pub email_content: Option<String>,

    /// Model identifier; defaults to the configured model
    #[serde(default)]
    pub model: Option<String>,

    /// Explicit conversation; replaces the synthesized email prompt
    #[serde(default)]
    pub messages: Option<Vec<ChatMessage>>,

    /// Maximum tokens to generate
    #[serde(default, alias = "maxTokens")]
    pub max_tokens: Option<u32>,

    /// Number of completions to request
    #[serde(default, alias = "completionCount")]
    pub n: Option<u32>,

    /// Ask for several alternative replies
    #[serde(default)]
    pub multiple: Option<bool>,
}

/// Payload sent to the provider's chat completion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionPayload {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
}

impl GenerateRequest {
    /// Completion count: an explicit `n` wins, `multiple: true` means two.
    pub fn completion_count(&self) -> Option<u32> {
        self.n.or(match self.multiple {
            Some(true) => Some(MULTIPLE_COMPLETIONS),
            _ => None,
        })
    }

    /// Build the provider payload, filling gaps from configuration.
    pub fn into_payload(self, config: &AppConfig) -> ChatCompletionPayload {
        let n = self.completion_count();
        let messages = match self.messages {
            Some(messages) if !messages.is_empty() => messages,
            _ => vec![synthesize_message(
                self.email_content.as_deref().unwrap_or_default(),
            )],
        };

        ChatCompletionPayload {
            model: self
                .model
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| config.default_model.clone()),
            messages,
            max_tokens: self.max_tokens.unwrap_or(config.default_max_tokens),
            n,
        }
    }
}

/// Body of `POST /transcribe`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({"audio": "GkXfo59ChoEBQveBAULygQRC84EIQoKEd2VibQ==", "model": "whisper-1"}))]
pub struct TranscribeRequest {
    /// Base64-encoded audio, optionally as a `data:` URL
    #[serde(default)]
    pub audio: Option<String>,

    /// Transcription model; defaults to the configured model
    #[serde(default)]
    pub model: Option<String>,
}

impl TranscribeRequest {
    /// Decode the audio payload.
    ///
    /// Fails with [`AppError::NoAudio`] when absent or empty and with
    /// [`AppError::InvalidAudio`] when it is not valid base64.
    pub fn decode_audio(&self) -> Result<Vec<u8>, AppError> {
        let raw = self.audio.as_deref().unwrap_or_default();
        if raw.is_empty() {
            return Err(AppError::NoAudio);
        }

        let encoded = strip_data_url(raw);
        let compact: String = encoded
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        if compact.is_empty() {
            return Err(AppError::NoAudio);
        }

        STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| AppError::InvalidAudio(e.to_string()))
    }

    /// Requested model, or the configured default.
    pub fn model_or(&self, default: &str) -> String {
        self.model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| default.to_string())
    }
}

/// Strip a `data:<mime>;base64,` prefix if present.
fn strip_data_url(raw: &str) -> &str {
    if raw.starts_with("data:") {
        if let Some((_, data)) = raw.split_once(";base64,") {
            return data;
        }
    }
    raw
}

/// Success body of `POST /generate`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GenerateResponse {
    /// First reply, or null when the provider returned none
    pub reply: Option<String>,
    /// All replies in choice order
    pub replies: Vec<String>,
    /// Provider body as received
    #[schema(value_type = Object)]
    pub raw: Value,
}

/// Success body of `POST /transcribe`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TranscribeResponse {
    /// Transcribed text
    pub text: String,
    /// Provider body as received
    #[schema(value_type = Object)]
    pub raw: Value,
}

/// Error envelope returned by every failing request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({"error": "unauthorized", "details": "Unauthorized"}))]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub error: String,
    /// Human-readable message, or the provider's error body
    #[schema(value_type = Object)]
    pub details: Value,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({"status": "healthy"}))]
pub struct HealthResponse {
    pub status: String,
}
