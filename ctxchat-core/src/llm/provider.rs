//! Collaborator interfaces for the token-counting and generation services.
//!
//! Both services live on the far side of the network and are specified here
//! only at their boundary: exact token counts in, raw chunked reply bytes
//! out. Concrete HTTP implementations live in [`super::gemini`].

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::config::GenerationSettings;
use crate::config::constants::message_roles;

/// Conversation role understood by the generation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Model,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => message_roles::USER,
            MessageRole::Model => message_roles::MODEL,
        }
    }
}

/// One unit of the outgoing message list, chronological, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub text: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Model,
            text: text.into(),
        }
    }
}

/// Errors surfaced by either remote service.
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("API error: {message}")]
    ApiError { message: String },
    #[error("network error: {message}")]
    NetworkError { message: String },
    #[error("rate limit exceeded")]
    RateLimit { retry_after: Option<String> },
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

/// Raw reply bytes in arbitrarily sized, arbitrarily split chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, LLMError>> + Send>>;

/// Everything the backend needs for one generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub settings: GenerationSettings,
}

/// Exact token counting service. Remote, rate-limited, latency-costly;
/// callers are expected to cache aggressively.
#[async_trait]
pub trait TokenCounter: Send + Sync {
    /// Exact token count for one text.
    async fn count(&self, text: &str) -> Result<usize, LLMError>;

    /// Aggregate exact count across all texts in a single remote call.
    async fn count_batch(&self, texts: &[&str]) -> Result<usize, LLMError>;
}

/// Generation service: accepts an ordered message list plus settings and
/// returns the reply as a raw chunked byte stream.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn stream_generate(&self, request: &GenerationRequest) -> Result<ByteStream, LLMError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_roles_serialize_lowercase() {
        let message = Message::model("hi");
        let raw = serde_json::to_string(&message).expect("serialize");
        assert_eq!(raw, r#"{"role":"model","text":"hi"}"#);
    }

    #[test]
    fn role_strings_match_wire_names() {
        assert_eq!(MessageRole::User.as_str(), "user");
        assert_eq!(MessageRole::Model.as_str(), "model");
    }
}
