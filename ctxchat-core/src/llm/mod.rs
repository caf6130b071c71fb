//! LLM collaborator boundary: message types, service traits, the Gemini
//! HTTP client, and deterministic mocks.

pub mod gemini;
pub mod mock;
pub mod provider;

pub use provider::{
    ByteStream, GenerationBackend, GenerationRequest, LLMError, Message, MessageRole, TokenCounter,
};
