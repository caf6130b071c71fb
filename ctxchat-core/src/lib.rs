//! Core library for ctxchat: a streaming conversational client that keeps
//! each request inside the model's context window.
//!
//! The two central pieces are [`context::ContextAssembler`], which picks the
//! most recent turns that fit a token budget using a slot-keyed count cache,
//! and [`stream::StreamDecoder`], which reconstructs reply deltas from
//! arbitrarily chunked response bytes. [`ChatSession`] ties them to a
//! conversation store and a generation backend.

pub mod config;
pub mod context;
pub mod conversation;
pub mod llm;
pub mod session;
pub mod stream;

pub use session::{ChatSession, SessionError};
