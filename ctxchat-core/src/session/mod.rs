//! The conversational session: history, cache, assembly, and generation
//! stitched into the operations a front end calls.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, warn};

use crate::config::constants::sentinels;
use crate::config::{GenerationSettings, SessionConfig};
use crate::context::{ContextAssembler, Slot, TokenCountCache};
use crate::conversation::{ConversationStore, HistoryError, Turn};
use crate::llm::provider::{GenerationBackend, GenerationRequest, LLMError, TokenCounter};
use crate::stream::{decode_stream, StreamError, StreamEvent};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Backend(#[from] LLMError),
    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// One conversation against one model, with token-budgeted context and
/// streamed replies.
///
/// Mutating operations (`chat`, the edits, `delete`, `import`) must not
/// interleave; the cache keys turns by position and is repaired in lockstep
/// with each history mutation.
pub struct ChatSession {
    store: ConversationStore,
    cache: TokenCountCache,
    assembler: ContextAssembler,
    model: String,
    settings: GenerationSettings,
    counter: Arc<dyn TokenCounter>,
    backend: Arc<dyn GenerationBackend>,
}

impl ChatSession {
    pub fn new(
        config: SessionConfig,
        counter: Arc<dyn TokenCounter>,
        backend: Arc<dyn GenerationBackend>,
    ) -> Self {
        Self {
            store: ConversationStore::new(),
            cache: TokenCountCache::new(),
            assembler: ContextAssembler::new(config.budget),
            model: config.model,
            settings: config.generation,
            counter,
            backend,
        }
    }

    pub fn history(&self) -> &[Turn] {
        self.store.turns()
    }

    /// Send `prompt` with as much recent history as the budget admits,
    /// stream the reply through `on_fragment`, and append the completed
    /// turn. On failure the history is left untouched.
    pub async fn chat(
        &mut self,
        prompt: &str,
        on_fragment: impl FnMut(&str),
    ) -> Result<String, SessionError> {
        let view_len = self.store.len();
        match self.generate_over(prompt, view_len, on_fragment).await {
            Ok(response) => {
                self.store.append(Turn::new(prompt, response.clone()));
                Ok(response)
            }
            Err(err) => {
                // The prompt's count may be cached under the slot the turn
                // would have taken; without an appended turn it is stale.
                self.cache.invalidate(Slot::user(view_len));
                Err(err)
            }
        }
    }

    /// Rewrite the user half of turn `index` and regenerate its response
    /// from the history preceding it. Later turns are kept as-is.
    pub async fn edit_user_input(
        &mut self,
        index: usize,
        text: &str,
        on_fragment: impl FnMut(&str),
    ) -> Result<String, SessionError> {
        self.store.set_user_input(index, text)?;
        self.cache.invalidate(Slot::user(index));

        let response = self.generate_over(text, index, on_fragment).await?;
        let response = response.trim().to_string();
        self.store.set_response(index, response.clone())?;
        self.cache.invalidate(Slot::model(index));
        Ok(response)
    }

    /// Rewrite the model half of turn `index` in place. No generation.
    pub fn edit_response(&mut self, index: usize, text: &str) -> Result<(), SessionError> {
        self.store.set_response(index, text)?;
        self.cache.invalidate(Slot::model(index));
        Ok(())
    }

    /// Regenerate the response of turn `index` from its existing prompt.
    pub async fn regenerate(
        &mut self,
        index: usize,
        on_fragment: impl FnMut(&str),
    ) -> Result<String, SessionError> {
        let prompt = self.store.get(index)?.user_input.clone();
        let response = self.generate_over(&prompt, index, on_fragment).await?;
        let response = response.trim().to_string();
        self.store.set_response(index, response.clone())?;
        self.cache.invalidate(Slot::model(index));
        Ok(response)
    }

    /// Remove turn `index`; cached counts for later turns stay valid under
    /// their shifted indices.
    pub fn delete(&mut self, index: usize) -> Result<Turn, SessionError> {
        let removed = self.store.remove(index)?;
        self.cache.on_delete(index);
        Ok(removed)
    }

    pub fn export(&self) -> Result<String, SessionError> {
        Ok(self.store.export_json()?)
    }

    /// Replace the whole history with a previously exported payload. Every
    /// cached count refers to the old turns, so the cache starts over.
    pub fn import(&mut self, raw: &str) -> Result<(), SessionError> {
        let turns = ConversationStore::import_json(raw)?;
        debug!(turns = turns.len(), "importing conversation history");
        self.store.replace_all(turns);
        self.cache.clear();
        Ok(())
    }

    /// Assemble context over the first `view_len` turns, run one generation,
    /// and concatenate the streamed reply. A blocked reply resolves to the
    /// sentinel text rather than an error.
    async fn generate_over(
        &mut self,
        prompt: &str,
        view_len: usize,
        mut on_fragment: impl FnMut(&str),
    ) -> Result<String, SessionError> {
        let messages = self
            .assembler
            .assemble(
                prompt,
                &self.store.turns()[..view_len],
                &mut self.cache,
                self.counter.as_ref(),
            )
            .await?;

        let request = GenerationRequest {
            model: self.model.clone(),
            messages,
            settings: self.settings.clone(),
        };
        let bytes = self.backend.stream_generate(&request).await?;

        let events = decode_stream(bytes);
        futures::pin_mut!(events);

        let mut response = String::new();
        while let Some(event) = events.next().await {
            match event? {
                StreamEvent::Delta(fragment) => {
                    on_fragment(&fragment);
                    response.push_str(&fragment);
                }
                StreamEvent::Blocked { reason } => {
                    warn!(?reason, "reply blocked by safety settings");
                    on_fragment(sentinels::BLOCKED_RESPONSE);
                    return Ok(sentinels::BLOCKED_RESPONSE.to_string());
                }
            }
        }
        Ok(response)
    }
}
