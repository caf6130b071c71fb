use tracing::{debug, warn};

use crate::config::ContextBudgetConfig;
use crate::conversation::Turn;
use crate::llm::provider::{LLMError, Message, TokenCounter};

use super::cache::{Slot, TokenCountCache};
use super::estimator::{CharacterRatioTokenEstimator, TokenEstimator};

/// Decides which historical turns accompany each outgoing prompt.
///
/// Stateless across calls: each [`assemble`](ContextAssembler::assemble) is
/// a function of the prompt, a history snapshot, and the current cache
/// contents; the cache itself evolves as a side effect.
pub struct ContextAssembler {
    budget: ContextBudgetConfig,
    estimator: CharacterRatioTokenEstimator,
}

impl ContextAssembler {
    pub fn new(budget: ContextBudgetConfig) -> Self {
        let estimator = CharacterRatioTokenEstimator::new(budget.chars_per_token);
        Self { budget, estimator }
    }

    pub fn budget(&self) -> &ContextBudgetConfig {
        &self.budget
    }

    /// Build the outgoing message list: as many recent turns as the token
    /// budget admits, oldest first, ending with `prompt` as a user message.
    ///
    /// The prompt is never dropped. Its count is cached under the slot the
    /// turn will occupy once the generation completes (`history.len()`,
    /// user), so an unchanged prompt over an unchanged history costs zero
    /// further counter calls.
    ///
    /// The cheap path walks newest to oldest over cached counts; once
    /// `cache_miss_threshold` uncached lookups have gone to the counter,
    /// assembly switches to the degraded path: a local character-ratio
    /// pre-trim toward `approximate_token_ceiling`, then a binary search
    /// whose probes are single batched exact counts. Either way the
    /// accepted list's token count is exact, never an estimate.
    pub async fn assemble(
        &self,
        prompt: &str,
        history: &[Turn],
        cache: &mut TokenCountCache,
        counter: &dyn TokenCounter,
    ) -> Result<Vec<Message>, LLMError> {
        let mut misses = 0usize;
        let prompt_tokens = self
            .slot_count(Slot::user(history.len()), prompt, cache, counter, &mut misses)
            .await?;

        let mut total = prompt_tokens;
        let mut included = 0usize;
        let mut degraded = misses >= self.budget.cache_miss_threshold;

        if !degraded {
            for index in (0..history.len()).rev() {
                let turn = &history[index];
                let user = self
                    .slot_count(Slot::user(index), &turn.user_input, cache, counter, &mut misses)
                    .await?;
                if misses >= self.budget.cache_miss_threshold {
                    degraded = true;
                    break;
                }
                let model = self
                    .slot_count(Slot::model(index), &turn.response, cache, counter, &mut misses)
                    .await?;
                // A trip on the oldest turn's last lookup changes nothing:
                // every count is in hand, so the walk finishes as usual.
                if misses >= self.budget.cache_miss_threshold && index > 0 {
                    degraded = true;
                    break;
                }

                // A turn landing exactly on the ceiling is included.
                if total + user + model > self.budget.max_context_tokens {
                    break;
                }
                total += user + model;
                included += 1;
            }
        }

        if degraded {
            debug!(misses, "cache too cold; switching to degraded assembly");
            return self.assemble_degraded(prompt, history, counter).await;
        }

        if included == 0 && prompt_tokens > self.budget.max_context_tokens {
            warn!(
                prompt_tokens,
                budget = self.budget.max_context_tokens,
                "prompt alone exceeds the context budget; sending oversized request"
            );
        }

        let start = history.len() - included;
        debug!(
            included,
            dropped = start,
            total_tokens = total,
            "context assembled from cache walk"
        );
        Ok(Self::collect(&history[start..], prompt))
    }

    /// Approximate-then-binary-search trimming for a cold cache.
    ///
    /// The pre-trim is purely local; every binary-search probe is one
    /// batched exact count over the remaining suffix plus the prompt, so
    /// the chosen suffix's budget conformance is authoritative.
    async fn assemble_degraded(
        &self,
        prompt: &str,
        history: &[Turn],
        counter: &dyn TokenCounter,
    ) -> Result<Vec<Message>, LLMError> {
        let total_turns = history.len();

        let turn_estimates: Vec<usize> = history
            .iter()
            .map(|turn| {
                self.estimator.estimate_tokens(&turn.user_input)
                    + self.estimator.estimate_tokens(&turn.response)
            })
            .collect();
        let mut suffix_estimate: usize =
            turn_estimates.iter().sum::<usize>() + self.estimator.estimate_tokens(prompt);

        let mut start = 0usize;
        while start < total_turns && suffix_estimate > self.budget.approximate_token_ceiling {
            suffix_estimate -= turn_estimates[start];
            start += 1;
        }
        debug!(pre_trim_dropped = start, suffix_estimate, "degraded pre-trim complete");

        // Smallest starting turn whose suffix fits the hard budget. Token
        // totals shrink as the start moves forward, so fitting is monotone.
        let mut lo = start;
        let mut hi = total_turns;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let exact = self.count_suffix(&history[mid..], prompt, counter).await?;
            if exact <= self.budget.max_context_tokens {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }

        if lo == total_turns {
            // The search never verified the prompt-only list; measure it so
            // accepted overflow is reported rather than silent.
            let exact = self.count_suffix(&[], prompt, counter).await?;
            if exact > self.budget.max_context_tokens {
                warn!(
                    prompt_tokens = exact,
                    budget = self.budget.max_context_tokens,
                    "prompt alone exceeds the context budget; sending oversized request"
                );
            }
        }

        debug!(
            dropped = lo,
            kept = total_turns - lo,
            "degraded assembly converged"
        );
        Ok(Self::collect(&history[lo..], prompt))
    }

    async fn slot_count(
        &self,
        slot: Slot,
        text: &str,
        cache: &mut TokenCountCache,
        counter: &dyn TokenCounter,
        misses: &mut usize,
    ) -> Result<usize, LLMError> {
        if let Some(count) = cache.get(slot) {
            return Ok(count);
        }
        let count = counter.count(text).await?;
        cache.insert(slot, count);
        *misses += 1;
        Ok(count)
    }

    async fn count_suffix(
        &self,
        turns: &[Turn],
        prompt: &str,
        counter: &dyn TokenCounter,
    ) -> Result<usize, LLMError> {
        let mut texts: Vec<&str> = Vec::with_capacity(turns.len() * 2 + 1);
        for turn in turns {
            texts.push(&turn.user_input);
            texts.push(&turn.response);
        }
        texts.push(prompt);
        counter.count_batch(&texts).await
    }

    fn collect(turns: &[Turn], prompt: &str) -> Vec<Message> {
        let mut messages = Vec::with_capacity(turns.len() * 2 + 1);
        for turn in turns {
            messages.push(Message::user(&turn.user_input));
            messages.push(Message::model(&turn.response));
        }
        messages.push(Message::user(prompt));
        messages
    }
}
