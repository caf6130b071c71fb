//! Deterministic collaborator doubles for tests; no network involved.
//!
//! [`MockTokenCounter`] counts whitespace-separated words so tests can
//! compute expected budgets by hand, and keeps a call ledger to assert how
//! many remote lookups an operation performed. [`MockBackend`] replays
//! queued byte chunks in FIFO order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use super::provider::{
    ByteStream, GenerationBackend, GenerationRequest, LLMError, TokenCounter,
};

/// Token counter whose oracle is the whitespace word count.
#[derive(Debug, Default)]
pub struct MockTokenCounter {
    count_calls: AtomicUsize,
    batch_calls: AtomicUsize,
    rate_limited: AtomicBool,
}

impl MockTokenCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The oracle used by both trait methods.
    pub fn tokens(text: &str) -> usize {
        text.split_whitespace().count()
    }

    /// Total remote calls so far, single and batched combined.
    pub fn calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst) + self.batch_calls.load(Ordering::SeqCst)
    }

    /// Batched calls only, for asserting degraded-path probe counts.
    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    /// Make every subsequent lookup fail with a rate-limit signal.
    pub fn set_rate_limited(&self, limited: bool) {
        self.rate_limited.store(limited, Ordering::SeqCst);
    }

    fn check_limit(&self) -> Result<(), LLMError> {
        if self.rate_limited.load(Ordering::SeqCst) {
            return Err(LLMError::RateLimit { retry_after: None });
        }
        Ok(())
    }
}

#[async_trait]
impl TokenCounter for MockTokenCounter {
    async fn count(&self, text: &str) -> Result<usize, LLMError> {
        self.check_limit()?;
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::tokens(text))
    }

    async fn count_batch(&self, texts: &[&str]) -> Result<usize, LLMError> {
        self.check_limit()?;
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|text| Self::tokens(text)).sum())
    }
}

/// Generation backend that replays queued chunk scripts in FIFO order.
#[derive(Debug, Default)]
pub struct MockBackend {
    scripts: Mutex<VecDeque<Vec<Bytes>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the chunks one `stream_generate` call will deliver.
    pub fn enqueue_chunks(&self, chunks: &[&str]) {
        let script = chunks
            .iter()
            .map(|chunk| Bytes::copy_from_slice(chunk.as_bytes()))
            .collect();
        self.scripts.lock().push_back(script);
    }

    /// Queue chunks and return the backend for chaining.
    pub fn with_chunks(self, chunks: &[&str]) -> Self {
        self.enqueue_chunks(chunks);
        self
    }

    /// Queue raw byte chunks, for payloads split mid-UTF-8-character.
    pub fn enqueue_raw_chunks(&self, chunks: Vec<Vec<u8>>) {
        let script = chunks.into_iter().map(Bytes::from).collect();
        self.scripts.lock().push_back(script);
    }

    /// The most recent request, for asserting what was actually sent.
    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.requests.lock().last().cloned()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    async fn stream_generate(&self, request: &GenerationRequest) -> Result<ByteStream, LLMError> {
        self.requests.lock().push(request.clone());
        let script = self.scripts.lock().pop_front().ok_or_else(|| {
            LLMError::InvalidRequest {
                message: "MockBackend has no queued streams".to_string(),
            }
        })?;
        Ok(Box::pin(futures::stream::iter(
            script.into_iter().map(Ok),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn counter_uses_word_oracle_and_records_calls() {
        let counter = MockTokenCounter::new();
        assert_eq!(counter.count("one two three").await.unwrap(), 3);
        assert_eq!(counter.count_batch(&["a b", "c"]).await.unwrap(), 3);
        assert_eq!(counter.calls(), 2);
        assert_eq!(counter.batch_calls(), 1);
    }

    #[tokio::test]
    async fn rate_limited_counter_fails_without_counting() {
        let counter = MockTokenCounter::new();
        counter.set_rate_limited(true);
        let err = counter.count("text").await.expect_err("should rate limit");
        assert!(matches!(err, LLMError::RateLimit { .. }));
        assert_eq!(counter.calls(), 0);
    }

    #[tokio::test]
    async fn backend_replays_scripts_in_fifo_order() {
        let backend = MockBackend::new().with_chunks(&["first"]).with_chunks(&["second"]);
        let request = GenerationRequest {
            model: "test".to_string(),
            messages: Vec::new(),
            settings: Default::default(),
        };

        let mut stream = backend.stream_generate(&request).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from("first"));

        let mut stream = backend.stream_generate(&request).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from("second"));

        let err = backend
            .stream_generate(&request)
            .await
            .err()
            .expect("queue exhausted");
        assert!(matches!(err, LLMError::InvalidRequest { .. }));
        assert_eq!(backend.request_count(), 3);
    }
}
