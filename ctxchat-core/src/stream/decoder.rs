use async_stream::try_stream;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::debug;

use crate::llm::provider::{ByteStream, LLMError};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("missing field `{0}` in stream payload")]
    MissingField(&'static str),
    #[error("invalid stream payload: {0}")]
    InvalidPayload(String),
}

/// Transport or decode failure while draining one generation stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error(transparent)]
    Transport(#[from] LLMError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// One decoded increment of the reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Reply text, emitted as soon as one complete payload object parses.
    Delta(String),
    /// The backend refused to produce a reply. Emitted at most once per
    /// stream; the remainder of the stream is ignored.
    Blocked { reason: Option<String> },
}

/// Incremental decoder for a back-to-back sequence of JSON payload objects
/// delivered in arbitrarily sized, arbitrarily split chunks.
///
/// Framing noise between objects (array brackets, commas, whitespace) is
/// discarded; object boundaries are found by brace depth with a global
/// escape exemption. The text delta is read from either the
/// chat-completion path `choices[0].delta.content` or the generation path
/// `candidates[0].content.parts[0].text`.
///
/// A decoder serves exactly one stream: after any failure it resets and
/// refuses further input.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    pending_utf8: Vec<u8>,
    buffer: String,
    depth: usize,
    inside_object: bool,
    escape_pending: bool,
    blocked: bool,
    poisoned: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a block signal has been decoded; later input is ignored.
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Feed one raw chunk; returns the events it completed, in order.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Result<Vec<StreamEvent>, DecodeError> {
        if self.poisoned {
            return Err(DecodeError::InvalidPayload(
                "decoder already failed; a new stream needs a new decoder".to_string(),
            ));
        }
        if self.blocked {
            return Ok(Vec::new());
        }

        self.pending_utf8.extend_from_slice(chunk);
        let text = match std::str::from_utf8(&self.pending_utf8) {
            Ok(text) => {
                let text = text.to_owned();
                self.pending_utf8.clear();
                text
            }
            Err(err) => {
                if err.error_len().is_some() {
                    self.fail();
                    return Err(DecodeError::InvalidPayload(
                        "stream is not valid UTF-8".to_string(),
                    ));
                }
                // A multi-byte character split across chunks; carry the tail.
                let valid = err.valid_up_to();
                let text = String::from_utf8_lossy(&self.pending_utf8[..valid]).into_owned();
                self.pending_utf8 = self.pending_utf8[valid..].to_vec();
                text
            }
        };

        let mut events = Vec::new();
        for ch in text.chars() {
            if let Err(err) = self.process_char(ch, &mut events) {
                self.fail();
                return Err(err);
            }
            if self.blocked {
                break;
            }
        }
        Ok(events)
    }

    /// Signal end of stream; a half-read object is a decode failure.
    pub fn finish(&mut self) -> Result<(), DecodeError> {
        if self.blocked {
            return Ok(());
        }
        if self.inside_object || !self.pending_utf8.is_empty() {
            self.fail();
            return Err(DecodeError::InvalidPayload(
                "stream ended inside an object".to_string(),
            ));
        }
        Ok(())
    }

    fn process_char(&mut self, ch: char, events: &mut Vec<StreamEvent>) -> Result<(), DecodeError> {
        if !self.inside_object && ch != '{' {
            // Preamble and inter-object framing.
            return Ok(());
        }

        if self.escape_pending {
            // The escaped character is exempt from brace counting even when
            // it looks like a brace. The exemption is global rather than
            // string-aware; structural braces outside strings never occur
            // in the expected payload shapes.
            self.buffer.push(ch);
            self.escape_pending = false;
            return Ok(());
        }
        if ch == '\\' {
            self.buffer.push(ch);
            self.escape_pending = true;
            return Ok(());
        }

        self.buffer.push(ch);
        match ch {
            '{' => {
                self.depth += 1;
                self.inside_object = true;
            }
            '}' => {
                self.depth = self.depth.saturating_sub(1);
            }
            _ => {}
        }

        if self.inside_object && self.depth == 0 {
            let event = self.complete_object()?;
            if matches!(event, StreamEvent::Blocked { .. }) {
                self.blocked = true;
            }
            events.push(event);
        }
        Ok(())
    }

    fn complete_object(&mut self) -> Result<StreamEvent, DecodeError> {
        let raw = std::mem::take(&mut self.buffer);
        self.inside_object = false;
        self.depth = 0;

        let value: Value = serde_json::from_str(&raw)
            .map_err(|err| DecodeError::InvalidPayload(err.to_string()))?;

        if let Some(reason) = block_reason(&value) {
            debug!(?reason, "stream payload signals blocked content");
            return Ok(StreamEvent::Blocked { reason });
        }

        let text = extract_delta(&value).ok_or(DecodeError::MissingField("text delta"))?;
        Ok(StreamEvent::Delta(text.to_owned()))
    }

    fn fail(&mut self) {
        self.pending_utf8.clear();
        self.buffer.clear();
        self.depth = 0;
        self.inside_object = false;
        self.escape_pending = false;
        self.poisoned = true;
    }
}

fn extract_delta(value: &Value) -> Option<&str> {
    value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .or_else(|| {
            value
                .pointer("/candidates/0/content/parts/0/text")
                .and_then(Value::as_str)
        })
}

fn block_reason(value: &Value) -> Option<Option<String>> {
    if let Some(reason) = value
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        return Some(Some(reason.to_owned()));
    }
    let finish = value
        .pointer("/candidates/0/finishReason")
        .and_then(Value::as_str);
    if finish == Some("SAFETY") && extract_delta(value).is_none() {
        return Some(finish.map(str::to_owned));
    }
    None
}

/// Drain a raw byte stream into a lazy, ordered event stream.
///
/// Consumed exactly once, in arrival order; transport and decode failures
/// both end the stream. After a block signal the remaining bytes are
/// discarded without decoding.
pub fn decode_stream(
    mut bytes: ByteStream,
) -> impl Stream<Item = Result<StreamEvent, StreamError>> {
    try_stream! {
        let mut decoder = StreamDecoder::new();
        while let Some(chunk) = bytes.next().await {
            let chunk = chunk?;
            for event in decoder.push_bytes(&chunk)? {
                yield event;
            }
            if decoder.is_blocked() {
                break;
            }
        }
        if !decoder.is_blocked() {
            decoder.finish()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn push(decoder: &mut StreamDecoder, chunk: &str) -> Vec<StreamEvent> {
        decoder.push_bytes(chunk.as_bytes()).expect("chunk decodes")
    }

    #[test]
    fn object_split_across_chunks_emits_once() {
        let mut decoder = StreamDecoder::new();
        let first = push(&mut decoder, r#"{"choices":[{"delta":{"content":"Hel"#);
        assert!(first.is_empty(), "no emission before the object completes");
        let second = push(&mut decoder, r#"lo"}}]}"#);
        assert_eq!(second, vec![StreamEvent::Delta("Hello".to_string())]);
        decoder.finish().expect("clean end of stream");
    }

    #[test]
    fn gemini_schema_path_is_supported() {
        let mut decoder = StreamDecoder::new();
        let events = push(
            &mut decoder,
            r#"{"candidates":[{"content":{"parts":[{"text":"hi"}],"role":"model"}}]}"#,
        );
        assert_eq!(events, vec![StreamEvent::Delta("hi".to_string())]);
    }

    #[test]
    fn array_framing_and_whitespace_are_discarded() {
        let mut decoder = StreamDecoder::new();
        let events = push(
            &mut decoder,
            "[\n {\"choices\":[{\"delta\":{\"content\":\"a\"}}]},\n {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n]",
        );
        assert_eq!(
            events,
            vec![
                StreamEvent::Delta("a".to_string()),
                StreamEvent::Delta("b".to_string()),
            ]
        );
        decoder.finish().expect("clean end of stream");
    }

    #[test]
    fn escaped_backslash_pairs_off_before_the_closing_brace() {
        let mut decoder = StreamDecoder::new();
        // Content ends in a literal backslash; the "\\" pair must consume
        // itself so the structural "}" right after it still closes.
        let events = push(&mut decoder, r#"{"choices":[{"delta":{"content":"x\\"}}]}"#);
        assert_eq!(events, vec![StreamEvent::Delta("x\\".to_string())]);
        decoder.finish().expect("clean end of stream");
    }

    #[test]
    fn escape_state_survives_a_chunk_boundary() {
        let payload = r#"{"choices":[{"delta":{"content":"x\\"}}]}"#;
        // Split between the two backslashes of the escaped pair.
        let split = 35;
        let mut decoder = StreamDecoder::new();
        assert!(push(&mut decoder, &payload[..split]).is_empty());
        let events = push(&mut decoder, &payload[split..]);
        assert_eq!(events, vec![StreamEvent::Delta("x\\".to_string())]);
        decoder.finish().expect("clean end of stream");
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let mut decoder = StreamDecoder::new();
        let payload = "{\"choices\":[{\"delta\":{\"content\":\"héllo\"}}]}".as_bytes();
        let split = 35; // inside the two-byte "é"
        assert!(decoder.push_bytes(&payload[..split]).unwrap().is_empty());
        let events = decoder.push_bytes(&payload[split..]).unwrap();
        assert_eq!(events, vec![StreamEvent::Delta("héllo".to_string())]);
    }

    #[test]
    fn prompt_feedback_block_yields_one_event_and_mutes_the_rest() {
        let mut decoder = StreamDecoder::new();
        let events = push(
            &mut decoder,
            r#"{"promptFeedback":{"blockReason":"SAFETY"}}{"choices":[{"delta":{"content":"late"}}]}"#,
        );
        assert_eq!(
            events,
            vec![StreamEvent::Blocked {
                reason: Some("SAFETY".to_string())
            }]
        );
        assert!(decoder.is_blocked());
        assert!(push(&mut decoder, r#"{"anything":1}"#).is_empty());
        decoder.finish().expect("blocked stream finishes cleanly");
    }

    #[test]
    fn safety_finish_without_text_is_blocked() {
        let mut decoder = StreamDecoder::new();
        let events = push(&mut decoder, r#"{"candidates":[{"finishReason":"SAFETY"}]}"#);
        assert_eq!(
            events,
            vec![StreamEvent::Blocked {
                reason: Some("SAFETY".to_string())
            }]
        );
    }

    #[test]
    fn missing_text_field_poisons_the_decoder() {
        let mut decoder = StreamDecoder::new();
        let err = decoder
            .push_bytes(br#"{"candidates":[{"content":{}}]}"#)
            .expect_err("payload lacks a text delta");
        assert!(matches!(err, DecodeError::MissingField(_)));
        // Further input is refused rather than decoded against stale state.
        assert!(decoder.push_bytes(b"{").is_err());
    }

    #[test]
    fn truncated_object_at_end_of_stream_is_an_error() {
        let mut decoder = StreamDecoder::new();
        push(&mut decoder, r#"{"choices":[{"delta":{"content":"x"#);
        assert!(decoder.finish().is_err());
    }

    #[tokio::test]
    async fn decode_stream_yields_events_lazily_in_order() {
        let chunks: Vec<Result<bytes::Bytes, LLMError>> = vec![
            Ok(bytes::Bytes::from_static(
                br#"[{"candidates":[{"content":{"parts":[{"text":"one "}]}}]},"#,
            )),
            Ok(bytes::Bytes::from_static(
                br#"{"candidates":[{"content":{"parts":[{"text":"two"}]}}]}]"#,
            )),
        ];
        let bytes: ByteStream = Box::pin(futures::stream::iter(chunks));

        let stream = decode_stream(bytes);
        futures::pin_mut!(stream);
        let mut collected = Vec::new();
        while let Some(event) = stream.next().await {
            collected.push(event.expect("event decodes"));
        }
        assert_eq!(
            collected,
            vec![
                StreamEvent::Delta("one ".to_string()),
                StreamEvent::Delta("two".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn decode_stream_surfaces_transport_failures() {
        let chunks: Vec<Result<bytes::Bytes, LLMError>> = vec![Err(LLMError::NetworkError {
            message: "connection reset".to_string(),
        })];
        let bytes: ByteStream = Box::pin(futures::stream::iter(chunks));

        let stream = decode_stream(bytes);
        futures::pin_mut!(stream);
        let err = stream
            .next()
            .await
            .expect("one item")
            .expect_err("transport error propagates");
        assert!(matches!(err, StreamError::Transport(_)));
    }
}
