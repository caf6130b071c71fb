//! Incremental decoding of streamed generation payloads.

mod decoder;

pub use decoder::{decode_stream, DecodeError, StreamDecoder, StreamError, StreamEvent};
