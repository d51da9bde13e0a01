//! Streaming normalizer.
//!
//! A vendor stream is decoded in three layers:
//!
//! 1. a [`FrameParser`] turns raw body bytes into [`StreamFrame`]s
//!    ([`sse::SseParser`] for SSE/NDJSON, [`eventstream::EventStreamParser`] for the
//!    binary AWS framing);
//! 2. a per-vendor [`ChunkDecoder`] turns each frame into [`StreamEvent`]s;
//! 3. [`DecodedStream`] folds the events of one frame into one [`ChatChunk`], and
//!    [`finalize_stream`] enforces the single-terminal-chunk contract.

use std::pin::Pin;

use futures_core::Stream;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::LLMError;
use crate::http::HttpBodyStream;
use crate::types::{ChatChunk, FinishReason, ToolCallDelta, Usage};

mod decode;
pub mod eventstream;
mod finalize;
mod generic;
pub mod sse;

pub use decode::{ChunkContext, DecodedStream, decode_stream};
pub use eventstream::{EventStreamDecoder, EventStreamParser};
pub use finalize::finalize_stream;
pub use generic::{GenericChunkDecoder, finish_reason_from_str};
pub(crate) use generic::{BEDROCK_METRICS, invocation_metrics_usage};
pub use sse::{LineMode, SseParser};

/// Boxed stream of canonical chunks returned by streaming operations.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatChunk, LLMError>> + Send>>;

/// One transport-level event: an SSE event, an NDJSON line, or an event-stream chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    /// SSE `event:` tag or event-stream `:event-type`; `None` for NDJSON.
    pub event: Option<String>,
    pub data: String,
}

impl StreamFrame {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    pub fn is_done_sentinel(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Splits a byte stream into frames.
pub trait FrameParser: Send {
    /// Feeds more bytes; returns the frames completed by them, in order.
    fn push(&mut self, bytes: &[u8]) -> Result<Vec<StreamFrame>, LLMError>;

    /// Flushes whatever is buffered when the transport closes.
    fn finish(&mut self) -> Result<Vec<StreamFrame>, LLMError>;
}

/// Vendor-neutral pieces a decoder extracts from one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Vendor response id; replaces the generated chunk id from then on.
    ResponseId(String),
    Text(String),
    ToolCall(ToolCallDelta),
    Finish(FinishReason),
    Usage(Usage),
    /// The vendor signalled end of stream without a finish reason of its own.
    Done,
}

/// Per-vendor (or per-model-family) partial-chunk decoder.
pub trait ChunkDecoder: Send {
    /// Decodes one frame. An `Err` aborts the stream; decoders that must never fail
    /// return an empty vector for frames they cannot interpret.
    fn decode(&mut self, frame: &StreamFrame) -> Result<Vec<StreamEvent>, LLMError>;
}

/// Wraps `stream` so that cancelling `token` ends it at the next poll.
///
/// The inner stream, and the HTTP body it owns, is dropped as soon as cancellation
/// is observed.
pub fn cancellable(stream: ChatStream, token: CancellationToken) -> ChatStream {
    let unfolded = futures_util::stream::unfold((stream, token), |(mut inner, token)| async move {
        if token.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => None,
            item = inner.next() => item.map(|item| (item, (inner, token))),
        }
    });
    Box::pin(unfolded.fuse())
}

/// Drains an error body into a string, for building diagnostics.
pub async fn collect_stream_text(
    mut body: HttpBodyStream,
    provider: &'static str,
) -> Result<String, LLMError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk?);
    }
    String::from_utf8(bytes).map_err(|err| {
        LLMError::decode(provider, format!("failed to decode stream error body: {err}"))
    })
}
