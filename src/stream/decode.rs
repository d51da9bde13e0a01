use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use tracing::debug;

use crate::error::LLMError;
use crate::http::HttpBodyStream;
use crate::types::{ChatChunk, ChunkChoice, Delta, Role};

use super::{ChatStream, ChunkDecoder, FrameParser, StreamEvent, StreamFrame, finalize_stream};

/// Identity stamped on every chunk of one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkContext {
    pub id: String,
    pub created: i64,
    /// Caller-visible model alias.
    pub model: String,
}

impl ChunkContext {
    pub fn new(id: impl Into<String>, created: i64, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created,
            model: model.into(),
        }
    }

    /// Folds the events decoded from one frame into a single chunk.
    ///
    /// Returns `None` when the frame carried nothing a consumer would see.
    pub fn build_chunk(&mut self, events: Vec<StreamEvent>) -> Option<ChatChunk> {
        let mut content: Option<String> = None;
        let mut tool_calls = Vec::new();
        let mut finish_reason = None;
        let mut usage = None;

        for event in events {
            match event {
                StreamEvent::ResponseId(id) => self.id = id,
                StreamEvent::Text(text) => {
                    if !text.is_empty() {
                        content.get_or_insert_with(String::new).push_str(&text);
                    }
                }
                StreamEvent::ToolCall(call) => tool_calls.push(call),
                StreamEvent::Finish(reason) => {
                    finish_reason.get_or_insert(reason);
                }
                StreamEvent::Usage(value) => usage = Some(value),
                StreamEvent::Done => {}
            }
        }

        let chunk = ChatChunk {
            id: self.id.clone(),
            object: ChatChunk::OBJECT.to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta {
                    role: (content.is_some() || !tool_calls.is_empty()).then_some(Role::Assistant),
                    content,
                    tool_calls,
                },
                finish_reason,
            }],
            usage,
        };
        (!chunk.is_empty()).then_some(chunk)
    }
}

/// Drives a [`FrameParser`] and a [`ChunkDecoder`] over an HTTP body.
///
/// Chunks come out in transport order, one per frame that produced content. The
/// stream ends after the body closes, after a `[DONE]` sentinel, or after a
/// decoder emits [`StreamEvent::Done`].
pub struct DecodedStream<P, D> {
    body: Option<HttpBodyStream>,
    parser: P,
    decoder: D,
    context: ChunkContext,
    provider: &'static str,
    pending: VecDeque<Result<ChatChunk, LLMError>>,
    finished: bool,
}

impl<P: FrameParser, D: ChunkDecoder> DecodedStream<P, D> {
    pub fn new(
        body: HttpBodyStream,
        parser: P,
        decoder: D,
        context: ChunkContext,
        provider: &'static str,
    ) -> Self {
        Self {
            body: Some(body),
            parser,
            decoder,
            context,
            provider,
            pending: VecDeque::new(),
            finished: false,
        }
    }

    fn handle_frames(&mut self, frames: Vec<StreamFrame>) {
        for frame in frames {
            if self.finished {
                return;
            }
            if frame.is_done_sentinel() {
                self.close();
                return;
            }
            match self.decoder.decode(&frame) {
                Ok(events) => {
                    let done = events.iter().any(|event| matches!(event, StreamEvent::Done));
                    if let Some(chunk) = self.context.build_chunk(events) {
                        self.pending.push_back(Ok(chunk));
                    }
                    if done {
                        self.close();
                    }
                }
                Err(err) => {
                    self.pending.push_back(Err(err));
                    self.close();
                }
            }
        }
    }

    /// Stops reading and releases the HTTP body.
    fn close(&mut self) {
        if !self.finished {
            debug!(provider = self.provider, "stream closed");
        }
        self.finished = true;
        self.body = None;
    }
}

impl<P: FrameParser + Unpin, D: ChunkDecoder + Unpin> Stream for DecodedStream<P, D> {
    type Item = Result<ChatChunk, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(item) = this.pending.pop_front() {
                return Poll::Ready(Some(item));
            }
            if this.finished {
                return Poll::Ready(None);
            }
            let Some(body) = this.body.as_mut() else {
                this.finished = true;
                continue;
            };
            match body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => match this.parser.push(&bytes) {
                    Ok(frames) => this.handle_frames(frames),
                    Err(err) => {
                        this.pending.push_back(Err(err));
                        this.close();
                    }
                },
                Poll::Ready(Some(Err(err))) => {
                    this.pending.push_back(Err(err));
                    this.close();
                }
                Poll::Ready(None) => {
                    this.body = None;
                    match this.parser.finish() {
                        Ok(frames) => this.handle_frames(frames),
                        Err(err) => this.pending.push_back(Err(err)),
                    }
                    this.close();
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Builds the finalized canonical stream for a vendor body.
pub fn decode_stream<P, D>(
    body: HttpBodyStream,
    parser: P,
    decoder: D,
    context: ChunkContext,
    provider: &'static str,
) -> ChatStream
where
    P: FrameParser + Unpin + 'static,
    D: ChunkDecoder + Unpin + 'static,
{
    finalize_stream(Box::pin(DecodedStream::new(
        body, parser, decoder, context, provider,
    )))
}
