use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use tracing::debug;

use crate::error::LLMError;
use crate::types::{ChatChunk, FinishReason};

use super::ChatStream;

/// Enforces the stream contract: ordered chunks ending in exactly one chunk that
/// carries a finish reason.
///
/// * the first finish-bearing chunk is held back until the inner stream ends, so
///   trailing usage can be merged into it. Decoded streams end at the vendor's
///   done signal, not at connection close;
/// * later finish reasons and content after the finish are dropped;
/// * a clean close without any finish yields a synthesized `stop` chunk;
/// * an error is forwarded and ends the stream.
pub fn finalize_stream(inner: ChatStream) -> ChatStream {
    Box::pin(Finalize {
        inner: Some(inner),
        held: None,
        last: None,
        done: false,
    })
}

struct Finalize {
    inner: Option<ChatStream>,
    held: Option<ChatChunk>,
    /// Identity of the last forwarded chunk, reused when synthesizing `stop`.
    last: Option<(String, i64, String)>,
    done: bool,
}

impl Finalize {
    fn absorb(&mut self, chunk: ChatChunk) -> Option<ChatChunk> {
        if let Some(held) = self.held.as_mut() {
            if let Some(usage) = chunk.usage {
                held.usage = Some(usage);
            }
            if chunk.finish_reason().is_some() || !chunk.text_delta().is_empty() {
                debug!(id = %chunk.id, "dropping chunk received after finish");
            }
            return None;
        }
        self.last = Some((chunk.id.clone(), chunk.created, chunk.model.clone()));
        if chunk.finish_reason().is_some() {
            self.held = Some(chunk);
            return None;
        }
        (!chunk.is_empty()).then_some(chunk)
    }

    fn terminal(&mut self) -> ChatChunk {
        if let Some(held) = self.held.take() {
            return held;
        }
        let (id, created, model) = self.last.take().unwrap_or_else(|| {
            (
                crate::provider::shared::new_chunk_id(),
                crate::provider::shared::now_unix(),
                String::new(),
            )
        });
        debug!(%id, "stream closed without finish reason; synthesizing stop");
        ChatChunk::finish(&id, created, &model, FinishReason::Stop)
    }
}

impl Stream for Finalize {
    type Item = Result<ChatChunk, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.done {
                return Poll::Ready(None);
            }
            let Some(inner) = this.inner.as_mut() else {
                this.done = true;
                return Poll::Ready(Some(Ok(this.terminal())));
            };
            match inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    if let Some(chunk) = this.absorb(chunk) {
                        return Poll::Ready(Some(Ok(chunk)));
                    }
                }
                Poll::Ready(Some(Err(err))) => {
                    this.inner = None;
                    this.done = true;
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    this.inner = None;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Usage;
    use futures_util::{StreamExt, stream};

    async fn run(chunks: Vec<Result<ChatChunk, LLMError>>) -> Vec<Result<ChatChunk, LLMError>> {
        finalize_stream(Box::pin(stream::iter(chunks))).collect().await
    }

    fn finishes(items: &[Result<ChatChunk, LLMError>]) -> usize {
        items
            .iter()
            .filter(|item| matches!(item, Ok(chunk) if chunk.finish_reason().is_some()))
            .count()
    }

    #[tokio::test]
    async fn truncated_stream_gets_synthesized_stop() {
        let items = run(vec![
            Ok(ChatChunk::text("r", 1, "m", "he")),
            Ok(ChatChunk::text("r", 1, "m", "llo")),
        ])
        .await;
        assert_eq!(items.len(), 3);
        assert_eq!(finishes(&items), 1);
        let last = items.last().expect("last").as_ref().expect("ok");
        assert_eq!(last.finish_reason(), Some(FinishReason::Stop));
        assert_eq!(last.id, "r");
        assert_eq!(last.model, "m");
    }

    #[tokio::test]
    async fn empty_stream_still_terminates() {
        let items = run(Vec::new()).await;
        assert_eq!(items.len(), 1);
        assert_eq!(finishes(&items), 1);
    }

    #[tokio::test]
    async fn duplicate_finish_is_dropped_and_usage_merged() {
        let mut usage_only = ChatChunk::text("r", 1, "m", "");
        usage_only.usage = Some(Usage::new(3, 2));
        let items = run(vec![
            Ok(ChatChunk::text("r", 1, "m", "hi")),
            Ok(ChatChunk::finish("r", 1, "m", FinishReason::Length)),
            Ok(ChatChunk::finish("r", 1, "m", FinishReason::Stop)),
            Ok(usage_only),
        ])
        .await;
        assert_eq!(items.len(), 2);
        let last = items[1].as_ref().expect("ok");
        assert_eq!(last.finish_reason(), Some(FinishReason::Length));
        assert_eq!(last.usage.map(|u| u.total_tokens), Some(5));
    }

    #[tokio::test]
    async fn error_ends_stream_without_synthesized_finish() {
        let items = run(vec![
            Ok(ChatChunk::text("r", 1, "m", "hi")),
            Err(LLMError::transport("test", "connection reset")),
            Ok(ChatChunk::text("r", 1, "m", "never")),
        ])
        .await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }
}
