use serde_json::Value;

use crate::classify::embedded_error;
use crate::error::LLMError;
use crate::stream::{ChunkDecoder, StreamEvent, StreamFrame};
use crate::types::ToolCallDelta;

use super::response::{convert_finish_reason, convert_usage};
use super::types::OpenAiStreamChunk;

/// Decodes `chat.completion.chunk` SSE payloads.
pub(crate) struct OpenAiChunkDecoder {
    provider: &'static str,
}

impl OpenAiChunkDecoder {
    pub(crate) fn new(provider: &'static str) -> Self {
        Self { provider }
    }
}

impl ChunkDecoder for OpenAiChunkDecoder {
    fn decode(&mut self, frame: &StreamFrame) -> Result<Vec<StreamEvent>, LLMError> {
        let value: Value = serde_json::from_str(&frame.data).map_err(|err| {
            LLMError::decode(self.provider, format!("failed to parse stream chunk: {err}"))
        })?;
        if let Some(err) = embedded_error(self.provider, &value) {
            return Err(err);
        }
        let chunk: OpenAiStreamChunk = serde_json::from_value(value).map_err(|err| {
            LLMError::decode(self.provider, format!("unexpected stream chunk: {err}"))
        })?;

        let mut events = Vec::new();
        if let Some(id) = chunk.id.filter(|id| !id.is_empty()) {
            events.push(StreamEvent::ResponseId(id));
        }
        for choice in chunk.choices {
            if let Some(delta) = choice.delta {
                if let Some(content) = delta.content {
                    events.push(StreamEvent::Text(content.into_text()));
                }
                for (position, call) in delta.tool_calls.unwrap_or_default().into_iter().enumerate()
                {
                    let function = call.function;
                    events.push(StreamEvent::ToolCall(ToolCallDelta {
                        index: call.index.unwrap_or(position),
                        id: call.id,
                        name: function.as_ref().and_then(|f| f.name.clone()),
                        arguments: function.and_then(|f| f.arguments),
                    }));
                }
            }
            if let Some(reason) = choice.finish_reason.as_deref() {
                events.push(StreamEvent::Finish(convert_finish_reason(reason)));
            }
        }
        if let Some(usage) = chunk.usage.and_then(convert_usage) {
            events.push(StreamEvent::Usage(usage));
        }
        Ok(events)
    }
}
