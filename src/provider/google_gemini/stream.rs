use serde_json::Value;

use crate::classify::embedded_error;
use crate::error::LLMError;
use crate::provider::shared::new_id;
use crate::stream::{ChunkDecoder, StreamEvent, StreamFrame};
use crate::types::{FinishReason, ToolCallDelta};

use super::response::{convert_finish_reason, convert_usage};
use super::types::GeminiGenerateContentResponse;

/// Decodes `streamGenerateContent?alt=sse` frames.
///
/// Each frame is a complete GenerateContentResponse holding only the new text.
/// Function calls arrive whole, so each becomes one tool-call delta with a fresh
/// index.
pub(crate) struct GeminiChunkDecoder {
    provider: &'static str,
    next_tool_index: usize,
}

impl GeminiChunkDecoder {
    pub(crate) fn new(provider: &'static str) -> Self {
        Self {
            provider,
            next_tool_index: 0,
        }
    }
}

impl ChunkDecoder for GeminiChunkDecoder {
    fn decode(&mut self, frame: &StreamFrame) -> Result<Vec<StreamEvent>, LLMError> {
        let value: Value = serde_json::from_str(&frame.data).map_err(|err| {
            LLMError::decode(self.provider, format!("failed to parse stream chunk: {err}"))
        })?;
        if let Some(err) = embedded_error(self.provider, &value) {
            return Err(err);
        }
        let chunk: GeminiGenerateContentResponse = serde_json::from_value(value).map_err(|err| {
            LLMError::decode(self.provider, format!("unexpected stream chunk shape: {err}"))
        })?;

        let mut events = Vec::new();
        if let Some(id) = chunk.response_id {
            events.push(StreamEvent::ResponseId(id));
        }

        let mut finished = false;
        if let Some(candidate) = chunk.candidates.into_iter().next() {
            for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
                if part.thought.unwrap_or(false) {
                    continue;
                }
                if let Some(text) = part.text.filter(|text| !text.is_empty()) {
                    events.push(StreamEvent::Text(text));
                }
                if let Some(call) = part.function_call {
                    let arguments = match call.args {
                        Value::Null => "{}".to_string(),
                        args => args.to_string(),
                    };
                    events.push(StreamEvent::ToolCall(ToolCallDelta {
                        index: self.next_tool_index,
                        id: Some(new_id("call")),
                        name: Some(call.name),
                        arguments: Some(arguments),
                    }));
                    self.next_tool_index += 1;
                }
            }
            if let Some(reason) = candidate.finish_reason.as_deref() {
                events.push(StreamEvent::Finish(convert_finish_reason(reason)));
                finished = true;
            }
        } else if chunk
            .prompt_feedback
            .and_then(|feedback| feedback.block_reason)
            .is_some()
        {
            events.push(StreamEvent::Finish(FinishReason::ContentFilter));
            finished = true;
        }

        // Intermediate frames carry running totals; only the final one counts.
        if finished {
            if let Some(usage) = chunk.usage_metadata.and_then(convert_usage) {
                events.push(StreamEvent::Usage(usage));
            }
        }
        Ok(events)
    }
}
