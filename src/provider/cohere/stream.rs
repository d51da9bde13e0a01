use serde_json::Value;

use crate::classify::embedded_error;
use crate::error::LLMError;
use crate::provider::shared::new_id;
use crate::stream::{
    BEDROCK_METRICS, ChunkDecoder, StreamEvent, StreamFrame, finish_reason_from_str,
    invocation_metrics_usage,
};
use crate::types::{FinishReason, ToolCallDelta};

use super::response::convert_usage;
use super::types::CohereMeta;

/// Decodes Cohere v1 stream events (`event_type` tagged NDJSON lines).
///
/// `stream-end` repeats the whole generation in `response.text`; only its finish
/// reason and usage are forwarded, and it ends the stream.
pub(crate) struct CohereChunkDecoder {
    provider: &'static str,
    next_tool_index: usize,
}

impl CohereChunkDecoder {
    pub(crate) fn new(provider: &'static str) -> Self {
        Self {
            provider,
            next_tool_index: 0,
        }
    }
}

impl ChunkDecoder for CohereChunkDecoder {
    fn decode(&mut self, frame: &StreamFrame) -> Result<Vec<StreamEvent>, LLMError> {
        let value: Value = serde_json::from_str(&frame.data).map_err(|err| {
            LLMError::decode(self.provider, format!("failed to parse stream line: {err}"))
        })?;
        if let Some(err) = embedded_error(self.provider, &value) {
            return Err(err);
        }
        let kind = value
            .get("event_type")
            .and_then(Value::as_str)
            .or(frame.event.as_deref())
            .unwrap_or_default();

        let mut events = Vec::new();
        match kind {
            "stream-start" => {
                if let Some(id) = value.get("generation_id").and_then(Value::as_str) {
                    events.push(StreamEvent::ResponseId(id.to_string()));
                }
            }
            "text-generation" => {
                if let Some(text) = value.get("text").and_then(Value::as_str) {
                    events.push(StreamEvent::Text(text.to_string()));
                }
            }
            "tool-calls-generation" => {
                let calls = value
                    .get("tool_calls")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                for call in calls {
                    let arguments = call
                        .get("parameters")
                        .filter(|p| !p.is_null())
                        .map(Value::to_string)
                        .unwrap_or_else(|| "{}".to_string());
                    events.push(StreamEvent::ToolCall(ToolCallDelta {
                        index: self.next_tool_index,
                        id: Some(new_id("call")),
                        name: call.get("name").and_then(Value::as_str).map(str::to_string),
                        arguments: Some(arguments),
                    }));
                    self.next_tool_index += 1;
                }
            }
            "stream-end" => {
                let reason = value
                    .get("finish_reason")
                    .or_else(|| value.pointer("/response/finish_reason"))
                    .and_then(Value::as_str)
                    .map(finish_reason_from_str)
                    .unwrap_or(FinishReason::Stop);
                events.push(StreamEvent::Finish(reason));
                if let Some(usage) = value
                    .pointer("/response/meta")
                    .and_then(|meta| serde_json::from_value::<CohereMeta>(meta.clone()).ok())
                    .as_ref()
                    .and_then(convert_usage)
                {
                    events.push(StreamEvent::Usage(usage));
                }
                if let Some(usage) = value
                    .get(BEDROCK_METRICS)
                    .and_then(invocation_metrics_usage)
                {
                    events.push(StreamEvent::Usage(usage));
                }
                events.push(StreamEvent::Done);
            }
            _ => {}
        }
        Ok(events)
    }
}
