use serde_json::Value;

use crate::classify::embedded_error;
use crate::error::LLMError;
use crate::stream::{
    ChunkDecoder, StreamEvent, StreamFrame, finish_reason_from_str, invocation_metrics_usage,
};
use crate::types::{ToolCallDelta, Usage};

/// Decodes Messages API stream events.
///
/// Input tokens arrive in `message_start`, output tokens in `message_delta`; the
/// decoder remembers the former so the usage event carries both.
pub(crate) struct AnthropicChunkDecoder {
    provider: &'static str,
    input_tokens: u64,
}

impl AnthropicChunkDecoder {
    pub(crate) fn new(provider: &'static str) -> Self {
        Self {
            provider,
            input_tokens: 0,
        }
    }
}

impl ChunkDecoder for AnthropicChunkDecoder {
    fn decode(&mut self, frame: &StreamFrame) -> Result<Vec<StreamEvent>, LLMError> {
        let value: Value = serde_json::from_str(&frame.data).map_err(|err| {
            LLMError::decode(self.provider, format!("failed to parse stream event: {err}"))
        })?;
        if let Some(err) = embedded_error(self.provider, &value) {
            return Err(err);
        }
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .or(frame.event.as_deref())
            .unwrap_or_default();

        let mut events = Vec::new();
        match kind {
            "message_start" => {
                let message = value.get("message");
                if let Some(id) = message.and_then(|m| m.get("id")).and_then(Value::as_str) {
                    events.push(StreamEvent::ResponseId(id.to_string()));
                }
                if let Some(input) = message
                    .and_then(|m| m.pointer("/usage/input_tokens"))
                    .and_then(Value::as_u64)
                {
                    self.input_tokens = input;
                }
            }
            "content_block_start" => {
                let index = block_index(&value);
                if let Some(block) = value.get("content_block") {
                    match block.get("type").and_then(Value::as_str) {
                        Some("tool_use") => events.push(StreamEvent::ToolCall(ToolCallDelta {
                            index,
                            id: block.get("id").and_then(Value::as_str).map(str::to_string),
                            name: block.get("name").and_then(Value::as_str).map(str::to_string),
                            arguments: None,
                        })),
                        Some("text") => {
                            if let Some(text) = block.get("text").and_then(Value::as_str) {
                                events.push(StreamEvent::Text(text.to_string()));
                            }
                        }
                        _ => {}
                    }
                }
            }
            "content_block_delta" => {
                let index = block_index(&value);
                let delta = value.get("delta");
                match delta.and_then(|d| d.get("type")).and_then(Value::as_str) {
                    Some("text_delta") => {
                        if let Some(text) = delta.and_then(|d| d.get("text")).and_then(Value::as_str)
                        {
                            events.push(StreamEvent::Text(text.to_string()));
                        }
                    }
                    Some("input_json_delta") => {
                        let partial = delta
                            .and_then(|d| d.get("partial_json"))
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        events.push(StreamEvent::ToolCall(ToolCallDelta {
                            index,
                            id: None,
                            name: None,
                            arguments: Some(partial.to_string()),
                        }));
                    }
                    _ => {}
                }
            }
            "message_delta" => {
                if let Some(reason) = value.pointer("/delta/stop_reason").and_then(Value::as_str) {
                    events.push(StreamEvent::Finish(finish_reason_from_str(reason)));
                }
                if let Some(output) = value.pointer("/usage/output_tokens").and_then(Value::as_u64)
                {
                    events.push(StreamEvent::Usage(Usage::new(self.input_tokens, output)));
                }
            }
            "message_stop" => {
                if let Some(usage) = value
                    .get("amazon-bedrock-invocationMetrics")
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

fn block_index(value: &Value) -> usize {
    value
        .get("index")
        .and_then(Value::as_u64)
        .and_then(|i| usize::try_from(i).ok())
        .unwrap_or(0)
}
