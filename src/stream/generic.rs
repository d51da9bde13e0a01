use serde_json::Value;

use crate::error::LLMError;
use crate::types::{FinishReason, Usage};

use super::{ChunkDecoder, StreamEvent, StreamFrame};

const TEXT_FIELDS: [&str; 3] = ["text", "content", "generation"];
const FINISH_FIELDS: [&str; 2] = ["finish_reason", "stop_reason"];

/// Best-effort decoder for unrecognized model families.
///
/// Probes `text`, `content`, `generation` for text and `finish_reason`,
/// `stop_reason` for completion. Never fails: a frame that is not a JSON object,
/// or that holds none of the probed fields, produces no events.
#[derive(Debug, Default)]
pub struct GenericChunkDecoder;

impl ChunkDecoder for GenericChunkDecoder {
    fn decode(&mut self, frame: &StreamFrame) -> Result<Vec<StreamEvent>, LLMError> {
        let Ok(Value::Object(object)) = serde_json::from_str::<Value>(&frame.data) else {
            return Ok(Vec::new());
        };

        let mut events = Vec::new();
        if let Some(text) = TEXT_FIELDS
            .iter()
            .find_map(|field| object.get(*field).and_then(Value::as_str))
        {
            events.push(StreamEvent::Text(text.to_string()));
        }
        if let Some(reason) = FINISH_FIELDS
            .iter()
            .find_map(|field| object.get(*field).and_then(Value::as_str))
        {
            events.push(StreamEvent::Finish(finish_reason_from_str(reason)));
        }
        if let Some(usage) = object
            .get(BEDROCK_METRICS)
            .and_then(invocation_metrics_usage)
        {
            events.push(StreamEvent::Usage(usage));
        }
        if object.contains_key(BEDROCK_METRICS) {
            events.push(StreamEvent::Done);
        }
        Ok(events)
    }
}

/// Maps a vendor finish string onto the fixed vocabulary.
///
/// Covers the spellings shared across vendors; anything else is `unknown`.
pub fn finish_reason_from_str(raw: &str) -> FinishReason {
    match raw.to_ascii_lowercase().as_str() {
        "stop" | "end_turn" | "stop_sequence" | "complete" | "finish" | "eos" | "eos_token"
        | "end" | "tool_use" | "tool_calls" | "function_call" | "tool_call" => FinishReason::Stop,
        "length" | "max_tokens" | "max_length" | "model_length" => FinishReason::Length,
        "content_filter" | "content_filtered" | "safety" | "error_toxic" | "guardrail_intervened" => {
            FinishReason::ContentFilter
        }
        "error" | "error_limit" => FinishReason::Error,
        _ => FinishReason::Unknown,
    }
}

/// Bedrock attaches this object to the last chunk of a response stream only.
pub(crate) const BEDROCK_METRICS: &str = "amazon-bedrock-invocationMetrics";

/// Usage from Bedrock's trailing `amazon-bedrock-invocationMetrics` object.
pub(crate) fn invocation_metrics_usage(metrics: &Value) -> Option<Usage> {
    let input = metrics.get("inputTokenCount").and_then(Value::as_u64)?;
    let output = metrics.get("outputTokenCount").and_then(Value::as_u64)?;
    Some(Usage::new(input, output))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(data: &str) -> Vec<StreamEvent> {
        GenericChunkDecoder
            .decode(&StreamFrame::data(data))
            .expect("generic decoder never fails")
    }

    #[test]
    fn reads_common_fields() {
        assert_eq!(decode(r#"{"generation":"hi"}"#), vec![StreamEvent::Text("hi".into())]);
        assert_eq!(
            decode(r#"{"text":"a","content":"b","stop_reason":"max_tokens"}"#),
            vec![
                StreamEvent::Text("a".into()),
                StreamEvent::Finish(FinishReason::Length)
            ]
        );
    }

    #[test]
    fn malformed_input_produces_nothing() {
        assert!(decode("not json").is_empty());
        assert!(decode("[1,2,3]").is_empty());
        assert!(decode(r#"{"text":42}"#).is_empty());
        assert!(decode("").is_empty());
    }

    #[test]
    fn bedrock_metrics_become_usage() {
        let events = decode(
            r#"{"amazon-bedrock-invocationMetrics":{"inputTokenCount":4,"outputTokenCount":6}}"#,
        );
        assert_eq!(
            events,
            vec![StreamEvent::Usage(Usage::new(4, 6)), StreamEvent::Done]
        );
    }

    #[test]
    fn finish_vocabulary_is_closed() {
        assert_eq!(finish_reason_from_str("COMPLETE"), FinishReason::Stop);
        assert_eq!(finish_reason_from_str("SAFETY"), FinishReason::ContentFilter);
        assert_eq!(finish_reason_from_str("something-new"), FinishReason::Unknown);
    }

    #[test]
    fn legacy_cohere_chunks() {
        let mut decoder = GenericChunkDecoder;
        let text = decoder
            .decode(&StreamFrame::data(r#"{"text":" Hi","is_finished":false}"#))
            .expect("text");
        assert_eq!(text, vec![StreamEvent::Text(" Hi".into())]);

        let end = decoder
            .decode(&StreamFrame::data(
                r#"{"is_finished":true,"finish_reason":"COMPLETE","amazon-bedrock-invocationMetrics":{"inputTokenCount":2,"outputTokenCount":1}}"#,
            ))
            .expect("end");
        assert_eq!(
            end,
            vec![
                StreamEvent::Finish(FinishReason::Stop),
                StreamEvent::Usage(Usage::new(2, 1)),
                StreamEvent::Done,
            ]
        );
    }
}
