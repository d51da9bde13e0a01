use serde_json::Value;

use crate::error::LLMError;
use crate::stream::{
    BEDROCK_METRICS, ChunkDecoder, StreamEvent, StreamFrame, finish_reason_from_str,
    invocation_metrics_usage,
};
use crate::types::Usage;

/// Decodes Titan Text chunks (`outputText`, `completionReason`).
#[derive(Debug, Default)]
pub(crate) struct TitanChunkDecoder;

impl ChunkDecoder for TitanChunkDecoder {
    fn decode(&mut self, frame: &StreamFrame) -> Result<Vec<StreamEvent>, LLMError> {
        let Ok(value) = serde_json::from_str::<Value>(&frame.data) else {
            return Ok(Vec::new());
        };
        let mut events = Vec::new();
        if let Some(text) = value.get("outputText").and_then(Value::as_str) {
            events.push(StreamEvent::Text(text.to_string()));
        }
        if let Some(reason) = value.get("completionReason").and_then(Value::as_str) {
            events.push(StreamEvent::Finish(finish_reason_from_str(reason)));
        }
        let usage = value
            .get(BEDROCK_METRICS)
            .and_then(invocation_metrics_usage)
            .or_else(|| {
                let input = value.get("inputTextTokenCount").and_then(Value::as_u64)?;
                let output = value
                    .get("totalOutputTextTokenCount")
                    .and_then(Value::as_u64)?;
                value
                    .get("completionReason")
                    .filter(|reason| !reason.is_null())
                    .map(|_| Usage::new(input, output))
            });
        if let Some(usage) = usage {
            events.push(StreamEvent::Usage(usage));
        }
        if value.get(BEDROCK_METRICS).is_some() {
            events.push(StreamEvent::Done);
        }
        Ok(events)
    }
}

/// Decodes Mistral chunks (`outputs[0].text`, `outputs[0].stop_reason`).
#[derive(Debug, Default)]
pub(crate) struct MistralChunkDecoder;

impl ChunkDecoder for MistralChunkDecoder {
    fn decode(&mut self, frame: &StreamFrame) -> Result<Vec<StreamEvent>, LLMError> {
        let Ok(value) = serde_json::from_str::<Value>(&frame.data) else {
            return Ok(Vec::new());
        };
        let mut events = Vec::new();
        if let Some(output) = value.pointer("/outputs/0") {
            if let Some(text) = output.get("text").and_then(Value::as_str) {
                events.push(StreamEvent::Text(text.to_string()));
            }
            if let Some(reason) = output.get("stop_reason").and_then(Value::as_str) {
                events.push(StreamEvent::Finish(finish_reason_from_str(reason)));
            }
        }
        if let Some(usage) = value
            .get(BEDROCK_METRICS)
            .and_then(invocation_metrics_usage)
        {
            events.push(StreamEvent::Usage(usage));
        }
        if value.get(BEDROCK_METRICS).is_some() {
            events.push(StreamEvent::Done);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FinishReason;

    #[test]
    fn titan_final_chunk_carries_finish_and_usage() {
        let mut decoder = TitanChunkDecoder;
        let events = decoder
            .decode(&StreamFrame::data(
                r#"{"outputText":" world","index":0,"totalOutputTextTokenCount":2,"completionReason":"FINISH","inputTextTokenCount":5}"#,
            ))
            .expect("events");
        assert_eq!(
            events,
            vec![
                StreamEvent::Text(" world".into()),
                StreamEvent::Finish(FinishReason::Stop),
                StreamEvent::Usage(Usage::new(5, 2)),
            ]
        );

        let partial = decoder
            .decode(&StreamFrame::data(
                r#"{"outputText":"Hello","index":0,"totalOutputTextTokenCount":1,"completionReason":null,"inputTextTokenCount":5}"#,
            ))
            .expect("events");
        assert_eq!(partial, vec![StreamEvent::Text("Hello".into())]);
    }

    #[test]
    fn mistral_chunks_and_metrics() {
        let mut decoder = MistralChunkDecoder;
        let events = decoder
            .decode(&StreamFrame::data(
                r#"{"outputs":[{"text":"!","stop_reason":"stop"}],"amazon-bedrock-invocationMetrics":{"inputTokenCount":7,"outputTokenCount":3}}"#,
            ))
            .expect("events");
        assert_eq!(events.len(), 4);
        assert_eq!(events[2], StreamEvent::Usage(Usage::new(7, 3)));
        assert_eq!(events[3], StreamEvent::Done);
    }
}
