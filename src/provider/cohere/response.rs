use crate::provider::shared::{new_chunk_id, new_id, now_unix, usage_or_estimate};
use crate::stream::finish_reason_from_str;
use crate::types::{
    ChatRequest, ChatResponse, Choice, Embedding, EmbeddingResponse, FinishReason, Message,
    ModelInfo, ProviderType, ToolCall, Usage,
};

use super::types::{CohereChatResponse, CohereEmbedResponse, CohereMeta, CohereModelList};

pub(crate) fn map_response(
    resp: CohereChatResponse,
    request: &ChatRequest,
    alias: &str,
) -> ChatResponse {
    let usage = usage_or_estimate(
        resp.meta.as_ref().and_then(convert_usage),
        ProviderType::Generic,
        request,
        &resp.text,
    );
    let mut message = Message::assistant(resp.text);
    message.tool_calls = resp
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| ToolCall {
            id: new_id("call"),
            name: call.name,
            arguments: if call.parameters.is_null() {
                "{}".to_string()
            } else {
                call.parameters.to_string()
            },
        })
        .collect();
    ChatResponse {
        id: resp
            .response_id
            .or(resp.generation_id)
            .unwrap_or_else(new_chunk_id),
        object: ChatResponse::OBJECT.to_string(),
        created: now_unix(),
        model: alias.to_string(),
        choices: vec![Choice {
            index: 0,
            message,
            finish_reason: resp
                .finish_reason
                .as_deref()
                .map(finish_reason_from_str)
                .unwrap_or(FinishReason::Stop),
        }],
        usage,
    }
}

/// Billed units first, raw token counts second.
pub(crate) fn convert_usage(meta: &CohereMeta) -> Option<Usage> {
    let counts = meta.billed_units.or(meta.tokens)?;
    let input = counts.input_tokens?;
    let output = counts.output_tokens.unwrap_or(0.0);
    Some(Usage::new(input.max(0.0) as u64, output.max(0.0) as u64))
}

pub(crate) fn map_embeddings(resp: CohereEmbedResponse, alias: &str) -> EmbeddingResponse {
    let usage = resp
        .meta
        .as_ref()
        .and_then(|meta| meta.billed_units.or(meta.tokens))
        .and_then(|counts| counts.input_tokens)
        .map(|input| Usage::new(input.max(0.0) as u64, 0))
        .unwrap_or_default();
    let data = resp
        .embeddings
        .into_floats()
        .into_iter()
        .enumerate()
        .map(|(index, values)| Embedding::new(index, values))
        .collect();
    EmbeddingResponse::new(alias, data, usage)
}

pub(crate) fn map_models(list: CohereModelList) -> Vec<ModelInfo> {
    list.models
        .into_iter()
        .map(|model| ModelInfo::new(model.name, "cohere"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::shared::parse_value;
    use serde_json::json;

    #[test]
    fn minimal_body_maps_to_stop() {
        let resp: CohereChatResponse = parse_value(
            "cohere",
            json!({"text": "hello", "finish_reason": "COMPLETE"}),
        )
        .expect("parse");
        let request = ChatRequest::new("command-r", vec![Message::user("hi")]);
        let mapped = map_response(resp, &request, "command-r");
        assert_eq!(mapped.first_text(), Some("hello"));
        assert_eq!(mapped.choices[0].finish_reason, FinishReason::Stop);
        assert!(mapped.usage.estimated);
    }

    #[test]
    fn billed_units_and_tool_calls() {
        let resp: CohereChatResponse = parse_value(
            "cohere",
            json!({
                "response_id": "r-1",
                "text": "",
                "finish_reason": "COMPLETE",
                "tool_calls": [{"name": "lookup", "parameters": {"q": "x"}}],
                "meta": {"billed_units": {"input_tokens": 11, "output_tokens": 4},
                         "tokens": {"input_tokens": 80, "output_tokens": 4}}
            }),
        )
        .expect("parse");
        let request = ChatRequest::new("command-r", vec![Message::user("find x")]);
        let mapped = map_response(resp, &request, "command-r");
        assert_eq!(mapped.id, "r-1");
        assert_eq!(mapped.usage, Usage::new(11, 4));
        assert_eq!(
            mapped.choices[0].message.tool_calls[0].arguments,
            r#"{"q":"x"}"#
        );
    }

    #[test]
    fn limits_and_toxicity() {
        assert_eq!(finish_reason_from_str("MAX_TOKENS"), FinishReason::Length);
        assert_eq!(
            finish_reason_from_str("ERROR_TOXIC"),
            FinishReason::ContentFilter
        );
    }

    #[test]
    fn embeddings_accept_both_shapes() {
        let typed: CohereEmbedResponse = parse_value(
            "cohere",
            json!({"embeddings": {"float": [[0.5, 0.25]]}, "meta": {"billed_units": {"input_tokens": 2}}}),
        )
        .expect("typed");
        let mapped = map_embeddings(typed, "embed");
        assert_eq!(mapped.data[0].embedding, vec![0.5, 0.25]);
        assert_eq!(mapped.usage.prompt_tokens, 2);

        let bare: CohereEmbedResponse =
            parse_value("cohere", json!({"embeddings": [[1.0], [2.0]]})).expect("bare");
        assert_eq!(map_embeddings(bare, "embed").data.len(), 2);
    }
}
