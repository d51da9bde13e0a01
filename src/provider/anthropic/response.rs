use chrono::DateTime;

use crate::provider::shared::{new_chunk_id, new_id, now_unix, usage_or_estimate};
use crate::stream::finish_reason_from_str;
use crate::types::{
    ChatRequest, ChatResponse, Choice, FinishReason, Message, ModelInfo, ProviderType, ToolCall,
    Usage,
};

use super::types::{AnthropicMessageResponse, AnthropicModelList, AnthropicUsage};

pub(crate) fn map_response(
    resp: AnthropicMessageResponse,
    request: &ChatRequest,
    alias: &str,
) -> ChatResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in resp.content {
        match block.kind.as_str() {
            "text" => text.push_str(block.text.as_deref().unwrap_or_default()),
            "tool_use" => tool_calls.push(ToolCall {
                id: block.id.unwrap_or_else(|| new_id("toolu")),
                name: block.name.unwrap_or_default(),
                arguments: block
                    .input
                    .map(|input| input.to_string())
                    .unwrap_or_else(|| "{}".to_string()),
            }),
            _ => {}
        }
    }
    let usage = usage_or_estimate(
        resp.usage.and_then(convert_usage),
        ProviderType::Anthropic,
        request,
        &text,
    );
    let mut message = Message::assistant(text);
    message.tool_calls = tool_calls;
    ChatResponse {
        id: resp.id.unwrap_or_else(new_chunk_id),
        object: ChatResponse::OBJECT.to_string(),
        created: now_unix(),
        model: alias.to_string(),
        choices: vec![Choice {
            index: 0,
            message,
            finish_reason: resp
                .stop_reason
                .as_deref()
                .map(finish_reason_from_str)
                .unwrap_or(FinishReason::Stop),
        }],
        usage,
    }
}

pub(crate) fn convert_usage(usage: AnthropicUsage) -> Option<Usage> {
    match (usage.input_tokens, usage.output_tokens) {
        (None, None) => None,
        (input, output) => Some(Usage::new(input.unwrap_or(0), output.unwrap_or(0))),
    }
}

pub(crate) fn map_models(list: AnthropicModelList) -> Vec<ModelInfo> {
    list.data
        .into_iter()
        .map(|model| {
            let mut info = ModelInfo::new(model.id, "anthropic");
            info.created = model
                .created_at
                .as_deref()
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|at| at.timestamp());
            info
        })
        .collect()
}
