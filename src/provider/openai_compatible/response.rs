use serde_json::Value;

use crate::provider::shared::{new_chunk_id, now_unix, usage_or_estimate};
use crate::stream::finish_reason_from_str;
use crate::types::{
    ChatRequest, ChatResponse, Choice, Embedding, EmbeddingResponse, FinishReason, ImageData,
    ImageResponse, Message, ModelInfo, ProviderType, ToolCall, Usage,
};

use super::types::{
    OpenAiChatResponse, OpenAiEmbeddingResponse, OpenAiImageResponse, OpenAiModelList,
    OpenAiResponseMessage, OpenAiToolCallResponse, OpenAiUsage,
};

pub(crate) fn map_response(
    resp: OpenAiChatResponse,
    request: &ChatRequest,
    alias: &str,
) -> ChatResponse {
    let choices: Vec<Choice> = resp
        .choices
        .into_iter()
        .map(|choice| Choice {
            index: choice.index,
            message: choice
                .message
                .map(convert_response_message)
                .unwrap_or_else(|| Message::assistant("")),
            finish_reason: choice
                .finish_reason
                .as_deref()
                .map(convert_finish_reason)
                .unwrap_or(FinishReason::Stop),
        })
        .collect();
    let completion: String = choices
        .iter()
        .map(|choice| choice.message.content.as_str())
        .collect();
    let usage = usage_or_estimate(
        resp.usage.and_then(convert_usage),
        ProviderType::OpenAI,
        request,
        &completion,
    );
    ChatResponse {
        id: if resp.id.is_empty() {
            new_chunk_id()
        } else {
            resp.id
        },
        object: ChatResponse::OBJECT.to_string(),
        created: resp.created.unwrap_or_else(now_unix),
        model: alias.to_string(),
        choices,
        usage,
    }
}

fn convert_response_message(message: OpenAiResponseMessage) -> Message {
    let mut converted = Message::assistant(
        message
            .content
            .map(|content| content.into_text())
            .unwrap_or_default(),
    );
    converted.name = message.name;
    converted.tool_calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(convert_tool_call_response)
        .collect();
    converted
}

fn convert_tool_call_response(call: OpenAiToolCallResponse) -> ToolCall {
    let (name, arguments) = match call.function {
        Some(function) => (
            function.name.unwrap_or_default(),
            match function.arguments {
                Some(Value::String(raw)) => raw,
                Some(other) => other.to_string(),
                None => "{}".to_string(),
            },
        ),
        None => (String::new(), "{}".to_string()),
    };
    ToolCall {
        id: call.id.unwrap_or_else(|| crate::provider::shared::new_id("call")),
        name,
        arguments,
    }
}

/// Maps OpenAI finish strings; `tool_calls` and `function_call` count as `stop`.
pub(crate) fn convert_finish_reason(reason: &str) -> FinishReason {
    finish_reason_from_str(reason)
}

/// `None` when the vendor sent an empty usage object.
pub(crate) fn convert_usage(usage: OpenAiUsage) -> Option<Usage> {
    let prompt = usage.prompt_tokens?;
    let completion = usage
        .completion_tokens
        .unwrap_or_else(|| usage.total_tokens.unwrap_or(prompt).saturating_sub(prompt));
    Some(Usage::new(prompt, completion))
}

pub(crate) fn map_embeddings(resp: OpenAiEmbeddingResponse, alias: &str) -> EmbeddingResponse {
    let data = resp
        .data
        .into_iter()
        .enumerate()
        .map(|(position, item)| Embedding::new(item.index.unwrap_or(position), item.embedding))
        .collect();
    let usage = resp
        .usage
        .and_then(|usage| usage.prompt_tokens.or(usage.total_tokens))
        .map(|prompt| Usage::new(prompt, 0))
        .unwrap_or_default();
    EmbeddingResponse::new(alias, data, usage)
}

pub(crate) fn map_images(resp: OpenAiImageResponse) -> ImageResponse {
    ImageResponse {
        created: resp.created.unwrap_or_else(now_unix),
        data: resp
            .data
            .into_iter()
            .map(|item| ImageData {
                url: item.url,
                b64_json: item.b64_json,
                revised_prompt: item.revised_prompt,
            })
            .collect(),
    }
}

pub(crate) fn map_models(list: OpenAiModelList, owner: &str) -> Vec<ModelInfo> {
    list.data
        .into_iter()
        .map(|model| {
            let mut info = ModelInfo::new(
                model.id,
                model.owned_by.unwrap_or_else(|| owner.to_string()),
            );
            info.created = model.created;
            info
        })
        .collect()
}
