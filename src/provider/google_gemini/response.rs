use serde_json::Value;

use crate::provider::shared::{new_chunk_id, new_id, now_unix, usage_or_estimate};
use crate::stream::finish_reason_from_str;
use crate::types::{
    ChatRequest, ChatResponse, Choice, Embedding, EmbeddingResponse, FinishReason, ImageData,
    ImageResponse, ImageResponseFormat, Message, ModelInfo, ProviderType, ToolCall, Usage,
};

use super::types::{
    GeminiBatchEmbedResponse, GeminiCandidate, GeminiGenerateContentResponse, GeminiModelList,
    GeminiPart, GeminiPredictResponse, GeminiUsageMetadata,
};

pub(crate) fn map_response(
    resp: GeminiGenerateContentResponse,
    request: &ChatRequest,
    alias: &str,
) -> ChatResponse {
    let blocked = resp
        .prompt_feedback
        .as_ref()
        .and_then(|feedback| feedback.block_reason.as_ref())
        .is_some();

    let mut choices: Vec<Choice> = resp
        .candidates
        .into_iter()
        .enumerate()
        .map(|(position, candidate)| convert_candidate(position, candidate))
        .collect();
    if choices.is_empty() {
        choices.push(Choice {
            index: 0,
            message: Message::assistant(""),
            finish_reason: if blocked {
                FinishReason::ContentFilter
            } else {
                FinishReason::Unknown
            },
        });
    }

    let completion: String = choices
        .iter()
        .map(|choice| choice.message.content.as_str())
        .collect();
    let usage = usage_or_estimate(
        resp.usage_metadata.and_then(convert_usage),
        ProviderType::GoogleGemini,
        request,
        &completion,
    );
    ChatResponse {
        id: resp.response_id.unwrap_or_else(new_chunk_id),
        object: ChatResponse::OBJECT.to_string(),
        created: now_unix(),
        model: alias.to_string(),
        choices,
        usage,
    }
}

fn convert_candidate(position: usize, candidate: GeminiCandidate) -> Choice {
    let (text, tool_calls) = candidate
        .content
        .map(|content| split_parts(content.parts))
        .unwrap_or_default();
    let mut message = Message::assistant(text);
    message.tool_calls = tool_calls;
    Choice {
        index: candidate.index.unwrap_or(position),
        message,
        finish_reason: candidate
            .finish_reason
            .as_deref()
            .map(convert_finish_reason)
            .unwrap_or(FinishReason::Stop),
    }
}

/// Answer text and function calls; thought summaries are dropped.
pub(crate) fn split_parts(parts: Vec<GeminiPart>) -> (String, Vec<ToolCall>) {
    let mut text = String::new();
    let mut calls = Vec::new();
    for part in parts {
        if part.thought.unwrap_or(false) {
            continue;
        }
        if let Some(chunk) = part.text {
            text.push_str(&chunk);
        }
        if let Some(call) = part.function_call {
            calls.push(ToolCall {
                id: new_id("call"),
                name: call.name,
                arguments: match call.args {
                    Value::Null => "{}".to_string(),
                    args => args.to_string(),
                },
            });
        }
    }
    (text, calls)
}

pub(crate) fn convert_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" | "IMAGE_SAFETY" => {
            FinishReason::ContentFilter
        }
        "MALFORMED_FUNCTION_CALL" => FinishReason::Error,
        other => finish_reason_from_str(other),
    }
}

/// Thinking tokens are billed as output.
pub(crate) fn convert_usage(usage: GeminiUsageMetadata) -> Option<Usage> {
    let prompt = usage.prompt_token_count?;
    let completion = usage.candidates_token_count.unwrap_or(0)
        + usage.thoughts_token_count.unwrap_or(0);
    Some(Usage::new(prompt, completion))
}

pub(crate) fn map_embeddings(resp: GeminiBatchEmbedResponse, alias: &str) -> EmbeddingResponse {
    let data = resp
        .embeddings
        .into_iter()
        .enumerate()
        .map(|(index, item)| Embedding::new(index, item.values))
        .collect();
    EmbeddingResponse::new(alias, data, Usage::default())
}

/// Imagen only returns inline bytes; a `url` request gets a data URI.
pub(crate) fn map_images(resp: GeminiPredictResponse, format: ImageResponseFormat) -> ImageResponse {
    let data = resp
        .predictions
        .into_iter()
        .filter(|prediction| prediction.rai_filtered_reason.is_none())
        .filter_map(|prediction| {
            let bytes = prediction.bytes_base64_encoded?;
            Some(match format {
                ImageResponseFormat::B64Json => ImageData {
                    b64_json: Some(bytes),
                    ..ImageData::default()
                },
                ImageResponseFormat::Url => {
                    let mime = prediction.mime_type.as_deref().unwrap_or("image/png");
                    ImageData {
                        url: Some(format!("data:{mime};base64,{bytes}")),
                        b64_json: Some(bytes),
                        ..ImageData::default()
                    }
                }
            })
        })
        .collect();
    ImageResponse {
        created: now_unix(),
        data,
    }
}

pub(crate) fn map_models(list: GeminiModelList) -> Vec<ModelInfo> {
    list.models
        .into_iter()
        .map(|model| {
            let id = model
                .name
                .strip_prefix("models/")
                .map(str::to_string)
                .unwrap_or(model.name);
            ModelInfo::new(id, "google")
        })
        .collect()
}
