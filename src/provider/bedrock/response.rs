use serde_json::Value;

use crate::error::LLMError;
use crate::provider::anthropic;
use crate::provider::cohere;
use crate::provider::shared::{new_chunk_id, now_unix, parse_value, usage_or_estimate};
use crate::stream::finish_reason_from_str;
use crate::types::{
    ChatRequest, ChatResponse, Choice, FinishReason, ImageData, ImageResponse,
    ImageResponseFormat, Message, ModelInfo, ProviderType, Usage,
};

use super::types::{
    CohereTextResponse, FoundationModelList, ImageArtifacts, MetaResponse, MistralResponse,
    ModelFamily, TitanTextResponse,
};

const GENERIC_TEXT_FIELDS: [&str; 5] = ["text", "content", "generation", "completion", "outputText"];

/// Maps an `InvokeModel` body according to its family.
///
/// `header_usage` comes from the `x-amzn-bedrock-*-token-count` response headers
/// and replaces estimated usage when the body carries none.
pub(crate) fn map_chat_response(
    provider: &'static str,
    family: ModelFamily,
    value: Value,
    request: &ChatRequest,
    alias: &str,
    header_usage: Option<Usage>,
) -> Result<ChatResponse, LLMError> {
    let mut response = match family {
        ModelFamily::Anthropic => {
            let parsed = parse_value(provider, value)?;
            anthropic::response::map_response(parsed, request, alias)
        }
        ModelFamily::Cohere => {
            let parsed = parse_value(provider, value)?;
            cohere::response::map_response(parsed, request, alias)
        }
        ModelFamily::CohereText => {
            let parsed: CohereTextResponse = parse_value(provider, value)?;
            let generation = parsed.generations.into_iter().next();
            let reason = generation.as_ref().and_then(|g| g.finish_reason.clone());
            single_choice(
                generation.map(|g| g.text).unwrap_or_default(),
                reason.as_deref(),
                None,
                request,
                alias,
            )
        }
        ModelFamily::Meta => {
            let parsed: MetaResponse = parse_value(provider, value)?;
            let usage = parsed
                .prompt_token_count
                .map(|prompt| Usage::new(prompt, parsed.generation_token_count.unwrap_or(0)));
            single_choice(
                parsed.generation,
                parsed.stop_reason.as_deref(),
                usage,
                request,
                alias,
            )
        }
        ModelFamily::Mistral => {
            let parsed: MistralResponse = parse_value(provider, value)?;
            let output = parsed.outputs.into_iter().next();
            let reason = output.as_ref().and_then(|o| o.stop_reason.clone());
            single_choice(
                output.map(|o| o.text).unwrap_or_default(),
                reason.as_deref(),
                None,
                request,
                alias,
            )
        }
        ModelFamily::Titan => {
            let parsed: TitanTextResponse = parse_value(provider, value)?;
            let result = parsed.results.into_iter().next();
            let usage = parsed.input_text_token_count.map(|input| {
                Usage::new(
                    input,
                    result.as_ref().and_then(|r| r.token_count).unwrap_or(0),
                )
            });
            let reason = result.as_ref().and_then(|r| r.completion_reason.clone());
            single_choice(
                result.map(|r| r.output_text).unwrap_or_default(),
                reason.as_deref(),
                usage,
                request,
                alias,
            )
        }
        ModelFamily::Generic => {
            let text = GENERIC_TEXT_FIELDS
                .iter()
                .find_map(|field| value.get(*field).and_then(Value::as_str))
                .unwrap_or_default()
                .to_string();
            let reason = ["finish_reason", "stop_reason"]
                .iter()
                .find_map(|field| value.get(*field).and_then(Value::as_str));
            single_choice(text, reason, None, request, alias)
        }
        ModelFamily::CohereEmbed
        | ModelFamily::TitanEmbed
        | ModelFamily::TitanImage
        | ModelFamily::Stability => {
            return Err(LLMError::decode(
                provider,
                format!("{family:?} response is not a chat completion"),
            ));
        }
    };
    if response.usage.estimated {
        if let Some(usage) = header_usage {
            response.usage = usage;
        }
    }
    Ok(response)
}

fn single_choice(
    text: String,
    reason: Option<&str>,
    usage: Option<Usage>,
    request: &ChatRequest,
    alias: &str,
) -> ChatResponse {
    let usage = usage_or_estimate(usage, ProviderType::Generic, request, &text);
    ChatResponse {
        id: new_chunk_id(),
        object: ChatResponse::OBJECT.to_string(),
        created: now_unix(),
        model: alias.to_string(),
        choices: vec![Choice {
            index: 0,
            message: Message::assistant(text),
            finish_reason: reason.map(finish_reason_from_str).unwrap_or(FinishReason::Stop),
        }],
        usage,
    }
}

/// Titan Image and Stability artifacts. Filtered images are dropped; when none
/// survive the request fails.
pub(crate) fn map_images(
    provider: &'static str,
    artifacts: ImageArtifacts,
    format: ImageResponseFormat,
) -> Result<ImageResponse, LLMError> {
    if let Some(error) = artifacts.error.filter(|e| !e.is_empty()) {
        return Err(LLMError::Validation {
            message: format!("{provider}: {error}"),
        });
    }
    let data: Vec<ImageData> = artifacts
        .images
        .into_iter()
        .enumerate()
        .filter(|(index, _)| {
            artifacts
                .finish_reasons
                .get(*index)
                .is_none_or(|reason| reason.is_none())
        })
        .map(|(_, b64)| match format {
            ImageResponseFormat::B64Json => ImageData {
                b64_json: Some(b64),
                ..ImageData::default()
            },
            ImageResponseFormat::Url => ImageData {
                url: Some(format!("data:image/png;base64,{b64}")),
                b64_json: Some(b64),
                ..ImageData::default()
            },
        })
        .collect();
    if data.is_empty() {
        return Err(LLMError::Validation {
            message: format!("{provider}: every generated image was filtered"),
        });
    }
    Ok(ImageResponse {
        created: now_unix(),
        data,
    })
}

pub(crate) fn map_models(list: FoundationModelList) -> Vec<ModelInfo> {
    list.model_summaries
        .into_iter()
        .map(|model| {
            let owner = model
                .provider_name
                .map(|name| name.to_ascii_lowercase())
                .unwrap_or_else(|| "bedrock".to_string());
            ModelInfo::new(model.model_id, owner)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> ChatRequest {
        ChatRequest::new("m", vec![Message::user("hello there")])
    }

    #[test]
    fn meta_generation_with_counts() {
        let mapped = map_chat_response(
            "bedrock",
            ModelFamily::Meta,
            json!({"generation": "Hi!", "prompt_token_count": 8, "generation_token_count": 2, "stop_reason": "stop"}),
            &request(),
            "llama",
            None,
        )
        .expect("mapped");
        assert_eq!(mapped.first_text(), Some("Hi!"));
        assert_eq!(mapped.usage, Usage::new(8, 2));
    }

    #[test]
    fn titan_length_and_header_usage() {
        let mapped = map_chat_response(
            "bedrock",
            ModelFamily::Titan,
            json!({"results": [{"outputText": "cut", "completionReason": "LENGTH"}]}),
            &request(),
            "titan",
            Some(Usage::new(4, 9)),
        )
        .expect("mapped");
        assert_eq!(mapped.choices[0].finish_reason, FinishReason::Length);
        assert_eq!(mapped.usage, Usage::new(4, 9));
        assert!(!mapped.usage.estimated);
    }

    #[test]
    fn mistral_outputs_and_generic_fields() {
        let mapped = map_chat_response(
            "bedrock",
            ModelFamily::Mistral,
            json!({"outputs": [{"text": "bonjour", "stop_reason": "length"}]}),
            &request(),
            "mistral",
            None,
        )
        .expect("mapped");
        assert_eq!(mapped.first_text(), Some("bonjour"));
        assert_eq!(mapped.choices[0].finish_reason, FinishReason::Length);

        let generic = map_chat_response(
            "bedrock",
            ModelFamily::Generic,
            json!({"completion": "ok"}),
            &request(),
            "x",
            None,
        )
        .expect("mapped");
        assert_eq!(generic.first_text(), Some("ok"));
        assert!(generic.usage.estimated);
    }

    #[test]
    fn legacy_cohere_generations_use_header_usage() {
        let mapped = map_chat_response(
            "bedrock",
            ModelFamily::CohereText,
            json!({
                "id": "g1",
                "generations": [{"id": "x", "text": " Hi there", "finish_reason": "MAX_TOKENS"}],
                "prompt": "User: hi\nBot:"
            }),
            &request(),
            "cohere.command-text-v14",
            Some(Usage::new(4, 3)),
        )
        .expect("mapped");
        assert_eq!(mapped.first_text(), Some(" Hi there"));
        assert_eq!(mapped.choices[0].finish_reason, FinishReason::Length);
        assert_eq!(mapped.usage, Usage::new(4, 3));
    }

    #[test]
    fn filtered_images_are_dropped() {
        let artifacts: ImageArtifacts = parse_value(
            "bedrock",
            json!({"images": ["AAA", "BBB"], "finish_reasons": [null, "Filter reason: prompt"]}),
        )
        .expect("parse");
        let mapped = map_images("bedrock", artifacts, ImageResponseFormat::B64Json).expect("images");
        assert_eq!(mapped.data.len(), 1);
        assert_eq!(mapped.data[0].b64_json.as_deref(), Some("AAA"));

        let failed: ImageArtifacts =
            parse_value("bedrock", json!({"images": [], "error": "blocked"})).expect("parse");
        assert!(map_images("bedrock", failed, ImageResponseFormat::Url).is_err());
    }
}
