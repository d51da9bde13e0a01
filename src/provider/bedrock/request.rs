use serde_json::{Map, Value, json};

use crate::error::LLMError;
use crate::provider::anthropic::request::build_anthropic_body;
use crate::provider::cohere::request::build_cohere_body;
use crate::provider::shared::{aspect_ratio_bucket, merge_extra, nearest_dimensions};
use crate::types::{ChatRequest, EmbeddingRequest, ImageRequest, Message, Role};

use super::types::ModelFamily;

pub(crate) const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";
/// Titan's own default is too small for chat use.
pub(crate) const TITAN_DEFAULT_MAX_TOKENS: u32 = 512;

pub(crate) const TITAN_IMAGE_SIZES: [(u32, u32); 14] = [
    (1024, 1024),
    (768, 768),
    (512, 512),
    (768, 1152),
    (384, 576),
    (1152, 768),
    (576, 384),
    (768, 1280),
    (384, 640),
    (1280, 768),
    (640, 384),
    (896, 1152),
    (1152, 896),
    (1408, 768),
];

pub(crate) const STABILITY_ASPECT_RATIOS: [&str; 9] = [
    "16:9", "1:1", "21:9", "2:3", "3:2", "4:5", "5:4", "9:16", "9:21",
];

/// Builds the `InvokeModel` body for a chat-capable family.
pub(crate) fn build_chat_body(family: ModelFamily, request: &ChatRequest) -> Result<Value, LLMError> {
    if request.messages.is_empty() {
        return Err(LLMError::validation("chat request requires at least one message"));
    }
    let options = &request.options;
    let mut body = match family {
        ModelFamily::Anthropic => {
            let mut body = build_anthropic_body(request, None, None)?;
            if let Value::Object(map) = &mut body {
                map.insert(
                    "anthropic_version".to_string(),
                    Value::String(ANTHROPIC_VERSION.to_string()),
                );
            }
            return Ok(body);
        }
        ModelFamily::Cohere => return build_cohere_body(request, None, None),
        ModelFamily::CohereText => {
            let mut body = Map::new();
            body.insert("prompt".to_string(), Value::String(titan_prompt(&request.messages)));
            if let Some(max_tokens) = options.max_tokens {
                body.insert("max_tokens".to_string(), Value::from(max_tokens));
            }
            if let Some(temperature) = options.temperature {
                body.insert("temperature".to_string(), Value::from(temperature));
            }
            if let Some(top_p) = options.top_p {
                body.insert("p".to_string(), Value::from(top_p));
            }
            if let Some(top_k) = options.top_k {
                body.insert("k".to_string(), Value::from(top_k));
            }
            if !options.stop.is_empty() {
                body.insert("stop_sequences".to_string(), json!(options.stop));
            }
            body
        }
        ModelFamily::Meta => {
            let mut body = Map::new();
            body.insert("prompt".to_string(), Value::String(llama3_prompt(&request.messages)));
            if let Some(max_tokens) = options.max_tokens {
                body.insert("max_gen_len".to_string(), Value::from(max_tokens));
            }
            if let Some(temperature) = options.temperature {
                body.insert("temperature".to_string(), Value::from(temperature));
            }
            if let Some(top_p) = options.top_p {
                body.insert("top_p".to_string(), Value::from(top_p));
            }
            body
        }
        ModelFamily::Mistral => {
            let mut body = Map::new();
            body.insert("prompt".to_string(), Value::String(mistral_prompt(&request.messages)));
            if let Some(max_tokens) = options.max_tokens {
                body.insert("max_tokens".to_string(), Value::from(max_tokens));
            }
            if let Some(temperature) = options.temperature {
                body.insert("temperature".to_string(), Value::from(temperature));
            }
            if let Some(top_p) = options.top_p {
                body.insert("top_p".to_string(), Value::from(top_p));
            }
            if let Some(top_k) = options.top_k {
                body.insert("top_k".to_string(), Value::from(top_k));
            }
            if !options.stop.is_empty() {
                body.insert("stop".to_string(), json!(options.stop));
            }
            body
        }
        ModelFamily::Titan => {
            let mut config = Map::new();
            config.insert(
                "maxTokenCount".to_string(),
                Value::from(options.max_tokens.unwrap_or(TITAN_DEFAULT_MAX_TOKENS)),
            );
            if let Some(temperature) = options.temperature {
                config.insert("temperature".to_string(), Value::from(temperature));
            }
            if let Some(top_p) = options.top_p {
                config.insert("topP".to_string(), Value::from(top_p));
            }
            if !options.stop.is_empty() {
                config.insert("stopSequences".to_string(), json!(options.stop));
            }
            let mut body = Map::new();
            body.insert("inputText".to_string(), Value::String(titan_prompt(&request.messages)));
            body.insert("textGenerationConfig".to_string(), Value::Object(config));
            body
        }
        ModelFamily::Generic => {
            let mut body = Map::new();
            body.insert("prompt".to_string(), Value::String(plain_prompt(&request.messages)));
            if let Some(max_tokens) = options.max_tokens {
                body.insert("max_tokens".to_string(), Value::from(max_tokens));
            }
            if let Some(temperature) = options.temperature {
                body.insert("temperature".to_string(), Value::from(temperature));
            }
            if let Some(top_p) = options.top_p {
                body.insert("top_p".to_string(), Value::from(top_p));
            }
            body
        }
        ModelFamily::CohereEmbed
        | ModelFamily::TitanEmbed
        | ModelFamily::TitanImage
        | ModelFamily::Stability => {
            return Err(LLMError::validation(format!(
                "{family:?} models do not accept chat requests"
            )));
        }
    };
    merge_extra(&mut body, &request.extra);
    Ok(Value::Object(body))
}

/// Llama 3 chat template, ending with an open assistant header.
fn llama3_prompt(messages: &[Message]) -> String {
    let mut prompt = String::from("<|begin_of_text|>");
    for message in messages {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "ipython",
        };
        prompt.push_str(&format!(
            "<|start_header_id|>{role}<|end_header_id|>\n\n{}<|eot_id|>",
            message.content
        ));
    }
    prompt.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
    prompt
}

/// `<s>[INST] ... [/INST] answer</s>`; system text prefixes the first user turn.
fn mistral_prompt(messages: &[Message]) -> String {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let mut pending_system = (!system.is_empty()).then(|| system.join("\n\n"));
    let mut prompt = String::from("<s>");
    for message in messages.iter().filter(|m| m.role != Role::System) {
        match message.role {
            Role::Assistant => {
                prompt.push_str(&format!(" {}</s>", message.content));
            }
            _ => {
                let text = match pending_system.take() {
                    Some(system) => format!("{system}\n\n{}", message.content),
                    None => message.content.clone(),
                };
                prompt.push_str(&format!("[INST] {text} [/INST]"));
            }
        }
    }
    prompt
}

fn titan_prompt(messages: &[Message]) -> String {
    let mut lines = Vec::new();
    for message in messages {
        let label = match message.role {
            Role::System => "System",
            Role::User | Role::Tool => "User",
            Role::Assistant => "Bot",
        };
        lines.push(format!("{label}: {}", message.content));
    }
    lines.push("Bot:".to_string());
    lines.join("\n")
}

fn plain_prompt(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .chain(std::iter::once("assistant:".to_string()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Titan embeds one text per invocation.
pub(crate) fn build_titan_embed_body(text: &str, request: &EmbeddingRequest) -> Value {
    let mut body = Map::new();
    body.insert("inputText".to_string(), Value::String(text.to_string()));
    if let Some(dimensions) = request.dimensions {
        body.insert("dimensions".to_string(), Value::from(dimensions));
    }
    merge_extra(&mut body, &request.extra);
    Value::Object(body)
}

pub(crate) fn build_image_body(family: ModelFamily, request: &ImageRequest) -> Result<Value, LLMError> {
    match family {
        ModelFamily::TitanImage => {
            let (width, height) =
                nearest_dimensions(request.size.as_deref(), &TITAN_IMAGE_SIZES, (1024, 1024));
            let mut params = Map::new();
            params.insert("text".to_string(), Value::String(request.prompt.clone()));
            if let Some(negative) = &request.negative_prompt {
                params.insert("negativeText".to_string(), Value::String(negative.clone()));
            }
            let mut config = Map::new();
            config.insert(
                "numberOfImages".to_string(),
                Value::from(request.n.unwrap_or(1).clamp(1, 5)),
            );
            config.insert("width".to_string(), Value::from(width));
            config.insert("height".to_string(), Value::from(height));
            let quality = match request.quality.as_deref() {
                Some("hd") | Some("premium") => "premium",
                _ => "standard",
            };
            config.insert("quality".to_string(), Value::String(quality.to_string()));
            if let Some(seed) = request.seed {
                config.insert("seed".to_string(), Value::from(seed));
            }
            merge_extra(&mut config, &request.extra);
            Ok(json!({
                "taskType": "TEXT_IMAGE",
                "textToImageParams": Value::Object(params),
                "imageGenerationConfig": Value::Object(config),
            }))
        }
        ModelFamily::Stability => {
            let mut body = Map::new();
            body.insert("prompt".to_string(), Value::String(request.prompt.clone()));
            body.insert("mode".to_string(), Value::String("text-to-image".into()));
            body.insert(
                "aspect_ratio".to_string(),
                Value::String(
                    aspect_ratio_bucket(request.size.as_deref(), &STABILITY_ASPECT_RATIOS, "1:1")
                        .to_string(),
                ),
            );
            body.insert("output_format".to_string(), Value::String("png".into()));
            if let Some(negative) = &request.negative_prompt {
                body.insert("negative_prompt".to_string(), Value::String(negative.clone()));
            }
            if let Some(seed) = request.seed {
                body.insert("seed".to_string(), Value::from(seed));
            }
            merge_extra(&mut body, &request.extra);
            Ok(Value::Object(body))
        }
        other => Err(LLMError::validation(format!(
            "{other:?} models do not accept image requests"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anthropic_family_carries_bedrock_version() {
        let request = ChatRequest::new("claude", vec![Message::user("hi")]);
        let body = build_chat_body(ModelFamily::Anthropic, &request).expect("body");
        assert_eq!(body["anthropic_version"], ANTHROPIC_VERSION);
        assert!(body.get("model").is_none());
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn llama_prompt_ends_with_assistant_header() {
        let request = ChatRequest::new(
            "meta.llama3-8b-instruct-v1:0",
            vec![Message::system("terse"), Message::user("hi")],
        );
        let body = build_chat_body(ModelFamily::Meta, &request).expect("body");
        let prompt = body["prompt"].as_str().expect("prompt");
        assert!(prompt.starts_with("<|begin_of_text|><|start_header_id|>system"));
        assert!(prompt.ends_with("<|start_header_id|>assistant<|end_header_id|>\n\n"));
    }

    #[test]
    fn mistral_prompt_folds_system() {
        let request = ChatRequest::new(
            "m",
            vec![
                Message::system("sys"),
                Message::user("q1"),
                Message::assistant("a1"),
                Message::user("q2"),
            ],
        );
        let body = build_chat_body(ModelFamily::Mistral, &request).expect("body");
        assert_eq!(
            body["prompt"],
            "<s>[INST] sys\n\nq1 [/INST] a1</s>[INST] q2 [/INST]"
        );
    }

    #[test]
    fn titan_defaults_max_tokens() {
        let request = ChatRequest::new("amazon.titan-text-express-v1", vec![Message::user("hi")]);
        let body = build_chat_body(ModelFamily::Titan, &request).expect("body");
        assert_eq!(
            body["textGenerationConfig"]["maxTokenCount"],
            TITAN_DEFAULT_MAX_TOKENS
        );
        assert_eq!(body["inputText"], "User: hi\nBot:");
    }

    #[test]
    fn image_sizes_snap_to_supported() {
        let mut request = ImageRequest::new("amazon.titan-image-generator-v2:0", "a boat");
        request.size = Some("1920x1080".into());
        let body = build_image_body(ModelFamily::TitanImage, &request).expect("body");
        assert_eq!(body["imageGenerationConfig"]["width"], 1408);
        assert_eq!(body["imageGenerationConfig"]["height"], 768);

        request.size = Some("not-a-size".into());
        let body = build_image_body(ModelFamily::TitanImage, &request).expect("body");
        assert_eq!(body["imageGenerationConfig"]["width"], 1024);

        request.size = Some("1080x1920".into());
        let body = build_image_body(ModelFamily::Stability, &request).expect("body");
        assert_eq!(body["aspect_ratio"], "9:16");
    }

    #[test]
    fn embed_family_rejects_chat() {
        let request = ChatRequest::new("amazon.titan-embed-text-v2:0", vec![Message::user("x")]);
        assert!(build_chat_body(ModelFamily::TitanEmbed, &request).is_err());
    }

    #[test]
    fn legacy_cohere_gets_generation_body() {
        let mut request = ChatRequest::new(
            "cohere.command-text-v14",
            vec![Message::system("brief"), Message::user("hi")],
        );
        request.options.max_tokens = Some(50);
        request.options.top_p = Some(0.9);
        request.options.stop = vec!["User:".into()];
        let family = ModelFamily::detect(&request.model);
        assert_eq!(family, ModelFamily::CohereText);

        let body = build_chat_body(family, &request).expect("body");
        assert_eq!(body["prompt"], "System: brief\nUser: hi\nBot:");
        assert_eq!(body["max_tokens"], 50);
        assert_eq!(body["p"], 0.9);
        assert_eq!(body["stop_sequences"], json!(["User:"]));
        assert!(body.get("message").is_none());
        assert!(body.get("chat_history").is_none());
    }
}
