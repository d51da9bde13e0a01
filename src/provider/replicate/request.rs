use serde_json::{Map, Value, json};

use crate::error::LLMError;
use crate::provider::shared::{aspect_ratio_bucket, merge_extra};
use crate::types::{ChatRequest, ImageRequest, Role, VideoRequest};

const IMAGE_ASPECT_RATIOS: [&str; 11] = [
    "1:1", "16:9", "21:9", "3:2", "2:3", "4:5", "5:4", "3:4", "4:3", "9:16", "9:21",
];
const VIDEO_ASPECT_RATIOS: [&str; 3] = ["16:9", "9:16", "1:1"];

/// Where a prediction is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PredictionTarget<'a> {
    /// Official model, `POST /models/{owner}/{name}/predictions`.
    Model { owner: &'a str, name: &'a str },
    /// Pinned version, `POST /predictions` with `version`.
    Version(&'a str),
}

impl PredictionTarget<'_> {
    pub(crate) fn path(&self) -> String {
        match self {
            Self::Model { owner, name } => format!("/models/{owner}/{name}/predictions"),
            Self::Version(_) => "/predictions".to_string(),
        }
    }

    pub(crate) fn body(&self, input: Value) -> Value {
        match self {
            Self::Model { .. } => json!({ "input": input }),
            Self::Version(version) => json!({ "version": version, "input": input }),
        }
    }
}

/// Accepts `owner/name`, `owner/name:version` or a bare version hash.
pub(crate) fn prediction_target(model: &str) -> Result<PredictionTarget<'_>, LLMError> {
    if let Some((_, version)) = model.split_once(':') {
        if !version.is_empty() {
            return Ok(PredictionTarget::Version(version));
        }
    }
    if let Some((owner, name)) = model.split_once('/') {
        if !owner.is_empty() && !name.is_empty() && !name.contains('/') {
            return Ok(PredictionTarget::Model { owner, name });
        }
    }
    if model.len() == 64 && model.chars().all(|c| c.is_ascii_hexdigit()) {
        return Ok(PredictionTarget::Version(model));
    }
    Err(LLMError::validation(format!(
        "replicate model must be `owner/name` or a version id, got `{model}`"
    )))
}

/// Language-model input. System turns become `system_prompt`; the rest is
/// flattened into `prompt`.
pub(crate) fn build_chat_input(request: &ChatRequest) -> Result<Value, LLMError> {
    let system: Vec<&str> = request
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let turns: Vec<_> = request
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .collect();
    if turns.is_empty() {
        return Err(LLMError::validation(
            "chat request needs at least one non-system message",
        ));
    }

    let prompt = match turns.as_slice() {
        [only] if only.role == Role::User => only.content.clone(),
        _ => {
            let mut lines: Vec<String> = turns
                .iter()
                .map(|m| {
                    let speaker = match m.role {
                        Role::Assistant => "Assistant",
                        Role::Tool => "Tool",
                        _ => "User",
                    };
                    format!("{speaker}: {}", m.content)
                })
                .collect();
            lines.push("Assistant:".to_string());
            lines.join("\n")
        }
    };

    let mut input = Map::new();
    input.insert("prompt".to_string(), Value::String(prompt));
    if !system.is_empty() {
        input.insert(
            "system_prompt".to_string(),
            Value::String(system.join("\n\n")),
        );
    }
    let options = &request.options;
    if let Some(max_tokens) = options.max_tokens {
        input.insert("max_tokens".to_string(), json!(max_tokens));
    }
    if let Some(temperature) = options.temperature {
        input.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(top_p) = options.top_p {
        input.insert("top_p".to_string(), json!(top_p));
    }
    if let Some(top_k) = options.top_k {
        input.insert("top_k".to_string(), json!(top_k));
    }
    if let Some(penalty) = options.presence_penalty {
        input.insert("presence_penalty".to_string(), json!(penalty));
    }
    if let Some(penalty) = options.frequency_penalty {
        input.insert("frequency_penalty".to_string(), json!(penalty));
    }
    if let Some(seed) = options.seed {
        input.insert("seed".to_string(), json!(seed));
    }
    if !options.stop.is_empty() {
        input.insert(
            "stop_sequences".to_string(),
            Value::String(options.stop.join(",")),
        );
    }
    merge_extra(&mut input, &request.extra);
    Ok(Value::Object(input))
}

pub(crate) fn build_image_input(request: &ImageRequest) -> Value {
    let mut input = Map::new();
    input.insert("prompt".to_string(), Value::String(request.prompt.clone()));
    if let Some(size) = request.size.as_deref() {
        input.insert(
            "aspect_ratio".to_string(),
            json!(aspect_ratio_bucket(Some(size), &IMAGE_ASPECT_RATIOS, "1:1")),
        );
    }
    if let Some(negative) = &request.negative_prompt {
        input.insert("negative_prompt".to_string(), json!(negative));
    }
    if let Some(n) = request.n {
        input.insert("num_outputs".to_string(), json!(n.max(1)));
    }
    if let Some(seed) = request.seed {
        input.insert("seed".to_string(), json!(seed));
    }
    merge_extra(&mut input, &request.extra);
    Value::Object(input)
}

pub(crate) fn build_video_input(request: &VideoRequest) -> Value {
    let mut input = Map::new();
    input.insert("prompt".to_string(), Value::String(request.prompt.clone()));
    if let Some(ratio) = request.aspect_ratio.as_deref() {
        input.insert(
            "aspect_ratio".to_string(),
            json!(aspect_ratio_bucket(Some(ratio), &VIDEO_ASPECT_RATIOS, "16:9")),
        );
    }
    if let Some(duration) = request.duration_seconds {
        input.insert("duration".to_string(), json!(duration));
    }
    if let Some(negative) = &request.negative_prompt {
        input.insert("negative_prompt".to_string(), json!(negative));
    }
    if let Some(image) = &request.image {
        input.insert("image".to_string(), json!(image));
    }
    if let Some(seed) = request.seed {
        input.insert("seed".to_string(), json!(seed));
    }
    merge_extra(&mut input, &request.extra);
    Value::Object(input)
}
