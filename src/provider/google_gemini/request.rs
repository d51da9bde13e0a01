use std::collections::HashMap;

use serde_json::{Map, Value, json};

use crate::error::LLMError;
use crate::provider::shared::{aspect_ratio_bucket, merge_extra};
use crate::types::{
    ChatRequest, EmbeddingRequest, ImageRequest, Message, ResponseFormat, Role, ToolChoice,
    ToolDefinition, VideoRequest,
};

pub(crate) const IMAGEN_ASPECT_RATIOS: [&str; 5] = ["1:1", "3:4", "4:3", "9:16", "16:9"];
pub(crate) const VEO_ASPECT_RATIOS: [&str; 2] = ["16:9", "9:16"];

/// Builds a GenerateContent body.
///
/// System messages fold into `systemInstruction`; tool results become
/// `functionResponse` parts named after the call they answer.
pub(crate) fn build_gemini_body(request: &ChatRequest) -> Result<Value, LLMError> {
    let mut body = Map::new();

    let mut call_names: HashMap<&str, &str> = HashMap::new();
    let mut system_texts = Vec::new();
    let mut contents = Vec::new();
    for message in &request.messages {
        match message.role {
            Role::System => {
                if !message.content.is_empty() {
                    system_texts.push(message.content.as_str());
                }
            }
            Role::Assistant => {
                for call in &message.tool_calls {
                    call_names.insert(call.id.as_str(), call.name.as_str());
                }
                contents.push(convert_assistant(message));
            }
            Role::Tool => {
                let name = message
                    .name
                    .as_deref()
                    .or_else(|| {
                        message
                            .tool_call_id
                            .as_deref()
                            .and_then(|id| call_names.get(id).copied())
                    })
                    .unwrap_or("tool");
                contents.push(json!({
                    "role": "user",
                    "parts": [{
                        "functionResponse": {
                            "name": name,
                            "response": {"content": message.content},
                        }
                    }]
                }));
            }
            Role::User => {
                contents.push(json!({"role": "user", "parts": [{"text": message.content}]}));
            }
        }
    }

    if contents.is_empty() {
        return Err(LLMError::validation(
            "Gemini GenerateContent request requires at least one content message",
        ));
    }
    body.insert("contents".to_string(), Value::Array(contents));
    if !system_texts.is_empty() {
        body.insert(
            "systemInstruction".to_string(),
            json!({"parts": [{"text": system_texts.join("\n\n")}]}),
        );
    }
    if let Some(config) = build_generation_config(request) {
        body.insert("generationConfig".to_string(), config);
    }
    if !request.tools.is_empty() {
        body.insert(
            "tools".to_string(),
            json!([{"functionDeclarations": request.tools.iter().map(convert_tool).collect::<Vec<_>>()}]),
        );
    }
    if let Some(choice) = &request.tool_choice {
        body.insert("toolConfig".to_string(), convert_tool_choice(choice));
    }
    merge_extra(&mut body, &request.extra);
    Ok(Value::Object(body))
}

fn convert_assistant(message: &Message) -> Value {
    let mut parts = Vec::new();
    if !message.content.is_empty() {
        parts.push(json!({"text": message.content}));
    }
    for call in &message.tool_calls {
        let args = serde_json::from_str::<Value>(&call.arguments).unwrap_or_else(|_| json!({}));
        parts.push(json!({"functionCall": {"name": call.name, "args": args}}));
    }
    if parts.is_empty() {
        parts.push(json!({"text": ""}));
    }
    json!({"role": "model", "parts": parts})
}

fn build_generation_config(request: &ChatRequest) -> Option<Value> {
    let options = &request.options;
    let mut cfg = Map::new();
    if let Some(temperature) = options.temperature {
        cfg.insert("temperature".to_string(), Value::from(temperature));
    }
    if let Some(top_p) = options.top_p {
        cfg.insert("topP".to_string(), Value::from(top_p));
    }
    if let Some(top_k) = options.top_k {
        cfg.insert("topK".to_string(), Value::from(top_k));
    }
    if let Some(max_tokens) = options.max_tokens {
        cfg.insert("maxOutputTokens".to_string(), Value::from(max_tokens));
    }
    if !options.stop.is_empty() {
        cfg.insert("stopSequences".to_string(), json!(options.stop));
    }
    if let Some(penalty) = options.presence_penalty {
        cfg.insert("presencePenalty".to_string(), Value::from(penalty));
    }
    if let Some(penalty) = options.frequency_penalty {
        cfg.insert("frequencyPenalty".to_string(), Value::from(penalty));
    }
    if let Some(seed) = options.seed {
        cfg.insert("seed".to_string(), Value::from(seed));
    }
    match &request.response_format {
        Some(ResponseFormat::JsonObject) => {
            cfg.insert(
                "responseMimeType".to_string(),
                Value::String("application/json".to_string()),
            );
        }
        Some(ResponseFormat::JsonSchema { schema, .. }) => {
            cfg.insert(
                "responseMimeType".to_string(),
                Value::String("application/json".to_string()),
            );
            cfg.insert("responseSchema".to_string(), schema.clone());
        }
        Some(ResponseFormat::Text) | None => {}
    }
    (!cfg.is_empty()).then_some(Value::Object(cfg))
}

fn convert_tool(tool: &ToolDefinition) -> Value {
    let mut decl = Map::new();
    decl.insert("name".to_string(), Value::String(tool.name.clone()));
    if let Some(description) = &tool.description {
        decl.insert(
            "description".to_string(),
            Value::String(description.clone()),
        );
    }
    if let Some(schema) = &tool.parameters {
        decl.insert("parameters".to_string(), schema.clone());
    }
    Value::Object(decl)
}

fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!({"functionCallingConfig": {"mode": "AUTO"}}),
        ToolChoice::Required => json!({"functionCallingConfig": {"mode": "ANY"}}),
        ToolChoice::None => json!({"functionCallingConfig": {"mode": "NONE"}}),
        ToolChoice::Tool { name } => json!({
            "functionCallingConfig": {"mode": "ANY", "allowedFunctionNames": [name]}
        }),
    }
}

/// Maps retrieval role hints onto Gemini task types.
fn task_type(input_type: &str) -> String {
    match input_type {
        "search_document" | "document" => "RETRIEVAL_DOCUMENT".to_string(),
        "search_query" | "query" => "RETRIEVAL_QUERY".to_string(),
        "classification" => "CLASSIFICATION".to_string(),
        "clustering" => "CLUSTERING".to_string(),
        other => other.to_ascii_uppercase(),
    }
}

pub(crate) fn build_batch_embed_body(request: &EmbeddingRequest, model_path: &str) -> Value {
    let requests: Vec<Value> = request
        .input
        .iter()
        .map(|text| {
            let mut item = Map::new();
            item.insert("model".to_string(), Value::String(model_path.to_string()));
            item.insert("content".to_string(), json!({"parts": [{"text": text}]}));
            if let Some(input_type) = &request.input_type {
                item.insert(
                    "taskType".to_string(),
                    Value::String(task_type(input_type)),
                );
            }
            if let Some(dimensions) = request.dimensions {
                item.insert("outputDimensionality".to_string(), Value::from(dimensions));
            }
            Value::Object(item)
        })
        .collect();
    let mut body = Map::new();
    body.insert("requests".to_string(), Value::Array(requests));
    merge_extra(&mut body, &request.extra);
    Value::Object(body)
}

pub(crate) fn build_imagen_body(request: &ImageRequest) -> Value {
    let mut parameters = Map::new();
    parameters.insert(
        "sampleCount".to_string(),
        Value::from(request.n.unwrap_or(1).clamp(1, 4)),
    );
    parameters.insert(
        "aspectRatio".to_string(),
        Value::String(
            aspect_ratio_bucket(request.size.as_deref(), &IMAGEN_ASPECT_RATIOS, "1:1")
                .to_string(),
        ),
    );
    if let Some(negative) = &request.negative_prompt {
        parameters.insert(
            "negativePrompt".to_string(),
            Value::String(negative.clone()),
        );
    }
    if let Some(seed) = request.seed {
        parameters.insert("seed".to_string(), Value::from(seed));
        // A fixed seed is only honoured without the invisible watermark.
        parameters.insert("addWatermark".to_string(), Value::Bool(false));
    }
    merge_extra(&mut parameters, &request.extra);
    json!({
        "instances": [{"prompt": request.prompt}],
        "parameters": Value::Object(parameters),
    })
}

pub(crate) fn build_veo_body(request: &VideoRequest) -> Result<Value, LLMError> {
    let mut instance = Map::new();
    instance.insert("prompt".to_string(), Value::String(request.prompt.clone()));
    if let Some(image) = &request.image {
        instance.insert("image".to_string(), convert_start_image(image)?);
    }

    let mut parameters = Map::new();
    parameters.insert(
        "aspectRatio".to_string(),
        Value::String(
            aspect_ratio_bucket(request.aspect_ratio.as_deref(), &VEO_ASPECT_RATIOS, "16:9")
                .to_string(),
        ),
    );
    if let Some(duration) = request.duration_seconds {
        parameters.insert("durationSeconds".to_string(), Value::from(duration));
    }
    if let Some(negative) = &request.negative_prompt {
        parameters.insert(
            "negativePrompt".to_string(),
            Value::String(negative.clone()),
        );
    }
    if let Some(seed) = request.seed {
        parameters.insert("seed".to_string(), Value::from(seed));
    }
    merge_extra(&mut parameters, &request.extra);
    Ok(json!({
        "instances": [Value::Object(instance)],
        "parameters": Value::Object(parameters),
    }))
}

/// Veo takes inline base64 or a Cloud Storage URI.
fn convert_start_image(image: &str) -> Result<Value, LLMError> {
    if let Some(rest) = image.strip_prefix("data:") {
        let (meta, data) = rest
            .split_once(',')
            .ok_or_else(|| LLMError::validation("malformed data URI for video start image"))?;
        let mime = meta.strip_suffix(";base64").unwrap_or(meta);
        return Ok(json!({"bytesBase64Encoded": data, "mimeType": mime}));
    }
    if image.starts_with("gs://") {
        return Ok(json!({"gcsUri": image}));
    }
    Err(LLMError::validation(
        "Veo start image must be a data URI or a gs:// URI",
    ))
}
