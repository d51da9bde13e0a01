use serde_json::{Map, Value, json};

use crate::error::LLMError;
use crate::provider::shared::merge_extra;
use crate::types::{
    ChatRequest, EmbeddingRequest, ImageRequest, ImageResponseFormat, Message, ResponseFormat,
    Role, ToolChoice, ToolDefinition,
};

/// Per-vendor deviations within the OpenAI wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BodyFlavor {
    /// `max_completion_tokens` on OpenAI proper, `max_tokens` elsewhere.
    pub(crate) max_tokens_field: &'static str,
    pub(crate) accepts_top_k: bool,
    /// Whether `stream_options.include_usage` is understood.
    pub(crate) stream_usage: bool,
}

pub(crate) fn build_chat_body(
    request: &ChatRequest,
    model: &str,
    stream: bool,
    flavor: BodyFlavor,
) -> Result<Value, LLMError> {
    if request.messages.is_empty() {
        return Err(LLMError::validation("at least one message is required"));
    }
    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(model.to_string()));
    body.insert(
        "messages".to_string(),
        Value::Array(request.messages.iter().map(convert_message).collect()),
    );
    let options = &request.options;
    if let Some(temperature) = options.temperature {
        body.insert("temperature".to_string(), Value::from(temperature));
    }
    if let Some(top_p) = options.top_p {
        body.insert("top_p".to_string(), Value::from(top_p));
    }
    if let Some(top_k) = options.top_k.filter(|_| flavor.accepts_top_k) {
        body.insert("top_k".to_string(), Value::from(top_k));
    }
    if let Some(max_tokens) = options.max_tokens {
        body.insert(flavor.max_tokens_field.to_string(), Value::from(max_tokens));
    }
    if !options.stop.is_empty() {
        body.insert("stop".to_string(), json!(options.stop));
    }
    if let Some(penalty) = options.presence_penalty {
        body.insert("presence_penalty".to_string(), Value::from(penalty));
    }
    if let Some(penalty) = options.frequency_penalty {
        body.insert("frequency_penalty".to_string(), Value::from(penalty));
    }
    if let Some(seed) = options.seed {
        body.insert("seed".to_string(), Value::from(seed));
    }
    if !request.tools.is_empty() {
        body.insert(
            "tools".to_string(),
            Value::Array(request.tools.iter().map(convert_tool).collect()),
        );
    }
    if let Some(choice) = &request.tool_choice {
        body.insert("tool_choice".to_string(), convert_tool_choice(choice));
    }
    if let Some(format) = &request.response_format {
        body.insert(
            "response_format".to_string(),
            convert_response_format(format),
        );
    }
    body.insert("stream".to_string(), Value::Bool(stream));
    if stream && flavor.stream_usage {
        body.insert(
            "stream_options".to_string(),
            json!({"include_usage": true}),
        );
    }
    merge_extra(&mut body, &request.extra);
    Ok(Value::Object(body))
}

fn convert_message(message: &Message) -> Value {
    let mut obj = Map::new();
    obj.insert(
        "role".to_string(),
        Value::String(message.role.as_str().to_string()),
    );
    if let Some(name) = &message.name {
        obj.insert("name".to_string(), Value::String(name.clone()));
    }
    if message.role == Role::Tool {
        obj.insert(
            "tool_call_id".to_string(),
            Value::String(message.tool_call_id.clone().unwrap_or_default()),
        );
    }
    if message.content.is_empty() && !message.tool_calls.is_empty() {
        obj.insert("content".to_string(), Value::Null);
    } else {
        obj.insert(
            "content".to_string(),
            Value::String(message.content.clone()),
        );
    }
    if !message.tool_calls.is_empty() {
        let calls = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {"name": call.name, "arguments": call.arguments},
                })
            })
            .collect();
        obj.insert("tool_calls".to_string(), Value::Array(calls));
    }
    Value::Object(obj)
}

fn convert_tool(tool: &ToolDefinition) -> Value {
    let mut function = Map::new();
    function.insert("name".to_string(), Value::String(tool.name.clone()));
    if let Some(description) = &tool.description {
        function.insert(
            "description".to_string(),
            Value::String(description.clone()),
        );
    }
    function.insert(
        "parameters".to_string(),
        tool.parameters
            .clone()
            .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
    );
    json!({"type": "function", "function": Value::Object(function)})
}

fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::Required => json!("required"),
        ToolChoice::None => json!("none"),
        ToolChoice::Tool { name } => json!({"type": "function", "function": {"name": name}}),
    }
}

fn convert_response_format(format: &ResponseFormat) -> Value {
    match format {
        ResponseFormat::Text => json!({"type": "text"}),
        ResponseFormat::JsonObject => json!({"type": "json_object"}),
        ResponseFormat::JsonSchema { name, schema } => json!({
            "type": "json_schema",
            "json_schema": {
                "name": name.as_deref().unwrap_or("response"),
                "schema": schema,
            },
        }),
    }
}

pub(crate) fn build_embedding_body(request: &EmbeddingRequest, model: &str) -> Value {
    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(model.to_string()));
    body.insert("input".to_string(), json!(request.input));
    body.insert(
        "encoding_format".to_string(),
        Value::String("float".to_string()),
    );
    if let Some(dimensions) = request.dimensions {
        body.insert("dimensions".to_string(), Value::from(dimensions));
    }
    merge_extra(&mut body, &request.extra);
    Value::Object(body)
}

pub(crate) fn build_image_body(request: &ImageRequest, model: &str) -> Value {
    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(model.to_string()));
    body.insert("prompt".to_string(), Value::String(request.prompt.clone()));
    body.insert("n".to_string(), Value::from(request.n.unwrap_or(1)));
    if let Some(size) = &request.size {
        body.insert("size".to_string(), Value::String(size.clone()));
    }
    if let Some(quality) = &request.quality {
        body.insert("quality".to_string(), Value::String(quality.clone()));
    }
    if let Some(style) = &request.style {
        body.insert("style".to_string(), Value::String(style.clone()));
    }
    let format = match request.response_format {
        ImageResponseFormat::Url => "url",
        ImageResponseFormat::B64Json => "b64_json",
    };
    body.insert(
        "response_format".to_string(),
        Value::String(format.to_string()),
    );
    merge_extra(&mut body, &request.extra);
    Value::Object(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCall;

    const OPENAI: BodyFlavor = BodyFlavor {
        max_tokens_field: "max_completion_tokens",
        accepts_top_k: false,
        stream_usage: true,
    };

    #[test]
    fn builds_basic_body() {
        let mut request = ChatRequest::new(
            "alias",
            vec![Message::system("be brief"), Message::user("hi")],
        );
        request.options.temperature = Some(0.5);
        request.options.max_tokens = Some(64);
        request.options.top_k = Some(5);
        request.options.stop = vec!["END".into()];

        let body = build_chat_body(&request, "gpt-4o-mini", false, OPENAI).expect("body");
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0], json!({"role": "system", "content": "be brief"}));
        assert_eq!(body["max_completion_tokens"], 64);
        assert_eq!(body["stop"], json!(["END"]));
        assert!(body.get("top_k").is_none());
        assert!(body.get("stream_options").is_none());
    }

    #[test]
    fn tool_round_trip_shapes() {
        let mut assistant = Message::assistant("");
        assistant.tool_calls.push(ToolCall {
            id: "call_1".into(),
            name: "weather".into(),
            arguments: r#"{"city":"Oslo"}"#.into(),
        });
        let mut request = ChatRequest::new(
            "m",
            vec![
                Message::user("weather?"),
                assistant,
                Message::tool("call_1", "sunny"),
            ],
        );
        request.tools.push(ToolDefinition {
            name: "weather".into(),
            description: Some("Look up weather".into()),
            parameters: None,
        });
        request.tool_choice = Some(ToolChoice::Tool {
            name: "weather".into(),
        });

        let body = build_chat_body(&request, "m", true, OPENAI).expect("body");
        assert_eq!(body["messages"][1]["content"], Value::Null);
        assert_eq!(
            body["messages"][1]["tool_calls"][0]["function"]["name"],
            "weather"
        );
        assert_eq!(body["messages"][2]["tool_call_id"], "call_1");
        assert_eq!(body["tools"][0]["function"]["parameters"]["type"], "object");
        assert_eq!(body["tool_choice"]["function"]["name"], "weather");
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn extra_fills_gaps_only() {
        let mut request = ChatRequest::new("m", vec![Message::user("hi")]);
        request.options.seed = Some(7);
        request.extra.insert("seed".into(), json!(99));
        request.extra.insert("user".into(), json!("u-1"));
        let body = build_chat_body(&request, "m", false, OPENAI).expect("body");
        assert_eq!(body["seed"], 7);
        assert_eq!(body["user"], "u-1");
    }

    #[test]
    fn empty_messages_rejected() {
        let request = ChatRequest::new("m", Vec::new());
        match build_chat_body(&request, "m", false, OPENAI) {
            Err(LLMError::Validation { .. }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
