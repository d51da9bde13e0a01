use std::collections::HashMap;

use serde_json::{Map, Value, json};

use crate::error::LLMError;
use crate::provider::shared::merge_extra;
use crate::types::{
    ChatRequest, EmbeddingRequest, Message, ResponseFormat, Role, ToolCall, ToolChoice,
    ToolDefinition,
};

/// Builds a Cohere v1 chat body.
///
/// System text becomes the `preamble`, the final user turn becomes `message`, and
/// everything in between goes to `chat_history`. Tool messages that trail the
/// last assistant turn are sent as top-level `tool_results` with an empty
/// `message`. `model` and `stream` are omitted when `None`.
pub(crate) fn build_cohere_body(
    request: &ChatRequest,
    model: Option<&str>,
    stream: Option<bool>,
) -> Result<Value, LLMError> {
    let mut body = Map::new();
    if let Some(model) = model {
        body.insert("model".to_string(), Value::String(model.to_string()));
    }

    let preamble: Vec<&str> = request
        .messages
        .iter()
        .filter(|m| m.role == Role::System && !m.content.is_empty())
        .map(|m| m.content.as_str())
        .collect();
    let turns: Vec<&Message> = request
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .collect();
    let Some(last) = turns.last() else {
        return Err(LLMError::validation(
            "Cohere chat request requires at least one non-system message",
        ));
    };

    let calls: HashMap<&str, &ToolCall> = request
        .messages
        .iter()
        .flat_map(|m| m.tool_calls.iter())
        .map(|call| (call.id.as_str(), call))
        .collect();

    let (history, message, tool_results) = match last.role {
        Role::User => (&turns[..turns.len() - 1], last.content.clone(), Vec::new()),
        Role::Tool => {
            let split = turns
                .iter()
                .rposition(|m| m.role != Role::Tool)
                .map_or(0, |i| i + 1);
            let results = turns[split..]
                .iter()
                .map(|m| tool_result(m, &calls))
                .collect();
            (&turns[..split], String::new(), results)
        }
        Role::Assistant | Role::System => {
            return Err(LLMError::validation(
                "Cohere chat request must end with a user or tool message",
            ));
        }
    };

    body.insert("message".to_string(), Value::String(message));
    if !history.is_empty() {
        body.insert(
            "chat_history".to_string(),
            Value::Array(history.iter().map(|m| history_entry(m, &calls)).collect()),
        );
    }
    if !tool_results.is_empty() {
        body.insert("tool_results".to_string(), Value::Array(tool_results));
    }
    if !preamble.is_empty() {
        body.insert("preamble".to_string(), Value::String(preamble.join("\n\n")));
    }

    let options = &request.options;
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
    if let Some(penalty) = options.presence_penalty {
        body.insert("presence_penalty".to_string(), Value::from(penalty));
    }
    if let Some(penalty) = options.frequency_penalty {
        body.insert("frequency_penalty".to_string(), Value::from(penalty));
    }
    if let Some(seed) = options.seed {
        body.insert("seed".to_string(), Value::from(seed));
    }
    match &request.response_format {
        Some(ResponseFormat::JsonObject) => {
            body.insert("response_format".to_string(), json!({"type": "json_object"}));
        }
        Some(ResponseFormat::JsonSchema { schema, .. }) => {
            body.insert(
                "response_format".to_string(),
                json!({"type": "json_object", "schema": schema}),
            );
        }
        Some(ResponseFormat::Text) | None => {}
    }

    let tools: Vec<&ToolDefinition> = match &request.tool_choice {
        Some(ToolChoice::Tool { name }) => request.tools.iter().filter(|t| &t.name == name).collect(),
        _ => request.tools.iter().collect(),
    };
    if !tools.is_empty() {
        body.insert(
            "tools".to_string(),
            Value::Array(tools.into_iter().map(convert_tool).collect()),
        );
    }
    match &request.tool_choice {
        Some(ToolChoice::Required) | Some(ToolChoice::Tool { .. }) => {
            body.insert("tool_choice".to_string(), Value::String("REQUIRED".into()));
        }
        Some(ToolChoice::None) => {
            body.insert("tool_choice".to_string(), Value::String("NONE".into()));
        }
        Some(ToolChoice::Auto) | None => {}
    }

    if let Some(stream) = stream {
        body.insert("stream".to_string(), Value::Bool(stream));
    }
    merge_extra(&mut body, &request.extra);
    Ok(Value::Object(body))
}

fn history_entry(message: &Message, calls: &HashMap<&str, &ToolCall>) -> Value {
    match message.role {
        Role::Assistant => {
            let mut entry = Map::new();
            entry.insert("role".to_string(), Value::String("CHATBOT".into()));
            entry.insert("message".to_string(), Value::String(message.content.clone()));
            if !message.tool_calls.is_empty() {
                entry.insert(
                    "tool_calls".to_string(),
                    Value::Array(
                        message
                            .tool_calls
                            .iter()
                            .map(|call| json!({"name": call.name, "parameters": parameters(call)}))
                            .collect(),
                    ),
                );
            }
            Value::Object(entry)
        }
        Role::Tool => json!({"role": "TOOL", "tool_results": [tool_result(message, calls)]}),
        Role::User | Role::System => json!({"role": "USER", "message": message.content}),
    }
}

fn tool_result(message: &Message, calls: &HashMap<&str, &ToolCall>) -> Value {
    let call = message
        .tool_call_id
        .as_deref()
        .and_then(|id| calls.get(id).copied());
    let name = call
        .map(|c| c.name.as_str())
        .or(message.name.as_deref())
        .unwrap_or("tool");
    let params = call.map(parameters).unwrap_or_else(|| json!({}));
    let output = match serde_json::from_str::<Value>(&message.content) {
        Ok(Value::Object(object)) => Value::Object(object),
        _ => json!({"result": message.content}),
    };
    json!({"call": {"name": name, "parameters": params}, "outputs": [output]})
}

fn parameters(call: &ToolCall) -> Value {
    serde_json::from_str::<Value>(&call.arguments)
        .ok()
        .filter(Value::is_object)
        .unwrap_or_else(|| json!({}))
}

/// Flattens a JSON-schema object into v1 `parameter_definitions`.
fn convert_tool(tool: &ToolDefinition) -> Value {
    let schema = tool.parameters.as_ref();
    let required: Vec<&str> = schema
        .and_then(|s| s.get("required"))
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut definitions = Map::new();
    if let Some(properties) = schema
        .and_then(|s| s.get("properties"))
        .and_then(Value::as_object)
    {
        for (name, property) in properties {
            let mut def = Map::new();
            def.insert(
                "type".to_string(),
                property
                    .get("type")
                    .cloned()
                    .unwrap_or_else(|| Value::String("str".into())),
            );
            if let Some(description) = property.get("description") {
                def.insert("description".to_string(), description.clone());
            }
            def.insert(
                "required".to_string(),
                Value::Bool(required.contains(&name.as_str())),
            );
            definitions.insert(name.clone(), Value::Object(def));
        }
    }

    json!({
        "name": tool.name,
        "description": tool.description.clone().unwrap_or_default(),
        "parameter_definitions": Value::Object(definitions),
    })
}

/// Embed v3 models require an `input_type`; documents are the default.
pub(crate) fn build_embed_body(request: &EmbeddingRequest, model: Option<&str>) -> Value {
    let mut body = Map::new();
    if let Some(model) = model {
        body.insert("model".to_string(), Value::String(model.to_string()));
    }
    body.insert("texts".to_string(), json!(request.input));
    body.insert(
        "input_type".to_string(),
        Value::String(
            request
                .input_type
                .clone()
                .unwrap_or_else(|| "search_document".to_string()),
        ),
    );
    body.insert("embedding_types".to_string(), json!(["float"]));
    body.insert("truncate".to_string(), Value::String("END".into()));
    merge_extra(&mut body, &request.extra);
    Value::Object(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_fold_into_preamble_history_and_message() {
        let request = ChatRequest::new(
            "command-r",
            vec![
                Message::system("be brief"),
                Message::user("hi"),
                Message::assistant("hello"),
                Message::user("how are you?"),
            ],
        );
        let body = build_cohere_body(&request, Some("command-r"), Some(false)).expect("body");
        assert_eq!(body["preamble"], "be brief");
        assert_eq!(body["message"], "how are you?");
        assert_eq!(body["chat_history"][0]["role"], "USER");
        assert_eq!(body["chat_history"][1]["role"], "CHATBOT");
        assert_eq!(body["chat_history"][1]["message"], "hello");
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn trailing_tool_messages_become_tool_results() {
        let mut assistant = Message::assistant("");
        assistant.tool_calls.push(ToolCall {
            id: "c1".into(),
            name: "weather".into(),
            arguments: r#"{"city":"Oslo"}"#.into(),
        });
        let request = ChatRequest::new(
            "command-r",
            vec![Message::user("weather?"), assistant, Message::tool("c1", "snow")],
        );
        let body = build_cohere_body(&request, None, None).expect("body");
        assert_eq!(body["message"], "");
        assert_eq!(body["tool_results"][0]["call"]["name"], "weather");
        assert_eq!(body["tool_results"][0]["call"]["parameters"]["city"], "Oslo");
        assert_eq!(body["tool_results"][0]["outputs"][0]["result"], "snow");
        assert_eq!(body["chat_history"][1]["tool_calls"][0]["name"], "weather");
        assert!(body.get("model").is_none());
    }

    #[test]
    fn ending_on_assistant_is_rejected() {
        let request = ChatRequest::new("m", vec![Message::user("a"), Message::assistant("b")]);
        assert!(matches!(
            build_cohere_body(&request, None, None),
            Err(LLMError::Validation { .. })
        ));
    }

    #[test]
    fn tool_schema_flattens() {
        let mut request = ChatRequest::new("m", vec![Message::user("go")]);
        request.tools.push(ToolDefinition {
            name: "lookup".into(),
            description: Some("find things".into()),
            parameters: Some(json!({
                "type": "object",
                "properties": {"q": {"type": "string", "description": "query"}},
                "required": ["q"]
            })),
        });
        request.options.top_p = Some(0.5);
        let body = build_cohere_body(&request, None, None).expect("body");
        let q = &body["tools"][0]["parameter_definitions"]["q"];
        assert_eq!(q["type"], "string");
        assert_eq!(q["required"], true);
        assert_eq!(body["p"], 0.5);
    }

    #[test]
    fn embed_defaults_input_type() {
        let request = EmbeddingRequest::new("embed-english-v3.0", vec!["x".into()]);
        let body = build_embed_body(&request, Some("embed-english-v3.0"));
        assert_eq!(body["input_type"], "search_document");
        assert_eq!(body["embedding_types"][0], "float");
    }
}
