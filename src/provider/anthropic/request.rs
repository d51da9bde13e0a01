use serde_json::{Map, Value, json};

use crate::error::LLMError;
use crate::provider::shared::merge_extra;
use crate::types::{ChatRequest, Message, Role, ToolChoice, ToolDefinition};

/// `max_tokens` is mandatory on the Messages API.
pub(crate) const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Builds an Anthropic Messages request body.
///
/// `model` and `stream` are omitted when `None`; Bedrock carries both outside
/// the body.
pub(crate) fn build_anthropic_body(
    request: &ChatRequest,
    model: Option<&str>,
    stream: Option<bool>,
) -> Result<Value, LLMError> {
    let mut body = Map::new();
    if let Some(model) = model {
        body.insert("model".to_string(), Value::String(model.to_string()));
    }

    let mut system_texts = Vec::new();
    let mut messages: Vec<(Role, Vec<Value>)> = Vec::new();
    for message in &request.messages {
        if message.role == Role::System {
            if !message.content.is_empty() {
                system_texts.push(message.content.as_str());
            }
            continue;
        }
        let (role, blocks) = convert_message(message);
        if blocks.is_empty() {
            continue;
        }
        // The API requires strictly alternating roles.
        match messages.last_mut() {
            Some((last_role, last_blocks)) if *last_role == role => last_blocks.extend(blocks),
            _ => messages.push((role, blocks)),
        }
    }

    if messages.is_empty() {
        return Err(LLMError::validation(
            "Anthropic Messages request requires at least one user/assistant message",
        ));
    }
    body.insert(
        "messages".to_string(),
        Value::Array(
            messages
                .into_iter()
                .map(|(role, content)| json!({"role": role.as_str(), "content": content}))
                .collect(),
        ),
    );
    if !system_texts.is_empty() {
        body.insert(
            "system".to_string(),
            Value::String(system_texts.join("\n\n")),
        );
    }

    let options = &request.options;
    body.insert(
        "max_tokens".to_string(),
        Value::from(options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
    );
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
        body.insert("stop_sequences".to_string(), json!(options.stop));
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
    if let Some(stream) = stream {
        body.insert("stream".to_string(), Value::Bool(stream));
    }
    merge_extra(&mut body, &request.extra);
    Ok(Value::Object(body))
}

/// Tool results travel as `tool_result` blocks inside a user turn.
fn convert_message(message: &Message) -> (Role, Vec<Value>) {
    match message.role {
        Role::Tool => (
            Role::User,
            vec![json!({
                "type": "tool_result",
                "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                "content": message.content,
            })],
        ),
        Role::Assistant => {
            let mut blocks = Vec::new();
            if !message.content.is_empty() {
                blocks.push(json!({"type": "text", "text": message.content}));
            }
            for call in &message.tool_calls {
                let input = serde_json::from_str::<Value>(&call.arguments)
                    .ok()
                    .filter(Value::is_object)
                    .unwrap_or_else(|| json!({}));
                blocks.push(json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.name,
                    "input": input,
                }));
            }
            (Role::Assistant, blocks)
        }
        Role::User | Role::System => (
            Role::User,
            if message.content.is_empty() {
                Vec::new()
            } else {
                vec![json!({"type": "text", "text": message.content})]
            },
        ),
    }
}

fn convert_tool(tool: &ToolDefinition) -> Value {
    let mut obj = Map::new();
    obj.insert("name".to_string(), Value::String(tool.name.clone()));
    if let Some(description) = &tool.description {
        obj.insert(
            "description".to_string(),
            Value::String(description.clone()),
        );
    }
    obj.insert(
        "input_schema".to_string(),
        tool.parameters
            .clone()
            .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
    );
    Value::Object(obj)
}

fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!({"type": "auto"}),
        ToolChoice::Required => json!({"type": "any"}),
        ToolChoice::None => json!({"type": "none"}),
        ToolChoice::Tool { name } => json!({"type": "tool", "name": name}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCall;

    #[test]
    fn system_folds_and_defaults_apply() {
        let request = ChatRequest::new(
            "claude",
            vec![
                Message::system("rule one"),
                Message::system("rule two"),
                Message::user("hi"),
            ],
        );
        let body = build_anthropic_body(&request, Some("claude-3-5-haiku"), Some(false))
            .expect("body");
        assert_eq!(body["system"], "rule one\n\nrule two");
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["messages"][0]["content"][0]["text"], "hi");
    }

    #[test]
    fn tool_results_merge_into_user_turn() {
        let mut assistant = Message::assistant("checking");
        assistant.tool_calls.push(ToolCall {
            id: "toolu_1".into(),
            name: "weather".into(),
            arguments: r#"{"city":"Paris"}"#.into(),
        });
        let request = ChatRequest::new(
            "m",
            vec![
                Message::user("weather?"),
                assistant,
                Message::tool("toolu_1", "rain"),
                Message::user("thanks"),
            ],
        );
        let body = build_anthropic_body(&request, None, None).expect("body");
        let messages = body["messages"].as_array().expect("messages");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["content"][1]["type"], "tool_use");
        assert_eq!(messages[1]["content"][1]["input"]["city"], "Paris");
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"][0]["type"], "tool_result");
        assert_eq!(messages[2]["content"][1]["text"], "thanks");
        assert!(body.get("model").is_none());
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn system_only_is_rejected() {
        let request = ChatRequest::new("m", vec![Message::system("alone")]);
        match build_anthropic_body(&request, Some("m"), None) {
            Err(LLMError::Validation { message }) => assert!(message.contains("at least one")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn tool_choice_required_maps_to_any() {
        let mut request = ChatRequest::new("m", vec![Message::user("go")]);
        request.tool_choice = Some(ToolChoice::Required);
        request.options.stop = vec!["\n\nHuman:".into()];
        let body = build_anthropic_body(&request, Some("m"), Some(true)).expect("body");
        assert_eq!(body["tool_choice"]["type"], "any");
        assert_eq!(body["stop_sequences"][0], "\n\nHuman:");
        assert_eq!(body["stream"], true);
    }
}
