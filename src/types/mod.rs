//! Canonical, provider-agnostic data structures.
//!
//! Every vendor shape is translated to and from these types inside the
//! corresponding provider module; nothing in here carries a vendor-specific field.
//! The JSON layout follows the OpenAI chat-completions contract consumed by the host.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

mod capability;
mod estimate;
mod job;
mod media;

pub use capability::{CapabilitySet, Operation, ProviderCapabilities};
pub use estimate::{ProviderType, TokenEstimate, TokenEstimator};
pub use job::{JobStatus, PredictionJob};
pub use media::{
    Embedding, EmbeddingRequest, EmbeddingResponse, ImageData, ImageRequest, ImageResponse,
    ImageResponseFormat, ModelInfo, VideoData, VideoRequest, VideoResponse,
};

/// Open key/value bag for vendor pass-through parameters.
///
/// Mappers write their typed fields first and then merge these keys only where the
/// vendor body does not already hold a value.
pub type Extra = Map<String, Value>;

/// Canonical chat roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// Chat message shared across providers.
///
/// # Examples
///
/// ```
/// # use llm_relay::types::{Message, Role};
/// let msg = Message::user("Describe Rust traits in one line.");
/// assert_eq!(msg.role, Role::User);
/// assert!(msg.tool_calls.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Plain text content. Assistant messages that only carry tool calls use `""`.
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Correlates a `tool` message with the assistant call it answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }
}

/// Function definition the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema describing the arguments object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// Tool invocation emitted by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Arguments serialized as a JSON string, as in the OpenAI contract.
    pub arguments: String,
}

/// How the model may pick tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    /// The model must call at least one tool.
    Required,
    None,
    Tool { name: String },
}

/// Response-formatting hint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject,
    JsonSchema {
        name: Option<String>,
        schema: Value,
    },
}

/// Sampling and generation knobs shared across providers.
///
/// Every field is optional; mappers fall back to the vendor's documented defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub seed: Option<u64>,
}

/// Canonical chat request.
///
/// # Examples
///
/// ```
/// # use llm_relay::types::{ChatRequest, Message};
/// let request = ChatRequest::new("m", vec![Message::user("hi")]);
/// assert!(!request.stream);
/// assert!(request.extra.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Caller-visible model alias; providers may translate it to a vendor id.
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default, flatten)]
    pub options: ChatOptions,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(default)]
    pub stream: bool,
    /// Vendor pass-through parameters; never overrides a typed field.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Extra,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            options: ChatOptions::default(),
            tools: Vec::new(),
            tool_choice: None,
            response_format: None,
            stream: false,
            extra: Extra::new(),
        }
    }

    /// Concatenated text of every message, used for prompt-side token estimates.
    pub fn prompt_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Why a generation stopped. The vocabulary is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Error,
    Unknown,
}

/// Token accounting.
///
/// `estimated` is set when the vendor omitted counters and [`TokenEstimator`]
/// filled them in; it is not part of the wire contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    #[serde(skip)]
    pub estimated: bool,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            estimated: false,
        }
    }
}

/// A completed choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub index: usize,
    pub message: Message,
    pub finish_reason: FinishReason,
}

/// Canonical chat completion response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub object: String,
    /// Unix timestamp in seconds.
    pub created: i64,
    /// The caller-visible alias, not necessarily the vendor's internal id.
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

impl ChatResponse {
    pub const OBJECT: &'static str = "chat.completion";

    /// Text of the first choice, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

/// Incremental content of a streamed choice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallDelta>,
}

/// Partial tool call, merged by `index` on the consumer side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: usize,
    pub delta: Delta,
    pub finish_reason: Option<FinishReason>,
}

/// One element of a streamed response.
///
/// A stream is a finite ordered sequence of chunks terminated by exactly one chunk
/// whose choice carries a finish reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatChunk {
    pub const OBJECT: &'static str = "chat.completion.chunk";

    /// Builds a single-choice chunk carrying a text delta.
    pub fn text(id: &str, created: i64, model: &str, text: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            object: Self::OBJECT.to_string(),
            created,
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta {
                    role: Some(Role::Assistant),
                    content: Some(text.into()),
                    tool_calls: Vec::new(),
                },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    /// Builds a single-choice terminal chunk.
    pub fn finish(id: &str, created: i64, model: &str, reason: FinishReason) -> Self {
        Self {
            id: id.to_string(),
            object: Self::OBJECT.to_string(),
            created,
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta::default(),
                finish_reason: Some(reason),
            }],
            usage: None,
        }
    }

    /// First finish reason carried by any choice.
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.choices.iter().find_map(|c| c.finish_reason)
    }

    /// Concatenated delta text across choices.
    pub fn text_delta(&self) -> String {
        self.choices
            .iter()
            .filter_map(|c| c.delta.content.as_deref())
            .collect()
    }

    /// Whether the chunk carries nothing a consumer would observe.
    pub fn is_empty(&self) -> bool {
        self.usage.is_none()
            && self.choices.iter().all(|c| {
                c.finish_reason.is_none()
                    && c.delta.content.as_deref().is_none_or(str::is_empty)
                    && c.delta.tool_calls.is_empty()
            })
    }
}
