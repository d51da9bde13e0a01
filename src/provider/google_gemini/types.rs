use serde::Deserialize;
use serde_json::Value;

/// GenerateContentResponse; shared by unary responses and stream chunks.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiGenerateContentResponse {
    #[serde(default)]
    pub(crate) candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    pub(crate) prompt_feedback: Option<GeminiPromptFeedback>,
    #[serde(default)]
    pub(crate) usage_metadata: Option<GeminiUsageMetadata>,
    #[serde(default)]
    pub(crate) response_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiCandidate {
    #[serde(default)]
    pub(crate) content: Option<GeminiContent>,
    #[serde(default)]
    pub(crate) finish_reason: Option<String>,
    #[serde(default)]
    pub(crate) index: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GeminiContent {
    #[serde(default)]
    pub(crate) parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GeminiPart {
    #[serde(default)]
    pub(crate) text: Option<String>,
    /// Set on reasoning summaries, which are not part of the answer.
    #[serde(default)]
    pub(crate) thought: Option<bool>,
    #[serde(default, rename = "functionCall", alias = "function_call")]
    pub(crate) function_call: Option<GeminiFunctionCall>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GeminiFunctionCall {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) args: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiPromptFeedback {
    #[serde(default)]
    pub(crate) block_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiUsageMetadata {
    #[serde(default)]
    pub(crate) prompt_token_count: Option<u64>,
    #[serde(default)]
    pub(crate) candidates_token_count: Option<u64>,
    #[serde(default)]
    pub(crate) thoughts_token_count: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GeminiBatchEmbedResponse {
    #[serde(default)]
    pub(crate) embeddings: Vec<GeminiEmbedding>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GeminiEmbedding {
    #[serde(default)]
    pub(crate) values: Vec<f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GeminiPredictResponse {
    #[serde(default)]
    pub(crate) predictions: Vec<GeminiPrediction>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiPrediction {
    #[serde(default)]
    pub(crate) bytes_base64_encoded: Option<String>,
    #[serde(default)]
    pub(crate) mime_type: Option<String>,
    /// Set when a sample was dropped by the safety filter.
    #[serde(default)]
    pub(crate) rai_filtered_reason: Option<String>,
}

/// `google.longrunning.Operation`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GeminiOperation {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) done: bool,
    #[serde(default)]
    pub(crate) error: Option<GeminiOperationError>,
    #[serde(default)]
    pub(crate) response: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GeminiOperationError {
    #[serde(default)]
    pub(crate) code: Option<i64>,
    #[serde(default)]
    pub(crate) message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiModelList {
    #[serde(default)]
    pub(crate) models: Vec<GeminiModel>,
    #[serde(default)]
    pub(crate) next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GeminiModel {
    /// `models/{id}`.
    pub(crate) name: String,
}
