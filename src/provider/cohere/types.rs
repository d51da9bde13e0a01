use serde::Deserialize;
use serde_json::Value;

/// Non-streaming `/v1/chat` payload; also the `response` of a `stream-end` event.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CohereChatResponse {
    #[serde(default)]
    pub(crate) response_id: Option<String>,
    #[serde(default)]
    pub(crate) generation_id: Option<String>,
    #[serde(default)]
    pub(crate) text: String,
    #[serde(default)]
    pub(crate) finish_reason: Option<String>,
    #[serde(default)]
    pub(crate) tool_calls: Option<Vec<CohereToolCall>>,
    #[serde(default)]
    pub(crate) meta: Option<CohereMeta>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CohereToolCall {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) parameters: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct CohereMeta {
    /// Billed counts; preferred over `tokens`, which include prompt templating.
    #[serde(default)]
    pub(crate) billed_units: Option<CohereTokenCounts>,
    #[serde(default)]
    pub(crate) tokens: Option<CohereTokenCounts>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub(crate) struct CohereTokenCounts {
    #[serde(default)]
    pub(crate) input_tokens: Option<f64>,
    #[serde(default)]
    pub(crate) output_tokens: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CohereEmbedResponse {
    #[serde(default)]
    pub(crate) embeddings: CohereEmbeddings,
    #[serde(default)]
    pub(crate) meta: Option<CohereMeta>,
}

/// `embeddings` is a bare matrix unless `embedding_types` was sent.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum CohereEmbeddings {
    Floats(Vec<Vec<f32>>),
    ByType {
        #[serde(default)]
        float: Vec<Vec<f32>>,
    },
}

impl Default for CohereEmbeddings {
    fn default() -> Self {
        Self::Floats(Vec::new())
    }
}

impl CohereEmbeddings {
    pub(crate) fn into_floats(self) -> Vec<Vec<f32>> {
        match self {
            Self::Floats(rows) => rows,
            Self::ByType { float } => float,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CohereModelList {
    #[serde(default)]
    pub(crate) models: Vec<CohereModel>,
    #[serde(default)]
    pub(crate) next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CohereModel {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) endpoints: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CohereKeyCheck {
    #[serde(default)]
    pub(crate) valid: bool,
}
