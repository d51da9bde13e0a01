use serde::Deserialize;

/// Body schema family of a Bedrock model id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFamily {
    Anthropic,
    Meta,
    Mistral,
    /// Command R chat models.
    Cohere,
    /// Legacy `cohere.command-text` and `cohere.command-light-text` generation models.
    CohereText,
    CohereEmbed,
    Titan,
    TitanEmbed,
    TitanImage,
    Stability,
    /// Unrecognized ids; bodies and chunks are probed for common field names.
    Generic,
}

/// Cross-region inference profile prefixes (`us.anthropic...`).
const PROFILE_PREFIXES: [&str; 5] = ["us.", "eu.", "apac.", "us-gov.", "global."];

impl ModelFamily {
    pub fn detect(model_id: &str) -> Self {
        let id = strip_profile(model_id);
        if id.starts_with("anthropic.") {
            Self::Anthropic
        } else if id.starts_with("meta.") {
            Self::Meta
        } else if id.starts_with("mistral.") {
            Self::Mistral
        } else if id.starts_with("cohere.embed") {
            Self::CohereEmbed
        } else if id.starts_with("cohere.command-r") {
            Self::Cohere
        } else if id.starts_with("cohere.command") {
            Self::CohereText
        } else if id.starts_with("amazon.titan-embed") {
            Self::TitanEmbed
        } else if id.starts_with("amazon.titan-image") || id.starts_with("amazon.nova-canvas") {
            Self::TitanImage
        } else if id.starts_with("amazon.titan-text") || id.starts_with("amazon.titan-tg1") {
            Self::Titan
        } else if id.starts_with("stability.") {
            Self::Stability
        } else {
            Self::Generic
        }
    }
}

/// Model id without its inference-profile prefix.
pub fn strip_profile(model_id: &str) -> &str {
    PROFILE_PREFIXES
        .iter()
        .find_map(|prefix| model_id.strip_prefix(prefix))
        .unwrap_or(model_id)
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MetaResponse {
    #[serde(default)]
    pub(crate) generation: String,
    #[serde(default)]
    pub(crate) prompt_token_count: Option<u64>,
    #[serde(default)]
    pub(crate) generation_token_count: Option<u64>,
    #[serde(default)]
    pub(crate) stop_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MistralResponse {
    #[serde(default)]
    pub(crate) outputs: Vec<MistralOutput>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MistralOutput {
    #[serde(default)]
    pub(crate) text: String,
    #[serde(default)]
    pub(crate) stop_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CohereTextResponse {
    #[serde(default)]
    pub(crate) generations: Vec<CohereGeneration>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CohereGeneration {
    #[serde(default)]
    pub(crate) text: String,
    #[serde(default)]
    pub(crate) finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TitanTextResponse {
    #[serde(default)]
    pub(crate) input_text_token_count: Option<u64>,
    #[serde(default)]
    pub(crate) results: Vec<TitanTextResult>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TitanTextResult {
    #[serde(default)]
    pub(crate) token_count: Option<u64>,
    #[serde(default)]
    pub(crate) output_text: String,
    #[serde(default)]
    pub(crate) completion_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TitanEmbedResponse {
    #[serde(default)]
    pub(crate) embedding: Vec<f32>,
    #[serde(default)]
    pub(crate) input_text_token_count: Option<u64>,
}

/// Shared by Titan Image and Stability; both return base64 images.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ImageArtifacts {
    #[serde(default)]
    pub(crate) images: Vec<String>,
    /// Stability: one entry per image, non-null when that image was filtered.
    #[serde(default)]
    pub(crate) finish_reasons: Vec<Option<String>>,
    #[serde(default)]
    pub(crate) error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FoundationModelList {
    #[serde(default)]
    pub(crate) model_summaries: Vec<FoundationModel>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FoundationModel {
    pub(crate) model_id: String,
    #[serde(default)]
    pub(crate) provider_name: Option<String>,
}
