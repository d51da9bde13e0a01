use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::poller::{JobPoller, PollerConfig};
use crate::provider::shared::{
    ProviderCore, ensure_chat_supported, ensure_supported, new_chunk_id, now_unix, parse_value,
};
use crate::provider::{ChatStream, LLMProvider};
use crate::signing::ApiKeySigner;
use crate::stream::{ChunkContext, SseParser, decode_stream};
use crate::types::{
    CapabilitySet, ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, ImageRequest,
    ImageResponse, ModelInfo, Operation, ProviderCapabilities, VideoData, VideoRequest,
    VideoResponse,
};

use super::operation::OperationSource;
use super::request::{build_batch_embed_body, build_gemini_body, build_imagen_body, build_veo_body};
use super::response::{map_embeddings, map_images, map_models, map_response};
use super::stream::GeminiChunkDecoder;
use super::types::{
    GeminiBatchEmbedResponse, GeminiGenerateContentResponse, GeminiModelList, GeminiPredictResponse,
};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const API_VERSION: &str = "v1beta";
const MODELS_PAGE_SIZE: u32 = 1000;

/// Google Gemini (Generative Language API) provider, including Imagen and Veo.
pub struct GoogleGeminiProvider {
    pub(crate) core: ProviderCore,
    pub(crate) capabilities: ProviderCapabilities,
    pub(crate) poller_config: PollerConfig,
}

impl GoogleGeminiProvider {
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        let core = ProviderCore::new(
            "google_gemini",
            transport,
            Arc::new(ApiKeySigner::new("x-goog-api-key", api_key)),
            DEFAULT_BASE_URL,
        );
        Self {
            core,
            capabilities: default_capabilities(),
            poller_config: PollerConfig::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.core.base_url = base_url.into();
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.core.default_model = Some(model.into());
        self
    }

    pub fn with_model_alias(mut self, alias: impl Into<String>, model: impl Into<String>) -> Self {
        self.core.model_aliases.insert(alias.into(), model.into());
        self
    }

    pub fn with_capabilities(mut self, capabilities: ProviderCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.core.timeout = Some(timeout);
        self
    }

    /// Poll timing for Veo operations.
    pub fn with_poller_config(mut self, config: PollerConfig) -> Self {
        self.poller_config = config;
        self
    }

    /// `{base}/v1beta`, unless the base already names a version.
    pub(crate) fn api_base(&self) -> String {
        let base = self.core.base();
        if base.ends_with("/v1beta") || base.ends_with("/v1") {
            base.to_string()
        } else {
            format!("{base}/{API_VERSION}")
        }
    }

    pub(crate) fn model_endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/models/{model}:{method}", self.api_base())
    }

    fn prepare_chat(
        &self,
        request: &ChatRequest,
        operation: Operation,
    ) -> Result<(String, String, Value), LLMError> {
        let alias = self.core.resolve_alias(&request.model)?;
        ensure_chat_supported(self.name(), &self.capabilities, request, &alias, operation)?;
        let model = self.core.vendor_model(&alias);
        let body = build_gemini_body(request)?;
        Ok((alias, model, body))
    }
}

fn default_capabilities() -> ProviderCapabilities {
    ProviderCapabilities::new(CapabilitySet::chat_only().with_tools())
        .with_override("text-embedding", CapabilitySet::embeddings_only())
        .with_override("embedding-", CapabilitySet::embeddings_only())
        .with_override("gemini-embedding", CapabilitySet::embeddings_only())
        .with_override("imagen", CapabilitySet::image_only())
        .with_override("veo", CapabilitySet::video_only())
}

#[async_trait]
impl LLMProvider for GoogleGeminiProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        let (alias, model, body) = self.prepare_chat(&request, Operation::Chat)?;
        let value = self
            .core
            .post_json(self.model_endpoint(&model, "generateContent"), &body)
            .await?;
        let parsed: GeminiGenerateContentResponse = parse_value(self.name(), value)?;
        Ok(map_response(parsed, &request, &alias))
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        let (alias, model, body) = self.prepare_chat(&request, Operation::Streaming)?;
        let url = format!(
            "{}?alt=sse",
            self.model_endpoint(&model, "streamGenerateContent")
        );
        let stream = self
            .core
            .open_stream(url, &body, "text/event-stream")
            .await?;
        Ok(decode_stream(
            stream,
            SseParser::new(self.name()),
            GeminiChunkDecoder::new(self.name()),
            ChunkContext::new(new_chunk_id(), now_unix(), alias),
            self.name(),
        ))
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, LLMError> {
        let alias = self.core.resolve_alias(&request.model)?;
        ensure_supported(self.name(), &self.capabilities, &alias, Operation::Embeddings)?;
        if request.input.is_empty() {
            return Err(LLMError::validation("embedding input must not be empty"));
        }
        let model = self.core.vendor_model(&alias);
        let body = build_batch_embed_body(&request, &format!("models/{model}"));
        let value = self
            .core
            .post_json(self.model_endpoint(&model, "batchEmbedContents"), &body)
            .await?;
        let parsed: GeminiBatchEmbedResponse = parse_value(self.name(), value)?;
        Ok(map_embeddings(parsed, &alias))
    }

    async fn generate_image(&self, request: ImageRequest) -> Result<ImageResponse, LLMError> {
        let alias = self.core.resolve_alias(&request.model)?;
        ensure_supported(self.name(), &self.capabilities, &alias, Operation::Image)?;
        let model = self.core.vendor_model(&alias);
        let body = build_imagen_body(&request);
        let value = self
            .core
            .post_json(self.model_endpoint(&model, "predict"), &body)
            .await?;
        let parsed: GeminiPredictResponse = parse_value(self.name(), value)?;
        let mapped = map_images(parsed, request.response_format);
        if mapped.data.is_empty() {
            return Err(LLMError::Validation {
                message: format!("{}: every generated image was filtered", self.name()),
            });
        }
        Ok(mapped)
    }

    async fn generate_video(&self, request: VideoRequest) -> Result<VideoResponse, LLMError> {
        let alias = self.core.resolve_alias(&request.model)?;
        ensure_supported(self.name(), &self.capabilities, &alias, Operation::Video)?;
        let model = self.core.vendor_model(&alias);
        let body = build_veo_body(&request)?;
        let value = self
            .core
            .post_json(self.model_endpoint(&model, "predictLongRunning"), &body)
            .await?;
        let operation = value
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| LLMError::decode(self.name(), "long-running response without a name"))?
            .to_string();
        debug!(provider = self.name(), operation = %operation, "video operation submitted");

        let source = Arc::new(OperationSource::new(self.core.clone(), self.api_base()));
        let poller = JobPoller::new(source, self.poller_config.clone());
        let job = poller
            .poll(&operation, &CancellationToken::new(), None)
            .await?;
        Ok(VideoResponse {
            id: job.id.clone(),
            created: job.created_at.unwrap_or_else(now_unix),
            status: "succeeded".to_string(),
            data: job
                .output_urls()
                .into_iter()
                .map(|url| VideoData {
                    url: Some(url),
                    b64_json: None,
                })
                .collect(),
        })
    }

    async fn verify_auth(&self) -> Result<(), LLMError> {
        self.core
            .get_json(format!("{}/models?pageSize=1", self.api_base()))
            .await?;
        info!(provider = self.name(), "credentials verified");
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, LLMError> {
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = format!("{}/models?pageSize={MODELS_PAGE_SIZE}", self.api_base());
            if let Some(token) = &page_token {
                url.push_str("&pageToken=");
                url.push_str(token);
            }
            let value = self.core.get_json(url).await?;
            let mut parsed: GeminiModelList = parse_value(self.name(), value)?;
            let next = parsed.next_page_token.take().filter(|t| !t.is_empty());
            models.extend(map_models(parsed));
            match next {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(models)
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities.clone()
    }

    fn name(&self) -> &'static str {
        "google_gemini"
    }
}
