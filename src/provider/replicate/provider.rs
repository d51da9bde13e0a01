use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::poller::{JobPoller, PollerConfig};
use crate::provider::shared::{
    ProviderCore, ensure_chat_supported, ensure_supported, now_unix, parse_value,
};
use crate::provider::{ChatStream, LLMProvider};
use crate::signing::BearerSigner;
use crate::stream::ChunkContext;
use crate::types::{
    CapabilitySet, ChatRequest, ChatResponse, ImageRequest, ImageResponse, JobStatus, ModelInfo,
    Operation, PredictionJob, ProviderCapabilities, VideoRequest, VideoResponse,
};

use super::request::{build_chat_input, build_image_input, build_video_input, prediction_target};
use super::response::{map_chat, map_images, map_models, map_video, prediction_to_job};
use super::source::PredictionSource;
use super::types::{ReplicateModelList, ReplicatePrediction};

const DEFAULT_BASE_URL: &str = "https://api.replicate.com";
const MAX_MODEL_PAGES: usize = 50;

/// Replicate provider. Every call is a prediction polled to completion.
pub struct ReplicateProvider {
    pub(crate) core: ProviderCore,
    pub(crate) capabilities: ProviderCapabilities,
    pub(crate) poller_config: PollerConfig,
}

impl ReplicateProvider {
    pub fn new(transport: DynHttpTransport, api_token: impl Into<String>) -> Self {
        let core = ProviderCore::new(
            "replicate",
            transport,
            Arc::new(BearerSigner::new(api_token)),
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

    pub fn with_poller_config(mut self, config: PollerConfig) -> Self {
        self.poller_config = config;
        self
    }

    pub(crate) fn api_base(&self) -> String {
        let base = self.core.base();
        if base.ends_with("/v1") {
            base.to_string()
        } else {
            format!("{base}/v1")
        }
    }

    fn poller(&self) -> JobPoller<PredictionSource> {
        let source = PredictionSource::new(self.core.clone(), self.api_base());
        JobPoller::new(Arc::new(source), self.poller_config.clone())
    }

    async fn submit(&self, model: &str, input: Value) -> Result<PredictionJob, LLMError> {
        let target = prediction_target(model)?;
        let url = format!("{}{}", self.api_base(), target.path());
        let value = self.core.post_job(url, &target.body(input)).await?;
        let prediction: ReplicatePrediction = parse_value(self.name(), value)?;
        let job = prediction_to_job(prediction);
        debug!(provider = self.name(), job_id = %job.id, model, "prediction created");
        match job.status {
            JobStatus::Failed | JobStatus::Canceled => Err(LLMError::UpstreamJobFailed {
                provider: self.name(),
                job_id: job.id,
                message: job
                    .error
                    .unwrap_or_else(|| "prediction rejected at creation".to_string()),
            }),
            _ => Ok(job),
        }
    }

    /// Creates a prediction and waits for its terminal state.
    async fn run(&self, model: &str, input: Value) -> Result<PredictionJob, LLMError> {
        let job = self.submit(model, input).await?;
        if job.status == JobStatus::Succeeded && job.output.is_some() {
            return Ok(job);
        }
        self.poller()
            .poll(&job.id, &CancellationToken::new(), None)
            .await
    }
}

fn default_capabilities() -> ProviderCapabilities {
    let general = CapabilitySet::chat_only().with_image().with_video();
    ProviderCapabilities::new(general)
        .with_override("black-forest-labs/", CapabilitySet::image_only())
        .with_override("stability-ai/", CapabilitySet::image_only())
        .with_override("ideogram-ai/", CapabilitySet::image_only())
        .with_override("recraft-ai/", CapabilitySet::image_only())
        .with_override("minimax/video", CapabilitySet::video_only())
        .with_override("luma/", CapabilitySet::video_only())
        .with_override("kwaivgi/", CapabilitySet::video_only())
        .with_override("google/veo", CapabilitySet::video_only())
        .with_override("wan-video/", CapabilitySet::video_only())
}

#[async_trait]
impl LLMProvider for ReplicateProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        let alias = self.core.resolve_alias(&request.model)?;
        ensure_chat_supported(
            self.name(),
            &self.capabilities,
            &request,
            &alias,
            Operation::Chat,
        )?;
        let input = build_chat_input(&request)?;
        let job = self.run(&self.core.vendor_model(&alias), input).await?;
        Ok(map_chat(job, &request, &alias))
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        let alias = self.core.resolve_alias(&request.model)?;
        ensure_chat_supported(
            self.name(),
            &self.capabilities,
            &request,
            &alias,
            Operation::Streaming,
        )?;
        let input = build_chat_input(&request)?;
        let job = self.submit(&self.core.vendor_model(&alias), input).await?;
        let context = ChunkContext::new(job.id.clone(), now_unix(), alias);
        Ok(self
            .poller()
            .poll_stream(job.id, context, CancellationToken::new()))
    }

    async fn generate_image(&self, request: ImageRequest) -> Result<ImageResponse, LLMError> {
        let alias = self.core.resolve_alias(&request.model)?;
        ensure_supported(self.name(), &self.capabilities, &alias, Operation::Image)?;
        let job = self
            .run(&self.core.vendor_model(&alias), build_image_input(&request))
            .await?;
        map_images(self.name(), job, request.response_format)
    }

    async fn generate_video(&self, request: VideoRequest) -> Result<VideoResponse, LLMError> {
        let alias = self.core.resolve_alias(&request.model)?;
        ensure_supported(self.name(), &self.capabilities, &alias, Operation::Video)?;
        let job = self
            .run(&self.core.vendor_model(&alias), build_video_input(&request))
            .await?;
        map_video(self.name(), job)
    }

    async fn verify_auth(&self) -> Result<(), LLMError> {
        self.core
            .get_json(format!("{}/account", self.api_base()))
            .await?;
        info!(provider = self.name(), "credentials verified");
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, LLMError> {
        let mut models = Vec::new();
        let mut url = Some(format!("{}/models", self.api_base()));
        let mut pages = 0;
        while let Some(current) = url.take() {
            if pages == MAX_MODEL_PAGES {
                warn!(
                    provider = self.name(),
                    pages, "model catalogue truncated"
                );
                break;
            }
            let value = self.core.get_json(current).await?;
            let mut parsed: ReplicateModelList = parse_value(self.name(), value)?;
            url = parsed.next.take().filter(|next| !next.is_empty());
            models.extend(map_models(parsed));
            pages += 1;
        }
        Ok(models)
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities.clone()
    }

    fn name(&self) -> &'static str {
        "replicate"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoNetwork;

    #[async_trait]
    impl crate::http::HttpTransport for NoNetwork {
        async fn send(
            &self,
            request: crate::http::HttpRequest,
        ) -> Result<crate::http::HttpResponse, LLMError> {
            panic!("unexpected request to {}", request.url)
        }

        async fn send_stream(
            &self,
            request: crate::http::HttpRequest,
        ) -> Result<crate::http::HttpStreamResponse, LLMError> {
            panic!("unexpected stream request to {}", request.url)
        }
    }

    #[test]
    fn api_base_adds_version() {
        let provider = ReplicateProvider::new(Arc::new(NoNetwork), "r8_x");
        assert_eq!(provider.api_base(), "https://api.replicate.com/v1");
        let provider = provider.with_base_url("http://mock/v1/");
        assert_eq!(provider.api_base(), "http://mock/v1");
    }

    #[tokio::test]
    async fn embeddings_and_tools_are_rejected_offline() {
        let provider = ReplicateProvider::new(Arc::new(NoNetwork), "r8_x");
        let embed = crate::types::EmbeddingRequest::new("meta/llama", vec!["x".into()]);
        match provider.embed(embed).await {
            Err(LLMError::UnsupportedOperation { operation, .. }) => {
                assert_eq!(operation, Operation::Embeddings)
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let video = VideoRequest::new("black-forest-labs/flux-schnell", "a fox");
        assert!(matches!(
            provider.generate_video(video).await,
            Err(LLMError::UnsupportedOperation { .. })
        ));
    }

    #[tokio::test]
    async fn malformed_model_fails_before_io() {
        let provider = ReplicateProvider::new(Arc::new(NoNetwork), "r8_x");
        let request = ChatRequest::new("llama", vec![crate::types::Message::user("hi")]);
        match provider.chat(request).await {
            Err(LLMError::Validation { message }) => assert!(message.contains("owner/name")),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
