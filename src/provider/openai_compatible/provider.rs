use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::provider::shared::{
    ProviderCore, ensure_chat_supported, ensure_supported, new_chunk_id, now_unix, parse_value,
};
use crate::provider::{ChatStream, LLMProvider};
use crate::signing::BearerSigner;
use crate::stream::{ChunkContext, SseParser, decode_stream};
use crate::types::{
    CapabilitySet, ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, ImageRequest,
    ImageResponse, ModelInfo, Operation, ProviderCapabilities,
};

use super::request::{BodyFlavor, build_chat_body, build_embedding_body, build_image_body};
use super::response::{map_embeddings, map_images, map_models, map_response};
use super::stream::OpenAiChunkDecoder;
use super::types::{OpenAiChatResponse, OpenAiEmbeddingResponse, OpenAiImageResponse, OpenAiModelList};

/// Vendors served by [`OpenAiCompatibleProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    #[serde(rename = "openai")]
    OpenAi,
    Groq,
    Together,
    Fireworks,
    #[serde(rename = "deepinfra")]
    DeepInfra,
    Mistral,
    Perplexity,
    Xai,
    #[serde(rename = "openrouter")]
    OpenRouter,
    #[serde(rename = "deepseek")]
    DeepSeek,
    Cerebras,
}

impl Preset {
    /// Base URL including the API version segment.
    pub fn base_url(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::Together => "https://api.together.xyz/v1",
            Self::Fireworks => "https://api.fireworks.ai/inference/v1",
            Self::DeepInfra => "https://api.deepinfra.com/v1/openai",
            Self::Mistral => "https://api.mistral.ai/v1",
            Self::Perplexity => "https://api.perplexity.ai",
            Self::Xai => "https://api.x.ai/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::DeepSeek => "https://api.deepseek.com/v1",
            Self::Cerebras => "https://api.cerebras.ai/v1",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Groq => "groq",
            Self::Together => "together",
            Self::Fireworks => "fireworks",
            Self::DeepInfra => "deepinfra",
            Self::Mistral => "mistral",
            Self::Perplexity => "perplexity",
            Self::Xai => "xai",
            Self::OpenRouter => "openrouter",
            Self::DeepSeek => "deepseek",
            Self::Cerebras => "cerebras",
        }
    }

    pub fn capabilities(self) -> ProviderCapabilities {
        let chat = CapabilitySet::chat_only().with_tools();
        match self {
            Self::OpenAi => ProviderCapabilities::new(chat)
                .with_override("text-embedding", CapabilitySet::embeddings_only())
                .with_override("dall-e", CapabilitySet::image_only())
                .with_override("gpt-image", CapabilitySet::image_only()),
            Self::Mistral => ProviderCapabilities::new(chat)
                .with_override("mistral-embed", CapabilitySet::embeddings_only()),
            Self::Together | Self::DeepInfra => ProviderCapabilities::new(chat)
                .with_override("BAAI/", CapabilitySet::embeddings_only())
                .with_override("intfloat/", CapabilitySet::embeddings_only()),
            Self::Fireworks => ProviderCapabilities::new(chat)
                .with_override("nomic-ai/", CapabilitySet::embeddings_only()),
            Self::Perplexity => ProviderCapabilities::new(CapabilitySet::chat_only()),
            Self::Groq | Self::Xai | Self::OpenRouter | Self::DeepSeek | Self::Cerebras => {
                ProviderCapabilities::new(chat)
            }
        }
    }

    fn flavor(self) -> BodyFlavor {
        BodyFlavor {
            max_tokens_field: if self == Self::OpenAi {
                "max_completion_tokens"
            } else {
                "max_tokens"
            },
            accepts_top_k: matches!(
                self,
                Self::Together | Self::Fireworks | Self::DeepInfra | Self::OpenRouter
            ),
            stream_usage: !matches!(self, Self::Mistral | Self::Perplexity),
        }
    }
}

/// Chat, embeddings, images and model listing over the OpenAI wire format.
pub struct OpenAiCompatibleProvider {
    pub(crate) core: ProviderCore,
    pub(crate) preset: Preset,
    pub(crate) capabilities: ProviderCapabilities,
}

impl OpenAiCompatibleProvider {
    pub fn new(transport: DynHttpTransport, preset: Preset, api_key: impl Into<String>) -> Self {
        Self {
            core: ProviderCore::new(
                preset.name(),
                transport,
                Arc::new(BearerSigner::new(api_key)),
                preset.base_url(),
            ),
            preset,
            capabilities: preset.capabilities(),
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

    /// Maps a caller-visible alias onto a vendor model id.
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

    /// Adds a static header, e.g. `OpenAI-Organization` or OpenRouter's `HTTP-Referer`.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.core.headers.insert(name.into(), value.into());
        self
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        self.core.url(path)
    }

    fn prepare_chat(
        &self,
        request: &ChatRequest,
        operation: Operation,
        stream: bool,
    ) -> Result<(String, serde_json::Value), LLMError> {
        let alias = self.core.resolve_alias(&request.model)?;
        ensure_chat_supported(self.name(), &self.capabilities, request, &alias, operation)?;
        let body = build_chat_body(
            request,
            &self.core.vendor_model(&alias),
            stream,
            self.preset.flavor(),
        )?;
        Ok((alias, body))
    }
}

#[async_trait]
impl LLMProvider for OpenAiCompatibleProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        let (alias, body) = self.prepare_chat(&request, Operation::Chat, false)?;
        let value = self
            .core
            .post_json(self.endpoint("/chat/completions"), &body)
            .await?;
        let parsed: OpenAiChatResponse = parse_value(self.name(), value)?;
        Ok(map_response(parsed, &request, &alias))
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        let (alias, body) = self.prepare_chat(&request, Operation::Streaming, true)?;
        let stream = self
            .core
            .open_stream(
                self.endpoint("/chat/completions"),
                &body,
                "text/event-stream",
            )
            .await?;
        Ok(decode_stream(
            stream,
            SseParser::new(self.name()),
            OpenAiChunkDecoder::new(self.name()),
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
        let body = build_embedding_body(&request, &self.core.vendor_model(&alias));
        let value = self
            .core
            .post_json(self.endpoint("/embeddings"), &body)
            .await?;
        let parsed: OpenAiEmbeddingResponse = parse_value(self.name(), value)?;
        Ok(map_embeddings(parsed, &alias))
    }

    async fn generate_image(&self, request: ImageRequest) -> Result<ImageResponse, LLMError> {
        let alias = self.core.resolve_alias(&request.model)?;
        ensure_supported(self.name(), &self.capabilities, &alias, Operation::Image)?;
        let body = build_image_body(&request, &self.core.vendor_model(&alias));
        let value = self
            .core
            .post_json(self.endpoint("/images/generations"), &body)
            .await?;
        let parsed: OpenAiImageResponse = parse_value(self.name(), value)?;
        Ok(map_images(parsed))
    }

    async fn verify_auth(&self) -> Result<(), LLMError> {
        self.core.get_json(self.endpoint("/models")).await?;
        info!(provider = self.name(), "credentials verified");
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, LLMError> {
        let value = self.core.get_json(self.endpoint("/models")).await?;
        let parsed: OpenAiModelList = parse_value(self.name(), value)?;
        Ok(map_models(parsed, self.name()))
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities.clone()
    }

    fn name(&self) -> &'static str {
        self.preset.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport};
    use async_trait::async_trait;

    struct NoNetwork;

    #[async_trait]
    impl HttpTransport for NoNetwork {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
            panic!("unexpected request to {}", request.url)
        }

        async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
            panic!("unexpected stream request to {}", request.url)
        }
    }

    #[test]
    fn endpoint_joins_preset_base() {
        let provider = OpenAiCompatibleProvider::new(Arc::new(NoNetwork), Preset::Groq, "k");
        assert_eq!(
            provider.endpoint("/chat/completions"),
            "https://api.groq.com/openai/v1/chat/completions"
        );
        let provider = provider.with_base_url("http://localhost:8080/v1/");
        assert_eq!(
            provider.endpoint("/models"),
            "http://localhost:8080/v1/models"
        );
    }

    #[tokio::test]
    async fn unsupported_image_fails_before_io() {
        let provider = OpenAiCompatibleProvider::new(Arc::new(NoNetwork), Preset::Groq, "k");
        match provider
            .generate_image(ImageRequest::new("llama-3.1-8b-instant", "a cat"))
            .await
        {
            Err(LLMError::UnsupportedOperation { operation, .. }) => {
                assert_eq!(operation, Operation::Image)
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn preset_flavors_differ() {
        assert_eq!(Preset::OpenAi.flavor().max_tokens_field, "max_completion_tokens");
        assert_eq!(Preset::Mistral.flavor().max_tokens_field, "max_tokens");
        assert!(!Preset::Perplexity.flavor().stream_usage);
        assert!(Preset::Together.flavor().accepts_top_k);
    }
}
