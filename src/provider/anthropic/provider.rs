use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::provider::shared::{
    ProviderCore, ensure_chat_supported, new_chunk_id, now_unix, parse_value,
};
use crate::provider::{ChatStream, LLMProvider};
use crate::signing::ApiKeySigner;
use crate::stream::{ChunkContext, SseParser, decode_stream};
use crate::types::{
    CapabilitySet, ChatRequest, ChatResponse, ModelInfo, Operation, ProviderCapabilities,
};

use super::request::build_anthropic_body;
use super::response::{map_models, map_response};
use super::stream::AnthropicChunkDecoder;
use super::types::{AnthropicMessageResponse, AnthropicModelList};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_VERSION: &str = "2023-06-01";

/// Anthropic Messages provider.
pub struct AnthropicProvider {
    pub(crate) core: ProviderCore,
    pub(crate) capabilities: ProviderCapabilities,
}

impl AnthropicProvider {
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        let mut core = ProviderCore::new(
            "anthropic",
            transport,
            Arc::new(ApiKeySigner::new("x-api-key", api_key)),
            DEFAULT_BASE_URL,
        );
        core.headers
            .insert("anthropic-version".to_string(), DEFAULT_VERSION.to_string());
        Self {
            core,
            capabilities: ProviderCapabilities::new(CapabilitySet::chat_only().with_tools()),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.core.base_url = base_url.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.core
            .headers
            .insert("anthropic-version".to_string(), version.into());
        self
    }

    /// Sets the `anthropic-beta` header.
    pub fn with_beta(mut self, beta: impl Into<String>) -> Self {
        self.core
            .headers
            .insert("anthropic-beta".to_string(), beta.into());
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

    pub(crate) fn endpoint(&self, path: &str) -> String {
        let base = self.core.base();
        if base.ends_with("/v1") {
            format!("{base}{path}")
        } else {
            format!("{base}/v1{path}")
        }
    }

    fn prepare(
        &self,
        request: &ChatRequest,
        operation: Operation,
        stream: bool,
    ) -> Result<(String, Value), LLMError> {
        let alias = self.core.resolve_alias(&request.model)?;
        ensure_chat_supported(self.name(), &self.capabilities, request, &alias, operation)?;
        let model = self.core.vendor_model(&alias);
        let body = build_anthropic_body(request, Some(&model), Some(stream))?;
        Ok((alias, body))
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        let (alias, body) = self.prepare(&request, Operation::Chat, false)?;
        let value = self.core.post_json(self.endpoint("/messages"), &body).await?;
        let parsed: AnthropicMessageResponse = parse_value(self.name(), value)?;
        Ok(map_response(parsed, &request, &alias))
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        let (alias, body) = self.prepare(&request, Operation::Streaming, true)?;
        let stream = self
            .core
            .open_stream(self.endpoint("/messages"), &body, "text/event-stream")
            .await?;
        Ok(decode_stream(
            stream,
            SseParser::new(self.name()),
            AnthropicChunkDecoder::new(self.name()),
            ChunkContext::new(new_chunk_id(), now_unix(), alias),
            self.name(),
        ))
    }

    async fn verify_auth(&self) -> Result<(), LLMError> {
        self.core.get_json(self.endpoint("/models")).await?;
        info!(provider = self.name(), "credentials verified");
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, LLMError> {
        let value = self.core.get_json(self.endpoint("/models")).await?;
        let parsed: AnthropicModelList = parse_value(self.name(), value)?;
        Ok(map_models(parsed))
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities.clone()
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}
