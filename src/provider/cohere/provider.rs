use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
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
    CapabilitySet, ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, ModelInfo,
    Operation, ProviderCapabilities,
};

use super::request::{build_cohere_body, build_embed_body};
use super::response::{map_embeddings, map_models, map_response};
use super::stream::CohereChunkDecoder;
use super::types::{CohereChatResponse, CohereEmbedResponse, CohereKeyCheck, CohereModelList};

const DEFAULT_BASE_URL: &str = "https://api.cohere.com";

/// Cohere provider (v1 Chat and Embed).
pub struct CohereProvider {
    pub(crate) core: ProviderCore,
    pub(crate) capabilities: ProviderCapabilities,
}

impl CohereProvider {
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        let core = ProviderCore::new(
            "cohere",
            transport,
            Arc::new(BearerSigner::new(api_key)),
            DEFAULT_BASE_URL,
        );
        Self {
            core,
            capabilities: default_capabilities(),
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
        let body = build_cohere_body(request, Some(&model), Some(stream))?;
        Ok((alias, body))
    }
}

fn default_capabilities() -> ProviderCapabilities {
    ProviderCapabilities::new(CapabilitySet::chat_only().with_tools())
        .with_override("embed-", CapabilitySet::embeddings_only())
        .with_override("rerank-", CapabilitySet::default())
}

#[async_trait]
impl LLMProvider for CohereProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        let (alias, body) = self.prepare(&request, Operation::Chat, false)?;
        let value = self.core.post_json(self.endpoint("/chat"), &body).await?;
        let parsed: CohereChatResponse = parse_value(self.name(), value)?;
        Ok(map_response(parsed, &request, &alias))
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        let (alias, body) = self.prepare(&request, Operation::Streaming, true)?;
        let stream = self
            .core
            .open_stream(self.endpoint("/chat"), &body, "application/x-ndjson")
            .await?;
        Ok(decode_stream(
            stream,
            SseParser::ndjson(self.name()),
            CohereChunkDecoder::new(self.name()),
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
        let body = build_embed_body(&request, Some(&self.core.vendor_model(&alias)));
        let value = self.core.post_json(self.endpoint("/embed"), &body).await?;
        let parsed: CohereEmbedResponse = parse_value(self.name(), value)?;
        Ok(map_embeddings(parsed, &alias))
    }

    async fn verify_auth(&self) -> Result<(), LLMError> {
        let value = self
            .core
            .post_json(self.endpoint("/check-api-key"), &json!({}))
            .await?;
        let check: CohereKeyCheck = parse_value(self.name(), value)?;
        if !check.valid {
            return Err(LLMError::Auth {
                provider: self.name(),
                message: "API key reported as invalid".to_string(),
            });
        }
        info!(provider = self.name(), "credentials verified");
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, LLMError> {
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = self.endpoint("/models?page_size=1000");
            if let Some(token) = &page_token {
                url.push_str("&page_token=");
                url.push_str(token);
            }
            let value = self.core.get_json(url).await?;
            let mut parsed: CohereModelList = parse_value(self.name(), value)?;
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
        "cohere"
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
    fn endpoint_adds_version() {
        let provider = CohereProvider::new(Arc::new(NoNetwork), "k");
        assert_eq!(provider.endpoint("/chat"), "https://api.cohere.com/v1/chat");
        let provider = provider.with_base_url("http://proxy/v1");
        assert_eq!(provider.endpoint("/embed"), "http://proxy/v1/embed");
    }

    #[tokio::test]
    async fn chat_with_embed_model_is_rejected() {
        let provider = CohereProvider::new(Arc::new(NoNetwork), "k");
        let request = ChatRequest::new(
            "embed-english-v3.0",
            vec![crate::types::Message::user("hi")],
        );
        match provider.chat(request).await {
            Err(LLMError::UnsupportedOperation { operation, .. }) => {
                assert_eq!(operation, Operation::Chat)
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
