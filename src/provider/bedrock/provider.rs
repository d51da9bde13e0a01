use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::classify::embedded_error;
use crate::error::LLMError;
use crate::http::{DynHttpTransport, HttpRequest};
use crate::provider::anthropic::stream::AnthropicChunkDecoder;
use crate::provider::cohere;
use crate::provider::cohere::stream::CohereChunkDecoder;
use crate::provider::shared::{
    ProviderCore, ensure_chat_supported, ensure_supported, new_chunk_id, now_unix, parse_value,
};
use crate::provider::{ChatStream, LLMProvider};
use crate::signing::sigv4::uri_encode;
use crate::signing::{AwsCredentials, SigV4Signer};
use crate::stream::{ChunkContext, EventStreamParser, GenericChunkDecoder, decode_stream};
use crate::types::{
    CapabilitySet, ChatRequest, ChatResponse, Embedding, EmbeddingRequest, EmbeddingResponse,
    ImageRequest, ImageResponse, ModelInfo, Operation, ProviderCapabilities, Usage,
};

use super::request::{build_chat_body, build_image_body, build_titan_embed_body};
use super::response::{map_chat_response, map_images, map_models};
use super::stream::{MistralChunkDecoder, TitanChunkDecoder};
use super::types::{
    FoundationModelList, ImageArtifacts, ModelFamily, TitanEmbedResponse, strip_profile,
};

const INPUT_TOKENS_HEADER: &str = "x-amzn-bedrock-input-token-count";
const OUTPUT_TOKENS_HEADER: &str = "x-amzn-bedrock-output-token-count";

/// Amazon Bedrock provider, signed with SigV4 for service `bedrock`.
pub struct BedrockProvider {
    pub(crate) core: ProviderCore,
    /// Control-plane endpoint serving the foundation model catalogue.
    pub(crate) control_base_url: String,
    pub(crate) capabilities: ProviderCapabilities,
}

impl BedrockProvider {
    pub fn new(transport: DynHttpTransport, credentials: AwsCredentials) -> Self {
        let region = credentials.region.clone();
        let core = ProviderCore::new(
            "bedrock",
            transport,
            Arc::new(SigV4Signer::new(credentials, "bedrock")),
            format!("https://bedrock-runtime.{region}.amazonaws.com"),
        );
        Self {
            core,
            control_base_url: format!("https://bedrock.{region}.amazonaws.com"),
            capabilities: default_capabilities(),
        }
    }

    /// Overrides the runtime endpoint (`bedrock-runtime`).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.core.base_url = base_url.into();
        self
    }

    pub fn with_control_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.control_base_url = base_url.into();
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

    pub(crate) fn invoke_url(&self, model_id: &str, streaming: bool) -> String {
        let action = if streaming {
            "invoke-with-response-stream"
        } else {
            "invoke"
        };
        format!("{}/model/{}/{action}", self.core.base(), uri_encode(model_id))
    }

    fn models_url(&self) -> String {
        format!(
            "{}/foundation-models",
            self.control_base_url.trim_end_matches('/')
        )
    }

    /// Resolves the alias and checks `operation` against it, ignoring any
    /// inference-profile prefix.
    fn resolve(&self, requested: &str, operation: Operation) -> Result<(String, String), LLMError> {
        let alias = self.core.resolve_alias(requested)?;
        ensure_supported(self.name(), &self.capabilities, strip_profile(&alias), operation)?;
        let model = self.core.vendor_model(&alias);
        Ok((alias, model))
    }

    /// One `InvokeModel` call; returns the JSON body and header-reported usage.
    async fn invoke(&self, model_id: &str, body: &Value) -> Result<(Value, Option<Usage>), LLMError> {
        let request = HttpRequest::json(self.invoke_url(model_id, false), body)?
            .with_header("Accept", "application/json");
        let response = self.core.send(request).await?;
        let usage = header_usage(&response.headers);
        let value: Value = serde_json::from_slice(&response.body).map_err(|err| {
            LLMError::decode(self.name(), format!("failed to parse response body: {err}"))
        })?;
        if let Some(err) = embedded_error(self.name(), &value) {
            return Err(err);
        }
        Ok((value, usage))
    }
}

fn default_capabilities() -> ProviderCapabilities {
    ProviderCapabilities::new(CapabilitySet::chat_only())
        .with_override("anthropic.", CapabilitySet::chat_only().with_tools())
        .with_override("cohere.command-r", CapabilitySet::chat_only().with_tools())
        .with_override("cohere.embed", CapabilitySet::embeddings_only())
        .with_override("amazon.titan-embed", CapabilitySet::embeddings_only())
        .with_override("amazon.titan-image", CapabilitySet::image_only())
        .with_override("amazon.nova-canvas", CapabilitySet::image_only())
        .with_override("stability.", CapabilitySet::image_only())
}

fn header_usage(headers: &HashMap<String, String>) -> Option<Usage> {
    let lookup = |name: &str| {
        headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, value)| value.trim().parse::<u64>().ok())
    };
    let input = lookup(INPUT_TOKENS_HEADER)?;
    Some(Usage::new(input, lookup(OUTPUT_TOKENS_HEADER).unwrap_or(0)))
}

#[async_trait]
impl LLMProvider for BedrockProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        let (alias, model) = self.resolve(&request.model, Operation::Chat)?;
        ensure_chat_supported(
            self.name(),
            &self.capabilities,
            &request,
            strip_profile(&alias),
            Operation::Chat,
        )?;
        let family = ModelFamily::detect(&model);
        let body = build_chat_body(family, &request)?;
        let (value, usage) = self.invoke(&model, &body).await?;
        map_chat_response(self.name(), family, value, &request, &alias, usage)
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        let (alias, model) = self.resolve(&request.model, Operation::Streaming)?;
        ensure_chat_supported(
            self.name(),
            &self.capabilities,
            &request,
            strip_profile(&alias),
            Operation::Streaming,
        )?;
        let family = ModelFamily::detect(&model);
        let body = build_chat_body(family, &request)?;
        debug!(provider = self.name(), ?family, model = %model, "opening response stream");
        let stream = self
            .core
            .open_stream(
                self.invoke_url(&model, true),
                &body,
                "application/vnd.amazon.eventstream",
            )
            .await?;

        let parser = EventStreamParser::new(self.name());
        let context = ChunkContext::new(new_chunk_id(), now_unix(), alias);
        let name = self.name();
        Ok(match family {
            ModelFamily::Anthropic => {
                decode_stream(stream, parser, AnthropicChunkDecoder::new(name), context, name)
            }
            ModelFamily::Cohere => {
                decode_stream(stream, parser, CohereChunkDecoder::new(name), context, name)
            }
            ModelFamily::Mistral => {
                decode_stream(stream, parser, MistralChunkDecoder, context, name)
            }
            ModelFamily::Titan => decode_stream(stream, parser, TitanChunkDecoder, context, name),
            // Legacy Cohere chunks carry top-level `text` and `finish_reason`.
            _ => decode_stream(stream, parser, GenericChunkDecoder, context, name),
        })
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, LLMError> {
        let (alias, model) = self.resolve(&request.model, Operation::Embeddings)?;
        if request.input.is_empty() {
            return Err(LLMError::validation("embedding input must not be empty"));
        }
        match ModelFamily::detect(&model) {
            ModelFamily::TitanEmbed => {
                let mut data = Vec::with_capacity(request.input.len());
                let mut prompt_tokens = 0;
                for (index, text) in request.input.iter().enumerate() {
                    let body = build_titan_embed_body(text, &request);
                    let (value, usage) = self.invoke(&model, &body).await?;
                    let parsed: TitanEmbedResponse = parse_value(self.name(), value)?;
                    prompt_tokens += parsed
                        .input_text_token_count
                        .or(usage.map(|u| u.prompt_tokens))
                        .unwrap_or(0);
                    data.push(Embedding::new(index, parsed.embedding));
                }
                Ok(EmbeddingResponse::new(
                    &alias,
                    data,
                    Usage::new(prompt_tokens, 0),
                ))
            }
            ModelFamily::CohereEmbed => {
                let body = cohere::request::build_embed_body(&request, None);
                let (value, usage) = self.invoke(&model, &body).await?;
                let parsed = parse_value(self.name(), value)?;
                let mut mapped = cohere::response::map_embeddings(parsed, &alias);
                if mapped.usage.prompt_tokens == 0 {
                    if let Some(usage) = usage {
                        mapped.usage = Usage::new(usage.prompt_tokens, 0);
                    }
                }
                Ok(mapped)
            }
            _ => Err(LLMError::unsupported(
                self.name(),
                Operation::Embeddings,
                Some(&alias),
            )),
        }
    }

    async fn generate_image(&self, request: ImageRequest) -> Result<ImageResponse, LLMError> {
        let (_, model) = self.resolve(&request.model, Operation::Image)?;
        let body = build_image_body(ModelFamily::detect(&model), &request)?;
        let (value, _) = self.invoke(&model, &body).await?;
        let artifacts: ImageArtifacts = parse_value(self.name(), value)?;
        map_images(self.name(), artifacts, request.response_format)
    }

    async fn verify_auth(&self) -> Result<(), LLMError> {
        self.core.get_json(self.models_url()).await?;
        info!(provider = self.name(), "credentials verified");
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, LLMError> {
        let value = self.core.get_json(self.models_url()).await?;
        let parsed: FoundationModelList = parse_value(self.name(), value)?;
        Ok(map_models(parsed))
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities.clone()
    }

    fn name(&self) -> &'static str {
        "bedrock"
    }
}
