use std::collections::HashMap;

use tracing::debug;

use crate::error::LLMError;
use crate::provider::{ChatStream, DynProvider};
use crate::types::{
    ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, ImageRequest, ImageResponse,
    ModelInfo, Operation, ProviderCapabilities, VideoRequest, VideoResponse,
};

/// Entry point: a registry of providers keyed by caller-chosen handles.
///
/// Each call first checks that the provider offers the operation for at least
/// one model and fails with [`LLMError::UnsupportedOperation`] otherwise; the
/// provider then applies its per-model table.
pub struct LLMClient {
    providers: HashMap<String, DynProvider>,
}

impl LLMClient {
    pub fn builder() -> LLMClientBuilder {
        LLMClientBuilder {
            providers: HashMap::new(),
        }
    }

    pub async fn chat(&self, handle: &str, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        let provider = self.dispatch(handle, Operation::Chat, &request.model)?;
        if !request.tools.is_empty() {
            self.ensure_offered(&provider, Operation::FunctionCalling, &request.model)?;
        }
        provider.chat(request).await
    }

    pub async fn stream_chat(
        &self,
        handle: &str,
        request: ChatRequest,
    ) -> Result<ChatStream, LLMError> {
        let provider = self.dispatch(handle, Operation::Streaming, &request.model)?;
        if !request.tools.is_empty() {
            self.ensure_offered(&provider, Operation::FunctionCalling, &request.model)?;
        }
        provider.stream_chat(request).await
    }

    pub async fn embed(
        &self,
        handle: &str,
        request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, LLMError> {
        let provider = self.dispatch(handle, Operation::Embeddings, &request.model)?;
        provider.embed(request).await
    }

    pub async fn generate_image(
        &self,
        handle: &str,
        request: ImageRequest,
    ) -> Result<ImageResponse, LLMError> {
        let provider = self.dispatch(handle, Operation::Image, &request.model)?;
        provider.generate_image(request).await
    }

    pub async fn generate_video(
        &self,
        handle: &str,
        request: VideoRequest,
    ) -> Result<VideoResponse, LLMError> {
        let provider = self.dispatch(handle, Operation::Video, &request.model)?;
        provider.generate_video(request).await
    }

    pub async fn verify_auth(&self, handle: &str) -> Result<(), LLMError> {
        self.get_provider(handle)?.verify_auth().await
    }

    pub async fn list_models(&self, handle: &str) -> Result<Vec<ModelInfo>, LLMError> {
        self.get_provider(handle)?.list_models().await
    }

    /// Registered handles.
    pub fn handles(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    pub fn capabilities(&self, handle: &str) -> Result<ProviderCapabilities, LLMError> {
        let provider = self.get_provider(handle)?;
        Ok(provider.capabilities())
    }

    /// Handles whose provider offers `operation` for at least one model.
    pub fn handles_supporting(&self, operation: Operation) -> Vec<String> {
        self.providers
            .iter()
            .filter(|(_, provider)| offers(&provider.capabilities(), operation))
            .map(|(handle, _)| handle.clone())
            .collect()
    }

    fn dispatch(
        &self,
        handle: &str,
        operation: Operation,
        model: &str,
    ) -> Result<DynProvider, LLMError> {
        let provider = self.get_provider(handle)?;
        self.ensure_offered(&provider, operation, model)?;
        debug!(handle, provider = provider.name(), %operation, model, "dispatching");
        Ok(provider)
    }

    fn ensure_offered(
        &self,
        provider: &DynProvider,
        operation: Operation,
        model: &str,
    ) -> Result<(), LLMError> {
        if offers(&provider.capabilities(), operation) {
            Ok(())
        } else {
            let model = (!model.is_empty()).then_some(model);
            Err(LLMError::unsupported(provider.name(), operation, model))
        }
    }

    fn get_provider(&self, handle: &str) -> Result<DynProvider, LLMError> {
        self.providers
            .get(handle)
            .cloned()
            .ok_or_else(|| LLMError::Validation {
                message: format!("unknown model handle: {handle}"),
            })
    }
}

fn offers(capabilities: &ProviderCapabilities, operation: Operation) -> bool {
    capabilities.default.supports(operation)
        || capabilities
            .overrides
            .iter()
            .any(|(_, set)| set.supports(operation))
}

pub struct LLMClientBuilder {
    providers: HashMap<String, DynProvider>,
}

impl LLMClientBuilder {
    /// Registers `provider` under `handle`, replacing any previous registration.
    pub fn register_handle<S: Into<String>>(mut self, handle: S, provider: DynProvider) -> Self {
        self.providers.insert(handle.into(), provider);
        self
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.providers.contains_key(handle)
    }

    pub fn build(self) -> LLMClient {
        LLMClient {
            providers: self.providers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::LLMProvider;
    use crate::types::{CapabilitySet, Message};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls that reach the provider.
    struct DummyProvider {
        name: &'static str,
        caps: ProviderCapabilities,
        calls: AtomicUsize,
    }

    impl DummyProvider {
        fn new(name: &'static str, caps: ProviderCapabilities) -> Arc<Self> {
            Arc::new(Self {
                name,
                caps,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LLMProvider for DummyProvider {
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, LLMError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(LLMError::validation("dummy chat"))
        }

        async fn stream_chat(&self, _request: ChatRequest) -> Result<ChatStream, LLMError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(LLMError::validation("dummy stream"))
        }

        async fn verify_auth(&self) -> Result<(), LLMError> {
            Ok(())
        }

        async fn list_models(&self) -> Result<Vec<ModelInfo>, LLMError> {
            Ok(vec![ModelInfo::new("m", self.name)])
        }

        fn capabilities(&self) -> ProviderCapabilities {
            self.caps.clone()
        }

        fn name(&self) -> &'static str {
            self.name
        }
    }

    #[test]
    fn capabilities_returns_error_for_unknown_handle() {
        let client = LLMClient::builder().build();
        match client.capabilities("missing") {
            Err(LLMError::Validation { message }) => {
                assert!(message.contains("missing"), "unexpected message: {message}")
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unsupported_operation_never_reaches_provider() {
        let chat = DummyProvider::new("chat", ProviderCapabilities::new(CapabilitySet::chat_only()));
        let client = LLMClient::builder()
            .register_handle("c", chat.clone() as DynProvider)
            .build();

        let embed = EmbeddingRequest::new("m", vec!["x".into()]);
        match client.embed("c", embed).await {
            Err(LLMError::UnsupportedOperation { operation, .. }) => {
                assert_eq!(operation, Operation::Embeddings)
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let mut request = ChatRequest::new("m", vec![Message::user("hi")]);
        request.tools.push(crate::types::ToolDefinition {
            name: "lookup".into(),
            description: None,
            parameters: None,
        });
        assert!(matches!(
            client.chat("c", request).await,
            Err(LLMError::UnsupportedOperation {
                operation: Operation::FunctionCalling,
                ..
            })
        ));
        assert_eq!(chat.calls.load(Ordering::SeqCst), 0);

        let plain = ChatRequest::new("m", vec![Message::user("hi")]);
        assert!(matches!(
            client.chat("c", plain).await,
            Err(LLMError::Validation { .. })
        ));
        assert_eq!(chat.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handles_supporting_considers_overrides() {
        let mixed = ProviderCapabilities::new(CapabilitySet::chat_only())
            .with_override("embed-", CapabilitySet::embeddings_only());
        let client = LLMClient::builder()
            .register_handle("mixed", DummyProvider::new("p1", mixed) as DynProvider)
            .register_handle(
                "chat",
                DummyProvider::new("p2", ProviderCapabilities::new(CapabilitySet::chat_only()))
                    as DynProvider,
            )
            .build();

        assert_eq!(client.handles_supporting(Operation::Embeddings), vec!["mixed"]);
        let mut streaming = client.handles_supporting(Operation::Streaming);
        streaming.sort();
        assert_eq!(streaming, vec!["chat", "mixed"]);
    }
}
