//! Provider clients.
//!
//! Every vendor module follows the same layout: `provider.rs` holds the client
//! and its [`LLMProvider`] impl, `request.rs` builds vendor bodies, `response.rs`
//! maps vendor bodies back, `stream.rs` holds the chunk decoder and `types.rs`
//! the vendor wire structs.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::LLMError;
use crate::types::{
    ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, ImageRequest, ImageResponse,
    ModelInfo, Operation, ProviderCapabilities, VideoRequest, VideoResponse,
};

pub mod anthropic;
pub mod bedrock;
pub mod cohere;
pub mod google_gemini;
pub mod openai_compatible;
pub mod replicate;
pub mod shared;

pub use crate::stream::ChatStream;

/// Unified abstraction that every vendor client implements.
///
/// Operations a vendor lacks keep the default body, which fails with
/// [`LLMError::UnsupportedOperation`] without touching the network.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Sends a chat request and waits for the full completion.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError>;

    /// Sends a chat request and returns an ordered chunk stream that ends with
    /// exactly one finish-bearing chunk.
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, LLMError>;

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, LLMError> {
        Err(LLMError::unsupported(
            self.name(),
            Operation::Embeddings,
            Some(&request.model),
        ))
    }

    async fn generate_image(&self, request: ImageRequest) -> Result<ImageResponse, LLMError> {
        Err(LLMError::unsupported(
            self.name(),
            Operation::Image,
            Some(&request.model),
        ))
    }

    async fn generate_video(&self, request: VideoRequest) -> Result<VideoResponse, LLMError> {
        Err(LLMError::unsupported(
            self.name(),
            Operation::Video,
            Some(&request.model),
        ))
    }

    /// Issues the cheapest authenticated call the vendor offers.
    async fn verify_auth(&self) -> Result<(), LLMError>;

    async fn list_models(&self) -> Result<Vec<ModelInfo>, LLMError>;

    /// Operations supported per model.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Stable provider identifier used in logs and errors.
    fn name(&self) -> &'static str;
}

/// Shared handle to a provider implementation.
pub type DynProvider = Arc<dyn LLMProvider>;
