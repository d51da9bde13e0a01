//! Amazon Bedrock `InvokeModel` runtime.
//!
//! Bedrock hosts several model families behind one SigV4-signed endpoint, each
//! with its own body schema. The family is picked from the vendor model id; the
//! Anthropic and Cohere families reuse those vendors' mappers.

pub mod provider;
pub(crate) mod request;
pub(crate) mod response;
pub(crate) mod stream;
pub(crate) mod types;

pub use provider::BedrockProvider;
pub use types::ModelFamily;
