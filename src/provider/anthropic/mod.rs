//! Anthropic Messages API.
//!
//! The body builder, response mapper and stream decoder are shared with the
//! Bedrock `anthropic.*` model family, which wraps the same payloads.

pub mod provider;
pub(crate) mod request;
pub(crate) mod response;
pub(crate) mod stream;
pub(crate) mod types;

pub use provider::AnthropicProvider;
