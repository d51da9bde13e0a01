//! Cohere v1 Chat, Embed and model catalogue.
//!
//! The body builder and stream decoder also serve the Bedrock `cohere.command-r*`
//! family.

pub mod provider;
pub(crate) mod request;
pub(crate) mod response;
pub(crate) mod stream;
pub(crate) mod types;

pub use provider::CohereProvider;
