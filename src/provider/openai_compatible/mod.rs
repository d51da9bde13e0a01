//! OpenAI-compatible chat completions, embeddings, images and model listing.
//!
//! One client serves every vendor that speaks the OpenAI wire format; a
//! [`Preset`] supplies the base URL and the small per-vendor differences.

pub mod provider;
pub(crate) mod request;
pub(crate) mod response;
pub(crate) mod stream;
pub(crate) mod types;

pub use provider::{OpenAiCompatibleProvider, Preset};
