//! Google Gemini: GenerateContent chat, batch embeddings, Imagen images and Veo
//! video through long-running operations.

pub(crate) mod operation;
pub mod provider;
pub(crate) mod request;
pub(crate) mod response;
pub(crate) mod stream;
pub(crate) mod types;

pub use provider::GoogleGeminiProvider;
