//! Provider translation layer.
//!
//! One canonical chat, streaming, embedding, image and video contract
//! ([`LLMProvider`]) fanned out to heterogeneous upstream vendors. Each vendor
//! module maps canonical requests to its wire format and normalizes responses,
//! streams and errors back. Job-based vendors are driven by
//! [`poller::JobPoller`]; requests are authenticated by a
//! [`signing::RequestSigner`] and failures are mapped by [`classify`].
//!
//! ```no_run
//! use llm_relay::config::{Credential, ModelConfig, ProviderKind, build_client_from_configs};
//! use llm_relay::http::reqwest::default_dyn_transport;
//! use llm_relay::{ChatRequest, Message};
//!
//! # async fn run() -> Result<(), llm_relay::LLMError> {
//! let config: ModelConfig = serde_json::from_value(serde_json::json!({
//!     "handle": "claude",
//!     "provider": "anthropic",
//!     "credential": {"type": "api_key", "key": "sk-ant-..."},
//!     "default_model": "claude-3-5-haiku-latest"
//! }))
//! .map_err(|err| llm_relay::LLMError::validation(err.to_string()))?;
//! let client = build_client_from_configs(&[config], default_dyn_transport()?)?;
//! let reply = client
//!     .chat("claude", ChatRequest::new("", vec![Message::user("Hello")]))
//!     .await?;
//! println!("{:?}", reply.first_text());
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod poller;
pub mod provider;
pub mod signing;
pub mod stream;
pub mod types;

pub use client::LLMClient;
pub use error::{ErrorKind, LLMError};
pub use provider::{ChatStream, LLMProvider};
pub use types::*;
