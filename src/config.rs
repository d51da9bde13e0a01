use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::client::LLMClient;
use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::poller::PollerConfig;
use crate::provider::DynProvider;
use crate::provider::anthropic::AnthropicProvider;
use crate::provider::bedrock::BedrockProvider;
use crate::provider::cohere::CohereProvider;
use crate::provider::google_gemini::GoogleGeminiProvider;
use crate::provider::openai_compatible::{OpenAiCompatibleProvider, Preset};
use crate::provider::replicate::ReplicateProvider;
use crate::signing::AwsCredentials;
use crate::types::ProviderCapabilities;

/// One callable upstream, registered under `handle`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Caller-chosen handle, e.g. `default-openai`.
    pub handle: String,
    pub provider: ProviderKind,
    /// Vendor preset for [`ProviderKind::OpenAiCompatible`]; defaults to OpenAI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<Preset>,
    pub credential: Credential,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Caller-visible alias to vendor model id.
    #[serde(default)]
    pub model_aliases: HashMap<String, String>,
    /// Replaces the provider's built-in capability table.
    #[serde(default)]
    pub capabilities: Option<ProviderCapabilities>,
    /// Polling knobs for job-based operations.
    #[serde(default)]
    pub poll: Option<PollSettings>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Provider-specific settings such as `organization` or `anthropic_beta`.
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[serde(rename = "openai_compatible")]
    OpenAiCompatible,
    Anthropic,
    GoogleGemini,
    Cohere,
    Bedrock,
    Replicate,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAiCompatible => "openai_compatible",
            Self::Anthropic => "anthropic",
            Self::GoogleGemini => "google_gemini",
            Self::Cohere => "cohere",
            Self::Bedrock => "bedrock",
            Self::Replicate => "replicate",
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    ApiKey {
        key: String,
    },
    Bearer {
        token: String,
    },
    AwsSigV4 {
        access_key_id: String,
        secret_access_key: String,
        #[serde(default)]
        session_token: Option<String>,
        region: String,
    },
    /// Unauthenticated local endpoints.
    None,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey { .. } => f.write_str("ApiKey(..)"),
            Self::Bearer { .. } => f.write_str("Bearer(..)"),
            Self::AwsSigV4 { region, .. } => {
                f.debug_struct("AwsSigV4").field("region", region).finish_non_exhaustive()
            }
            Self::None => f.write_str("None"),
        }
    }
}

/// Poller timing in milliseconds; unset fields keep [`PollerConfig::default`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub initial_interval_ms: Option<u64>,
    pub max_interval_ms: Option<u64>,
    pub multiplier: Option<f64>,
    pub jitter: Option<f64>,
    pub max_duration_ms: Option<u64>,
    pub attempt_timeout_ms: Option<u64>,
    pub max_consecutive_errors: Option<u32>,
    pub linear_progress_attempts: Option<u32>,
    pub seed: Option<u64>,
}

impl PollSettings {
    pub fn to_config(&self) -> Result<PollerConfig, LLMError> {
        let defaults = PollerConfig::default();
        let millis = |value: Option<u64>, fallback: Duration| {
            value.map(Duration::from_millis).unwrap_or(fallback)
        };
        let config = PollerConfig {
            initial_interval: millis(self.initial_interval_ms, defaults.initial_interval),
            max_interval: millis(self.max_interval_ms, defaults.max_interval),
            multiplier: self.multiplier.unwrap_or(defaults.multiplier),
            jitter: self.jitter.unwrap_or(defaults.jitter),
            max_duration: millis(self.max_duration_ms, defaults.max_duration),
            attempt_timeout: millis(self.attempt_timeout_ms, defaults.attempt_timeout),
            max_consecutive_errors: self
                .max_consecutive_errors
                .unwrap_or(defaults.max_consecutive_errors),
            linear_progress_attempts: self
                .linear_progress_attempts
                .unwrap_or(defaults.linear_progress_attempts),
            seed: self.seed.or(defaults.seed),
        };

        if config.initial_interval.is_zero() {
            return Err(invalid("poll.initial_interval_ms", "must be positive"));
        }
        if config.max_interval < config.initial_interval {
            return Err(invalid(
                "poll.max_interval_ms",
                "must not be below initial_interval_ms",
            ));
        }
        if config.max_duration.is_zero() || config.attempt_timeout.is_zero() {
            return Err(invalid(
                "poll.max_duration_ms",
                "durations must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&config.jitter) {
            return Err(invalid("poll.jitter", "must be within 0.0 and 1.0"));
        }
        if !config.multiplier.is_finite() || config.multiplier < 1.0 {
            return Err(invalid("poll.multiplier", "must be a finite number of at least 1.0"));
        }
        Ok(config)
    }
}

fn invalid(field: &str, reason: &str) -> LLMError {
    LLMError::InvalidConfig {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Builds an [`LLMClient`] with one provider per config entry.
///
/// Fails without touching the network when a handle repeats or a credential
/// does not fit its provider.
pub fn build_client_from_configs(
    configs: &[ModelConfig],
    transport: DynHttpTransport,
) -> Result<LLMClient, LLMError> {
    let mut builder = LLMClient::builder();
    for config in configs {
        if builder.contains(&config.handle) {
            return Err(invalid(
                "handle",
                &format!("duplicate handle `{}`", config.handle),
            ));
        }
        let provider = build_provider_from_config(config, transport.clone())?;
        builder = builder.register_handle(config.handle.clone(), provider);
    }
    Ok(builder.build())
}

/// Applies the builder settings every provider shares.
macro_rules! apply_common {
    ($provider:expr, $config:expr) => {{
        let mut provider = $provider;
        if let Some(base_url) = &$config.base_url {
            provider = provider.with_base_url(base_url.clone());
        }
        if let Some(model) = &$config.default_model {
            provider = provider.with_default_model(model.clone());
        }
        for (alias, model) in &$config.model_aliases {
            provider = provider.with_model_alias(alias.clone(), model.clone());
        }
        if let Some(capabilities) = &$config.capabilities {
            provider = provider.with_capabilities(capabilities.clone());
        }
        if let Some(ms) = $config.timeout_ms {
            provider = provider.with_timeout(Duration::from_millis(ms));
        }
        provider
    }};
}

fn build_provider_from_config(
    config: &ModelConfig,
    transport: DynHttpTransport,
) -> Result<DynProvider, LLMError> {
    let kind = config.provider;
    let poller = config.poll.as_ref().map(PollSettings::to_config).transpose()?;
    if poller.is_some() && !matches!(kind, ProviderKind::GoogleGemini | ProviderKind::Replicate) {
        warn!(handle = %config.handle, provider = kind.as_str(), "poll settings ignored");
    }

    let provider: DynProvider = match kind {
        ProviderKind::OpenAiCompatible => {
            let preset = config.preset.unwrap_or(Preset::OpenAi);
            let key = match &config.credential {
                Credential::None if config.base_url.is_some() => String::new(),
                other => extract_api_key(other, kind)?,
            };
            let mut provider =
                apply_common!(OpenAiCompatibleProvider::new(transport, preset, key), config);
            if let Some(org) = extra_str(config, "organization") {
                provider = provider.with_header("OpenAI-Organization", org);
            }
            if let Some(project) = extra_str(config, "project") {
                provider = provider.with_header("OpenAI-Project", project);
            }
            Arc::new(provider)
        }
        ProviderKind::Anthropic => {
            let key = extract_api_key(&config.credential, kind)?;
            let mut provider = apply_common!(AnthropicProvider::new(transport, key), config);
            if let Some(version) = extra_str(config, "anthropic_version") {
                provider = provider.with_version(version);
            }
            if let Some(beta) = extra_str(config, "anthropic_beta") {
                provider = provider.with_beta(beta);
            }
            Arc::new(provider)
        }
        ProviderKind::GoogleGemini => {
            let key = extract_api_key(&config.credential, kind)?;
            let mut provider = apply_common!(GoogleGeminiProvider::new(transport, key), config);
            if let Some(poller) = poller {
                provider = provider.with_poller_config(poller);
            }
            Arc::new(provider)
        }
        ProviderKind::Cohere => {
            let key = extract_api_key(&config.credential, kind)?;
            Arc::new(apply_common!(CohereProvider::new(transport, key), config))
        }
        ProviderKind::Bedrock => {
            let Credential::AwsSigV4 {
                access_key_id,
                secret_access_key,
                session_token,
                region,
            } = &config.credential
            else {
                return Err(LLMError::Auth {
                    provider: kind.as_str(),
                    message: "bedrock requires an aws_sig_v4 credential".to_string(),
                });
            };
            if region.trim().is_empty() {
                return Err(invalid("credential.region", "must not be empty"));
            }
            let credentials = AwsCredentials {
                access_key_id: access_key_id.clone(),
                secret_access_key: secret_access_key.clone(),
                session_token: session_token.clone(),
                region: region.clone(),
            };
            let mut provider = apply_common!(BedrockProvider::new(transport, credentials), config);
            if let Some(control) = extra_str(config, "control_base_url") {
                provider = provider.with_control_base_url(control);
            }
            Arc::new(provider)
        }
        ProviderKind::Replicate => {
            let key = extract_api_key(&config.credential, kind)?;
            let mut provider = apply_common!(ReplicateProvider::new(transport, key), config);
            if let Some(poller) = poller {
                provider = provider.with_poller_config(poller);
            }
            Arc::new(provider)
        }
    };
    Ok(provider)
}

fn extra_str(config: &ModelConfig, key: &str) -> Option<String> {
    match config.extra.get(key) {
        Some(Value::String(value)) => Some(value.clone()),
        _ => None,
    }
}

fn extract_api_key(credential: &Credential, kind: ProviderKind) -> Result<String, LLMError> {
    match credential {
        Credential::ApiKey { key } => Ok(key.clone()),
        Credential::Bearer { token } => Ok(token.clone()),
        Credential::AwsSigV4 { .. } => Err(LLMError::Auth {
            provider: kind.as_str(),
            message: "aws_sig_v4 credentials are only valid for bedrock".to_string(),
        }),
        Credential::None => Err(LLMError::Auth {
            provider: kind.as_str(),
            message: "a credential is required".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::reqwest::default_dyn_transport;
    use crate::types::Operation;
    use serde_json::json;

    fn config(handle: &str, provider: ProviderKind, credential: Credential) -> ModelConfig {
        ModelConfig {
            handle: handle.to_string(),
            provider,
            preset: None,
            credential,
            default_model: None,
            base_url: None,
            model_aliases: HashMap::new(),
            capabilities: None,
            poll: None,
            timeout_ms: None,
            extra: HashMap::new(),
        }
    }

    fn api_key(key: &str) -> Credential {
        Credential::ApiKey {
            key: key.to_string(),
        }
    }

    #[test]
    fn build_client_from_configs_supports_all_providers() {
        let transport = default_dyn_transport().expect("transport");
        let configs = vec![
            config("openai", ProviderKind::OpenAiCompatible, api_key("sk")),
            config("claude", ProviderKind::Anthropic, api_key("ak")),
            config("gemini", ProviderKind::GoogleGemini, api_key("gk")),
            config("cohere", ProviderKind::Cohere, Credential::Bearer { token: "ck".into() }),
            config(
                "bedrock",
                ProviderKind::Bedrock,
                Credential::AwsSigV4 {
                    access_key_id: "AKID".into(),
                    secret_access_key: "secret".into(),
                    session_token: None,
                    region: "us-west-2".into(),
                },
            ),
            config("replicate", ProviderKind::Replicate, api_key("r8")),
        ];

        let client = build_client_from_configs(&configs, transport).expect("client");
        let mut handles = client.handles();
        handles.sort();
        assert_eq!(
            handles,
            vec!["bedrock", "claude", "cohere", "gemini", "openai", "replicate"]
        );
        let mut video = client.handles_supporting(Operation::Video);
        video.sort();
        assert_eq!(video, vec!["gemini", "replicate"]);
    }

    #[test]
    fn credential_mismatch_fails_before_io() {
        let transport = default_dyn_transport().expect("transport");
        let bedrock = config("b", ProviderKind::Bedrock, api_key("k"));
        assert!(matches!(
            build_client_from_configs(&[bedrock], transport.clone()),
            Err(LLMError::Auth { provider: "bedrock", .. })
        ));

        let anthropic = config("a", ProviderKind::Anthropic, Credential::None);
        assert!(matches!(
            build_client_from_configs(&[anthropic], transport.clone()),
            Err(LLMError::Auth { .. })
        ));

        let mut local = config("local", ProviderKind::OpenAiCompatible, Credential::None);
        local.base_url = Some("http://localhost:8000/v1".into());
        assert!(build_client_from_configs(&[local], transport).is_ok());
    }

    #[test]
    fn duplicate_handles_are_rejected() {
        let transport = default_dyn_transport().expect("transport");
        let configs = vec![
            config("x", ProviderKind::Cohere, api_key("a")),
            config("x", ProviderKind::Anthropic, api_key("b")),
        ];
        match build_client_from_configs(&configs, transport) {
            Err(LLMError::InvalidConfig { field, .. }) => assert_eq!(field, "handle"),
            other => panic!("unexpected result: {:?}", other.map(|c| c.handles())),
        }
    }

    #[test]
    fn configs_deserialize_from_json() {
        let parsed: ModelConfig = serde_json::from_value(json!({
            "handle": "llama",
            "provider": "openai_compatible",
            "preset": "groq",
            "credential": {"type": "bearer", "token": "gsk"},
            "model_aliases": {"fast": "llama-3.1-8b-instant"},
            "poll": {"initial_interval_ms": 250, "seed": 7},
            "extra": {"organization": "org-1"}
        }))
        .expect("config");
        assert_eq!(parsed.preset, Some(Preset::Groq));
        assert_eq!(parsed.model_aliases["fast"], "llama-3.1-8b-instant");
        let poll = parsed.poll.expect("poll").to_config().expect("poller");
        assert_eq!(poll.initial_interval, Duration::from_millis(250));
        assert_eq!(poll.seed, Some(7));
        assert_eq!(poll.max_interval, PollerConfig::default().max_interval);
    }

    #[test]
    fn out_of_range_jitter_and_multiplier_are_invalid() {
        for (jitter, multiplier, field) in [
            (1e300, 1.5, "poll.jitter"),
            (1.5, 1.5, "poll.jitter"),
            (f64::NAN, 1.5, "poll.jitter"),
            (0.1, f64::INFINITY, "poll.multiplier"),
            (0.1, 0.5, "poll.multiplier"),
        ] {
            let settings = PollSettings {
                jitter: Some(jitter),
                multiplier: Some(multiplier),
                ..PollSettings::default()
            };
            match settings.to_config() {
                Err(LLMError::InvalidConfig { field: got, .. }) => assert_eq!(got, field),
                other => panic!("jitter {jitter} multiplier {multiplier}: {other:?}"),
            }
        }
    }

    #[test]
    fn serde_names_match_as_str() {
        for kind in [
            ProviderKind::OpenAiCompatible,
            ProviderKind::Anthropic,
            ProviderKind::GoogleGemini,
            ProviderKind::Cohere,
            ProviderKind::Bedrock,
            ProviderKind::Replicate,
        ] {
            assert_eq!(serde_json::to_value(kind).expect("kind"), json!(kind.as_str()));
        }
        for preset in [
            Preset::OpenAi,
            Preset::Groq,
            Preset::Together,
            Preset::Fireworks,
            Preset::DeepInfra,
            Preset::Mistral,
            Preset::Perplexity,
            Preset::Xai,
            Preset::OpenRouter,
            Preset::DeepSeek,
            Preset::Cerebras,
        ] {
            let encoded = serde_json::to_value(preset).expect("preset");
            assert_eq!(encoded, json!(preset.name()));
            let decoded: Preset = serde_json::from_value(encoded).expect("round trip");
            assert_eq!(decoded, preset);
        }
    }

    #[test]
    fn inconsistent_poll_settings_are_invalid() {
        let settings = PollSettings {
            initial_interval_ms: Some(5_000),
            max_interval_ms: Some(1_000),
            ..PollSettings::default()
        };
        match settings.to_config() {
            Err(LLMError::InvalidConfig { field, .. }) => assert_eq!(field, "poll.max_interval_ms"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
