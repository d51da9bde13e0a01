use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::types::Operation;

/// Fixed classification vocabulary shared by every provider.
///
/// [`crate::classify::classify`] maps raw upstream failures onto the first eight
/// kinds; `Timeout` and `Canceled` only arise from the poller and stream wrappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unauthorized,
    RateLimited,
    QuotaExceeded,
    ModelUnavailable,
    ValidationFailed,
    ServerUnavailable,
    CommunicationFailure,
    Unsupported,
    Timeout,
    Canceled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unauthorized => "unauthorized",
            Self::RateLimited => "rate_limited",
            Self::QuotaExceeded => "quota_exceeded",
            Self::ModelUnavailable => "model_unavailable",
            Self::ValidationFailed => "validation_failed",
            Self::ServerUnavailable => "server_unavailable",
            Self::CommunicationFailure => "communication_failure",
            Self::Unsupported => "unsupported",
            Self::Timeout => "timeout",
            Self::Canceled => "canceled",
        };
        f.write_str(label)
    }
}

/// Aggregates every failure mode surfaced by the provider layer.
///
/// Each variant corresponds to exactly one [`ErrorKind`]; callers decide whether to
/// retry, fall back to another provider, or surface the message by matching on the
/// variant or on [`LLMError::kind`].
#[derive(Debug, Error)]
pub enum LLMError {
    /// Invalid, expired, or missing credentials.
    #[error("authentication failed ({provider}): {message}")]
    Auth {
        provider: &'static str,
        message: String,
    },
    /// The vendor throttled the request.
    #[error("rate limited ({provider}): {message}")]
    RateLimit {
        provider: &'static str,
        /// Raw message returned by the upstream provider.
        message: String,
        /// Optional wait duration suggested by the provider before retrying.
        retry_after: Option<Duration>,
    },
    /// Account-level quota or billing limit reached.
    #[error("quota exceeded ({provider}): {message}")]
    QuotaExceeded {
        provider: &'static str,
        message: String,
    },
    /// The prompt or requested completion exceeds the model's token budget.
    #[error("token limit exceeded: {message}")]
    TokenLimitExceeded {
        /// Raw message returned by the provider, kept verbatim for debugging.
        message: String,
        /// Estimated tokens in the request, if known.
        estimated: Option<usize>,
        /// Reported limit communicated by the provider, if available.
        limit: Option<usize>,
    },
    /// The requested model does not exist or is not enabled for the account.
    #[error("model unavailable ({provider}): {message}")]
    ModelUnavailable {
        provider: &'static str,
        /// Model identifier extracted from the error payload when available.
        model: Option<String>,
        message: String,
    },
    /// Bad request shape or parameters.
    #[error("invalid request: {message}")]
    Validation { message: String },
    /// The provider/model combination does not offer the requested operation.
    #[error("operation {operation} is not supported by {provider}{}", model_suffix(.model))]
    UnsupportedOperation {
        provider: &'static str,
        operation: Operation,
        model: Option<String>,
    },
    /// The vendor answered 405/501 for an endpoint it does not implement.
    #[error("not implemented upstream ({provider}, status {status}): {message}")]
    NotImplemented {
        provider: &'static str,
        status: u16,
        message: String,
    },
    /// The vendor reported a 5xx or an overloaded condition.
    #[error("server unavailable ({provider}, status {status}): {message}")]
    ServerUnavailable {
        provider: &'static str,
        status: u16,
        message: String,
        /// Raw upstream body kept for diagnostics.
        body: Option<String>,
    },
    /// Network, transport, or deserialization failure.
    #[error("communication failure ({provider}): {message}")]
    Communication {
        provider: &'static str,
        message: String,
        /// HTTP status when the failure came from an upstream response.
        status: Option<u16>,
        /// Raw upstream body kept for diagnostics.
        body: Option<String>,
    },
    /// A polling sequence or request exceeded its deadline.
    #[error("timed out after {elapsed:?}: {message}")]
    Timeout { message: String, elapsed: Duration },
    /// A job-based vendor reported a terminal failure or cancellation.
    #[error("upstream job {job_id} failed ({provider}): {message}")]
    UpstreamJobFailed {
        provider: &'static str,
        job_id: String,
        message: String,
    },
    /// The caller cancelled the operation.
    #[error("request aborted: {message}")]
    Aborted { message: String },
    /// Raised when building or validating configuration fails.
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig {
        /// Name of the configuration field that failed validation.
        field: String,
        /// Additional context explaining why the field is invalid.
        reason: String,
    },
}

fn model_suffix(model: &Option<String>) -> String {
    model
        .as_deref()
        .map(|m| format!(" (model {m})"))
        .unwrap_or_default()
}

impl LLMError {
    /// Creates an [`LLMError::Communication`] for transport-level failures.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_relay::error::{ErrorKind, LLMError};
    ///
    /// let err = LLMError::transport("http", "dns lookup failed");
    /// assert_eq!(err.kind(), ErrorKind::CommunicationFailure);
    /// ```
    pub fn transport<T: Into<String>>(provider: &'static str, message: T) -> Self {
        Self::Communication {
            provider,
            message: message.into(),
            status: None,
            body: None,
        }
    }

    /// Creates an [`LLMError::Communication`] for payloads the mapper could not decode.
    pub fn decode<T: Into<String>>(provider: &'static str, message: T) -> Self {
        Self::Communication {
            provider,
            message: message.into(),
            status: None,
            body: None,
        }
    }

    /// Creates an [`LLMError::Validation`] from a message.
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::UnsupportedOperation`].
    pub fn unsupported(provider: &'static str, operation: Operation, model: Option<&str>) -> Self {
        Self::UnsupportedOperation {
            provider,
            operation,
            model: model.map(str::to_string),
        }
    }

    /// Returns the classification bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth { .. } => ErrorKind::Unauthorized,
            Self::RateLimit { .. } => ErrorKind::RateLimited,
            Self::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            Self::TokenLimitExceeded { .. } | Self::Validation { .. } => {
                ErrorKind::ValidationFailed
            }
            Self::ModelUnavailable { .. } => ErrorKind::ModelUnavailable,
            Self::UnsupportedOperation { .. } | Self::NotImplemented { .. } => {
                ErrorKind::Unsupported
            }
            Self::ServerUnavailable { .. } => ErrorKind::ServerUnavailable,
            Self::Communication { .. } | Self::UpstreamJobFailed { .. } => {
                ErrorKind::CommunicationFailure
            }
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Aborted { .. } => ErrorKind::Canceled,
            Self::InvalidConfig { .. } => ErrorKind::ValidationFailed,
        }
    }

    /// Whether a poll loop may keep going after this error.
    ///
    /// Transport failures, 5xx responses and per-attempt timeouts are transient;
    /// rate limiting is handled separately by the poller.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Communication { .. } | Self::ServerUnavailable { .. } | Self::Timeout { .. }
        )
    }

    /// HTTP status attached to the error, when there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ServerUnavailable { status, .. } | Self::NotImplemented { status, .. } => {
                Some(*status)
            }
            Self::Communication { status, .. } => *status,
            _ => None,
        }
    }
}

/// Returns `true` when an error code or message suggests a context/window overflow.
pub(crate) fn looks_like_token_limit_error(code_hint: Option<&str>, message: &str) -> bool {
    if let Some(code) = code_hint {
        let lower = code.to_ascii_lowercase();
        if matches!(
            lower.as_str(),
            "context_length_exceeded"
                | "max_context_length_exceeded"
                | "prompt_tokens_exceeded"
                | "context_window_exceeded"
        ) || lower.contains("token")
        {
            return true;
        }
    }

    let lower_message = message.to_ascii_lowercase();
    const HINTS: [&str; 9] = [
        "context length",
        "context window",
        "token limit",
        "maximum output tokens",
        "max output tokens",
        "prompt is too long",
        "too many tokens",
        "maximum context",
        "input is too long",
    ];
    HINTS.iter().any(|needle| lower_message.contains(needle))
}

/// Returns `true` when a message points at an unknown or disabled model.
pub(crate) fn looks_like_model_error(code_hint: Option<&str>, message: &str) -> bool {
    if let Some(code) = code_hint {
        let lower = code.to_ascii_lowercase();
        if matches!(
            lower.as_str(),
            "model_not_found" | "not_found" | "resourcenotfoundexception" | "invalid_model"
        ) {
            return true;
        }
    }

    let lower_message = message.to_ascii_lowercase();
    const HINTS: [&str; 6] = [
        "model not found",
        "unknown model",
        "invalid model",
        "model does not exist",
        "does not have access to model",
        "model identifier is invalid",
    ];
    HINTS.iter().any(|needle| lower_message.contains(needle))
        || (lower_message.contains("model") && lower_message.contains("not found"))
}

/// Attempts to extract a model identifier from an error payload.
pub(crate) fn extract_model_identifier(message: &str) -> Option<String> {
    for delimiter in ['`', '"', '\''] {
        if let Some(value) = between_delimiters(message, delimiter) {
            if !value.trim().is_empty() {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

fn between_delimiters(message: &str, delimiter: char) -> Option<String> {
    let mut chars = message.char_indices();
    while let Some((start, ch)) = chars.next() {
        if ch == delimiter {
            let start_idx = start + ch.len_utf8();
            if start_idx >= message.len() {
                return None;
            }
            if let Some(rel_end) = message[start_idx..].find(delimiter) {
                let end_idx = start_idx + rel_end;
                return Some(message[start_idx..end_idx].to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_maps_to_a_kind() {
        let errors = vec![
            LLMError::Auth {
                provider: "p",
                message: "bad key".into(),
            },
            LLMError::RateLimit {
                provider: "p",
                message: "slow down".into(),
                retry_after: None,
            },
            LLMError::TokenLimitExceeded {
                message: "too long".into(),
                estimated: None,
                limit: None,
            },
            LLMError::unsupported("p", Operation::Video, Some("m")),
            LLMError::UpstreamJobFailed {
                provider: "p",
                job_id: "j".into(),
                message: "boom".into(),
            },
            LLMError::Timeout {
                message: "poll".into(),
                elapsed: Duration::from_secs(1),
            },
        ];
        let kinds: Vec<ErrorKind> = errors.iter().map(LLMError::kind).collect();
        assert_eq!(
            kinds,
            vec![
                ErrorKind::Unauthorized,
                ErrorKind::RateLimited,
                ErrorKind::ValidationFailed,
                ErrorKind::Unsupported,
                ErrorKind::CommunicationFailure,
                ErrorKind::Timeout,
            ]
        );
    }

    #[test]
    fn unsupported_message_names_model() {
        let err = LLMError::unsupported("anthropic", Operation::Embeddings, Some("claude-3"));
        let text = err.to_string();
        assert!(text.contains("embeddings"), "{text}");
        assert!(text.contains("claude-3"), "{text}");
    }

    #[test]
    fn model_identifier_is_extracted_from_backticks() {
        assert_eq!(
            extract_model_identifier("The model `gpt-5-bogus` does not exist"),
            Some("gpt-5-bogus".to_string())
        );
        assert_eq!(extract_model_identifier("no quotes here"), None);
    }

    #[test]
    fn token_limit_hints_are_detected() {
        assert!(looks_like_token_limit_error(
            Some("context_length_exceeded"),
            ""
        ));
        assert!(looks_like_token_limit_error(
            None,
            "This model's maximum context length is 8192 tokens"
        ));
        assert!(!looks_like_token_limit_error(None, "temperature must be <= 2"));
    }
}
