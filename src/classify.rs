//! Shared upstream error classification.
//!
//! Every provider funnels non-success responses through [`classify_error`], so the
//! mapping from vendor status/body pairs to [`ErrorKind`] lives in one place. Vendor
//! envelopes differ widely; [`ErrorEnvelope::parse`] knows the common shapes:
//!
//! * `{"error": {"message": "...", "type": "...", "code": ...}}` (OpenAI, Anthropic, Gemini)
//! * `{"error": "..."}`
//! * `{"message": "..."}` with an optional `__type` (Cohere, Bedrock)
//! * `{"detail": "..."}` (Replicate, FastAPI-style validation arrays)
//! * `{"errors": [...]}`

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::error::{
    ErrorKind, LLMError, extract_model_identifier, looks_like_model_error,
    looks_like_token_limit_error,
};

/// Message and machine-readable code pulled out of a vendor error body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorEnvelope {
    pub message: String,
    /// Vendor error type or code (`rate_limit_error`, `ThrottlingException`, ...).
    pub code: Option<String>,
    /// Numeric status embedded in the body, if any (Gemini `error.code`).
    pub embedded_status: Option<u16>,
}

impl ErrorEnvelope {
    /// Parses a raw body. Never fails; non-JSON bodies become the message verbatim.
    pub fn parse(body: &str) -> Self {
        match serde_json::from_str::<Value>(body) {
            Ok(value) => Self::from_value(&value).unwrap_or_else(|| Self::raw(body)),
            Err(_) => Self::raw(body),
        }
    }

    fn raw(body: &str) -> Self {
        let trimmed = body.trim();
        Self {
            message: if trimmed.is_empty() {
                "empty error body".to_string()
            } else {
                trimmed.to_string()
            },
            code: None,
            embedded_status: None,
        }
    }

    /// Extracts an envelope from parsed JSON, or `None` when no known field exists.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;

        if let Some(error) = object.get("error") {
            match error {
                Value::Object(inner) => {
                    let message = inner
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| error.to_string());
                    let code = detail_reason(inner).or_else(|| {
                        ["type", "code", "status"].iter().find_map(|key| {
                            inner.get(*key).and_then(|v| match v {
                                Value::String(s) => Some(s.clone()),
                                _ => None,
                            })
                        })
                    });
                    let embedded_status = inner
                        .get("code")
                        .and_then(Value::as_u64)
                        .and_then(|c| u16::try_from(c).ok());
                    return Some(Self {
                        message,
                        code,
                        embedded_status,
                    });
                }
                Value::String(message) if !message.is_empty() => {
                    return Some(Self {
                        message: message.clone(),
                        code: object
                            .get("code")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        embedded_status: None,
                    });
                }
                _ => {}
            }
        }

        if let Some(message) = object
            .get("message")
            .or_else(|| object.get("Message"))
            .and_then(Value::as_str)
        {
            let code = object
                .get("__type")
                .or_else(|| object.get("code"))
                .or_else(|| object.get("type"))
                .and_then(Value::as_str)
                .map(|code| code.rsplit('#').next().unwrap_or(code).to_string());
            return Some(Self {
                message: message.to_string(),
                code,
                embedded_status: None,
            });
        }

        if let Some(detail) = object.get("detail") {
            let message = match detail {
                Value::String(text) => text.clone(),
                Value::Array(items) => items
                    .iter()
                    .map(|item| {
                        item.get("msg")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .unwrap_or_else(|| item.to_string())
                    })
                    .collect::<Vec<_>>()
                    .join("; "),
                other => other.to_string(),
            };
            return Some(Self {
                message,
                code: object
                    .get("title")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                embedded_status: object
                    .get("status")
                    .and_then(Value::as_u64)
                    .and_then(|c| u16::try_from(c).ok()),
            });
        }

        if let Some(errors) = object
            .get("errors")
            .and_then(Value::as_array)
            .filter(|errors| !errors.is_empty())
        {
            let message = errors
                .iter()
                .map(|item| match item {
                    Value::String(text) => text.clone(),
                    other => other
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| other.to_string()),
                })
                .collect::<Vec<_>>()
                .join("; ");
            return Some(Self {
                message,
                code: None,
                embedded_status: None,
            });
        }

        None
    }

    /// Prefers the `x-amzn-ErrorType` header over the body code when present.
    fn with_type_header(mut self, headers: &HashMap<String, String>) -> Self {
        if let Some((_, value)) = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("x-amzn-errortype"))
        {
            let code = value.split(':').next().unwrap_or(value).trim();
            if !code.is_empty() {
                self.code = Some(code.to_string());
            }
        }
        self
    }
}

/// Google `ErrorInfo.reason` from `error.details`, when it names a known code.
fn detail_reason(inner: &serde_json::Map<String, Value>) -> Option<String> {
    inner
        .get("details")?
        .as_array()?
        .iter()
        .filter_map(|detail| detail.get("reason").and_then(Value::as_str))
        .find(|reason| kind_from_code(reason).is_some())
        .map(str::to_string)
}

/// Maps vendor error types/codes that are decisive on their own.
fn kind_from_code(code: &str) -> Option<ErrorKind> {
    let lower = code.to_ascii_lowercase();
    let kind = match lower.as_str() {
        "throttlingexception" | "toomanyrequestsexception" | "rate_limit_error"
        | "rate_limit_exceeded" | "resource_exhausted" => ErrorKind::RateLimited,
        "servicequotaexceededexception" | "insufficient_quota" | "billing_error" => {
            ErrorKind::QuotaExceeded
        }
        "accessdeniedexception" | "unrecognizedclientexception" | "authentication_error"
        | "permission_error" | "invalid_api_key" | "unauthenticated" | "permission_denied"
        | "api_key_invalid" | "api_key_expired" => {
            ErrorKind::Unauthorized
        }
        "resourcenotfoundexception" | "model_not_found" | "not_found_error" | "not_found" => {
            ErrorKind::ModelUnavailable
        }
        "validationexception" | "invalid_argument" | "failed_precondition" => {
            ErrorKind::ValidationFailed
        }
        "internalserverexception" | "serviceunavailableexception" | "modelnotreadyexception"
        | "modeltimeoutexception" | "overloaded_error" | "api_error" | "unavailable"
        | "internal" | "deadline_exceeded" => ErrorKind::ServerUnavailable,
        "modelstreamerrorexception" | "modelerrorexception" => ErrorKind::CommunicationFailure,
        _ => return None,
    };
    Some(kind)
}

fn mentions_quota(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["quota", "billing", "credit", "payment", "exceeded your current"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Key rejections some vendors report as a plain 400 (Gemini `INVALID_ARGUMENT`).
fn rejects_api_key(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["api key not valid", "api key expired", "invalid api key", "api_key_invalid"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn classify_envelope(status: u16, envelope: &ErrorEnvelope) -> ErrorKind {
    let code = envelope.code.as_deref();
    let message = envelope.message.as_str();

    if matches!(status, 0 | 400 | 401 | 403) && rejects_api_key(message) {
        return ErrorKind::Unauthorized;
    }

    if let Some(kind) = code.and_then(kind_from_code) {
        return match kind {
            ErrorKind::ValidationFailed if looks_like_model_error(code, message) => {
                ErrorKind::ModelUnavailable
            }
            ErrorKind::RateLimited if mentions_quota(message) => ErrorKind::QuotaExceeded,
            other => other,
        };
    }

    match status {
        400 | 413 | 422 => {
            if looks_like_token_limit_error(code, message) {
                ErrorKind::ValidationFailed
            } else if looks_like_model_error(code, message) {
                ErrorKind::ModelUnavailable
            } else {
                ErrorKind::ValidationFailed
            }
        }
        401 => ErrorKind::Unauthorized,
        402 => ErrorKind::QuotaExceeded,
        403 if mentions_quota(message) => ErrorKind::QuotaExceeded,
        403 => ErrorKind::Unauthorized,
        404 => ErrorKind::ModelUnavailable,
        405 | 501 => ErrorKind::Unsupported,
        429 if mentions_quota(message) => ErrorKind::QuotaExceeded,
        429 => ErrorKind::RateLimited,
        500..=599 => ErrorKind::ServerUnavailable,
        _ => ErrorKind::CommunicationFailure,
    }
}

/// Classifies an upstream failure. Total and deterministic.
///
/// # Examples
///
/// ```
/// use llm_relay::classify::classify;
/// use llm_relay::error::ErrorKind;
///
/// assert_eq!(classify(429, r#"{"error":{"message":"slow down"}}"#), ErrorKind::RateLimited);
/// assert_eq!(classify(418, "teapot"), ErrorKind::CommunicationFailure);
/// ```
pub fn classify(status: u16, body: &str) -> ErrorKind {
    classify_envelope(status, &ErrorEnvelope::parse(body))
}

/// Builds the classified [`LLMError`] for a non-success upstream response.
pub fn classify_error(
    provider: &'static str,
    status: u16,
    headers: &HashMap<String, String>,
    body: &str,
) -> LLMError {
    let envelope = ErrorEnvelope::parse(body).with_type_header(headers);
    let kind = classify_envelope(status, &envelope);
    warn!(provider, status, kind = %kind, "upstream request failed");
    build_error(provider, status, kind, envelope, headers, body)
}

/// Numeric `Retry-After` seconds, matched case-insensitively. HTTP-date values are ignored.
fn retry_after(headers: &HashMap<String, String>) -> Option<Duration> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, value)| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn build_error(
    provider: &'static str,
    status: u16,
    kind: ErrorKind,
    envelope: ErrorEnvelope,
    headers: &HashMap<String, String>,
    body: &str,
) -> LLMError {
    let ErrorEnvelope { message, code, .. } = envelope;
    match kind {
        ErrorKind::Unauthorized => LLMError::Auth { provider, message },
        ErrorKind::RateLimited => LLMError::RateLimit {
            provider,
            message,
            retry_after: retry_after(headers),
        },
        ErrorKind::QuotaExceeded => LLMError::QuotaExceeded { provider, message },
        ErrorKind::ModelUnavailable => LLMError::ModelUnavailable {
            provider,
            model: extract_model_identifier(&message),
            message,
        },
        ErrorKind::ValidationFailed => {
            if looks_like_token_limit_error(code.as_deref(), &message) {
                LLMError::TokenLimitExceeded {
                    limit: extract_token_limit(&message),
                    message,
                    estimated: None,
                }
            } else {
                LLMError::Validation {
                    message: format!("{provider}: {message}"),
                }
            }
        }
        ErrorKind::Unsupported => LLMError::NotImplemented {
            provider,
            status,
            message,
        },
        ErrorKind::ServerUnavailable => LLMError::ServerUnavailable {
            provider,
            status,
            message,
            body: Some(body.to_string()),
        },
        ErrorKind::CommunicationFailure | ErrorKind::Timeout | ErrorKind::Canceled => {
            LLMError::Communication {
                provider,
                message,
                status: Some(status),
                body: Some(body.to_string()),
            }
        }
    }
}

/// Detects an error envelope inside an otherwise successful body.
///
/// Only explicit error markers count: a top-level `error` holding an object or a
/// non-empty string, or `"type": "error"`. Job payloads with `"error": null` pass.
pub fn embedded_error(provider: &'static str, value: &Value) -> Option<LLMError> {
    let object = value.as_object()?;
    let flagged = match object.get("error") {
        Some(Value::Object(_)) => true,
        Some(Value::String(text)) => !text.is_empty(),
        _ => false,
    } || object.get("type").and_then(Value::as_str) == Some("error");
    if !flagged {
        return None;
    }

    let envelope = ErrorEnvelope::from_value(value)?;
    let status = envelope
        .embedded_status
        .filter(|status| (400..600).contains(status))
        .unwrap_or(0);
    let kind = classify_envelope(status, &envelope);
    warn!(provider, kind = %kind, "upstream returned an error inside a success body");
    let body = value.to_string();
    Some(build_error(
        provider,
        status,
        kind,
        envelope,
        &HashMap::new(),
        &body,
    ))
}

/// Maps an AWS event-stream `exception` frame onto a classified error.
pub fn classify_exception(provider: &'static str, exception_type: &str, payload: &str) -> LLMError {
    let mut envelope = ErrorEnvelope::parse(payload);
    envelope.code = Some(exception_type.to_string());
    let status = match kind_from_code(exception_type) {
        Some(ErrorKind::RateLimited) => 429,
        Some(ErrorKind::ValidationFailed) => 400,
        Some(ErrorKind::ServerUnavailable) => 503,
        _ => 0,
    };
    let kind = classify_envelope(status, &envelope);
    warn!(provider, exception_type, kind = %kind, "stream exception frame");
    build_error(provider, status, kind, envelope, &HashMap::new(), payload)
}

/// Reads `limit` from messages such as "maximum context length is 8192 tokens".
fn extract_token_limit(message: &str) -> Option<usize> {
    let lower = message.to_ascii_lowercase();
    ["context length is ", "limit of ", "maximum of ", "max_tokens: "]
        .iter()
        .find_map(|marker| {
            let start = lower.find(marker)? + marker.len();
            let digits: String = lower[start..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse().ok()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_matrix_is_total() {
        let bodies = [
            "",
            "not json",
            r#"{"error":{"message":"bad","type":"invalid_request_error"}}"#,
            r#"{"error":"oops"}"#,
            r#"{"message":"nope"}"#,
            r#"{"detail":"Invalid token."}"#,
            r#"{"errors":["a","b"]}"#,
            r#"{"unexpected":true}"#,
        ];
        let statuses = [0, 200, 301, 400, 401, 402, 403, 404, 405, 408, 409, 413, 422, 429, 500, 502, 503, 529, 600];
        for status in statuses {
            for body in bodies {
                let kind = classify(status, body);
                let err = classify_error("p", status, &HashMap::new(), body);
                assert_eq!(err.kind(), kind, "status {status} body {body}");
            }
        }
    }

    #[test]
    fn documented_vendor_shapes() {
        let cases = [
            (401, r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error","code":"invalid_api_key"}}"#, ErrorKind::Unauthorized),
            (429, r#"{"error":{"message":"You exceeded your current quota","type":"insufficient_quota"}}"#, ErrorKind::QuotaExceeded),
            (429, r#"{"type":"error","error":{"type":"rate_limit_error","message":"Number of requests exceeded"}}"#, ErrorKind::RateLimited),
            (529, r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#, ErrorKind::ServerUnavailable),
            (400, r#"{"error":{"code":400,"message":"API key not valid. Please pass a valid API key.","status":"INVALID_ARGUMENT","details":[{"@type":"type.googleapis.com/google.rpc.ErrorInfo","reason":"API_KEY_INVALID","domain":"googleapis.com"}]}}"#, ErrorKind::Unauthorized),
            (400, r#"{"error":{"code":400,"message":"Request contains an invalid key.","status":"INVALID_ARGUMENT","details":[{"reason":"API_KEY_INVALID"}]}}"#, ErrorKind::Unauthorized),
            (400, r#"{"error":{"code":400,"message":"Invalid JSON payload received.","status":"INVALID_ARGUMENT"}}"#, ErrorKind::ValidationFailed),
            (404, r#"{"error":{"code":404,"message":"models/gemini-9 is not found","status":"NOT_FOUND"}}"#, ErrorKind::ModelUnavailable),
            (400, r#"{"message":"invalid request: too many tokens"}"#, ErrorKind::ValidationFailed),
            (400, r#"{"message":"The provided model identifier is invalid."}"#, ErrorKind::ModelUnavailable),
            (402, r#"{"detail":"You have insufficient credit"}"#, ErrorKind::QuotaExceeded),
            (422, r#"{"detail":[{"loc":["body","input"],"msg":"field required"}]}"#, ErrorKind::ValidationFailed),
            (503, "<html>Service Unavailable</html>", ErrorKind::ServerUnavailable),
            (418, "teapot", ErrorKind::CommunicationFailure),
        ];
        for (status, body, expected) in cases {
            assert_eq!(classify(status, body), expected, "status {status} body {body}");
        }
    }

    #[test]
    fn token_limit_becomes_dedicated_variant() {
        let body = r#"{"error":{"message":"This model's maximum context length is 8192 tokens","code":"context_length_exceeded"}}"#;
        match classify_error("openai", 400, &HashMap::new(), body) {
            LLMError::TokenLimitExceeded { limit, .. } => assert_eq!(limit, Some(8192)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn bedrock_error_type_header_wins() {
        let headers = HashMap::from([(
            "x-amzn-ErrorType".to_string(),
            "ThrottlingException:http://internal.amazon.com/coral/com.amazon.bedrock/".to_string(),
        )]);
        let err = classify_error("bedrock", 400, &headers, r#"{"message":"Too many requests"}"#);
        assert_eq!(err.kind(), ErrorKind::RateLimited);
    }

    #[test]
    fn retry_after_header_is_kept() {
        let headers = HashMap::from([("Retry-After".to_string(), "7".to_string())]);
        match classify_error("groq", 429, &headers, "{}") {
            LLMError::RateLimit { retry_after, .. } => {
                assert_eq!(retry_after, Some(std::time::Duration::from_secs(7)))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn server_errors_keep_raw_body() {
        match classify_error("cohere", 502, &HashMap::new(), "bad gateway") {
            LLMError::ServerUnavailable { body, status, .. } => {
                assert_eq!(status, 502);
                assert_eq!(body.as_deref(), Some("bad gateway"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn embedded_errors_are_detected() {
        let value = json!({"error": {"code": 429, "message": "Resource has been exhausted", "status": "RESOURCE_EXHAUSTED"}});
        let err = embedded_error("google_gemini", &value).expect("embedded error");
        assert_eq!(err.kind(), ErrorKind::RateLimited);

        let value = json!({"id": "p1", "status": "processing", "error": null});
        assert!(embedded_error("replicate", &value).is_none());

        let value = json!({"text": "hello"});
        assert!(embedded_error("cohere", &value).is_none());
    }

    #[test]
    fn stream_exceptions_are_classified() {
        let err = classify_exception(
            "bedrock",
            "throttlingException",
            r#"{"message":"Too many requests, please wait"}"#,
        );
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        let err = classify_exception("bedrock", "modelStreamErrorException", r#"{"message":"x"}"#);
        assert_eq!(err.kind(), ErrorKind::CommunicationFailure);
    }
}
