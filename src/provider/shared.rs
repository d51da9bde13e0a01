//! Scaffolding shared by every vendor client: request dispatch with signing and
//! classification, model alias resolution, pass-through merging and size buckets.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::classify::{classify_error, embedded_error};
use crate::error::LLMError;
use crate::http::{DynHttpTransport, HttpBodyStream, HttpRequest, HttpResponse};
use crate::signing::RequestSigner;
use crate::stream::collect_stream_text;
use crate::types::{
    ChatRequest, Extra, Operation, ProviderCapabilities, ProviderType, TokenEstimator, Usage,
};

/// Transport, signer and addressing state every provider client carries.
#[derive(Clone)]
pub struct ProviderCore {
    pub(crate) name: &'static str,
    pub(crate) transport: DynHttpTransport,
    pub(crate) signer: Arc<dyn RequestSigner>,
    pub(crate) base_url: String,
    pub(crate) default_model: Option<String>,
    /// Caller-visible alias to vendor model id.
    pub(crate) model_aliases: HashMap<String, String>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) headers: HashMap<String, String>,
}

impl ProviderCore {
    pub fn new(
        name: &'static str,
        transport: DynHttpTransport,
        signer: Arc<dyn RequestSigner>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            name,
            transport,
            signer,
            base_url: base_url.into(),
            default_model: None,
            model_aliases: HashMap::new(),
            timeout: None,
            headers: HashMap::new(),
        }
    }

    /// Base URL with any trailing slash removed.
    pub(crate) fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base(), path)
    }

    /// Caller-visible model for a request: the requested alias, else the default.
    pub(crate) fn resolve_alias(&self, requested: &str) -> Result<String, LLMError> {
        if !requested.is_empty() {
            return Ok(requested.to_string());
        }
        self.default_model
            .clone()
            .ok_or_else(|| LLMError::validation(format!("model is required for {}", self.name)))
    }

    /// Vendor model id behind `alias`.
    pub(crate) fn vendor_model(&self, alias: &str) -> String {
        self.model_aliases
            .get(alias)
            .cloned()
            .unwrap_or_else(|| alias.to_string())
    }

    fn prepare(&self, mut request: HttpRequest) -> Result<HttpRequest, LLMError> {
        for (name, value) in &self.headers {
            request
                .headers
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
        request.timeout = request.timeout.or(self.timeout);
        self.signer.sign(&mut request)?;
        debug!(
            provider = self.name,
            method = request.method.as_str(),
            url = %request.url,
            "dispatching upstream request"
        );
        Ok(request)
    }

    /// Sends `request` and returns the raw response when it is a 2xx.
    pub(crate) async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
        let request = self.prepare(request)?;
        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(classify_error(
                self.name,
                response.status,
                &response.headers,
                &response.text(),
            ));
        }
        Ok(response)
    }

    async fn read_json(&self, request: HttpRequest) -> Result<Value, LLMError> {
        let response = self.send(request).await?;
        serde_json::from_slice(&response.body).map_err(|err| {
            LLMError::decode(self.name, format!("failed to parse response body: {err}"))
        })
    }

    /// Sends `request` and decodes a JSON body, rejecting error envelopes embedded
    /// in successful responses.
    pub(crate) async fn execute(&self, request: HttpRequest) -> Result<Value, LLMError> {
        let value = self.read_json(request).await?;
        match embedded_error(self.name, &value) {
            Some(err) => Err(err),
            None => Ok(value),
        }
    }

    pub(crate) async fn post_json(&self, url: String, body: &Value) -> Result<Value, LLMError> {
        let request = HttpRequest::json(url, body)?.with_header("Accept", "application/json");
        self.execute(request).await
    }

    pub(crate) async fn get_json(&self, url: String) -> Result<Value, LLMError> {
        let request = HttpRequest::get(url).with_header("Accept", "application/json");
        self.execute(request).await
    }

    /// Posts a job submission. The body's `error` field describes the job, so the
    /// caller maps it through the job status instead.
    pub(crate) async fn post_job(&self, url: String, body: &Value) -> Result<Value, LLMError> {
        let request = HttpRequest::json(url, body)?.with_header("Accept", "application/json");
        self.read_json(request).await
    }

    /// Fetches a job snapshot without treating its `error` field as a request failure.
    pub(crate) async fn get_job(&self, url: String) -> Result<Value, LLMError> {
        let request = HttpRequest::get(url).with_header("Accept", "application/json");
        self.read_json(request).await
    }

    /// Opens a streaming response. A non-2xx status drains the body and raises the
    /// classified error.
    pub(crate) async fn open_stream(
        &self,
        url: String,
        body: &Value,
        accept: &str,
    ) -> Result<HttpBodyStream, LLMError> {
        let request = self.prepare(HttpRequest::json(url, body)?.with_header("Accept", accept))?;
        let response = self.transport.send_stream(request).await?;
        if !(200..300).contains(&response.status) {
            let text = collect_stream_text(response.body, self.name).await?;
            return Err(classify_error(
                self.name,
                response.status,
                &response.headers,
                &text,
            ));
        }
        Ok(response.body)
    }
}

/// Deserializes a vendor body into its wire struct.
pub(crate) fn parse_value<T: DeserializeOwned>(
    provider: &'static str,
    value: Value,
) -> Result<T, LLMError> {
    serde_json::from_value(value)
        .map_err(|err| LLMError::decode(provider, format!("unexpected response shape: {err}")))
}

/// Inserts pass-through keys that the typed mapping did not already set.
pub fn merge_extra(body: &mut Map<String, Value>, extra: &Extra) {
    for (key, value) in extra {
        if !body.contains_key(key) {
            body.insert(key.clone(), value.clone());
        }
    }
}

/// Fails with `UnsupportedOperation` when `model` lacks `operation`.
pub fn ensure_supported(
    provider: &'static str,
    capabilities: &ProviderCapabilities,
    model: &str,
    operation: Operation,
) -> Result<(), LLMError> {
    if capabilities.supports(model, operation) {
        Ok(())
    } else {
        Err(LLMError::unsupported(provider, operation, Some(model)))
    }
}

/// Chat-specific gate: the operation itself plus function calling when tools are set.
pub(crate) fn ensure_chat_supported(
    provider: &'static str,
    capabilities: &ProviderCapabilities,
    request: &ChatRequest,
    model: &str,
    operation: Operation,
) -> Result<(), LLMError> {
    ensure_supported(provider, capabilities, model, operation)?;
    if !request.tools.is_empty() {
        ensure_supported(provider, capabilities, model, Operation::FunctionCalling)?;
    }
    Ok(())
}

/// Vendor usage when reported, otherwise an estimate flagged as such.
pub(crate) fn usage_or_estimate(
    usage: Option<Usage>,
    provider_type: ProviderType,
    request: &ChatRequest,
    completion: &str,
) -> Usage {
    usage.unwrap_or_else(|| {
        TokenEstimator::new(provider_type).estimate_chat_usage(request, completion)
    })
}

/// Parses `1024x768`, `1024*768` or `16:9`.
pub fn parse_size(raw: &str) -> Option<(u32, u32)> {
    let lower = raw.trim().to_ascii_lowercase();
    let (w, h) = lower
        .split_once('x')
        .or_else(|| lower.split_once('*'))
        .or_else(|| lower.split_once(':'))?;
    let w: u32 = w.trim().parse().ok()?;
    let h: u32 = h.trim().parse().ok()?;
    (w > 0 && h > 0).then_some((w, h))
}

/// Nearest `W:H` bucket to the ratio of `size`; unparsable or missing sizes get `fallback`.
///
/// # Examples
///
/// ```
/// # use llm_relay::provider::shared::aspect_ratio_bucket;
/// let buckets = ["1:1", "3:4", "4:3", "9:16", "16:9"];
/// assert_eq!(aspect_ratio_bucket(Some("1920x1080"), &buckets, "1:1"), "16:9");
/// assert_eq!(aspect_ratio_bucket(Some("huge"), &buckets, "1:1"), "1:1");
/// ```
pub fn aspect_ratio_bucket(
    size: Option<&str>,
    buckets: &[&'static str],
    fallback: &'static str,
) -> &'static str {
    let Some((w, h)) = size.and_then(parse_size) else {
        return fallback;
    };
    let target = f64::from(w) / f64::from(h);
    buckets
        .iter()
        .filter_map(|bucket| {
            let (bw, bh) = parse_size(bucket)?;
            Some((*bucket, (f64::from(bw) / f64::from(bh) - target).abs()))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(bucket, _)| bucket)
        .unwrap_or(fallback)
}

/// Nearest supported `(width, height)` pair by ratio, then by area.
pub(crate) fn nearest_dimensions(
    size: Option<&str>,
    supported: &[(u32, u32)],
    fallback: (u32, u32),
) -> (u32, u32) {
    let Some((w, h)) = size.and_then(parse_size) else {
        return fallback;
    };
    let target = f64::from(w) / f64::from(h);
    let area = f64::from(w) * f64::from(h);
    supported
        .iter()
        .copied()
        .min_by(|a, b| {
            let key = |(sw, sh): (u32, u32)| {
                let ratio = (f64::from(sw) / f64::from(sh) - target).abs();
                let scale = (f64::from(sw) * f64::from(sh) - area).abs();
                (ratio, scale)
            };
            let (ra, sa) = key(*a);
            let (rb, sb) = key(*b);
            ra.total_cmp(&rb).then(sa.total_cmp(&sb))
        })
        .unwrap_or(fallback)
}

pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

/// Fresh `chatcmpl-` identifier for responses whose vendor supplies none.
pub fn new_chunk_id() -> String {
    new_id("chatcmpl")
}

pub(crate) fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CapabilitySet;
    use serde_json::json;

    #[test]
    fn extra_never_overrides_typed_fields() {
        let mut body = Map::new();
        body.insert("temperature".into(), json!(0.2));
        let mut extra = Extra::new();
        extra.insert("temperature".into(), json!(1.5));
        extra.insert("logit_bias".into(), json!({"42": -100}));
        merge_extra(&mut body, &extra);
        assert_eq!(body["temperature"], json!(0.2));
        assert_eq!(body["logit_bias"], json!({"42": -100}));
    }

    #[test]
    fn buckets_pick_nearest_ratio() {
        let buckets = ["1:1", "3:4", "4:3", "9:16", "16:9"];
        assert_eq!(aspect_ratio_bucket(Some("1024x1024"), &buckets, "1:1"), "1:1");
        assert_eq!(aspect_ratio_bucket(Some("768x1024"), &buckets, "1:1"), "3:4");
        assert_eq!(aspect_ratio_bucket(Some("1080x1920"), &buckets, "1:1"), "9:16");
        assert_eq!(aspect_ratio_bucket(Some("21:9"), &buckets, "1:1"), "16:9");
        assert_eq!(aspect_ratio_bucket(None, &buckets, "1:1"), "1:1");
        assert_eq!(aspect_ratio_bucket(Some("0x100"), &buckets, "1:1"), "1:1");
    }

    #[test]
    fn dimensions_prefer_ratio_then_area() {
        let supported = [(1024, 1024), (512, 512), (1152, 640), (640, 1152)];
        assert_eq!(
            nearest_dimensions(Some("500x500"), &supported, (1024, 1024)),
            (512, 512)
        );
        assert_eq!(
            nearest_dimensions(Some("1920x1080"), &supported, (1024, 1024)),
            (1152, 640)
        );
        assert_eq!(
            nearest_dimensions(Some("wide"), &supported, (1024, 1024)),
            (1024, 1024)
        );
    }

    #[test]
    fn capability_gate_checks_tools() {
        let caps = ProviderCapabilities::new(CapabilitySet::chat_only());
        let mut request = ChatRequest::new("m", Vec::new());
        assert!(ensure_chat_supported("p", &caps, &request, "m", Operation::Chat).is_ok());
        request.tools.push(crate::types::ToolDefinition {
            name: "lookup".into(),
            description: None,
            parameters: None,
        });
        match ensure_chat_supported("p", &caps, &request, "m", Operation::Chat) {
            Err(LLMError::UnsupportedOperation { operation, .. }) => {
                assert_eq!(operation, Operation::FunctionCalling)
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn ids_are_prefixed_and_unique() {
        let a = new_chunk_id();
        let b = new_chunk_id();
        assert!(a.starts_with("chatcmpl-"));
        assert_ne!(a, b);
    }
}
