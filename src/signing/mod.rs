//! Request authentication.
//!
//! Providers hold one [`RequestSigner`] and call it on every outgoing
//! [`HttpRequest`] right before dispatch, after the body is final.

use std::fmt;

use chrono::Utc;
use reqwest::Url;

use crate::error::LLMError;
use crate::http::HttpRequest;

pub mod sigv4;

/// Stamps authentication headers onto a fully built request.
pub trait RequestSigner: Send + Sync {
    fn sign(&self, request: &mut HttpRequest) -> Result<(), LLMError>;
}

/// `Authorization: Bearer <token>`.
#[derive(Clone)]
pub struct BearerSigner {
    token: String,
}

impl BearerSigner {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for BearerSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerSigner").finish_non_exhaustive()
    }
}

impl RequestSigner for BearerSigner {
    fn sign(&self, request: &mut HttpRequest) -> Result<(), LLMError> {
        request
            .headers
            .insert("Authorization".to_string(), format!("Bearer {}", self.token));
        Ok(())
    }
}

/// Raw key in a vendor-specific header such as `x-api-key`.
#[derive(Clone)]
pub struct ApiKeySigner {
    header: &'static str,
    key: String,
}

impl ApiKeySigner {
    pub fn new(header: &'static str, key: impl Into<String>) -> Self {
        Self {
            header,
            key: key.into(),
        }
    }
}

impl fmt::Debug for ApiKeySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeySigner")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl RequestSigner for ApiKeySigner {
    fn sign(&self, request: &mut HttpRequest) -> Result<(), LLMError> {
        request
            .headers
            .insert(self.header.to_string(), self.key.clone());
        Ok(())
    }
}

/// Static AWS credentials.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub region: String,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// Signs with AWS SigV4 using the current wall-clock time.
#[derive(Debug, Clone)]
pub struct SigV4Signer {
    credentials: AwsCredentials,
    service: &'static str,
}

impl SigV4Signer {
    pub fn new(credentials: AwsCredentials, service: &'static str) -> Self {
        Self {
            credentials,
            service,
        }
    }

    pub fn region(&self) -> &str {
        &self.credentials.region
    }
}

impl RequestSigner for SigV4Signer {
    fn sign(&self, request: &mut HttpRequest) -> Result<(), LLMError> {
        let url = Url::parse(&request.url)
            .map_err(|err| LLMError::validation(format!("invalid request url {}: {err}", request.url)))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(LLMError::validation(format!(
                    "request url {} has no host",
                    request.url
                )));
            }
        };
        let query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let headers: Vec<(String, String)> = request
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let ctx = sigv4::SigningContext {
            access_key_id: &self.credentials.access_key_id,
            secret_access_key: &self.credentials.secret_access_key,
            session_token: self.credentials.session_token.as_deref(),
            region: &self.credentials.region,
            service: self.service,
            method: request.method.as_str(),
            host: &host,
            path: url.path(),
            query,
            headers,
            body: request.body.as_deref(),
            timestamp: Utc::now(),
            sign_content_sha256: false,
        };
        let signed = sigv4::sign(&ctx)?;
        for (name, value) in signed.into_pairs() {
            request.headers.insert(name.to_string(), value);
        }
        Ok(())
    }
}
