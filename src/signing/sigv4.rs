//! AWS Signature Version 4 for header-based authentication.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::LLMError;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// SHA-256 of the empty string. An absent body hashes to the same value.
pub const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Everything needed to sign one physical request.
///
/// `path` is the path as it appears on the wire (each segment already encoded once);
/// `query` holds decoded key/value pairs.
#[derive(Debug, Clone)]
pub struct SigningContext<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub session_token: Option<&'a str>,
    pub region: &'a str,
    pub service: &'a str,
    pub method: &'a str,
    pub host: &'a str,
    pub path: &'a str,
    pub query: Vec<(String, String)>,
    /// Additional headers to sign besides `host` and the `x-amz-*` set.
    pub headers: Vec<(String, String)>,
    pub body: Option<&'a [u8]>,
    pub timestamp: DateTime<Utc>,
    /// Signs and returns `x-amz-content-sha256` (S3-style services).
    pub sign_content_sha256: bool,
}

/// Header values produced by [`sign`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub authorization: String,
    pub x_amz_date: String,
    pub x_amz_content_sha256: Option<String>,
    pub security_token: Option<String>,
    /// Semicolon-separated list that went into the signature.
    pub signed_headers: String,
    pub signature: String,
}

impl SignedHeaders {
    /// Header name/value pairs to stamp on the outgoing request.
    pub fn into_pairs(self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("Authorization", self.authorization),
            ("X-Amz-Date", self.x_amz_date),
        ];
        if let Some(hash) = self.x_amz_content_sha256 {
            pairs.push(("X-Amz-Content-Sha256", hash));
        }
        if let Some(token) = self.security_token {
            pairs.push(("X-Amz-Security-Token", token));
        }
        pairs
    }
}

type HmacSha256 = Hmac<Sha256>;

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, LLMError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|err| LLMError::InvalidConfig {
        field: "secret_access_key".to_string(),
        reason: format!("cannot initialise HMAC: {err}"),
    })?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Percent-encodes per RFC 3986: only `A-Z a-z 0-9 - _ . ~` pass through.
pub fn uri_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Encodes each segment of a raw path, keeping the `/` separators.
pub fn uri_encode_path(path: &str) -> String {
    path.split('/').map(uri_encode).collect::<Vec<_>>().join("/")
}

fn canonical_uri(path: &str, service: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    if service == "s3" {
        return path.to_string();
    }
    uri_encode_path(path)
}

fn canonical_query(query: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| (uri_encode(k), uri_encode(v)))
        .collect();
    encoded.sort();
    encoded
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn normalize_header_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Sorted, lower-cased header list; repeated names are comma-joined.
fn canonical_header_list(headers: Vec<(String, String)>) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = Vec::new();
    let mut normalized: Vec<(String, String)> = headers
        .into_iter()
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), normalize_header_value(&value)))
        .collect();
    normalized.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, value) in normalized {
        match merged.last_mut() {
            Some((last, existing)) if *last == name => {
                existing.push(',');
                existing.push_str(&value);
            }
            _ => merged.push((name, value)),
        }
    }
    merged
}

struct Canonical {
    request: String,
    signed_headers: String,
    payload_hash: String,
    amz_date: String,
}

fn build_canonical(ctx: &SigningContext<'_>) -> Canonical {
    let amz_date = ctx.timestamp.format("%Y%m%dT%H%M%SZ").to_string();
    let payload_hash = sha256_hex(ctx.body.unwrap_or_default());

    let mut headers: Vec<(String, String)> = ctx
        .headers
        .iter()
        .filter(|(name, _)| {
            !matches!(
                name.to_ascii_lowercase().as_str(),
                "host" | "x-amz-date" | "authorization" | "x-amz-security-token" | "x-amz-content-sha256"
            )
        })
        .cloned()
        .collect();
    headers.push(("host".to_string(), ctx.host.to_string()));
    headers.push(("x-amz-date".to_string(), amz_date.clone()));
    if let Some(token) = ctx.session_token {
        headers.push(("x-amz-security-token".to_string(), token.to_string()));
    }
    if ctx.sign_content_sha256 {
        headers.push(("x-amz-content-sha256".to_string(), payload_hash.clone()));
    }
    let headers = canonical_header_list(headers);

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        ctx.method.to_ascii_uppercase(),
        canonical_uri(ctx.path, ctx.service),
        canonical_query(&ctx.query),
        canonical_headers,
        signed_headers,
        payload_hash
    );

    Canonical {
        request,
        signed_headers,
        payload_hash,
        amz_date,
    }
}

/// The canonical request string for `ctx`.
pub fn canonical_request(ctx: &SigningContext<'_>) -> String {
    build_canonical(ctx).request
}

/// Derives the per-day signing key.
pub fn signing_key(
    secret_access_key: &str,
    date: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, LLMError> {
    let k_date = hmac(format!("AWS4{secret_access_key}").as_bytes(), date.as_bytes())?;
    let k_region = hmac(&k_date, region.as_bytes())?;
    let k_service = hmac(&k_region, service.as_bytes())?;
    hmac(&k_service, b"aws4_request")
}

/// Signs a request. Must be called for every physical request; signatures are time-bound.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use llm_relay::signing::sigv4::{sign, SigningContext};
///
/// let ctx = SigningContext {
///     access_key_id: "AKIDEXAMPLE",
///     secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
///     session_token: None,
///     region: "us-east-1",
///     service: "service",
///     method: "GET",
///     host: "example.amazonaws.com",
///     path: "/",
///     query: Vec::new(),
///     headers: Vec::new(),
///     body: None,
///     timestamp: Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap(),
///     sign_content_sha256: false,
/// };
/// let signed = sign(&ctx).unwrap();
/// assert!(signed.authorization.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/"));
/// ```
pub fn sign(ctx: &SigningContext<'_>) -> Result<SignedHeaders, LLMError> {
    let canonical = build_canonical(ctx);
    let date = ctx.timestamp.format("%Y%m%d").to_string();
    let scope = format!("{date}/{}/{}/aws4_request", ctx.region, ctx.service);
    let string_to_sign = format!(
        "{ALGORITHM}\n{}\n{scope}\n{}",
        canonical.amz_date,
        sha256_hex(canonical.request.as_bytes())
    );

    let key = signing_key(ctx.secret_access_key, &date, ctx.region, ctx.service)?;
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes())?);

    let authorization = format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={}, Signature={signature}",
        ctx.access_key_id, canonical.signed_headers
    );

    Ok(SignedHeaders {
        authorization,
        x_amz_date: canonical.amz_date,
        x_amz_content_sha256: ctx.sign_content_sha256.then_some(canonical.payload_hash),
        security_token: ctx.session_token.map(str::to_string),
        signed_headers: canonical.signed_headers,
        signature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const ACCESS_KEY: &str = "AKIDEXAMPLE";
    const SECRET: &str = "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY";

    fn vector_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap()
    }

    fn get_vanilla() -> SigningContext<'static> {
        SigningContext {
            access_key_id: ACCESS_KEY,
            secret_access_key: SECRET,
            session_token: None,
            region: "us-east-1",
            service: "service",
            method: "GET",
            host: "example.amazonaws.com",
            path: "/",
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            timestamp: vector_time(),
            sign_content_sha256: false,
        }
    }

    #[test]
    fn get_vanilla_vector() {
        let ctx = get_vanilla();
        let canonical = canonical_request(&ctx);
        assert_eq!(
            canonical,
            "GET\n/\n\nhost:example.amazonaws.com\nx-amz-date:20150830T123600Z\n\nhost;x-amz-date\ne3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            sha256_hex(canonical.as_bytes()),
            "bb579772317eb040ac9ed261061d46c1f17a8133879d6129b6e1c25292927e63"
        );

        let signed = sign(&ctx).unwrap();
        assert_eq!(
            signed.signature,
            "5fa00fa31553b73ebf1942676e86291e8372ff2a2260956d9b8aae1d763fbf31"
        );
        assert_eq!(
            signed.authorization,
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/service/aws4_request, SignedHeaders=host;x-amz-date, Signature=5fa00fa31553b73ebf1942676e86291e8372ff2a2260956d9b8aae1d763fbf31"
        );
        assert_eq!(signed.x_amz_date, "20150830T123600Z");
        assert!(signed.x_amz_content_sha256.is_none());
    }

    #[test]
    fn iam_list_users_vector() {
        let ctx = SigningContext {
            service: "iam",
            host: "iam.amazonaws.com",
            query: vec![
                ("Version".to_string(), "2010-05-08".to_string()),
                ("Action".to_string(), "ListUsers".to_string()),
            ],
            headers: vec![(
                "Content-Type".to_string(),
                "application/x-www-form-urlencoded; charset=utf-8".to_string(),
            )],
            ..get_vanilla()
        };

        let key = signing_key(SECRET, "20150830", "us-east-1", "iam").unwrap();
        assert_eq!(
            hex::encode(key),
            "c4afb1cc5771d871763a393e44b703571b55cc28424d1a5e86da6ed3c154a4b9"
        );
        assert_eq!(
            sha256_hex(canonical_request(&ctx).as_bytes()),
            "f536975d06c0309214f805bb90ccff089219ecd68b2577efef23edd43b7e1a59"
        );
        let signed = sign(&ctx).unwrap();
        assert_eq!(
            signed.signature,
            "5d672d79c15b13162d9279b0855cfba6789a8edb4c82c400e06b5924a6f2b5d7"
        );
        assert_eq!(signed.signed_headers, "content-type;host;x-amz-date");
    }

    #[test]
    fn empty_and_absent_body_hash_identically() {
        let absent = get_vanilla();
        let empty = SigningContext {
            body: Some(b""),
            ..get_vanilla()
        };
        assert_eq!(sign(&absent).unwrap(), sign(&empty).unwrap());
    }

    #[test]
    fn header_names_and_values_are_normalized() {
        let ctx = SigningContext {
            headers: vec![
                ("X-Custom".to_string(), "  a   b  ".to_string()),
                ("x-custom".to_string(), "c".to_string()),
            ],
            ..get_vanilla()
        };
        let canonical = canonical_request(&ctx);
        assert!(canonical.contains("x-custom:a b,c\n"), "{canonical}");
        assert!(canonical.contains("host;x-amz-date;x-custom"), "{canonical}");
    }

    #[test]
    fn non_s3_paths_are_encoded_again() {
        let wire = format!("/model/{}/invoke", uri_encode("anthropic.claude-v2:1"));
        assert_eq!(wire, "/model/anthropic.claude-v2%3A1/invoke");
        let ctx = SigningContext {
            service: "bedrock",
            path: &wire,
            ..get_vanilla()
        };
        assert!(canonical_request(&ctx).contains("\n/model/anthropic.claude-v2%253A1/invoke\n"));
    }

    #[test]
    fn session_token_is_signed_and_returned() {
        let ctx = SigningContext {
            session_token: Some("token"),
            sign_content_sha256: true,
            ..get_vanilla()
        };
        let signed = sign(&ctx).unwrap();
        assert_eq!(
            signed.signed_headers,
            "host;x-amz-content-sha256;x-amz-date;x-amz-security-token"
        );
        let pairs = signed.into_pairs();
        assert!(pairs.iter().any(|(name, value)| *name == "X-Amz-Security-Token" && value == "token"));
        assert!(pairs.iter().any(|(name, value)| *name == "X-Amz-Content-Sha256" && value == EMPTY_PAYLOAD_SHA256));
    }
}
