//! AWS `application/vnd.amazon.eventstream` framing.
//!
//! ```text
//! | total_len u32 | headers_len u32 | prelude_crc u32 | headers | payload | message_crc u32 |
//! ```
//!
//! All integers are big-endian; both CRCs are CRC-32 (IEEE).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use tracing::warn;

use crate::classify::classify_exception;
use crate::error::LLMError;

use super::{FrameParser, StreamFrame};

const PRELUDE_LEN: usize = 12;
const MIN_MESSAGE_LEN: usize = PRELUDE_LEN + 4;
const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// Typed header value.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Bytes(Vec<u8>),
    String(String),
    Timestamp(i64),
    Uuid([u8; 16]),
}

/// One decoded event-stream message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub headers: Vec<(String, HeaderValue)>,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|(key, value)| match value {
            HeaderValue::String(text) if key == name => Some(text.as_str()),
            _ => None,
        })
    }
}

/// CRC-32 (IEEE 802.3, reflected polynomial `0xEDB88320`).
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = !0u32;
    for byte in data {
        crc ^= u32::from(*byte);
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Reassembles messages from arbitrarily split reads.
#[derive(Debug)]
pub struct EventStreamDecoder {
    provider: &'static str,
    buffer: Vec<u8>,
}

impl EventStreamDecoder {
    pub fn new(provider: &'static str) -> Self {
        Self {
            provider,
            buffer: Vec::new(),
        }
    }

    /// Appends bytes and returns every message that became complete.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<Vec<Message>, LLMError> {
        self.buffer.extend_from_slice(bytes);
        let mut messages = Vec::new();
        while let Some(message) = self.next_message()? {
            messages.push(message);
        }
        Ok(messages)
    }

    /// Bytes of an incomplete trailing message.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    fn malformed(&self, reason: impl Into<String>) -> LLMError {
        LLMError::decode(
            self.provider,
            format!("malformed event-stream frame: {}", reason.into()),
        )
    }

    fn next_message(&mut self) -> Result<Option<Message>, LLMError> {
        if self.buffer.len() < PRELUDE_LEN {
            return Ok(None);
        }
        let total_len = read_u32(&self.buffer, 0) as usize;
        let headers_len = read_u32(&self.buffer, 4) as usize;
        let prelude_crc = read_u32(&self.buffer, 8);

        if crc32(&self.buffer[..8]) != prelude_crc {
            return Err(self.malformed("prelude checksum mismatch"));
        }
        if !(MIN_MESSAGE_LEN..=MAX_MESSAGE_LEN).contains(&total_len) {
            return Err(self.malformed(format!("invalid total length {total_len}")));
        }
        if headers_len > total_len - MIN_MESSAGE_LEN {
            return Err(self.malformed(format!("invalid headers length {headers_len}")));
        }
        if self.buffer.len() < total_len {
            return Ok(None);
        }

        let frame: Vec<u8> = self.buffer.drain(..total_len).collect();
        let message_crc = read_u32(&frame, total_len - 4);
        if crc32(&frame[..total_len - 4]) != message_crc {
            return Err(self.malformed("message checksum mismatch"));
        }

        let headers_end = PRELUDE_LEN + headers_len;
        let headers = self.parse_headers(&frame[PRELUDE_LEN..headers_end])?;
        let payload = frame[headers_end..total_len - 4].to_vec();
        Ok(Some(Message { headers, payload }))
    }

    fn parse_headers(&self, mut bytes: &[u8]) -> Result<Vec<(String, HeaderValue)>, LLMError> {
        let mut headers = Vec::new();
        while !bytes.is_empty() {
            let name_len = bytes[0] as usize;
            let rest = &bytes[1..];
            if rest.len() < name_len + 1 {
                return Err(self.malformed("truncated header name"));
            }
            let name = String::from_utf8_lossy(&rest[..name_len]).into_owned();
            let kind = rest[name_len];
            let rest = &rest[name_len + 1..];
            let (value, consumed) = self.parse_header_value(kind, rest)?;
            headers.push((name, value));
            bytes = &rest[consumed..];
        }
        Ok(headers)
    }

    fn parse_header_value(&self, kind: u8, bytes: &[u8]) -> Result<(HeaderValue, usize), LLMError> {
        let need = |len: usize| -> Result<(), LLMError> {
            if bytes.len() < len {
                Err(self.malformed(format!("truncated header value of type {kind}")))
            } else {
                Ok(())
            }
        };
        let parsed = match kind {
            0 => (HeaderValue::Bool(true), 0),
            1 => (HeaderValue::Bool(false), 0),
            2 => {
                need(1)?;
                (HeaderValue::Byte(bytes[0] as i8), 1)
            }
            3 => {
                need(2)?;
                (HeaderValue::Short(i16::from_be_bytes([bytes[0], bytes[1]])), 2)
            }
            4 => {
                need(4)?;
                (HeaderValue::Int(read_u32(bytes, 0) as i32), 4)
            }
            5 | 8 => {
                need(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes[..8]);
                let value = i64::from_be_bytes(raw);
                if kind == 5 {
                    (HeaderValue::Long(value), 8)
                } else {
                    (HeaderValue::Timestamp(value), 8)
                }
            }
            6 | 7 => {
                need(2)?;
                let len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
                need(2 + len)?;
                let raw = bytes[2..2 + len].to_vec();
                if kind == 6 {
                    (HeaderValue::Bytes(raw), 2 + len)
                } else {
                    (
                        HeaderValue::String(String::from_utf8_lossy(&raw).into_owned()),
                        2 + len,
                    )
                }
            }
            9 => {
                need(16)?;
                let mut raw = [0u8; 16];
                raw.copy_from_slice(&bytes[..16]);
                (HeaderValue::Uuid(raw), 16)
            }
            other => return Err(self.malformed(format!("unknown header type {other}"))),
        };
        Ok(parsed)
    }
}

#[derive(Deserialize)]
struct ChunkPayload {
    bytes: String,
}

/// Adapts [`EventStreamDecoder`] to the Bedrock `InvokeModelWithResponseStream` shape.
///
/// `chunk` events carry `{"bytes": "<base64 JSON>"}`; the decoded JSON becomes the
/// frame data. `exception` and `error` messages become classified errors.
#[derive(Debug)]
pub struct EventStreamParser {
    decoder: EventStreamDecoder,
}

impl EventStreamParser {
    pub fn new(provider: &'static str) -> Self {
        Self {
            decoder: EventStreamDecoder::new(provider),
        }
    }

    fn to_frame(&self, message: Message) -> Result<Option<StreamFrame>, LLMError> {
        let provider = self.decoder.provider;
        let payload = String::from_utf8_lossy(&message.payload).into_owned();
        match message.header_str(":message-type").unwrap_or("event") {
            "exception" => {
                let exception = message
                    .header_str(":exception-type")
                    .unwrap_or("UnknownException");
                Err(classify_exception(provider, exception, &payload))
            }
            "error" => {
                let code = message.header_str(":error-code").unwrap_or("UnknownError");
                let text = message
                    .header_str(":error-message")
                    .map(str::to_string)
                    .unwrap_or(payload);
                Err(classify_exception(provider, code, &text))
            }
            _ => {
                let event = message.header_str(":event-type").map(str::to_string);
                if event.as_deref() != Some("chunk") {
                    return Ok(Some(StreamFrame {
                        event,
                        data: payload,
                    }));
                }
                let chunk: ChunkPayload = serde_json::from_str(&payload).map_err(|err| {
                    LLMError::decode(provider, format!("invalid chunk envelope: {err}"))
                })?;
                let decoded = STANDARD.decode(chunk.bytes.as_bytes()).map_err(|err| {
                    LLMError::decode(provider, format!("invalid base64 chunk: {err}"))
                })?;
                Ok(Some(StreamFrame {
                    event,
                    data: String::from_utf8_lossy(&decoded).into_owned(),
                }))
            }
        }
    }
}

impl FrameParser for EventStreamParser {
    fn push(&mut self, bytes: &[u8]) -> Result<Vec<StreamFrame>, LLMError> {
        let messages = self.decoder.push_bytes(bytes)?;
        let mut frames = Vec::with_capacity(messages.len());
        for message in messages {
            if let Some(frame) = self.to_frame(message)? {
                frames.push(frame);
            }
        }
        Ok(frames)
    }

    fn finish(&mut self) -> Result<Vec<StreamFrame>, LLMError> {
        let pending = self.decoder.pending_len();
        if pending > 0 {
            warn!(
                provider = self.decoder.provider,
                pending, "event stream closed inside a frame"
            );
        }
        Ok(Vec::new())
    }
}

/// Encodes one message. Used to build fixtures and by tests.
pub fn encode_message(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
    let mut header_bytes = Vec::new();
    for (name, value) in headers {
        header_bytes.push(name.len() as u8);
        header_bytes.extend_from_slice(name.as_bytes());
        header_bytes.push(7);
        header_bytes.extend_from_slice(&(value.len() as u16).to_be_bytes());
        header_bytes.extend_from_slice(value.as_bytes());
    }
    let total_len = (PRELUDE_LEN + header_bytes.len() + payload.len() + 4) as u32;
    let mut out = Vec::with_capacity(total_len as usize);
    out.extend_from_slice(&total_len.to_be_bytes());
    out.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
    let prelude_crc = crc32(&out);
    out.extend_from_slice(&prelude_crc.to_be_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(payload);
    let message_crc = crc32(&out);
    out.extend_from_slice(&message_crc.to_be_bytes());
    out
}

/// Encodes a Bedrock `chunk` event wrapping `json`.
pub fn encode_chunk_event(json: &str) -> Vec<u8> {
    let payload = format!("{{\"bytes\":\"{}\"}}", STANDARD.encode(json.as_bytes()));
    encode_message(
        &[
            (":event-type", "chunk"),
            (":content-type", "application/json"),
            (":message-type", "event"),
        ],
        payload.as_bytes(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn crc32_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn frames_split_at_every_byte_are_reassembled() {
        let mut bytes = encode_chunk_event(r#"{"generation":"Hel"}"#);
        bytes.extend(encode_chunk_event(r#"{"generation":"lo","stop_reason":"stop"}"#));

        let mut parser = EventStreamParser::new("bedrock");
        let mut frames = Vec::new();
        for byte in &bytes {
            frames.extend(parser.push(std::slice::from_ref(byte)).expect("push"));
        }
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event.as_deref(), Some("chunk"));
        assert_eq!(frames[0].data, r#"{"generation":"Hel"}"#);
        assert!(frames[1].data.contains("stop_reason"));
    }

    #[test]
    fn exception_frames_become_classified_errors() {
        let bytes = encode_message(
            &[
                (":exception-type", "throttlingException"),
                (":content-type", "application/json"),
                (":message-type", "exception"),
            ],
            br#"{"message":"Too many requests, please wait before trying again."}"#,
        );
        let mut parser = EventStreamParser::new("bedrock");
        match parser.push(&bytes) {
            Err(err) => assert_eq!(err.kind(), ErrorKind::RateLimited),
            Ok(frames) => panic!("unexpected frames: {frames:?}"),
        }
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let mut bytes = encode_chunk_event(r#"{"x":1}"#);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let mut decoder = EventStreamDecoder::new("bedrock");
        assert!(decoder.push_bytes(&bytes).is_err());
    }

    #[test]
    fn typed_headers_are_decoded() {
        let mut decoder = EventStreamDecoder::new("bedrock");
        let message = decoder
            .push_bytes(&encode_message(&[(":event-type", "chunk")], b"{}"))
            .expect("decode")
            .pop()
            .expect("message");
        assert_eq!(message.header_str(":event-type"), Some("chunk"));
        assert_eq!(message.payload, b"{}");
        assert_eq!(decoder.pending_len(), 0);
    }
}
