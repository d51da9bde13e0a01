//! In-memory transport that replays scripted responses and records requests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use llm_relay::error::LLMError;
use llm_relay::http::{
    HttpBodyStream, HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport,
};
use llm_relay::{ChatChunk, ChatStream};
use serde_json::Value;

pub enum Scripted {
    Json(u16, Value),
    WithHeaders(u16, Vec<(&'static str, &'static str)>, Value),
    Stream(u16, Vec<Vec<u8>>),
    /// Delivers the chunks, then keeps the connection open without further bytes.
    OpenStream(u16, Vec<Vec<u8>>),
}

impl Scripted {
    pub fn ok(value: Value) -> Self {
        Self::Json(200, value)
    }

    /// Splits `text` into chunks of `size` bytes to exercise frame reassembly.
    pub fn chunked(text: &str, size: usize) -> Self {
        Self::Stream(
            200,
            text.as_bytes().chunks(size).map(<[u8]>::to_vec).collect(),
        )
    }
}

#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn request_json(&self, index: usize) -> Value {
        let requests = self.requests();
        let body = requests[index].body.as_deref().expect("request body");
        serde_json::from_slice(body).expect("json body")
    }

    fn next(&self, request: HttpRequest) -> Scripted {
        let url = request.url.clone();
        self.requests.lock().expect("requests lock").push(request);
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| panic!("no scripted response left for {url}"))
    }
}

fn header_map(headers: Vec<(&'static str, &'static str)>) -> HashMap<String, String> {
    headers
        .into_iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
        match self.next(request) {
            Scripted::Json(status, value) => Ok(HttpResponse {
                status,
                headers: HashMap::new(),
                body: serde_json::to_vec(&value).expect("encode"),
            }),
            Scripted::WithHeaders(status, headers, value) => Ok(HttpResponse {
                status,
                headers: header_map(headers),
                body: serde_json::to_vec(&value).expect("encode"),
            }),
            Scripted::Stream(..) | Scripted::OpenStream(..) => {
                panic!("stream scripted for a unary request")
            }
        }
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
        let (status, chunks, hold_open) = match self.next(request) {
            Scripted::Stream(status, chunks) => (status, chunks, false),
            Scripted::OpenStream(status, chunks) => (status, chunks, true),
            Scripted::Json(status, value) | Scripted::WithHeaders(status, _, value) => {
                (status, vec![serde_json::to_vec(&value).expect("encode")], false)
            }
        };
        let chunks = stream::iter(chunks.into_iter().map(Ok));
        let body: HttpBodyStream = if hold_open {
            Box::pin(chunks.chain(stream::pending()))
        } else {
            Box::pin(chunks)
        };
        Ok(HttpStreamResponse {
            status,
            headers: HashMap::new(),
            body,
        })
    }
}

/// Drains a stream, panicking on the first error.
pub async fn collect_ok(mut stream: ChatStream) -> Vec<ChatChunk> {
    let mut chunks = Vec::new();
    while let Some(item) = stream.next().await {
        chunks.push(item.unwrap_or_else(|err| panic!("unexpected stream error: {err:?}")));
    }
    chunks
}

pub fn joined_text(chunks: &[ChatChunk]) -> String {
    chunks.iter().map(ChatChunk::text_delta).collect()
}

/// Asserts the single-terminal-chunk contract and returns the terminal chunk.
pub fn assert_single_terminal(chunks: &[ChatChunk]) -> &ChatChunk {
    let finishing: Vec<_> = chunks
        .iter()
        .filter(|chunk| chunk.finish_reason().is_some())
        .collect();
    assert_eq!(finishing.len(), 1, "expected exactly one finish chunk");
    let last = chunks.last().expect("at least one chunk");
    assert!(last.finish_reason().is_some(), "finish chunk must be last");
    last
}
