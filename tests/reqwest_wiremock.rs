use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use llm_relay::error::LLMError;
use llm_relay::http::reqwest::ReqwestTransport;
use llm_relay::provider::openai_compatible::{OpenAiCompatibleProvider, Preset};
use llm_relay::types::{ChatRequest, FinishReason, Message};
use llm_relay::{LLMClient, LLMProvider};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(server: &MockServer) -> OpenAiCompatibleProvider {
    let transport = ReqwestTransport::default_client().expect("reqwest client");
    OpenAiCompatibleProvider::new(Arc::new(transport), Preset::OpenAi, "sk-test")
        .with_base_url(format!("{}/v1", server.uri()))
}

#[tokio::test]
async fn chat_over_real_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({"model": "gpt-4o-mini"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "gpt-4o-mini-2024-07-18",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "pong"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 4, "completion_tokens": 1, "total_tokens": 5}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = LLMClient::builder()
        .register_handle("default", Arc::new(provider(&server)))
        .build();
    let response = client
        .chat("default", ChatRequest::new("gpt-4o-mini", vec![Message::user("ping")]))
        .await
        .expect("chat");

    assert_eq!(response.first_text(), Some("pong"));
    assert_eq!(response.model, "gpt-4o-mini");
    assert_eq!(response.usage.total_tokens, 5);
    assert_eq!(response.choices[0].finish_reason, FinishReason::Stop);
}

#[tokio::test]
async fn rate_limit_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "7")
                .set_body_json(json!({"error": {"message": "Rate limit reached", "type": "requests"}})),
        )
        .mount(&server)
        .await;

    let err = provider(&server)
        .chat(ChatRequest::new("gpt-4o-mini", vec![Message::user("ping")]))
        .await
        .expect_err("429 must fail");
    match err {
        LLMError::RateLimit { retry_after, .. } => {
            assert_eq!(retry_after, Some(Duration::from_secs(7)))
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn sse_stream_over_real_http() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"id\":\"c9\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"po\"}}]}\n\n",
        "data: {\"id\":\"c9\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"ng\"},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let mut request = ChatRequest::new("gpt-4o-mini", vec![Message::user("ping")]);
    request.stream = true;
    let chunks: Vec<_> = provider(&server)
        .stream_chat(request)
        .await
        .expect("stream")
        .collect()
        .await;

    let chunks: Vec<_> = chunks
        .into_iter()
        .map(|item| item.expect("chunk"))
        .collect();
    let text: String = chunks.iter().map(|chunk| chunk.text_delta()).collect();
    assert_eq!(text, "pong");
    assert_eq!(
        chunks.last().and_then(|chunk| chunk.finish_reason()),
        Some(FinishReason::Stop)
    );
}
