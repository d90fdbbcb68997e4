mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{MockTransport, Reply};
use futures_util::{StreamExt, stream};
use relay_llm::error::{AIError, ErrorKind};
use relay_llm::http::{HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport};
use relay_llm::types::{FinishReason, Provider, StreamChunk};
use relay_llm::{AIClient, ChatStream};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

fn client_for(transport: Arc<MockTransport>) -> AIClient {
    AIClient::builder()
        .transport(transport)
        .api_key(Provider::OpenAi, "sk-test")
        .api_key(Provider::Anthropic, "sk-ant")
        .api_key(Provider::Google, "g-key")
        .build()
        .unwrap()
}

async fn collect(stream: ChatStream) -> (String, Vec<StreamChunk>) {
    let chunks: Vec<StreamChunk> = stream.collect().await;
    let text = chunks
        .iter()
        .filter_map(|chunk| match chunk {
            StreamChunk::Text(text) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    (text, chunks)
}

fn sse_lines(events: &[Value], done_sentinel: bool) -> Vec<String> {
    let mut lines: Vec<String> = events
        .iter()
        .map(|event| format!("data: {event}\n\n"))
        .collect();
    if done_sentinel {
        lines.push("data: [DONE]\n\n".to_string());
    }
    lines
}

/// Streams `events` and returns the same text as a buffered answer, so the two
/// paths can be compared.
async fn stream_and_buffer(model: &str, stream_events: Vec<String>, buffered: Value) -> (String, String) {
    let transport = MockTransport::new(move |request, _| {
        if is_stream_request(request) {
            Reply::Sse(stream_events.clone())
        } else {
            Reply::ok(buffered.clone())
        }
    });
    let client = client_for(transport);

    let streamed = client.request(model).user("Say hello").stream().await.unwrap();
    let (text, chunks) = collect(streamed).await;
    assert!(matches!(chunks.last(), Some(StreamChunk::Done { .. })), "{chunks:?}");

    let result = client.request(model).user("Say hello").send().await.unwrap();
    assert_eq!(client.ledger().request_count(), 2);
    (text, result.content)
}

/// Gemini marks streaming in the URL, the other families in the body.
fn is_stream_request(request: &HttpRequest) -> bool {
    request.url.contains(":streamGenerateContent")
        || request
            .body
            .as_deref()
            .and_then(|body| serde_json::from_slice::<Value>(body).ok())
            .and_then(|body| body.get("stream").and_then(Value::as_bool))
            .unwrap_or(false)
}

#[tokio::test]
async fn openai_stream_text_matches_buffered_content() {
    let events = sse_lines(
        &[
            json!({"id":"c1","model":"gpt-4o","choices":[{"index":0,"delta":{"role":"assistant","content":"Hel"},"finish_reason":null}]}),
            json!({"id":"c1","model":"gpt-4o","choices":[{"index":0,"delta":{"content":"lo!"},"finish_reason":"stop"}]}),
            json!({"id":"c1","model":"gpt-4o","choices":[],"usage":{"prompt_tokens":9,"completion_tokens":2,"total_tokens":11}}),
        ],
        true,
    );
    let buffered = json!({
        "model": "gpt-4o",
        "choices": [{ "index": 0, "message": { "role": "assistant", "content": "Hello!" }, "finish_reason": "stop" }],
        "usage": { "prompt_tokens": 9, "completion_tokens": 2, "total_tokens": 11 }
    });

    let (streamed, buffered) = stream_and_buffer("gpt-4o", events, buffered).await;
    assert_eq!(streamed, "Hello!");
    assert_eq!(streamed, buffered);
}

#[tokio::test]
async fn anthropic_stream_text_matches_buffered_content() {
    let events = sse_lines(
        &[
            json!({"type":"message_start","message":{"id":"m1","model":"claude-3-5-haiku-20241022","usage":{"input_tokens":9,"output_tokens":1}}}),
            json!({"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}),
            json!({"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}),
            json!({"type":"ping"}),
            json!({"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"lo!"}}),
            json!({"type":"content_block_stop","index":0}),
            json!({"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":2}}),
            json!({"type":"message_stop"}),
        ],
        false,
    );
    let buffered = json!({
        "model": "claude-3-5-haiku-20241022",
        "content": [{ "type": "text", "text": "Hello!" }],
        "stop_reason": "end_turn",
        "usage": { "input_tokens": 9, "output_tokens": 2 }
    });

    let (streamed, buffered) =
        stream_and_buffer("claude-3-5-haiku-20241022", events, buffered).await;
    assert_eq!(streamed, "Hello!");
    assert_eq!(streamed, buffered);
}

#[tokio::test]
async fn gemini_stream_text_matches_buffered_content() {
    let events = sse_lines(
        &[
            json!({"candidates":[{"content":{"role":"model","parts":[{"text":"Hel"}]}}]}),
            json!({"candidates":[{"content":{"role":"model","parts":[{"text":"lo!"}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":9,"candidatesTokenCount":2,"totalTokenCount":11}}),
        ],
        false,
    );
    let buffered = json!({
        "candidates": [{ "content": { "role": "model", "parts": [{ "text": "Hello!" }] }, "finishReason": "STOP" }],
        "usageMetadata": { "promptTokenCount": 9, "candidatesTokenCount": 2, "totalTokenCount": 11 }
    });

    let (streamed, buffered) = stream_and_buffer("gemini-2.0-flash", events, buffered).await;
    assert_eq!(streamed, "Hello!");
    assert_eq!(streamed, buffered);
}

#[tokio::test]
async fn stream_done_carries_usage_cost_and_is_recorded() {
    let events = sse_lines(
        &[
            json!({"choices":[{"index":0,"delta":{"content":"Hi"},"finish_reason":"stop"}]}),
            json!({"choices":[],"usage":{"prompt_tokens":100,"completion_tokens":50,"total_tokens":150}}),
        ],
        true,
    );
    let transport = MockTransport::new(move |_, _| Reply::Sse(events.clone()));
    let client = client_for(transport.clone());

    let streamed = client.request("gpt-4o").user("hi").stream().await.unwrap();
    let (_, chunks) = collect(streamed).await;

    match chunks.last() {
        Some(StreamChunk::Done {
            usage: Some(usage),
            cost: Some(cost),
            finish_reason,
        }) => {
            assert_eq!(usage.total_tokens, 150);
            assert!((cost.total - 0.00075).abs() < 1e-12);
            assert_eq!(finish_reason, &Some(FinishReason::Stop));
        }
        other => panic!("expected done with usage, got {other:?}"),
    }
    assert_eq!(client.ledger().request_count(), 1);
    assert!(client.ledger().summary().by_model.contains_key("gpt-4o"));

    let body = transport.body(0);
    assert_eq!(body["stream"], json!(true));
    assert_eq!(body["stream_options"], json!({ "include_usage": true }));
}

#[tokio::test]
async fn anthropic_tool_arguments_are_parsed_at_block_close() {
    let events = sse_lines(
        &[
            json!({"type":"message_start","message":{"usage":{"input_tokens":30}}}),
            json!({"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"toolu_1","name":"get_weather","input":{}}}),
            json!({"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"city\":"}}),
            json!({"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":" \"Paris\"}"}}),
            json!({"type":"content_block_stop","index":0}),
            json!({"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":12}}),
            json!({"type":"message_stop"}),
        ],
        false,
    );
    let transport = MockTransport::new(move |_, _| Reply::Sse(events.clone()));
    let client = client_for(transport);

    let streamed = client
        .request("claude-sonnet-4-20250514")
        .user("weather in Paris")
        .stream()
        .await
        .unwrap();
    let (_, chunks) = collect(streamed).await;

    assert!(matches!(
        &chunks[0],
        StreamChunk::ToolCall(call)
            if call.id == "toolu_1" && call.arguments == json!({ "city": "Paris" })
    ));
    assert!(matches!(
        &chunks[1],
        StreamChunk::Done { finish_reason: Some(FinishReason::ToolCalls), .. }
    ));
}

#[tokio::test]
async fn truncated_anthropic_stream_ends_with_network_error() {
    let events = sse_lines(
        &[
            json!({"type":"message_start","message":{"usage":{"input_tokens":3}}}),
            json!({"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"partial"}}),
        ],
        false,
    );
    let transport = MockTransport::new(move |_, _| Reply::Sse(events.clone()));
    let client = client_for(transport);

    let streamed = client
        .request("claude-3-5-haiku-20241022")
        .user("hi")
        .stream()
        .await
        .unwrap();
    let (text, chunks) = collect(streamed).await;
    assert_eq!(text, "partial");
    assert!(matches!(
        chunks.last(),
        Some(StreamChunk::Error(err)) if err.kind == ErrorKind::Network
    ));
    assert_eq!(client.ledger().request_count(), 0);
}

#[tokio::test]
async fn rate_limited_stream_yields_single_error_chunk() {
    let transport = MockTransport::new(|_, _| Reply::Json {
        status: 429,
        headers: vec![("Retry-After", "7")],
        body: json!({ "error": { "type": "rate_limit_error", "message": "slow down" } }),
    });
    let client = client_for(transport);

    let streamed = client
        .request("claude-3-5-haiku-20241022")
        .user("hi")
        .stream()
        .await
        .unwrap();
    let (_, chunks) = collect(streamed).await;
    assert_eq!(chunks.len(), 1);
    match &chunks[0] {
        StreamChunk::Error(err) => {
            assert_eq!(err.kind, ErrorKind::RateLimit);
            assert_eq!(err.retry_after, Some(7));
        }
        other => panic!("expected error chunk, got {other:?}"),
    }
}

/// Sends one OpenAI delta, then never finishes the body.
struct StallingTransport;

#[async_trait]
impl HttpTransport for StallingTransport {
    async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, AIError> {
        Err(AIError::network("buffered path not used"))
    }

    async fn send_stream(&self, _request: HttpRequest) -> Result<HttpStreamResponse, AIError> {
        let first = format!(
            "data: {}\n\n",
            json!({"choices":[{"index":0,"delta":{"content":"Hel"}}]})
        );
        Ok(HttpStreamResponse {
            status: 200,
            headers: HashMap::new(),
            body: Box::pin(stream::iter([Ok(first.into_bytes())]).chain(stream::pending())),
        })
    }
}

#[tokio::test(start_paused = true)]
async fn cancelling_mid_stream_ends_with_timeout_chunk() {
    let client = AIClient::builder()
        .transport(Arc::new(StallingTransport))
        .api_key(Provider::OpenAi, "sk-test")
        .build()
        .unwrap();
    let token = CancellationToken::new();

    let mut streamed = client
        .request("gpt-4o")
        .user("hi")
        .cancellation(token.clone())
        .stream()
        .await
        .unwrap();

    assert_eq!(streamed.next().await, Some(StreamChunk::Text("Hel".to_string())));

    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    match streamed.next().await {
        Some(StreamChunk::Error(err)) => {
            assert_eq!(err.kind, ErrorKind::Timeout);
            assert_eq!(err.provider, Some(Provider::OpenAi));
        }
        other => panic!("expected timeout chunk, got {other:?}"),
    }
    assert_eq!(streamed.next().await, None);
}

/// Serves a fixed SSE body given as raw byte chunks.
struct RawSseTransport(Vec<Vec<u8>>);

#[async_trait]
impl HttpTransport for RawSseTransport {
    async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, AIError> {
        Err(AIError::network("buffered path not used"))
    }

    async fn send_stream(&self, _request: HttpRequest) -> Result<HttpStreamResponse, AIError> {
        Ok(HttpStreamResponse {
            status: 200,
            headers: HashMap::new(),
            body: Box::pin(stream::iter(self.0.clone().into_iter().map(Ok))),
        })
    }
}

#[tokio::test]
async fn non_utf8_line_is_skipped_and_stream_completes() {
    let delta = format!(
        "data: {}\n\n",
        json!({"choices":[{"index":0,"delta":{"content":"Hello"},"finish_reason":"stop"}]})
    );
    let transport = RawSseTransport(vec![
        b"data: \xff\xfe\n\n".to_vec(),
        delta.into_bytes(),
        b"data: [DONE]\n\n".to_vec(),
    ]);
    let client = AIClient::builder()
        .transport(Arc::new(transport))
        .api_key(Provider::OpenAi, "sk-test")
        .build()
        .unwrap();

    let streamed = client.request("gpt-4o").user("hi").stream().await.unwrap();
    let (text, chunks) = collect(streamed).await;

    assert_eq!(text, "Hello");
    assert!(!chunks.iter().any(|chunk| matches!(chunk, StreamChunk::Error(_))));
    assert!(matches!(
        chunks.last(),
        Some(StreamChunk::Done { finish_reason: Some(FinishReason::Stop), .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn cancelling_while_opening_yields_timeout_chunk() {
    let transport = MockTransport::new(|_, _| Reply::Hang);
    let client = client_for(transport);
    let token = CancellationToken::new();

    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        trigger.cancel();
    });

    let streamed = client
        .request("gpt-4o")
        .user("hi")
        .cancellation(token)
        .stream()
        .await
        .expect("cancellation arrives as a chunk");
    let (_, chunks) = collect(streamed).await;

    assert_eq!(chunks.len(), 1);
    match &chunks[0] {
        StreamChunk::Error(err) => {
            assert_eq!(err.kind, ErrorKind::Timeout);
            assert_eq!(err.provider, Some(Provider::OpenAi));
        }
        other => panic!("expected timeout chunk, got {other:?}"),
    }
    assert_eq!(client.ledger().request_count(), 0);
}
