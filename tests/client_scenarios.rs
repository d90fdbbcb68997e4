mod common;

use std::time::Duration;

use common::{MockTransport, Reply};
use relay_llm::error::{AIError, ErrorKind};
use relay_llm::pricing::PRICING;
use relay_llm::retry::RetryConfig;
use relay_llm::types::{ChatMessage, ChatRequest, FinishReason, Provider, ToolChoice};
use relay_llm::{AIClient, JsonSchema, Tool};
use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn openai_reply(content: &str) -> Reply {
    Reply::ok(json!({
        "id": "chatcmpl-1",
        "model": "gpt-4o-2024-08-06",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 100, "completion_tokens": 50, "total_tokens": 150 }
    }))
}

fn anthropic_reply(content: &str) -> Reply {
    Reply::ok(json!({
        "id": "msg_1",
        "type": "message",
        "role": "assistant",
        "model": "claude-3-5-haiku-20241022",
        "content": [{ "type": "text", "text": content }],
        "stop_reason": "end_turn",
        "usage": { "input_tokens": 20, "output_tokens": 5 }
    }))
}

#[tokio::test]
async fn gpt_4o_cost_matches_pricing_table() {
    let transport = MockTransport::new(|_, _| openai_reply("Hello!"));
    let client = AIClient::builder()
        .transport(transport.clone())
        .api_key(Provider::OpenAi, "sk-test")
        .build()
        .unwrap();

    let result = client.ask("gpt-4o", "Hi").await.unwrap();

    assert_eq!(result.usage.input_tokens, 100);
    assert_eq!(result.usage.output_tokens, 50);
    assert!((result.cost.input - 0.00025).abs() < 1e-12);
    assert!((result.cost.output - 0.0005).abs() < 1e-12);
    assert!((result.cost.total - 0.00075).abs() < 1e-12);
    assert_eq!(result.finish_reason, Some(FinishReason::Stop));
}

#[tokio::test]
async fn alias_resolves_and_missing_key_never_hits_network() {
    let transport = MockTransport::new(|_, _| panic!("no request expected"));
    let client = AIClient::builder()
        .transport(transport.clone())
        .alias("fast", "claude-3-5-haiku-20241022")
        .build()
        .unwrap();

    assert_eq!(client.resolve_alias("fast"), "claude-3-5-haiku-20241022");
    assert_eq!(client.resolve_alias("FAST"), "claude-3-5-haiku-20241022");

    let err = client.request("fast").user("hi").send().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NoApiKey);
    assert_eq!(err.provider, Some(Provider::Anthropic));
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn unknown_model_is_invalid_model_without_transport_call() {
    let transport = MockTransport::new(|_, _| panic!("no request expected"));
    let client = AIClient::builder()
        .transport(transport.clone())
        .api_key(Provider::OpenAi, "sk-test")
        .build()
        .unwrap();

    assert_eq!(client.resolve_provider("not-a-real-model"), None);
    let err = client
        .request("not-a-real-model")
        .user("hi")
        .send()
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidModel);
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn rate_limit_carries_retry_after_header() {
    let transport = MockTransport::new(|_, _| Reply::Json {
        status: 429,
        headers: vec![("retry-after", "12")],
        body: json!({ "error": { "message": "Rate limit reached", "type": "requests" } }),
    });
    let client = AIClient::builder()
        .transport(transport.clone())
        .api_key(Provider::OpenAi, "sk-test")
        .build()
        .unwrap();

    let err = client.ask("gpt-4o-mini", "hi").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::RateLimit);
    assert_eq!(err.retry_after, Some(12));
    assert_eq!(err.status, Some(429));
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn fallback_after_invalid_key_attempts_primary_once() {
    let transport = MockTransport::new(|request, _| {
        if request.url.contains("openai.com") {
            Reply::status(
                401,
                json!({ "error": { "message": "Incorrect API key provided", "type": "invalid_request_error" } }),
            )
        } else {
            anthropic_reply("from the fallback")
        }
    });
    let client = AIClient::builder()
        .transport(transport.clone())
        .api_key(Provider::OpenAi, "sk-bad")
        .api_key(Provider::Anthropic, "sk-ant")
        .retry(RetryConfig {
            enabled: true,
            ..RetryConfig::default()
        })
        .fallbacks(["claude-3-5-haiku-20241022"])
        .build()
        .unwrap();

    let result = client.ask("gpt-4o", "hi").await.unwrap();
    assert_eq!(result.content, "from the fallback");
    assert_eq!(result.provider, Provider::Anthropic);

    let urls = transport.urls();
    assert_eq!(urls.len(), 2);
    assert_eq!(
        urls.iter().filter(|url| url.contains("openai.com")).count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn server_errors_are_retried_with_backoff() {
    let transport = MockTransport::new(|_, index| {
        if index < 2 {
            Reply::status(503, json!({ "error": { "message": "overloaded" } }))
        } else {
            openai_reply("finally")
        }
    });
    let client = AIClient::builder()
        .transport(transport.clone())
        .api_key(Provider::OpenAi, "sk-test")
        .retry(RetryConfig {
            enabled: true,
            max_attempts: None,
            initial_delay_ms: 1_000,
        })
        .build()
        .unwrap();

    let started = Instant::now();
    let result = client.ask("gpt-4o", "hi").await.unwrap();
    assert_eq!(result.content, "finally");
    assert_eq!(transport.calls().len(), 3);
    assert!(started.elapsed() >= Duration::from_millis(3_000));
    assert_eq!(client.ledger().request_count(), 1);
}

#[tokio::test]
async fn retry_disabled_by_default() {
    let transport = MockTransport::new(|_, _| Reply::Fail(AIError::network("connection reset")));
    let client = AIClient::builder()
        .transport(transport.clone())
        .api_key(Provider::OpenAi, "sk-test")
        .build()
        .unwrap();

    let err = client.ask("gpt-4o", "hi").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Network);
    assert_eq!(err.provider, Some(Provider::OpenAi));
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_settles_with_timeout() {
    let transport = MockTransport::new(|_, _| Reply::Hang);
    let client = AIClient::builder()
        .transport(transport.clone())
        .api_key(Provider::OpenAi, "sk-test")
        .build()
        .unwrap();

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = client
        .request("gpt-4o")
        .user("hi")
        .cancellation(token)
        .send()
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
    assert_eq!(client.ledger().request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn request_timeout_is_timeout_error() {
    let transport = MockTransport::new(|_, _| Reply::Hang);
    let client = AIClient::builder()
        .transport(transport)
        .api_key(Provider::Google, "g-key")
        .build()
        .unwrap();

    let err = client
        .request("gemini-2.0-flash")
        .user("hi")
        .timeout(Duration::from_secs(2))
        .send()
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
    assert_eq!(err.provider, Some(Provider::Google));
}

#[tokio::test]
async fn tool_calls_round_trip_through_gemini() {
    let transport = MockTransport::new(|_, _| {
        Reply::ok(json!({
            "candidates": [{
                "content": { "role": "model", "parts": [
                    { "functionCall": { "name": "get_weather", "args": { "city": "Oslo" } } }
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": { "promptTokenCount": 12, "candidatesTokenCount": 3, "totalTokenCount": 15 }
        }))
    });
    let client = AIClient::builder()
        .transport(transport.clone())
        .api_key(Provider::Google, "g-key")
        .build()
        .unwrap();

    let result = client
        .request("gemini-2.0-flash")
        .system("Use tools when helpful.")
        .user("Weather in Oslo?")
        .tool(Tool::new(
            "get_weather",
            "Current weather for a city",
            JsonSchema::object().property("city", JsonSchema::string(), true),
        ))
        .tool_choice(ToolChoice::Auto)
        .send()
        .await
        .unwrap();

    assert_eq!(result.finish_reason, Some(FinishReason::ToolCalls));
    assert_eq!(result.tool_calls.len(), 1);
    assert_eq!(result.tool_calls[0].name, "get_weather");
    assert_eq!(result.tool_calls[0].arguments, json!({ "city": "Oslo" }));

    let call = &transport.calls()[0];
    assert_eq!(
        call.url,
        "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
    );
    assert_eq!(call.header("x-goog-api-key"), Some("g-key"));
    let body = transport.body(0);
    assert_eq!(
        body["system_instruction"],
        json!({ "parts": [{ "text": "Use tools when helpful." }] })
    );
}

#[tokio::test]
async fn anthropic_headers_and_default_max_tokens() {
    let transport = MockTransport::new(|_, _| anthropic_reply("ok"));
    let client = AIClient::builder()
        .transport(transport.clone())
        .api_key(Provider::Anthropic, "sk-ant")
        .header(Provider::Anthropic, "anthropic-beta", "tools-2024-04-04")
        .build()
        .unwrap();

    let mut request = ChatRequest::new("claude-3-5-haiku-20241022");
    request.messages.push(ChatMessage::system("be brief"));
    request.messages.push(ChatMessage::user("hi"));
    client.send_once(request).await.unwrap();

    let call = &transport.calls()[0];
    assert_eq!(call.url, "https://api.anthropic.com/v1/messages");
    assert_eq!(call.header("x-api-key"), Some("sk-ant"));
    assert_eq!(call.header("anthropic-version"), Some("2023-06-01"));
    assert_eq!(call.header("anthropic-beta"), Some("tools-2024-04-04"));
    let body = transport.body(0);
    assert_eq!(body["max_tokens"], json!(4096));
    assert_eq!(body["system"], json!("be brief"));
}

#[test]
fn every_priced_model_resolves_to_its_table_provider() {
    let client = AIClient::builder()
        .transport(MockTransport::new(|_, _| panic!("no request expected")))
        .build()
        .unwrap();
    for (model, entry) in PRICING.iter() {
        assert_eq!(client.resolve_provider(model), Some(entry.provider), "{model}");
    }
}

#[tokio::test]
async fn ledger_rolls_up_by_model_and_provider() {
    let transport = MockTransport::new(|request, _| {
        if request.url.contains("anthropic") {
            anthropic_reply("a")
        } else {
            openai_reply("o")
        }
    });
    let client = AIClient::builder()
        .transport(transport)
        .api_key(Provider::OpenAi, "sk-test")
        .api_key(Provider::Anthropic, "sk-ant")
        .build()
        .unwrap();

    client.ask("gpt-4o", "one").await.unwrap();
    client.ask("gpt-4o", "two").await.unwrap();
    client.ask("claude-3-5-haiku-20241022", "three").await.unwrap();

    let summary = client.ledger().summary();
    assert_eq!(summary.request_count, 3);
    assert_eq!(summary.by_model["gpt-4o"].requests, 2);
    assert_eq!(summary.by_provider[&Provider::Anthropic].requests, 1);
    let top = client.ledger().top_providers(1);
    assert_eq!(top[0].0, Provider::OpenAi);
}

#[derive(Default)]
struct RecordingTracker {
    records: std::sync::Mutex<Vec<relay_llm::UsageRecord>>,
}

impl relay_llm::UsageTracker for RecordingTracker {
    fn track(&self, record: &relay_llm::UsageRecord) {
        self.records.lock().unwrap().push(record.clone());
    }
}

#[tokio::test]
async fn external_tracker_sees_every_successful_dispatch() {
    let transport = MockTransport::new(|_, index| {
        if index == 0 {
            openai_reply("ok")
        } else {
            Reply::status(500, json!({ "error": { "message": "boom" } }))
        }
    });
    let tracker = std::sync::Arc::new(RecordingTracker::default());
    let client = AIClient::builder()
        .transport(transport)
        .api_key(Provider::OpenAi, "sk-test")
        .tracker(tracker.clone())
        .build()
        .unwrap();

    client.ask("smart", "hi").await.unwrap();
    client.ask("gpt-4o", "hi").await.unwrap_err();

    let records = tracker.records.lock().unwrap().clone();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].model, client.resolve_alias("smart"));
    assert_eq!(records[0].provider, Provider::OpenAi);
    assert!(!records[0].streamed);
}
