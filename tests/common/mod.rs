#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream;
use relay_llm::error::AIError;
use relay_llm::http::{HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport};
use serde_json::Value;

/// What the mock answers for one request.
pub enum Reply {
    Json {
        status: u16,
        headers: Vec<(&'static str, &'static str)>,
        body: Value,
    },
    Sse(Vec<String>),
    Fail(AIError),
    Hang,
}

impl Reply {
    pub fn ok(body: Value) -> Self {
        Reply::Json {
            status: 200,
            headers: Vec::new(),
            body,
        }
    }

    pub fn status(status: u16, body: Value) -> Self {
        Reply::Json {
            status,
            headers: Vec::new(),
            body,
        }
    }

    /// SSE body built from JSON payloads, one `data:` line each.
    pub fn sse<I>(events: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        Reply::Sse(
            events
                .into_iter()
                .map(|event| format!("data: {event}\n\n"))
                .collect(),
        )
    }
}

type Handler = dyn Fn(&HttpRequest, usize) -> Reply + Send + Sync;

/// Transport that answers through a closure and records every request it sees.
pub struct MockTransport {
    handler: Box<Handler>,
    calls: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    /// `handler` receives the request and its zero-based call index.
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&HttpRequest, usize) -> Reply + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<HttpRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.url).collect()
    }

    pub fn body(&self, index: usize) -> Value {
        let calls = self.calls();
        serde_json::from_slice(calls[index].body.as_deref().unwrap_or_default())
            .expect("request body is JSON")
    }

    fn reply(&self, request: HttpRequest) -> Reply {
        let mut calls = self.calls.lock().unwrap();
        let index = calls.len();
        calls.push(request.clone());
        drop(calls);
        (self.handler)(&request, index)
    }
}

fn header_map(headers: Vec<(&'static str, &'static str)>) -> HashMap<String, String> {
    headers
        .into_iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AIError> {
        match self.reply(request) {
            Reply::Json {
                status,
                headers,
                body,
            } => Ok(HttpResponse {
                status,
                headers: header_map(headers),
                body: body.to_string().into_bytes(),
            }),
            Reply::Sse(events) => Ok(HttpResponse {
                status: 200,
                headers: HashMap::new(),
                body: events.concat().into_bytes(),
            }),
            Reply::Fail(err) => Err(err),
            Reply::Hang => std::future::pending().await,
        }
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, AIError> {
        match self.reply(request) {
            Reply::Json {
                status,
                headers,
                body,
            } => Ok(HttpStreamResponse {
                status,
                headers: header_map(headers),
                body: Box::pin(stream::iter([Ok(body.to_string().into_bytes())])),
            }),
            Reply::Sse(events) => Ok(HttpStreamResponse {
                status: 200,
                headers: HashMap::new(),
                body: Box::pin(stream::iter(
                    events.into_iter().map(|event| Ok(event.into_bytes())),
                )),
            }),
            Reply::Fail(err) => Err(err),
            Reply::Hang => std::future::pending().await,
        }
    }
}
