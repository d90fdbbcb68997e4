use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use serde::Serialize;

use crate::error::AIError;

/// HTTP methods the transport needs: POST for inference, GET for fetching images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Minimal HTTP request representation shared across providers.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Builds a POST request with a JSON request body.
    ///
    /// # Examples
    ///
    /// ```
    /// use relay_llm::http::{HttpMethod, HttpRequest};
    ///
    /// let request = HttpRequest::post_json("https://example.com", br"{}".to_vec());
    /// assert_eq!(request.method, HttpMethod::Post);
    /// assert_eq!(request.headers.get("Content-Type"), Some(&"application/json".to_string()));
    /// ```
    pub fn post_json(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: HashMap::from([("Content-Type".to_string(), "application/json".to_string())]),
            body: Some(body),
            timeout: None,
        }
    }

    /// Builds a body-less GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Adds headers on top of the ones already present. Later values win.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }
}

/// Minimal HTTP response representation.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    /// Converts the body into a UTF-8 string, replacing invalid sequences.
    ///
    /// # Examples
    ///
    /// ```
    /// use relay_llm::http::HttpResponse;
    ///
    /// let response = HttpResponse { status: 200, headers: Default::default(), body: b"ok".to_vec() };
    /// assert_eq!(response.text(), "ok");
    /// ```
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP response that carries a streaming body.
pub struct HttpStreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: HttpBodyStream,
}

/// Alias for the body stream returned by [`HttpTransport::send_stream`].
pub type HttpBodyStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, AIError>> + Send>>;

/// Transport abstraction used to decouple providers from the concrete HTTP client.
///
/// Implementations report failures with [`ErrorKind::Network`](crate::error::ErrorKind)
/// or, for deadlines, [`ErrorKind::Timeout`](crate::error::ErrorKind). Non-2xx answers
/// are not errors at this layer.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends a request and resolves when the full response is available.
    ///
    /// # Examples
    ///
    /// ```
    /// # use async_trait::async_trait;
    /// # use relay_llm::http::{HttpTransport, HttpRequest, HttpResponse, HttpStreamResponse};
    /// # use relay_llm::error::AIError;
    /// # use futures_util::stream;
    /// struct MemoryTransport;
    ///
    /// #[async_trait]
    /// impl HttpTransport for MemoryTransport {
    ///     async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AIError> {
    ///         Ok(HttpResponse { status: 200, headers: request.headers, body: b"ok".to_vec() })
    ///     }
    ///     async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, AIError> {
    ///         Ok(HttpStreamResponse { status: 200, headers: request.headers, body: Box::pin(stream::empty()) })
    ///     }
    /// }
    ///
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let response = MemoryTransport
    ///     .send(HttpRequest::post_json("https://example.com", br"{}".to_vec()))
    ///     .await
    ///     .unwrap();
    /// assert_eq!(response.status, 200);
    /// # });
    /// ```
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AIError>;

    /// Sends a request and returns a streaming body.
    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, AIError>;
}

/// Thread-safe handle to a transport implementation.
pub type DynHttpTransport = Arc<dyn HttpTransport>;

fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn encode_body<T: Serialize>(body: &T) -> Result<Vec<u8>, AIError> {
    serde_json::to_vec(body)
        .map_err(|err| AIError::invalid_request(format!("failed to serialize request: {err}")))
}

/// Serializes a body to JSON, attaches headers, and issues a POST request.
///
/// # Errors
///
/// Returns an `INVALID_REQUEST` error if serialization fails, otherwise forwards the
/// error raised by [`HttpTransport::send`].
pub async fn post_json_with_headers<T: Serialize>(
    transport: &dyn HttpTransport,
    url: impl Into<String>,
    headers: HashMap<String, String>,
    body: &T,
    timeout: Option<Duration>,
) -> Result<HttpResponse, AIError> {
    let request = HttpRequest::post_json(url, encode_body(body)?)
        .with_headers(headers)
        .with_timeout(timeout);
    transport.send(request).await
}

/// Issues a JSON POST request and returns the streaming response.
///
/// Mirrors [`post_json_with_headers`] but calls [`HttpTransport::send_stream`].
pub async fn post_json_stream_with_headers<T: Serialize>(
    transport: &dyn HttpTransport,
    url: impl Into<String>,
    headers: HashMap<String, String>,
    body: &T,
    timeout: Option<Duration>,
) -> Result<HttpStreamResponse, AIError> {
    let request = HttpRequest::post_json(url, encode_body(body)?)
        .with_headers(headers)
        .with_timeout(timeout);
    transport.send_stream(request).await
}

pub mod reqwest;
