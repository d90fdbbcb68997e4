use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Response};

use crate::error::AIError;

use super::{
    DynHttpTransport, HttpBodyStream, HttpMethod, HttpRequest, HttpResponse, HttpStreamResponse,
    HttpTransport,
};

/// [`HttpTransport`] over a shared reqwest connection pool.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn default_client() -> Result<Self, AIError> {
        Client::builder()
            .build()
            .map(Self::new)
            .map_err(|err| AIError::network(format!("failed to create reqwest client: {err}")))
    }

    /// Sends `request` and returns the raw response with its status and flattened headers.
    ///
    /// Non-2xx statuses are returned as-is; the provider layer turns them into errors
    /// and reads `Retry-After` from the flattened map.
    async fn execute(&self, request: HttpRequest) -> Result<(u16, HashMap<String, String>, Response), AIError> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
            timeout,
        } = request;

        let method = match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        };
        let mut builder = self
            .client
            .request(method.clone(), &url)
            .headers(outgoing_headers(&headers)?);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        tracing::debug!(%method, %url, status, "provider answered");
        let headers = incoming_headers(response.headers());
        Ok((status, headers, response))
    }
}

/// Converts caller headers, rejecting names or values HTTP cannot carry.
fn outgoing_headers(headers: &HashMap<String, String>) -> Result<HeaderMap, AIError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|err| AIError::invalid_request(format!("invalid header name {name:?}: {err}")))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|err| AIError::invalid_request(format!("invalid value for header {name}: {err}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Lower-cased header map. Repeated headers are joined with `, `; values that are
/// not visible ASCII are dropped.
fn incoming_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map: HashMap<String, String> = HashMap::with_capacity(headers.keys_len());
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        map.entry(name.as_str().to_string())
            .and_modify(|joined| {
                joined.push_str(", ");
                joined.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    map
}

/// Deadline expiry is TIMEOUT; everything else reqwest reports is NETWORK.
fn map_reqwest_error(err: reqwest::Error) -> AIError {
    if err.is_timeout() {
        AIError::timeout(format!("request timed out: {err}"))
    } else {
        AIError::network(err.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AIError> {
        let (status, headers, response) = self.execute(request).await?;
        let body = response.bytes().await.map_err(map_reqwest_error)?.to_vec();
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, AIError> {
        let (status, headers, response) = self.execute(request).await?;
        let body: HttpBodyStream = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(map_reqwest_error)),
        );
        Ok(HttpStreamResponse {
            status,
            headers,
            body,
        })
    }
}

pub fn default_dyn_transport() -> Result<DynHttpTransport, AIError> {
    Ok(Arc::new(ReqwestTransport::default_client()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn outgoing_headers_reject_invalid_names() {
        let headers = HashMap::from([("bad header".to_string(), "x".to_string())]);
        let err = outgoing_headers(&headers).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);

        let headers = HashMap::from([("x-api-key".to_string(), " sk-test ".to_string())]);
        let map = outgoing_headers(&headers).expect("valid headers");
        assert_eq!(map.get("x-api-key").and_then(|value| value.to_str().ok()), Some("sk-test"));
    }

    #[test]
    fn incoming_headers_are_lowercased_and_joined() {
        let mut headers = HeaderMap::new();
        headers.insert("Retry-After", HeaderValue::from_static("12"));
        headers.append("x-trace", HeaderValue::from_static("a"));
        headers.append("x-trace", HeaderValue::from_static("b"));
        headers.insert("x-binary", HeaderValue::from_bytes(b"\xfa").expect("opaque value"));

        let map = incoming_headers(&headers);
        assert_eq!(map.get("retry-after").map(String::as_str), Some("12"));
        assert_eq!(map.get("x-trace").map(String::as_str), Some("a, b"));
        assert!(!map.contains_key("x-binary"));
    }
}
