use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Provider;

/// Classification tag shared by every failure the client can report.
///
/// The orchestrator decides whether to retry, fall back or give up purely from this
/// tag, so translators must pick it carefully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// No credential configured for the resolved provider.
    NoApiKey,
    /// The provider rejected the credential (HTTP 401/403).
    InvalidApiKey,
    /// The provider throttled the request (HTTP 429).
    RateLimit,
    /// The model identifier resolves to no known provider.
    InvalidModel,
    /// Transport failure other than cancellation.
    Network,
    /// Any other non-2xx answer from the provider.
    ApiError,
    /// Explicit cancellation or an exceeded deadline.
    Timeout,
    /// The provider blocked the content.
    ContentFilter,
    /// HTTP 400 or a local precondition failure.
    InvalidRequest,
}

impl ErrorKind {
    /// Returns the upper-case tag, e.g. `RATE_LIMIT`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NoApiKey => "NO_API_KEY",
            ErrorKind::InvalidApiKey => "INVALID_API_KEY",
            ErrorKind::RateLimit => "RATE_LIMIT",
            ErrorKind::InvalidModel => "INVALID_MODEL",
            ErrorKind::Network => "NETWORK",
            ErrorKind::ApiError => "API_ERROR",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::ContentFilter => "CONTENT_FILTER",
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
        }
    }

    /// Whether the orchestrator may retry the same candidate after this kind.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::RateLimit | ErrorKind::Timeout | ErrorKind::ApiError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized failure returned by every fallible operation in the crate.
///
/// An `AIError` is built once where the failure is detected and then only moved or
/// cloned; nothing mutates it on the way to the caller.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct AIError {
    pub kind: ErrorKind,
    pub message: String,
    /// Provider that produced or was about to receive the request, if known.
    pub provider: Option<Provider>,
    /// HTTP status of the failed response, if there was one.
    pub status: Option<u16>,
    /// Seconds the provider asked us to wait before retrying.
    pub retry_after: Option<u64>,
}

impl AIError {
    /// Creates an error of the given kind with no provider context.
    ///
    /// # Examples
    ///
    /// ```
    /// use relay_llm::error::{AIError, ErrorKind};
    ///
    /// let err = AIError::new(ErrorKind::Network, "dns lookup failed");
    /// assert_eq!(err.kind, ErrorKind::Network);
    /// assert!(err.provider.is_none());
    /// ```
    pub fn new<T: Into<String>>(kind: ErrorKind, message: T) -> Self {
        Self {
            kind,
            message: message.into(),
            provider: None,
            status: None,
            retry_after: None,
        }
    }

    /// Attaches the provider the failure belongs to.
    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Attaches the HTTP status of the failed response.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attaches a retry-after hint in seconds.
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    pub fn network<T: Into<String>>(message: T) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn timeout<T: Into<String>>(message: T) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn invalid_request<T: Into<String>>(message: T) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn api<T: Into<String>>(message: T) -> Self {
        Self::new(ErrorKind::ApiError, message)
    }

    /// Reports a model identifier that no provider claims.
    pub fn invalid_model(model: &str) -> Self {
        Self::new(
            ErrorKind::InvalidModel,
            format!("cannot determine provider for model `{model}`"),
        )
    }

    /// Reports a missing credential for `provider`.
    pub fn no_api_key(provider: Provider) -> Self {
        Self::new(
            ErrorKind::NoApiKey,
            format!("no API key configured for provider {provider}"),
        )
        .with_provider(provider)
    }

    /// Reports a caller-initiated cancellation. Always classified as TIMEOUT.
    pub fn cancelled() -> Self {
        Self::timeout("request cancelled by caller")
    }

    /// Convenience accessor used by the orchestrator.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Best-effort detection of content-filter refusals hidden in error text.
///
/// Providers do not agree on a structured field for this, so the message must
/// mention both "content" and "filter". False negatives are expected.
pub(crate) fn looks_like_content_filter(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("content") && lower.contains("filter")
}
