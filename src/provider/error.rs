use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{AIError, ErrorKind, looks_like_content_filter};
use crate::types::Provider;

use super::retry::{DEFAULT_RETRY_AFTER_SECS, retry_after_from_headers};

#[derive(Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

/// Pulls the human-readable message out of an error body.
///
/// Order: nested `error.message`, a bare string `error`, top-level `message`, then the
/// raw body.
pub(crate) fn extract_error_message(body: &str) -> String {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
        match envelope.error {
            Some(Value::Object(inner)) => {
                if let Some(Value::String(message)) = inner.get("message") {
                    return message.clone();
                }
            }
            Some(Value::String(message)) => return message,
            _ => {}
        }
        if let Some(message) = envelope.message {
            return message;
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty error body".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Turns a non-2xx answer into an [`AIError`].
///
/// The status decides the kind; a message that reads like a content-filter refusal is
/// then reclassified as CONTENT_FILTER.
pub(crate) fn parse_error_response(
    provider: Provider,
    status: u16,
    headers: &HashMap<String, String>,
    body: &str,
) -> AIError {
    let message = extract_error_message(body);
    let mut kind = match status {
        401 | 403 => ErrorKind::InvalidApiKey,
        429 => ErrorKind::RateLimit,
        400 => ErrorKind::InvalidRequest,
        _ => ErrorKind::ApiError,
    };
    if looks_like_content_filter(&message) {
        kind = ErrorKind::ContentFilter;
    }

    let mut error = AIError::new(kind, message)
        .with_provider(provider)
        .with_status(status);
    if kind == ErrorKind::RateLimit {
        let seconds = retry_after_from_headers(headers).unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        error = error.with_retry_after(seconds);
    }
    error
}
