//! Google Generative Language (Gemini) API.

use std::collections::HashMap;

pub(crate) mod request;
pub(crate) mod response;
pub(crate) mod stream;
pub(crate) mod types;

pub(crate) const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

fn normalize_model(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

/// `generateContent`, or the SSE flavour of `streamGenerateContent`.
pub(crate) fn endpoint(base_url: &str, model: &str, stream: bool) -> String {
    let base = base_url.trim_end_matches('/');
    let model_path = normalize_model(model);
    let method = if stream {
        "streamGenerateContent?alt=sse"
    } else {
        "generateContent"
    };
    if base.ends_with("/v1beta") {
        format!("{base}/{model_path}:{method}")
    } else {
        format!("{base}/v1beta/{model_path}:{method}")
    }
}

pub(crate) fn build_headers(api_key: &str) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    headers.insert("x-goog-api-key".to_string(), api_key.to_string());
    headers.insert("Accept".to_string(), "application/json".to_string());
    headers
}
