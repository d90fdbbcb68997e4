//! OpenAI Chat Completions and compatible servers.

use std::collections::HashMap;

pub(crate) mod request;
pub(crate) mod response;
pub(crate) mod stream;
pub(crate) mod types;

pub(crate) const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Bases that already end in `/v1` are used as-is.
pub(crate) fn endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

pub(crate) fn build_headers(api_key: &str) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    headers.insert("Authorization".to_string(), format!("Bearer {api_key}"));
    headers.insert("Accept".to_string(), "application/json".to_string());
    headers
}
