//! Anthropic Messages API.

use std::collections::HashMap;

pub(crate) mod request;
pub(crate) mod response;
pub(crate) mod stream;
pub(crate) mod types;

pub(crate) const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub(crate) const DEFAULT_VERSION: &str = "2023-06-01";

pub(crate) fn endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/v1") {
        format!("{base}/messages")
    } else {
        format!("{base}/v1/messages")
    }
}

pub(crate) fn build_headers(api_key: &str, version: Option<&str>) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    headers.insert("x-api-key".to_string(), api_key.to_string());
    headers.insert("Accept".to_string(), "application/json".to_string());
    headers.insert(
        "anthropic-version".to_string(),
        version.unwrap_or(DEFAULT_VERSION).to_string(),
    );
    headers
}
