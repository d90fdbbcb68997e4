//! Per-family wire translation.
//!
//! Every entry point matches on [`Provider`] exhaustively, so adding a family is a
//! compile error until each translator site handles it.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::config::ProviderConfig;
use crate::error::AIError;
use crate::types::{
    ChatMessage, ChatRequest, FinishReason, Provider, Role, StreamChunk, ToolCall, Usage,
};

pub mod anthropic;
pub(crate) mod error;
pub mod google;
pub mod openai;
pub(crate) mod retry;

/// Provider answer translated into shared types, before cost and latency are added.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Completion {
    pub(crate) content: String,
    pub(crate) model: String,
    pub(crate) usage: Usage,
    pub(crate) tool_calls: Vec<ToolCall>,
    pub(crate) finish_reason: Option<FinishReason>,
}

/// Fully resolved target of one HTTP call.
#[derive(Debug, Clone)]
pub(crate) struct Endpoint {
    pub(crate) url: String,
    pub(crate) headers: HashMap<String, String>,
}

pub(crate) fn default_base_url(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAi => openai::DEFAULT_BASE_URL,
        Provider::Anthropic => anthropic::DEFAULT_BASE_URL,
        Provider::Google => google::DEFAULT_BASE_URL,
    }
}

/// Builds the URL and auth headers for `model` on `provider`.
///
/// Extra headers from the configuration are applied last and may override defaults.
pub(crate) fn endpoint(
    provider: Provider,
    config: &ProviderConfig,
    api_key: &str,
    model: &str,
    stream: bool,
) -> Endpoint {
    let base_url = config
        .base_url
        .as_deref()
        .unwrap_or_else(|| default_base_url(provider));
    let (url, mut headers) = match provider {
        Provider::OpenAi => (openai::endpoint(base_url), openai::build_headers(api_key)),
        Provider::Anthropic => (
            anthropic::endpoint(base_url),
            anthropic::build_headers(api_key, config.version.as_deref()),
        ),
        Provider::Google => (
            google::endpoint(base_url, model, stream),
            google::build_headers(api_key),
        ),
    };
    headers.extend(config.headers.clone());
    Endpoint { url, headers }
}

/// Whether the family takes bare `http(s)` image URLs.
pub(crate) fn accepts_image_urls(provider: Provider) -> bool {
    match provider {
        Provider::OpenAi => true,
        Provider::Anthropic | Provider::Google => false,
    }
}

/// Translates `request` into the family's JSON body for `model`.
///
/// # Errors
///
/// Returns INVALID_REQUEST when the request holds content the family cannot carry,
/// such as a remote image URL for Anthropic or Google.
pub(crate) fn build_body(
    provider: Provider,
    request: &ChatRequest,
    model: &str,
    stream: bool,
) -> Result<Value, AIError> {
    let body = match provider {
        Provider::OpenAi => {
            serde_json::to_value(openai::request::build_request(request, model, stream))
        }
        Provider::Anthropic => {
            serde_json::to_value(anthropic::request::build_request(request, model, stream)?)
        }
        Provider::Google => serde_json::to_value(google::request::build_request(request)?),
    };
    body.map_err(|err| {
        AIError::invalid_request(format!("failed to serialize request: {err}"))
            .with_provider(provider)
    })
}

/// Translates a 2xx body into a [`Completion`].
pub(crate) fn parse_completion(
    provider: Provider,
    requested_model: &str,
    body: &str,
) -> Result<Completion, AIError> {
    match provider {
        Provider::OpenAi => openai::response::parse_response(body),
        Provider::Anthropic => anthropic::response::parse_response(body),
        Provider::Google => google::response::parse_response(body, requested_model),
    }
}

/// Stateful per-family stream translator.
///
/// Each hook returns the chunks produced by one input; a terminal chunk may be among
/// them, after which the caller stops feeding the translator.
pub(crate) enum StreamTranslator {
    OpenAi(openai::stream::OpenAiStreamState),
    Anthropic(anthropic::stream::AnthropicStreamState),
    Google(google::stream::GoogleStreamState),
}

impl StreamTranslator {
    /// `model` is the canonical id used for pricing the final usage.
    pub(crate) fn new(provider: Provider, model: &str) -> Self {
        match provider {
            Provider::OpenAi => {
                StreamTranslator::OpenAi(openai::stream::OpenAiStreamState::new(model))
            }
            Provider::Anthropic => {
                StreamTranslator::Anthropic(anthropic::stream::AnthropicStreamState::new(model))
            }
            Provider::Google => {
                StreamTranslator::Google(google::stream::GoogleStreamState::new(model))
            }
        }
    }

    pub(crate) fn provider(&self) -> Provider {
        match self {
            StreamTranslator::OpenAi(_) => Provider::OpenAi,
            StreamTranslator::Anthropic(_) => Provider::Anthropic,
            StreamTranslator::Google(_) => Provider::Google,
        }
    }

    /// Handles one `data:` payload.
    pub(crate) fn on_data(&mut self, data: &str) -> Vec<StreamChunk> {
        match self {
            StreamTranslator::OpenAi(state) => state.on_data(data),
            StreamTranslator::Anthropic(state) => state.on_data(data),
            StreamTranslator::Google(state) => state.on_data(data),
        }
    }

    /// Handles the `[DONE]` sentinel.
    pub(crate) fn on_done(&mut self) -> Vec<StreamChunk> {
        match self {
            StreamTranslator::OpenAi(state) => state.finish(),
            StreamTranslator::Anthropic(state) => state.finish(),
            StreamTranslator::Google(state) => state.finish(),
        }
    }

    /// Handles the end of the body when no terminal chunk was produced yet.
    pub(crate) fn on_close(&mut self) -> Vec<StreamChunk> {
        match self {
            StreamTranslator::OpenAi(state) => state.finish(),
            StreamTranslator::Anthropic(state) => state.close(),
            StreamTranslator::Google(state) => state.finish(),
        }
    }
}

/// Tool call whose arguments are still arriving as raw JSON text.
#[derive(Debug, Clone, Default)]
pub(crate) struct PartialToolCall {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) arguments: String,
}

impl PartialToolCall {
    pub(crate) fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: String::new(),
        }
    }

    /// Parses the buffered arguments and produces the completed call.
    pub(crate) fn finish(self, provider: Provider) -> ToolCall {
        ToolCall {
            arguments: parse_arguments(provider, &self.name, &self.arguments),
            id: self.id,
            name: self.name,
        }
    }
}

/// Parses tool arguments, keeping the raw text when it is not valid JSON.
pub(crate) fn parse_arguments(provider: Provider, tool: &str, raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Map::new());
    }
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(%provider, tool, error = %err, "tool arguments are not valid JSON");
            Value::String(raw.to_string())
        }
    }
}

/// Splits system messages out of the conversation.
///
/// Multiple system messages are joined with a blank line in their original order.
pub(crate) fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<&ChatMessage>) {
    let mut system = Vec::new();
    let mut turns = Vec::new();
    for message in messages {
        match message.role {
            Role::System => system.push(message.content.text()),
            Role::User | Role::Assistant => turns.push(message),
        }
    }
    let system = (!system.is_empty()).then(|| system.join("\n\n"));
    (system, turns)
}

/// Splits a `data:<mime>;base64,<payload>` URL into MIME type and payload.
pub(crate) fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    let mime_type = meta.strip_suffix(";base64")?;
    let mime_type = if mime_type.is_empty() {
        "application/octet-stream"
    } else {
        mime_type
    };
    Some((mime_type.to_string(), data.to_string()))
}

/// Rejects a remote image URL for a family that needs inline bytes.
pub(crate) fn remote_image_error(provider: Provider, url: &str) -> AIError {
    AIError::invalid_request(format!(
        "{provider} does not accept image URLs; inline the image as base64 ({url})"
    ))
    .with_provider(provider)
}
