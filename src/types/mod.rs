//! Provider-agnostic data structures for chat requests, results and stream chunks.
//!
//! Wire formats live next to each provider family; nothing in here knows how any
//! vendor spells its fields.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::AIError;

/// Upstream API family a model is served by.
///
/// The set is closed on purpose: adding a variant makes every `match` over it in the
/// translators fail to compile until the new family is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// OpenAI Chat Completions and compatible servers.
    #[serde(alias = "openai_chat")]
    OpenAi,
    /// Anthropic Messages API.
    Anthropic,
    /// Google Generative Language (Gemini) API.
    #[serde(alias = "gemini")]
    Google,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::OpenAi, Provider::Anthropic, Provider::Google];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Google => "google",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Where the bytes of an image come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    /// Remote `http(s)` URL or a `data:` URL.
    Url { url: String },
    /// Inline base64 payload with its MIME type.
    Base64 { data: String, mime_type: String },
}

/// One element of a multi-part message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { source: ImageSource },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn image_url(url: impl Into<String>) -> Self {
        ContentPart::Image {
            source: ImageSource::Url { url: url.into() },
        }
    }

    pub fn image_base64(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        ContentPart::Image {
            source: ImageSource::Base64 {
                data: data.into(),
                mime_type: mime_type.into(),
            },
        }
    }
}

/// Message body: a plain string or an ordered list of parts.
///
/// Part order is preserved through every translator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenates the text parts, separated by newlines. Images are skipped.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => {
                let mut buffer = String::new();
                for part in parts {
                    if let ContentPart::Text { text } = part {
                        if !buffer.is_empty() {
                            buffer.push('\n');
                        }
                        buffer.push_str(text);
                    }
                }
                buffer
            }
        }
    }

    pub fn image_count(&self) -> usize {
        match self {
            MessageContent::Text(_) => 0,
            MessageContent::Parts(parts) => parts
                .iter()
                .filter(|part| matches!(part, ContentPart::Image { .. }))
                .count(),
        }
    }
}

/// A single conversation turn.
///
/// # Examples
///
/// ```
/// use relay_llm::types::{ChatMessage, ContentPart, Role};
///
/// let msg = ChatMessage::with_parts(
///     Role::User,
///     vec![
///         ContentPart::text("Describe this image"),
///         ContentPart::image_url("https://example.com/cat.png"),
///     ],
/// );
/// assert_eq!(msg.content.image_count(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn with_parts(role: Role, parts: Vec<ContentPart>) -> Self {
        Self {
            role,
            content: MessageContent::Parts(parts),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Appends a part, turning plain text content into a part list first.
    pub fn push_part(&mut self, part: ContentPart) {
        match &mut self.content {
            MessageContent::Parts(parts) => parts.push(part),
            MessageContent::Text(text) => {
                let mut parts = Vec::with_capacity(2);
                if !text.is_empty() {
                    parts.push(ContentPart::text(std::mem::take(text)));
                }
                parts.push(part);
                self.content = MessageContent::Parts(parts);
            }
        }
    }
}

/// Sampling and length controls. Families ignore the ones they do not support.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    pub stop: Vec<String>,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl GenerationOptions {
    /// Fills every unset field from `defaults`.
    pub fn merged_with(&self, defaults: &GenerationOptions) -> GenerationOptions {
        GenerationOptions {
            temperature: self.temperature.or(defaults.temperature),
            max_tokens: self.max_tokens.or(defaults.max_tokens),
            top_p: self.top_p.or(defaults.top_p),
            frequency_penalty: self.frequency_penalty.or(defaults.frequency_penalty),
            presence_penalty: self.presence_penalty.or(defaults.presence_penalty),
            stop: if self.stop.is_empty() {
                defaults.stop.clone()
            } else {
                self.stop.clone()
            },
            seed: self.seed.or(defaults.seed),
        }
    }
}

/// Primitive type of a schema node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    Object,
    String,
    Number,
    Integer,
    Boolean,
    Array,
}

impl SchemaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaType::Object => "object",
            SchemaType::String => "string",
            SchemaType::Number => "number",
            SchemaType::Integer => "integer",
            SchemaType::Boolean => "boolean",
            SchemaType::Array => "array",
        }
    }
}

/// Typed subset of JSON Schema used for tool parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonSchema {
    #[serde(rename = "type")]
    pub schema_type: SchemaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, JsonSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<JsonSchema>>,
}

impl JsonSchema {
    fn of(schema_type: SchemaType) -> Self {
        Self {
            schema_type,
            description: None,
            properties: BTreeMap::new(),
            required: Vec::new(),
            enum_values: None,
            items: None,
        }
    }

    pub fn object() -> Self {
        Self::of(SchemaType::Object)
    }

    pub fn string() -> Self {
        Self::of(SchemaType::String)
    }

    pub fn number() -> Self {
        Self::of(SchemaType::Number)
    }

    pub fn integer() -> Self {
        Self::of(SchemaType::Integer)
    }

    pub fn boolean() -> Self {
        Self::of(SchemaType::Boolean)
    }

    pub fn array(items: JsonSchema) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::of(SchemaType::Array)
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn one_of<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Adds a property; `required` also lists it in the required set.
    pub fn property(mut self, name: impl Into<String>, schema: JsonSchema, required: bool) -> Self {
        let name = name.into();
        if required {
            self.required.push(name.clone());
        }
        self.properties.insert(name, schema);
        self
    }

    /// Renders the schema as plain JSON Schema.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: JsonSchema,
}

impl Tool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: JsonSchema) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// How the model is allowed to use the declared tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    None,
    /// Must call some tool.
    Required,
    /// Must call this tool.
    Tool { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
}

/// Normalized chat request, accumulated by [`crate::builder::RequestBuilder`].
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Canonical model identifier or alias; aliases are resolved at dispatch.
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub options: GenerationOptions,
    pub tools: Vec<Tool>,
    pub tool_choice: Option<ToolChoice>,
    pub response_format: Option<ResponseFormat>,
    pub timeout: Option<Duration>,
    pub cancellation: Option<CancellationToken>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn has_images(&self) -> bool {
        self.messages
            .iter()
            .any(|message| message.content.image_count() > 0)
    }
}

/// A completed tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Parsed arguments; a raw string when the provider sent invalid JSON.
    pub arguments: Value,
}

/// Token counts as reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    /// Builds usage from the three provider counters.
    ///
    /// A reported total is kept as-is; it is only computed when missing.
    pub fn from_counts(input: Option<u64>, output: Option<u64>, total: Option<u64>) -> Self {
        let input_tokens = input.unwrap_or(0);
        let output_tokens = output.unwrap_or(0);
        Self {
            input_tokens,
            output_tokens,
            total_tokens: total.unwrap_or(input_tokens.saturating_add(output_tokens)),
        }
    }
}

/// Monetary cost in US dollars.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Cost {
    pub input: f64,
    pub output: f64,
    pub total: f64,
}

/// Why generation stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    /// Provider value with no shared equivalent, kept verbatim.
    Other(String),
}

/// Outcome of one successful dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResult {
    pub content: String,
    /// Model string reported by the provider.
    pub model: String,
    pub provider: Provider,
    pub usage: Usage,
    pub cost: Cost,
    /// Wall-clock milliseconds from dispatch start.
    pub latency_ms: u64,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

/// One element of a normalized response stream.
///
/// A stream ends after its first `Done` or `Error` chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Text(String),
    ToolCall(ToolCall),
    Done {
        usage: Option<Usage>,
        cost: Option<Cost>,
        finish_reason: Option<FinishReason>,
    },
    Error(AIError),
}

impl StreamChunk {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamChunk::Done { .. } | StreamChunk::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schema_builder_renders_json_schema() {
        let schema = JsonSchema::object()
            .property(
                "location",
                JsonSchema::string().describe("City name"),
                true,
            )
            .property(
                "unit",
                JsonSchema::string().one_of(["celsius", "fahrenheit"]),
                false,
            );

        assert_eq!(
            schema.to_value(),
            json!({
                "type": "object",
                "properties": {
                    "location": { "type": "string", "description": "City name" },
                    "unit": { "type": "string", "enum": ["celsius", "fahrenheit"] }
                },
                "required": ["location"]
            })
        );
    }

    #[test]
    fn usage_keeps_reported_total() {
        let usage = Usage::from_counts(Some(10), Some(5), Some(16));
        assert_eq!(usage.total_tokens, 16);

        let computed = Usage::from_counts(Some(10), Some(5), None);
        assert_eq!(computed.total_tokens, 15);

        let huge = Usage::from_counts(Some(u64::MAX), Some(2), None);
        assert_eq!(huge.total_tokens, u64::MAX);
    }

    #[test]
    fn message_text_skips_images_and_keeps_order() {
        let content = MessageContent::Parts(vec![
            ContentPart::text("first"),
            ContentPart::image_url("https://example.com/a.png"),
            ContentPart::text("second"),
        ]);
        assert_eq!(content.text(), "first\nsecond");
        assert_eq!(content.image_count(), 1);
    }

    #[test]
    fn options_merge_prefers_request_values() {
        let request = GenerationOptions {
            temperature: Some(0.0),
            ..GenerationOptions::default()
        };
        let defaults = GenerationOptions {
            temperature: Some(0.7),
            max_tokens: Some(512),
            stop: vec!["END".to_string()],
            ..GenerationOptions::default()
        };
        let merged = request.merged_with(&defaults);
        assert_eq!(merged.temperature, Some(0.0));
        assert_eq!(merged.max_tokens, Some(512));
        assert_eq!(merged.stop, vec!["END".to_string()]);
    }

    #[test]
    fn provider_deserializes_from_lowercase_tags() {
        let provider: Provider = serde_json::from_value(json!("anthropic")).expect("parse");
        assert_eq!(provider, Provider::Anthropic);
        let provider: Provider = serde_json::from_value(json!("gemini")).expect("alias");
        assert_eq!(provider, Provider::Google);
    }
}
