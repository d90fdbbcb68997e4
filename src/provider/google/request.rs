use serde_json::{Map, Value};

use crate::error::AIError;
use crate::provider::{parse_data_url, remote_image_error, split_system};
use crate::types::{
    ChatMessage, ChatRequest, ContentPart, ImageSource, JsonSchema, MessageContent, Provider,
    ResponseFormat, Role, ToolChoice,
};

use super::types::{
    GeminiContent, GeminiFunctionCallingConfig, GeminiFunctionDeclaration, GeminiGenerationConfig,
    GeminiInlineData, GeminiPart, GeminiRequest, GeminiTool, GeminiToolConfig,
};

/// Builds a `generateContent` body. The model travels in the URL, not the body.
pub(crate) fn build_request(request: &ChatRequest) -> Result<GeminiRequest, AIError> {
    let (system, turns) = split_system(&request.messages);

    let contents = turns
        .into_iter()
        .map(convert_message)
        .collect::<Result<Vec<_>, _>>()?;

    let options = &request.options;
    let generation_config = GeminiGenerationConfig {
        temperature: options.temperature,
        top_p: options.top_p,
        max_output_tokens: options.max_tokens,
        stop_sequences: options.stop.clone(),
        presence_penalty: options.presence_penalty,
        frequency_penalty: options.frequency_penalty,
        seed: options.seed,
        response_mime_type: match request.response_format {
            Some(ResponseFormat::Json) => Some("application/json"),
            Some(ResponseFormat::Text) | None => None,
        },
    };

    let tools = if request.tools.is_empty() {
        Vec::new()
    } else {
        vec![GeminiTool {
            function_declarations: request
                .tools
                .iter()
                .map(|tool| GeminiFunctionDeclaration {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: gemini_schema(&tool.parameters),
                })
                .collect(),
        }]
    };
    let tool_config = if tools.is_empty() {
        None
    } else {
        request.tool_choice.as_ref().map(convert_tool_choice)
    };

    Ok(GeminiRequest {
        contents,
        system_instruction: system.map(|text| GeminiContent {
            role: None,
            parts: vec![GeminiPart::text(text)],
        }),
        generation_config: (!generation_config.is_empty()).then_some(generation_config),
        tools,
        tool_config,
    })
}

fn convert_message(message: &ChatMessage) -> Result<GeminiContent, AIError> {
    let role = match message.role {
        Role::Assistant => "model",
        Role::User | Role::System => "user",
    };
    let parts = match &message.content {
        MessageContent::Text(text) => vec![GeminiPart::text(text.clone())],
        MessageContent::Parts(parts) => parts
            .iter()
            .map(convert_part)
            .collect::<Result<Vec<_>, _>>()?,
    };
    Ok(GeminiContent {
        role: Some(role.to_string()),
        parts,
    })
}

fn convert_part(part: &ContentPart) -> Result<GeminiPart, AIError> {
    match part {
        ContentPart::Text { text } => Ok(GeminiPart::text(text.clone())),
        ContentPart::Image { source } => {
            let (mime_type, data) = match source {
                ImageSource::Base64 { data, mime_type } => (mime_type.clone(), data.clone()),
                ImageSource::Url { url } => {
                    parse_data_url(url).ok_or_else(|| remote_image_error(Provider::Google, url))?
                }
            };
            Ok(GeminiPart {
                inline_data: Some(GeminiInlineData { mime_type, data }),
                ..GeminiPart::default()
            })
        }
    }
}

fn convert_tool_choice(choice: &ToolChoice) -> GeminiToolConfig {
    let (mode, allowed_function_names) = match choice {
        ToolChoice::Auto => ("AUTO", Vec::new()),
        ToolChoice::None => ("NONE", Vec::new()),
        ToolChoice::Required => ("ANY", Vec::new()),
        ToolChoice::Tool { name } => ("ANY", vec![name.clone()]),
    };
    GeminiToolConfig {
        function_calling_config: GeminiFunctionCallingConfig {
            mode,
            allowed_function_names,
        },
    }
}

/// Renders a schema in Gemini's dialect, which spells primitive types in upper case.
pub(crate) fn gemini_schema(schema: &JsonSchema) -> Value {
    let mut object = Map::new();
    object.insert(
        "type".to_string(),
        Value::String(schema.schema_type.as_str().to_ascii_uppercase()),
    );
    if let Some(description) = &schema.description {
        object.insert("description".to_string(), Value::String(description.clone()));
    }
    if !schema.properties.is_empty() {
        let properties = schema
            .properties
            .iter()
            .map(|(name, property)| (name.clone(), gemini_schema(property)))
            .collect();
        object.insert("properties".to_string(), Value::Object(properties));
    }
    if !schema.required.is_empty() {
        object.insert(
            "required".to_string(),
            Value::Array(schema.required.iter().cloned().map(Value::String).collect()),
        );
    }
    if let Some(values) = &schema.enum_values {
        object.insert(
            "enum".to_string(),
            Value::Array(values.iter().cloned().map(Value::String).collect()),
        );
    }
    if let Some(items) = &schema.items {
        object.insert("items".to_string(), gemini_schema(items));
    }
    Value::Object(object)
}
