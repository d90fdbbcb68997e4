use crate::error::AIError;
use crate::provider::{parse_data_url, remote_image_error, split_system};
use crate::types::{
    ChatMessage, ChatRequest, ContentPart, ImageSource, MessageContent, Provider, ResponseFormat,
    Role, ToolChoice,
};

use super::types::{
    AnthropicContent, AnthropicContentBlock, AnthropicImageSource, AnthropicMessage,
    AnthropicRequest, AnthropicTool, AnthropicToolChoice,
};

/// The Messages API rejects requests without `max_tokens`.
pub(crate) const DEFAULT_MAX_TOKENS: u32 = 4096;

const JSON_INSTRUCTION: &str = "Respond only with a single valid JSON value and no other text.";

/// Builds a Messages API body. Seed and penalties have no Anthropic equivalent.
pub(crate) fn build_request(
    request: &ChatRequest,
    model: &str,
    stream: bool,
) -> Result<AnthropicRequest, AIError> {
    let (mut system, turns) = split_system(&request.messages);

    if request.response_format == Some(ResponseFormat::Json) {
        system = Some(match system {
            Some(existing) => format!("{existing}\n\n{JSON_INSTRUCTION}"),
            None => JSON_INSTRUCTION.to_string(),
        });
    }

    let messages = turns
        .into_iter()
        .map(convert_message)
        .collect::<Result<Vec<_>, _>>()?;

    let tools: Vec<AnthropicTool> = request
        .tools
        .iter()
        .map(|tool| AnthropicTool {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool.parameters.clone(),
        })
        .collect();
    let tool_choice = if tools.is_empty() {
        None
    } else {
        request.tool_choice.as_ref().map(|choice| match choice {
            ToolChoice::Auto => AnthropicToolChoice::Auto,
            ToolChoice::None => AnthropicToolChoice::None,
            ToolChoice::Required => AnthropicToolChoice::Any,
            ToolChoice::Tool { name } => AnthropicToolChoice::Tool { name: name.clone() },
        })
    };

    let options = &request.options;
    Ok(AnthropicRequest {
        model: model.to_string(),
        system,
        messages,
        max_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        temperature: options.temperature,
        top_p: options.top_p,
        stop_sequences: options.stop.clone(),
        tools,
        tool_choice,
        stream,
    })
}

fn convert_message(message: &ChatMessage) -> Result<AnthropicMessage, AIError> {
    let role = match message.role {
        Role::Assistant => "assistant",
        Role::User | Role::System => "user",
    };
    let content = match &message.content {
        MessageContent::Text(text) => AnthropicContent::Text(text.clone()),
        MessageContent::Parts(parts) => AnthropicContent::Blocks(
            parts
                .iter()
                .map(convert_part)
                .collect::<Result<Vec<_>, _>>()?,
        ),
    };
    Ok(AnthropicMessage { role, content })
}

fn convert_part(part: &ContentPart) -> Result<AnthropicContentBlock, AIError> {
    match part {
        ContentPart::Text { text } => Ok(AnthropicContentBlock::Text { text: text.clone() }),
        ContentPart::Image { source } => {
            let (media_type, data) = match source {
                ImageSource::Base64 { data, mime_type } => (mime_type.clone(), data.clone()),
                ImageSource::Url { url } => parse_data_url(url)
                    .ok_or_else(|| remote_image_error(Provider::Anthropic, url))?,
            };
            Ok(AnthropicContentBlock::Image {
                source: AnthropicImageSource {
                    kind: "base64",
                    media_type,
                    data,
                },
            })
        }
    }
}
