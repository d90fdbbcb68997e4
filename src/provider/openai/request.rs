use crate::provider::split_system;
use crate::types::{
    ChatMessage, ChatRequest, ContentPart, ImageSource, MessageContent, ResponseFormat, Role,
    ToolChoice,
};

use super::types::{
    OpenAiChatRequest, OpenAiContent, OpenAiContentPart, OpenAiFunction, OpenAiImageUrl,
    OpenAiMessage, OpenAiNamedFunction, OpenAiResponseFormat, OpenAiStreamOptions, OpenAiTool,
    OpenAiToolChoice,
};

/// Builds a Chat Completions body.
///
/// System messages are merged into one leading `system` entry.
pub(crate) fn build_request(request: &ChatRequest, model: &str, stream: bool) -> OpenAiChatRequest {
    let (system, turns) = split_system(&request.messages);

    let mut messages = Vec::with_capacity(turns.len() + 1);
    if let Some(system) = system {
        messages.push(OpenAiMessage {
            role: "system",
            content: OpenAiContent::Text(system),
        });
    }
    messages.extend(turns.into_iter().map(convert_message));

    let options = &request.options;
    let tools: Vec<OpenAiTool> = request
        .tools
        .iter()
        .map(|tool| OpenAiTool {
            kind: "function",
            function: OpenAiFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.parameters.clone(),
            },
        })
        .collect();
    let tool_choice = if tools.is_empty() {
        None
    } else {
        request.tool_choice.as_ref().map(convert_tool_choice)
    };

    OpenAiChatRequest {
        model: model.to_string(),
        messages,
        temperature: options.temperature,
        max_tokens: options.max_tokens,
        top_p: options.top_p,
        frequency_penalty: options.frequency_penalty,
        presence_penalty: options.presence_penalty,
        stop: options.stop.clone(),
        seed: options.seed,
        tools,
        tool_choice,
        response_format: match request.response_format {
            Some(ResponseFormat::Json) => Some(OpenAiResponseFormat {
                kind: "json_object",
            }),
            Some(ResponseFormat::Text) | None => None,
        },
        stream,
        stream_options: stream.then_some(OpenAiStreamOptions {
            include_usage: true,
        }),
    }
}

fn convert_message(message: &ChatMessage) -> OpenAiMessage {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    let content = match &message.content {
        MessageContent::Text(text) => OpenAiContent::Text(text.clone()),
        MessageContent::Parts(parts) => {
            OpenAiContent::Parts(parts.iter().map(convert_part).collect())
        }
    };
    OpenAiMessage { role, content }
}

fn convert_part(part: &ContentPart) -> OpenAiContentPart {
    match part {
        ContentPart::Text { text } => OpenAiContentPart::Text { text: text.clone() },
        ContentPart::Image { source } => {
            let url = match source {
                ImageSource::Url { url } => url.clone(),
                ImageSource::Base64 { data, mime_type } => {
                    format!("data:{mime_type};base64,{data}")
                }
            };
            OpenAiContentPart::ImageUrl {
                image_url: OpenAiImageUrl { url },
            }
        }
    }
}

fn convert_tool_choice(choice: &ToolChoice) -> OpenAiToolChoice {
    match choice {
        ToolChoice::Auto => OpenAiToolChoice::Mode("auto"),
        ToolChoice::None => OpenAiToolChoice::Mode("none"),
        ToolChoice::Required => OpenAiToolChoice::Mode("required"),
        ToolChoice::Tool { name } => OpenAiToolChoice::Function {
            kind: "function",
            function: OpenAiNamedFunction { name: name.clone() },
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::{GenerationOptions, JsonSchema, Tool};

    fn weather_tool() -> Tool {
        Tool::new(
            "get_weather",
            "Look up the weather",
            JsonSchema::object().property("city", JsonSchema::string(), true),
        )
    }

    #[test]
    fn builds_body_with_hoisted_system_and_params() {
        let request = ChatRequest {
            model: "gpt-4o".to_string(),
            messages: vec![
                ChatMessage::user("hello"),
                ChatMessage::system("be terse"),
            ],
            options: GenerationOptions {
                temperature: Some(0.5),
                max_tokens: Some(64),
                stop: vec!["END".to_string()],
                seed: Some(7),
                ..GenerationOptions::default()
            },
            response_format: Some(ResponseFormat::Json),
            ..ChatRequest::default()
        };

        let body = serde_json::to_value(build_request(&request, "gpt-4o", false)).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "gpt-4o",
                "messages": [
                    { "role": "system", "content": "be terse" },
                    { "role": "user", "content": "hello" }
                ],
                "temperature": 0.5,
                "max_tokens": 64,
                "stop": ["END"],
                "seed": 7,
                "response_format": { "type": "json_object" }
            })
        );
    }

    #[test]
    fn images_become_url_parts_in_order() {
        let request = ChatRequest {
            messages: vec![ChatMessage::with_parts(
                Role::User,
                vec![
                    ContentPart::text("what is this?"),
                    ContentPart::image_url("https://example.com/cat.png"),
                    ContentPart::image_base64("AAAA", "image/jpeg"),
                ],
            )],
            ..ChatRequest::default()
        };
        let body = serde_json::to_value(build_request(&request, "gpt-4o", false)).unwrap();
        assert_eq!(
            body["messages"][0]["content"],
            json!([
                { "type": "text", "text": "what is this?" },
                { "type": "image_url", "image_url": { "url": "https://example.com/cat.png" } },
                { "type": "image_url", "image_url": { "url": "data:image/jpeg;base64,AAAA" } }
            ])
        );
    }

    #[test]
    fn tools_and_named_choice() {
        let request = ChatRequest {
            messages: vec![ChatMessage::user("weather?")],
            tools: vec![weather_tool()],
            tool_choice: Some(ToolChoice::Tool {
                name: "get_weather".to_string(),
            }),
            ..ChatRequest::default()
        };
        let body = serde_json::to_value(build_request(&request, "gpt-4o", true)).unwrap();
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "get_weather");
        assert_eq!(
            body["tools"][0]["function"]["parameters"]["required"],
            json!(["city"])
        );
        assert_eq!(
            body["tool_choice"],
            json!({ "type": "function", "function": { "name": "get_weather" } })
        );
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"], json!({ "include_usage": true }));
    }

    #[test]
    fn required_choice_maps_to_string() {
        let request = ChatRequest {
            tools: vec![weather_tool()],
            tool_choice: Some(ToolChoice::Required),
            ..ChatRequest::default()
        };
        let body = serde_json::to_value(build_request(&request, "gpt-4o", false)).unwrap();
        assert_eq!(body["tool_choice"], "required");
    }

    #[test]
    fn tool_choice_without_tools_is_dropped() {
        let request = ChatRequest {
            tool_choice: Some(ToolChoice::Auto),
            ..ChatRequest::default()
        };
        let body = serde_json::to_value(build_request(&request, "gpt-4o", false)).unwrap();
        assert!(body.get("tool_choice").is_none());
        assert!(body.get("tools").is_none());
    }
}
