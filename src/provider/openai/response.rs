use crate::error::AIError;
use crate::provider::{Completion, parse_arguments};
use crate::types::{FinishReason, Provider, ToolCall, Usage};

use super::types::{OpenAiChatResponse, OpenAiContent, OpenAiContentPart, OpenAiUsage};

pub(crate) fn parse_response(body: &str) -> Result<Completion, AIError> {
    let parsed: OpenAiChatResponse = serde_json::from_str(body).map_err(|err| {
        AIError::api(format!("failed to parse OpenAI response: {err}"))
            .with_provider(Provider::OpenAi)
    })?;

    let choice = parsed.choices.into_iter().next().ok_or_else(|| {
        AIError::api("OpenAI response contained no choices").with_provider(Provider::OpenAi)
    })?;

    let mut content = String::new();
    let mut tool_calls = Vec::new();
    if let Some(message) = choice.message {
        if let Some(message_content) = &message.content {
            content = content_text(message_content);
        }
        for (index, call) in message.tool_calls.unwrap_or_default().into_iter().enumerate() {
            let Some(function) = call.function else {
                continue;
            };
            let name = function.name.unwrap_or_default();
            let arguments = parse_arguments(
                Provider::OpenAi,
                &name,
                function.arguments.as_deref().unwrap_or_default(),
            );
            tool_calls.push(ToolCall {
                id: call.id.unwrap_or_else(|| format!("call_{index}")),
                name,
                arguments,
            });
        }
    }

    Ok(Completion {
        content,
        model: parsed.model,
        usage: parsed.usage.map(convert_usage).unwrap_or_default(),
        tool_calls,
        finish_reason: choice.finish_reason.as_deref().map(convert_finish_reason),
    })
}

pub(crate) fn content_text(content: &OpenAiContent) -> String {
    match content {
        OpenAiContent::Text(text) => text.clone(),
        OpenAiContent::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                OpenAiContentPart::Text { text } => Some(text.as_str()),
                OpenAiContentPart::ImageUrl { .. } | OpenAiContentPart::Unsupported => None,
            })
            .collect(),
    }
}

pub(crate) fn convert_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        other => FinishReason::Other(other.to_string()),
    }
}

pub(crate) fn convert_usage(usage: OpenAiUsage) -> Usage {
    Usage::from_counts(
        usage.prompt_tokens,
        usage.completion_tokens,
        usage.total_tokens,
    )
}
