use crate::error::{AIError, ErrorKind};
use crate::provider::Completion;
use crate::types::{FinishReason, Provider, ToolCall, Usage};

use super::types::{AnthropicResponse, AnthropicResponseBlock, AnthropicUsage};

pub(crate) fn parse_response(body: &str) -> Result<Completion, AIError> {
    let parsed: AnthropicResponse = serde_json::from_str(body).map_err(|err| {
        AIError::api(format!("failed to parse Anthropic response: {err}"))
            .with_provider(Provider::Anthropic)
    })?;

    let mut content = String::new();
    let mut tool_calls = Vec::new();
    for block in parsed.content {
        match block {
            AnthropicResponseBlock::Text { text } => content.push_str(&text),
            AnthropicResponseBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input,
                });
            }
            AnthropicResponseBlock::Other => {}
        }
    }

    Ok(Completion {
        content,
        model: parsed.model,
        usage: parsed.usage.map(convert_usage).unwrap_or_default(),
        tool_calls,
        finish_reason: parsed.stop_reason.as_deref().map(convert_finish_reason),
    })
}

pub(crate) fn convert_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        "refusal" => FinishReason::ContentFilter,
        other => FinishReason::Other(other.to_string()),
    }
}

/// Anthropic never reports a total, so it is always computed.
pub(crate) fn convert_usage(usage: AnthropicUsage) -> Usage {
    Usage::from_counts(usage.input_tokens, usage.output_tokens, None)
}

/// Classifies an in-stream `error` event by its `type`.
pub(crate) fn classify_error_type(kind: &str) -> ErrorKind {
    match kind {
        "rate_limit_error" => ErrorKind::RateLimit,
        "authentication_error" | "permission_error" => ErrorKind::InvalidApiKey,
        "invalid_request_error" => ErrorKind::InvalidRequest,
        _ => ErrorKind::ApiError,
    }
}
