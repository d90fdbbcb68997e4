use crate::error::{AIError, ErrorKind};
use crate::provider::Completion;
use crate::types::{FinishReason, Provider, ToolCall, Usage};

use super::types::{GeminiCandidate, GeminiResponse, GeminiUsageMetadata};

pub(crate) fn parse_response(body: &str, requested_model: &str) -> Result<Completion, AIError> {
    let parsed: GeminiResponse = serde_json::from_str(body).map_err(|err| {
        AIError::api(format!("failed to parse Gemini response: {err}"))
            .with_provider(Provider::Google)
    })?;

    if let Some(error) = blocked_prompt_error(&parsed) {
        return Err(error);
    }

    let usage = parsed.usage_metadata.map(convert_usage).unwrap_or_default();
    let model = parsed
        .model_version
        .unwrap_or_else(|| requested_model.to_string());

    let Some(candidate) = parsed.candidates.into_iter().next() else {
        return Err(AIError::api("Gemini response contained no candidates")
            .with_provider(Provider::Google));
    };

    let mut next_id = 0;
    let (content, tool_calls) = candidate_output(&candidate, &mut next_id);
    let finish_reason = candidate
        .finish_reason
        .as_deref()
        .map(|reason| convert_finish_reason(reason, !tool_calls.is_empty()));

    Ok(Completion {
        content,
        model,
        usage,
        tool_calls,
        finish_reason,
    })
}

/// A prompt rejected before generation comes back with no candidates and a block reason.
pub(crate) fn blocked_prompt_error(response: &GeminiResponse) -> Option<AIError> {
    if !response.candidates.is_empty() {
        return None;
    }
    let reason = response.prompt_feedback.as_ref()?.block_reason.as_deref()?;
    Some(
        AIError::new(
            ErrorKind::ContentFilter,
            format!("prompt blocked by Gemini safety filters ({reason})"),
        )
        .with_provider(Provider::Google),
    )
}

/// Text and function calls of one candidate.
///
/// Gemini function calls carry no id, so sequential `call_{n}` ids are assigned.
pub(crate) fn candidate_output(
    candidate: &GeminiCandidate,
    next_id: &mut usize,
) -> (String, Vec<ToolCall>) {
    let mut text = String::new();
    let mut calls = Vec::new();
    let Some(content) = &candidate.content else {
        return (text, calls);
    };
    for part in &content.parts {
        if part.thought == Some(true) {
            continue;
        }
        if let Some(fragment) = &part.text {
            text.push_str(fragment);
        }
        if let Some(call) = &part.function_call {
            calls.push(ToolCall {
                id: format!("call_{next_id}"),
                name: call.name.clone(),
                arguments: call.args.clone(),
            });
            *next_id += 1;
        }
    }
    (text, calls)
}

/// `STOP` with function calls present is reported as a tool-call finish.
pub(crate) fn convert_finish_reason(reason: &str, has_tool_calls: bool) -> FinishReason {
    match reason {
        "STOP" if has_tool_calls => FinishReason::ToolCalls,
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => {
            FinishReason::ContentFilter
        }
        other => FinishReason::Other(other.to_string()),
    }
}

pub(crate) fn convert_usage(usage: GeminiUsageMetadata) -> Usage {
    Usage::from_counts(
        usage.prompt_token_count,
        usage.candidates_token_count,
        usage.total_token_count,
    )
}
