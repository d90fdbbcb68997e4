use crate::cost::calculate_cost;
use crate::error::AIError;
use crate::provider::error::extract_error_message;
use crate::stream::parse_event;
use crate::types::{FinishReason, Provider, StreamChunk, Usage};

use super::response::{blocked_prompt_error, candidate_output, convert_finish_reason, convert_usage};
use super::types::GeminiResponse;

/// Each Gemini SSE payload is a partial `GenerateContentResponse`.
///
/// Function calls arrive complete, usage is cumulative, and the stream has no
/// sentinel: `Done` is produced when the body ends.
pub(crate) struct GoogleStreamState {
    model: String,
    usage: Option<Usage>,
    finish_reason: Option<FinishReason>,
    saw_tool_calls: bool,
    next_id: usize,
}

impl GoogleStreamState {
    pub(crate) fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            usage: None,
            finish_reason: None,
            saw_tool_calls: false,
            next_id: 0,
        }
    }

    pub(crate) fn on_data(&mut self, data: &str) -> Vec<StreamChunk> {
        let Some(response) = parse_event::<GeminiResponse>(Provider::Google, data) else {
            return Vec::new();
        };

        if let Some(error) = response.error {
            let message = extract_error_message(&serde_json::json!({ "error": error }).to_string());
            return vec![StreamChunk::Error(
                AIError::api(message).with_provider(Provider::Google),
            )];
        }
        if let Some(error) = blocked_prompt_error(&response) {
            return vec![StreamChunk::Error(error)];
        }

        if let Some(usage) = response.usage_metadata {
            self.usage = Some(convert_usage(usage));
        }

        let mut out = Vec::new();
        if let Some(candidate) = response.candidates.first() {
            let (text, calls) = candidate_output(candidate, &mut self.next_id);
            if !text.is_empty() {
                out.push(StreamChunk::Text(text));
            }
            self.saw_tool_calls |= !calls.is_empty();
            out.extend(calls.into_iter().map(StreamChunk::ToolCall));
            if let Some(reason) = &candidate.finish_reason {
                self.finish_reason = Some(convert_finish_reason(reason, self.saw_tool_calls));
            }
        }
        out
    }

    pub(crate) fn finish(&mut self) -> Vec<StreamChunk> {
        vec![StreamChunk::Done {
            usage: self.usage,
            cost: self.usage.map(|usage| calculate_cost(&self.model, &usage)),
            finish_reason: self.finish_reason.take(),
        }]
    }
}
