use crate::cost::calculate_cost;
use crate::error::AIError;
use crate::provider::PartialToolCall;
use crate::provider::error::extract_error_message;
use crate::stream::parse_event;
use crate::types::{FinishReason, Provider, StreamChunk, Usage};

use super::response::{convert_finish_reason, convert_usage};
use super::types::OpenAiStreamChunk;

/// Accumulates OpenAI deltas into normalized chunks.
///
/// A tool-call delta carrying an `id` opens a new call and closes the previous one;
/// deltas without an `id` extend the open call.
pub(crate) struct OpenAiStreamState {
    model: String,
    pending: Option<PartialToolCall>,
    usage: Option<Usage>,
    finish_reason: Option<FinishReason>,
    synthetic_ids: usize,
}

impl OpenAiStreamState {
    pub(crate) fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            pending: None,
            usage: None,
            finish_reason: None,
            synthetic_ids: 0,
        }
    }

    pub(crate) fn on_data(&mut self, data: &str) -> Vec<StreamChunk> {
        let Some(chunk) = parse_event::<OpenAiStreamChunk>(Provider::OpenAi, data) else {
            return Vec::new();
        };

        if let Some(error) = chunk.error {
            let message = extract_error_message(&serde_json::json!({ "error": error }).to_string());
            return vec![StreamChunk::Error(
                AIError::api(message).with_provider(Provider::OpenAi),
            )];
        }

        let mut out = Vec::new();
        for choice in chunk.choices {
            if let Some(delta) = choice.delta {
                if let Some(text) = delta.content {
                    if !text.is_empty() {
                        out.push(StreamChunk::Text(text));
                    }
                }
                for call in delta.tool_calls.unwrap_or_default() {
                    let function = call.function.unwrap_or_default();
                    match call.id {
                        Some(id) => {
                            self.flush_pending(&mut out);
                            let mut partial =
                                PartialToolCall::new(id, function.name.unwrap_or_default());
                            partial.arguments = function.arguments.unwrap_or_default();
                            self.pending = Some(partial);
                        }
                        None => {
                            let synthetic_ids = &mut self.synthetic_ids;
                            let partial = self.pending.get_or_insert_with(|| {
                                *synthetic_ids += 1;
                                PartialToolCall::new(format!("call_{synthetic_ids}"), "")
                            });
                            if let Some(name) = function.name {
                                partial.name.push_str(&name);
                            }
                            if let Some(arguments) = function.arguments {
                                partial.arguments.push_str(&arguments);
                            }
                        }
                    }
                }
            }
            if let Some(reason) = choice.finish_reason {
                self.flush_pending(&mut out);
                self.finish_reason = Some(convert_finish_reason(&reason));
            }
        }

        if let Some(usage) = chunk.usage {
            self.usage = Some(convert_usage(usage));
        }
        out
    }

    /// Closes any open tool call and emits the single `Done` chunk.
    pub(crate) fn finish(&mut self) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        self.flush_pending(&mut out);
        out.push(StreamChunk::Done {
            usage: self.usage,
            cost: self.usage.map(|usage| calculate_cost(&self.model, &usage)),
            finish_reason: self.finish_reason.take(),
        });
        out
    }

    fn flush_pending(&mut self, out: &mut Vec<StreamChunk>) {
        if let Some(partial) = self.pending.take() {
            out.push(StreamChunk::ToolCall(partial.finish(Provider::OpenAi)));
        }
    }
}
