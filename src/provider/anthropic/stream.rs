use std::collections::BTreeMap;

use crate::cost::calculate_cost;
use crate::error::{AIError, ErrorKind, looks_like_content_filter};
use crate::provider::PartialToolCall;
use crate::stream::parse_event;
use crate::types::{FinishReason, Provider, StreamChunk, Usage};

use super::response::{classify_error_type, convert_finish_reason};
use super::types::{AnthropicDelta, AnthropicStreamBlock, AnthropicStreamEvent};

/// Tracks open content blocks and usage across Messages API stream events.
pub(crate) struct AnthropicStreamState {
    model: String,
    open_tools: BTreeMap<usize, PartialToolCall>,
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    finish_reason: Option<FinishReason>,
}

impl AnthropicStreamState {
    pub(crate) fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            open_tools: BTreeMap::new(),
            input_tokens: None,
            output_tokens: None,
            finish_reason: None,
        }
    }

    pub(crate) fn on_data(&mut self, data: &str) -> Vec<StreamChunk> {
        let Some(event) = parse_event::<AnthropicStreamEvent>(Provider::Anthropic, data) else {
            return Vec::new();
        };

        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    self.merge_usage(usage.input_tokens, usage.output_tokens);
                }
                Vec::new()
            }
            AnthropicStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                AnthropicStreamBlock::Text { text } if !text.is_empty() => {
                    vec![StreamChunk::Text(text)]
                }
                AnthropicStreamBlock::ToolUse { id, name } => {
                    self.open_tools.insert(index, PartialToolCall::new(id, name));
                    Vec::new()
                }
                AnthropicStreamBlock::Text { .. } | AnthropicStreamBlock::Other => Vec::new(),
            },
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                AnthropicDelta::TextDelta { text } if !text.is_empty() => {
                    vec![StreamChunk::Text(text)]
                }
                AnthropicDelta::InputJsonDelta { partial_json } => {
                    if let Some(partial) = self.open_tools.get_mut(&index) {
                        partial.arguments.push_str(&partial_json);
                    }
                    Vec::new()
                }
                AnthropicDelta::TextDelta { .. } | AnthropicDelta::Other => Vec::new(),
            },
            AnthropicStreamEvent::ContentBlockStop { index } => self
                .open_tools
                .remove(&index)
                .map(|partial| vec![StreamChunk::ToolCall(partial.finish(Provider::Anthropic))])
                .unwrap_or_default(),
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = delta.stop_reason {
                    self.finish_reason = Some(convert_finish_reason(&reason));
                }
                if let Some(usage) = usage {
                    self.merge_usage(usage.input_tokens, usage.output_tokens);
                }
                Vec::new()
            }
            AnthropicStreamEvent::MessageStop => self.finish(),
            AnthropicStreamEvent::Error { error } => {
                let mut kind = classify_error_type(&error.kind);
                if looks_like_content_filter(&error.message) {
                    kind = ErrorKind::ContentFilter;
                }
                vec![StreamChunk::Error(
                    AIError::new(kind, error.message).with_provider(Provider::Anthropic),
                )]
            }
            AnthropicStreamEvent::Ping | AnthropicStreamEvent::Unknown => Vec::new(),
        }
    }

    fn merge_usage(&mut self, input: Option<u64>, output: Option<u64>) {
        if input.is_some() {
            self.input_tokens = input;
        }
        if output.is_some() {
            self.output_tokens = output;
        }
    }

    /// Flushes blocks left open and emits the single `Done` chunk.
    pub(crate) fn finish(&mut self) -> Vec<StreamChunk> {
        let mut out: Vec<StreamChunk> = std::mem::take(&mut self.open_tools)
            .into_values()
            .map(|partial| StreamChunk::ToolCall(partial.finish(Provider::Anthropic)))
            .collect();

        let usage = (self.input_tokens.is_some() || self.output_tokens.is_some())
            .then(|| Usage::from_counts(self.input_tokens, self.output_tokens, None));
        out.push(StreamChunk::Done {
            usage,
            cost: usage.map(|usage| calculate_cost(&self.model, &usage)),
            finish_reason: self.finish_reason.take(),
        });
        out
    }

    /// The body ended without `message_stop`: the answer is truncated.
    pub(crate) fn close(&mut self) -> Vec<StreamChunk> {
        vec![StreamChunk::Error(
            AIError::network("stream ended before message_stop").with_provider(Provider::Anthropic),
        )]
    }
}
