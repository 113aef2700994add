use serde_json::Value;

use crate::error::LLMError;
use crate::http::HttpBodyStream;
use crate::provider::ChatStream;
use crate::stream::{ChunkNormalizer, Normalized, NormalizedStream};
use crate::types::{StreamDelta, ToolCallDelta};

use super::presets::UsageQuirk;
use super::response::{convert_finish_reason, select_usage};
use super::types::OpenAiStreamChunk;

pub(crate) fn create_stream(
    body: HttpBodyStream,
    provider: &'static str,
    quirk: UsageQuirk,
) -> ChatStream {
    Box::pin(NormalizedStream::from_body(
        body,
        OpenAiChunkNormalizer::new(provider, quirk),
    ))
}

/// Classifies `chat.completion.chunk` frames.
pub(crate) struct OpenAiChunkNormalizer {
    provider: &'static str,
    quirk: UsageQuirk,
}

impl OpenAiChunkNormalizer {
    pub(crate) fn new(provider: &'static str, quirk: UsageQuirk) -> Self {
        Self { provider, quirk }
    }

    fn error_message(error: &Value) -> String {
        error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string())
    }
}

impl ChunkNormalizer for OpenAiChunkNormalizer {
    fn provider(&self) -> &'static str {
        self.provider
    }

    fn normalize(&mut self, payload: &str) -> Result<Normalized, LLMError> {
        let value: Value = serde_json::from_str(payload).map_err(|err| {
            LLMError::protocol(self.provider, format!("failed to parse stream chunk: {err}"))
        })?;
        let Some(object) = value.as_object() else {
            return Err(LLMError::protocol(
                self.provider,
                format!("unrecognised stream frame: {payload}"),
            ));
        };
        if let Some(error) = object.get("error") {
            return Err(LLMError::protocol(
                self.provider,
                format!("vendor reported an error mid-stream: {}", Self::error_message(error)),
            ));
        }
        if !["choices", "usage", "x_groq"]
            .iter()
            .any(|key| object.contains_key(*key))
        {
            return Err(LLMError::protocol(
                self.provider,
                format!("unrecognised stream frame: {payload}"),
            ));
        }

        let chunk: OpenAiStreamChunk = serde_json::from_value(value).map_err(|err| {
            LLMError::protocol(self.provider, format!("failed to parse stream chunk: {err}"))
        })?;

        let mut delta = StreamDelta {
            usage: select_usage(chunk.usage, chunk.x_groq, self.quirk),
            ..StreamDelta::default()
        };
        for choice in chunk.choices {
            if choice.index != 0 {
                return Err(LLMError::protocol(
                    self.provider,
                    format!("unexpected choice index {}", choice.index),
                ));
            }
            if let Some(choice_delta) = choice.delta {
                if let Some(content) = choice_delta.content {
                    delta.content.push_str(&content);
                }
                for (position, call) in choice_delta
                    .tool_calls
                    .unwrap_or_default()
                    .into_iter()
                    .enumerate()
                {
                    let (name, arguments_delta) = call
                        .function
                        .map(|function| (function.name, function.arguments))
                        .unwrap_or_default();
                    delta.tool_calls.push(ToolCallDelta {
                        index: call.index.unwrap_or(position),
                        id: call.id,
                        name,
                        arguments_delta,
                    });
                }
            }
            if let Some(reason) = choice.finish_reason.as_deref() {
                delta.finish_reason = Some(convert_finish_reason(reason));
            }
        }

        if delta == StreamDelta::default() {
            // Role announcements and empty filter frames carry nothing.
            return Ok(Normalized::KeepAlive);
        }
        Ok(Normalized::Deltas(vec![delta]))
    }
}
