use serde_json::Value;

use crate::error::LLMError;
use crate::http::HttpBodyStream;
use crate::provider::ChatStream;
use crate::stream::{ChunkNormalizer, Normalized, NormalizedStream};
use crate::types::{FinishReason, StreamDelta, ToolCallDelta};

use super::error::GeminiErrorBody;
use super::response::{convert_finish_reason, convert_usage};
use super::types::GeminiGenerateContentResponse;

pub(crate) fn create_stream(body: HttpBodyStream, provider: &'static str) -> ChatStream {
    Box::pin(NormalizedStream::from_body(
        body,
        GeminiChunkNormalizer::new(provider),
    ))
}

/// Classifies `streamGenerateContent?alt=sse` frames.
///
/// Gemini sends every function call whole, so each one gets its own tool-call
/// index. The stream has no `[DONE]` marker; it ends when the body closes after
/// the frame carrying `finishReason`.
pub(crate) struct GeminiChunkNormalizer {
    provider: &'static str,
    next_tool_index: usize,
}

impl GeminiChunkNormalizer {
    pub(crate) fn new(provider: &'static str) -> Self {
        Self {
            provider,
            next_tool_index: 0,
        }
    }
}

impl ChunkNormalizer for GeminiChunkNormalizer {
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
        if object.contains_key("error") {
            let message = serde_json::from_value::<GeminiErrorBody>(value.clone())
                .ok()
                .and_then(|body| body.error)
                .map(|error| error.describe())
                .unwrap_or_else(|| payload.to_string());
            return Err(LLMError::protocol(
                self.provider,
                format!("vendor reported an error mid-stream: {message}"),
            ));
        }
        if !["candidates", "usageMetadata", "promptFeedback"]
            .iter()
            .any(|key| object.contains_key(*key))
        {
            return Err(LLMError::protocol(
                self.provider,
                format!("unrecognised stream frame: {payload}"),
            ));
        }

        let chunk: GeminiGenerateContentResponse = serde_json::from_value(value).map_err(|err| {
            LLMError::protocol(self.provider, format!("failed to parse stream chunk: {err}"))
        })?;

        let mut delta = StreamDelta {
            usage: chunk.usage_metadata.as_ref().map(convert_usage),
            ..StreamDelta::default()
        };
        for candidate in &chunk.candidates {
            if let Some(index) = candidate.index.filter(|index| *index != 0) {
                return Err(LLMError::protocol(
                    self.provider,
                    format!("unexpected candidate index {index}"),
                ));
            }
            for part in candidate.content.iter().flat_map(|content| &content.parts) {
                if let Some(call) = &part.function_call {
                    delta.tool_calls.push(ToolCallDelta {
                        index: self.next_tool_index,
                        id: None,
                        name: Some(call.name.clone()),
                        arguments_delta: Some(call.args.to_string()),
                    });
                    self.next_tool_index += 1;
                } else if part.thought != Some(true) {
                    delta
                        .content
                        .push_str(part.text.as_deref().unwrap_or_default());
                }
            }
            if let Some(reason) = candidate.finish_reason.as_deref() {
                delta.finish_reason = Some(convert_finish_reason(reason, self.next_tool_index > 0));
            }
        }
        if chunk.candidates.is_empty()
            && chunk
                .prompt_feedback
                .as_ref()
                .is_some_and(|feedback| feedback.block_reason.is_some())
        {
            delta.finish_reason = Some(FinishReason::ContentFilter);
        }

        if delta == StreamDelta::default() {
            return Ok(Normalized::KeepAlive);
        }
        Ok(Normalized::Deltas(vec![delta]))
    }
}
