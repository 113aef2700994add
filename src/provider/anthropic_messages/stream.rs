use crate::error::LLMError;
use crate::http::HttpBodyStream;
use crate::provider::ChatStream;
use crate::stream::{ChunkNormalizer, Normalized, NormalizedStream};
use crate::types::{StreamDelta, ToolCallDelta, UsageSummary};

use super::response::{convert_finish_reason, convert_usage};
use super::types::{AnthropicBlockDelta, AnthropicStreamEvent};

pub(crate) fn create_stream(body: HttpBodyStream, provider: &'static str) -> ChatStream {
    Box::pin(NormalizedStream::from_body(
        body,
        AnthropicEventNormalizer::new(provider),
    ))
}

/// Classifies Anthropic Messages stream events.
///
/// Input tokens only arrive with `message_start`, so they are remembered to
/// complete the totals reported by `message_delta`.
pub(crate) struct AnthropicEventNormalizer {
    provider: &'static str,
    input_tokens: Option<u64>,
}

impl AnthropicEventNormalizer {
    pub(crate) fn new(provider: &'static str) -> Self {
        Self {
            provider,
            input_tokens: None,
        }
    }
}

impl ChunkNormalizer for AnthropicEventNormalizer {
    fn provider(&self) -> &'static str {
        self.provider
    }

    fn normalize(&mut self, payload: &str) -> Result<Normalized, LLMError> {
        let event: AnthropicStreamEvent = serde_json::from_str(payload).map_err(|err| {
            LLMError::protocol(self.provider, format!("unrecognised stream event: {err}"))
        })?;

        let delta = match event {
            AnthropicStreamEvent::MessageStart { message } => {
                let Some(usage) = message.usage else {
                    return Ok(Normalized::KeepAlive);
                };
                self.input_tokens = usage.input_tokens;
                StreamDelta::usage_only(UsageSummary {
                    prompt_tokens: usage.input_tokens,
                    cached_tokens: usage.cache_read_input_tokens,
                    ..UsageSummary::default()
                })
            }
            AnthropicStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block.kind.as_str() {
                "text" => match content_block.text.filter(|text| !text.is_empty()) {
                    Some(text) => StreamDelta::content(text),
                    None => return Ok(Normalized::KeepAlive),
                },
                "tool_use" => StreamDelta::tool_calls(vec![ToolCallDelta {
                    index,
                    id: content_block.id,
                    name: content_block.name,
                    arguments_delta: None,
                }]),
                "thinking" | "redacted_thinking" => return Ok(Normalized::KeepAlive),
                other => {
                    return Err(LLMError::protocol(
                        self.provider,
                        format!("unexpected content block type {other}"),
                    ));
                }
            },
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                AnthropicBlockDelta::TextDelta { text } => StreamDelta::content(text),
                AnthropicBlockDelta::InputJsonDelta { partial_json } => {
                    StreamDelta::tool_calls(vec![ToolCallDelta {
                        index,
                        id: None,
                        name: None,
                        arguments_delta: Some(partial_json),
                    }])
                }
                AnthropicBlockDelta::ThinkingDelta | AnthropicBlockDelta::SignatureDelta => {
                    return Ok(Normalized::KeepAlive);
                }
            },
            AnthropicStreamEvent::ContentBlockStop | AnthropicStreamEvent::Ping => {
                return Ok(Normalized::KeepAlive);
            }
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                let usage = usage.map(|mut usage| {
                    usage.input_tokens = usage.input_tokens.or(self.input_tokens);
                    convert_usage(&usage)
                });
                match delta.stop_reason.as_deref() {
                    Some(reason) => StreamDelta {
                        usage,
                        ..StreamDelta::finish(convert_finish_reason(reason))
                    },
                    None => match usage {
                        Some(usage) => StreamDelta::usage_only(usage),
                        None => return Ok(Normalized::KeepAlive),
                    },
                }
            }
            AnthropicStreamEvent::MessageStop => return Ok(Normalized::End),
            AnthropicStreamEvent::Error { error } => {
                return Err(LLMError::protocol(
                    self.provider,
                    format!(
                        "vendor reported an error mid-stream: {} ({})",
                        error.message.unwrap_or_else(|| "unknown error".to_string()),
                        error.kind.unwrap_or_else(|| "error".to_string())
                    ),
                ));
            }
        };
        Ok(Normalized::Deltas(vec![delta]))
    }
}

#[cfg(test)]
mod tests {
    use futures_util::stream;

    use super::*;
    use crate::aggregate::collect_stream;
    use crate::types::FinishReason;

    fn sse(events: &[(&str, &str)]) -> HttpBodyStream {
        let chunks: Vec<Result<Vec<u8>, LLMError>> = events
            .iter()
            .map(|(name, data)| Ok(format!("event: {name}\ndata: {data}\n\n").into_bytes()))
            .collect();
        Box::pin(stream::iter(chunks))
    }

    #[test]
    fn text_delta_becomes_content() {
        let mut normalizer = AnthropicEventNormalizer::new("anthropic");
        let out = normalizer
            .normalize(r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Once upon a time"}}"#)
            .expect("normalized");
        assert_eq!(
            out,
            Normalized::Deltas(vec![StreamDelta::content("Once upon a time")])
        );
    }

    #[test]
    fn ping_and_block_stop_are_keep_alive() {
        let mut normalizer = AnthropicEventNormalizer::new("anthropic");
        assert_eq!(
            normalizer.normalize(r#"{"type":"ping"}"#).expect("ping"),
            Normalized::KeepAlive
        );
        assert_eq!(
            normalizer
                .normalize(r#"{"type":"content_block_stop","index":0}"#)
                .expect("stop"),
            Normalized::KeepAlive
        );
    }

    #[test]
    fn unknown_event_is_protocol_error() {
        let mut normalizer = AnthropicEventNormalizer::new("anthropic");
        let err = normalizer
            .normalize(r#"{"type":"teleport","index":0}"#)
            .unwrap_err();
        assert!(matches!(err, LLMError::Protocol { .. }));
    }

    #[test]
    fn error_event_carries_vendor_message() {
        let mut normalizer = AnthropicEventNormalizer::new("anthropic");
        let err = normalizer
            .normalize(r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("Overloaded"));
    }

    #[tokio::test]
    async fn full_stream_collects_content_usage_and_tool_calls() {
        let body = sse(&[
            (
                "message_start",
                r#"{"type":"message_start","message":{"id":"msg_1","type":"message","role":"assistant","content":[],"model":"claude","usage":{"input_tokens":25,"output_tokens":1}}}"#,
            ),
            (
                "content_block_start",
                r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            ),
            ("ping", r#"{"type":"ping"}"#),
            (
                "content_block_delta",
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"He"}}"#,
            ),
            (
                "content_block_delta",
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"llo"}}"#,
            ),
            (
                "content_block_stop",
                r#"{"type":"content_block_stop","index":0}"#,
            ),
            (
                "content_block_start",
                r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"weather","input":{}}}"#,
            ),
            (
                "content_block_delta",
                r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"city\": \"Lima\"}"}}"#,
            ),
            (
                "content_block_stop",
                r#"{"type":"content_block_stop","index":1}"#,
            ),
            (
                "message_delta",
                r#"{"type":"message_delta","delta":{"stop_reason":"tool_use","stop_sequence":null},"usage":{"output_tokens":15}}"#,
            ),
            ("message_stop", r#"{"type":"message_stop"}"#),
        ]);

        let result = collect_stream(create_stream(body, "anthropic"))
            .await
            .expect("result");
        assert_eq!(result.content, "Hello");
        assert_eq!(result.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(result.tool_calls.len(), 1);
        assert_eq!(result.tool_calls[0].id.as_deref(), Some("toolu_1"));
        assert_eq!(
            result.tool_calls[0].arguments,
            serde_json::json!({"city": "Lima"})
        );
        assert_eq!(result.usage.prompt_tokens, Some(25));
        assert_eq!(result.usage.completion_tokens, Some(15));
        assert_eq!(result.usage.total_tokens, Some(40));
    }
}
