use std::collections::BTreeMap;

use futures_util::StreamExt;
use serde_json::Value;

use crate::error::LLMError;
use crate::provider::ChatStream;
use crate::types::{FinalResult, FinishReason, StreamDelta, ToolCall};
use crate::usage::UsageAccumulator;

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Rebuilds a [`FinalResult`] from a sequence of [`StreamDelta`] values.
///
/// Content fragments are concatenated in arrival order, tool-call fragments are
/// merged by their index and usage goes through a [`UsageAccumulator`].
#[derive(Debug, Default)]
pub struct ResponseAggregator {
    content: String,
    tool_calls: BTreeMap<usize, PartialToolCall>,
    finish_reason: Option<FinishReason>,
    usage: UsageAccumulator,
}

impl ResponseAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one delta into the aggregate.
    pub fn push(&mut self, delta: &StreamDelta) {
        self.content.push_str(&delta.content);
        for fragment in &delta.tool_calls {
            let entry = self.tool_calls.entry(fragment.index).or_default();
            if let Some(id) = &fragment.id {
                entry.id = Some(id.clone());
            }
            if let Some(name) = &fragment.name {
                entry.name.push_str(name);
            }
            if let Some(arguments) = &fragment.arguments_delta {
                entry.arguments.push_str(arguments);
            }
        }
        if let Some(reason) = &delta.finish_reason {
            self.finish_reason = Some(reason.clone());
        }
        if let Some(usage) = &delta.usage {
            self.usage.apply(usage);
        }
    }

    /// Produces the final result.
    ///
    /// Tool-call arguments that parse as JSON are stored parsed; anything else
    /// is kept as a JSON string so no fragment is lost.
    pub fn finish(self) -> FinalResult {
        let tool_calls = self
            .tool_calls
            .into_values()
            .map(|partial| ToolCall {
                id: partial.id,
                name: partial.name,
                arguments: parse_arguments(partial.arguments),
            })
            .collect();
        FinalResult {
            content: self.content,
            tool_calls,
            finish_reason: self.finish_reason,
            usage: self.usage.finish(None),
            ..FinalResult::default()
        }
    }
}

fn parse_arguments(raw: String) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

/// Drains a stream into a single [`FinalResult`].
///
/// # Errors
///
/// Returns the first error produced by the stream; deltas received before it are discarded.
pub async fn collect_stream(mut stream: ChatStream) -> Result<FinalResult, LLMError> {
    let mut aggregator = ResponseAggregator::new();
    while let Some(delta) = stream.next().await {
        aggregator.push(&delta?);
    }
    Ok(aggregator.finish())
}

#[cfg(test)]
mod tests {
    use futures_util::stream;
    use serde_json::json;

    use super::*;
    use crate::types::{ToolCallDelta, UsageSummary};

    #[test]
    fn merges_tool_call_fragments_by_index() {
        let mut aggregator = ResponseAggregator::new();
        aggregator.push(&StreamDelta::tool_calls(vec![ToolCallDelta {
            index: 1,
            id: Some("call_b".into()),
            name: Some("lookup".into()),
            arguments_delta: Some("{\"q\":".into()),
        }]));
        aggregator.push(&StreamDelta::tool_calls(vec![ToolCallDelta {
            index: 0,
            id: Some("call_a".into()),
            name: Some("weather".into()),
            arguments_delta: Some("{}".into()),
        }]));
        aggregator.push(&StreamDelta::tool_calls(vec![ToolCallDelta {
            index: 1,
            arguments_delta: Some("\"rust\"}".into()),
            ..Default::default()
        }]));
        aggregator.push(&StreamDelta::finish(FinishReason::ToolCalls));

        let result = aggregator.finish();
        assert_eq!(result.tool_calls.len(), 2);
        assert_eq!(result.tool_calls[0].name, "weather");
        assert_eq!(result.tool_calls[1].id.as_deref(), Some("call_b"));
        assert_eq!(result.tool_calls[1].arguments, json!({"q": "rust"}));
        assert_eq!(result.finish_reason, Some(FinishReason::ToolCalls));
    }

    #[test]
    fn keeps_unparseable_arguments_as_string() {
        let mut aggregator = ResponseAggregator::new();
        aggregator.push(&StreamDelta::tool_calls(vec![ToolCallDelta {
            index: 0,
            name: Some("broken".into()),
            arguments_delta: Some("{\"q\":".into()),
            ..Default::default()
        }]));
        let result = aggregator.finish();
        assert_eq!(result.tool_calls[0].arguments, json!("{\"q\":"));
    }

    #[tokio::test]
    async fn collect_stream_concatenates_content_and_usage() {
        let mut terminal = StreamDelta::finish(FinishReason::Stop);
        terminal.usage = Some(UsageSummary {
            prompt_tokens: Some(5),
            completion_tokens: Some(2),
            total_tokens: Some(7),
            ..Default::default()
        });
        let stream: ChatStream = Box::pin(stream::iter(vec![
            Ok(StreamDelta::content("He")),
            Ok(StreamDelta::content("llo")),
            Ok(terminal),
        ]));

        let result = collect_stream(stream).await.expect("result");
        assert_eq!(result.content, "Hello");
        assert_eq!(result.finish_reason, Some(FinishReason::Stop));
        assert_eq!(result.usage.total_tokens, Some(7));
    }

    #[tokio::test]
    async fn collect_stream_surfaces_errors() {
        let stream: ChatStream = Box::pin(stream::iter(vec![
            Ok(StreamDelta::content("He")),
            Err(LLMError::transport("reset")),
        ]));
        let err = collect_stream(stream).await.unwrap_err();
        assert!(matches!(err, LLMError::Transport { .. }));
    }
}
