use serde_json::json;

use crate::error::LLMError;
use crate::types::{FinalResult, FinishReason, ProviderMetadata, ToolCall, UsageSummary};

use super::types::{AnthropicMessageResponse, AnthropicUsage};

pub(crate) fn map_response(
    resp: AnthropicMessageResponse,
    provider: &'static str,
    endpoint: String,
) -> Result<FinalResult, LLMError> {
    let raw = serde_json::to_value(&resp).ok();

    let mut content = String::new();
    let mut tool_calls = Vec::new();
    for block in resp.content {
        match block.kind.as_str() {
            "text" => content.push_str(block.text.as_deref().unwrap_or_default()),
            "tool_use" => tool_calls.push(ToolCall {
                id: block.id,
                name: block.name.unwrap_or_default(),
                arguments: block.input.unwrap_or_else(|| json!({})),
            }),
            "thinking" | "redacted_thinking" => {}
            other => {
                return Err(LLMError::protocol(
                    provider,
                    format!("unexpected content block type {other}"),
                ));
            }
        }
    }

    Ok(FinalResult {
        content,
        tool_calls,
        finish_reason: resp.stop_reason.as_deref().map(convert_finish_reason),
        usage: resp.usage.as_ref().map(convert_usage).unwrap_or_default(),
        model: resp.model,
        served_by: String::new(),
        provider: ProviderMetadata {
            provider: provider.to_string(),
            request_id: resp.id,
            endpoint: Some(endpoint),
            raw,
        },
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

pub(crate) fn convert_usage(usage: &AnthropicUsage) -> UsageSummary {
    let total_tokens = match (usage.input_tokens, usage.output_tokens) {
        (Some(input), Some(output)) => Some(input + output),
        _ => None,
    };
    UsageSummary {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens,
        cached_tokens: usage.cache_read_input_tokens,
        ..UsageSummary::default()
    }
}
