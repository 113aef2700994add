use crate::error::LLMError;
use crate::types::{FinalResult, FinishReason, ProviderMetadata, ToolCall, UsageSummary};

use super::types::{GeminiGenerateContentResponse, GeminiUsageMetadata};

pub(crate) fn map_response(
    resp: GeminiGenerateContentResponse,
    provider: &'static str,
    endpoint: String,
) -> Result<FinalResult, LLMError> {
    let raw = serde_json::to_value(&resp).ok();

    let mut content = String::new();
    let mut tool_calls = Vec::new();
    let finish_reason = match resp.candidates.first() {
        Some(candidate) => {
            for part in candidate.content.iter().flat_map(|content| &content.parts) {
                if let Some(call) = &part.function_call {
                    tool_calls.push(ToolCall {
                        id: None,
                        name: call.name.clone(),
                        arguments: call.args.clone(),
                    });
                } else if part.thought != Some(true) {
                    content.push_str(part.text.as_deref().unwrap_or_default());
                }
            }
            candidate
                .finish_reason
                .as_deref()
                .map(|reason| convert_finish_reason(reason, !tool_calls.is_empty()))
        }
        None => match resp
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_ref())
        {
            Some(_) => Some(FinishReason::ContentFilter),
            None => {
                return Err(LLMError::protocol(
                    provider,
                    "response carries neither candidates nor a block reason",
                ));
            }
        },
    };

    Ok(FinalResult {
        content,
        tool_calls,
        finish_reason,
        usage: resp
            .usage_metadata
            .as_ref()
            .map(convert_usage)
            .unwrap_or_default(),
        model: resp.model_version,
        served_by: String::new(),
        provider: ProviderMetadata {
            provider: provider.to_string(),
            request_id: resp.response_id,
            endpoint: Some(endpoint),
            raw,
        },
    })
}

/// Gemini has no tool-call finish reason; `STOP` after a function call means one.
pub(crate) fn convert_finish_reason(reason: &str, saw_tool_call: bool) -> FinishReason {
    match reason {
        "STOP" if saw_tool_call => FinishReason::ToolCalls,
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" | "LANGUAGE" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII"
        | "IMAGE_SAFETY" => FinishReason::ContentFilter,
        other => FinishReason::Other(other.to_string()),
    }
}

pub(crate) fn convert_usage(usage: &GeminiUsageMetadata) -> UsageSummary {
    UsageSummary {
        prompt_tokens: usage.prompt_token_count,
        completion_tokens: usage.candidates_token_count,
        total_tokens: usage.total_token_count,
        reasoning_tokens: usage.thoughts_token_count,
        cached_tokens: usage.cached_content_token_count,
        ..UsageSummary::default()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    fn parse(value: Value) -> GeminiGenerateContentResponse {
        serde_json::from_value(value).expect("response")
    }

    #[test]
    fn maps_text_response_with_usage() {
        let resp = parse(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "thinking...", "thought": true},
                    {"text": "Hello, "},
                    {"text": "world"}
                ]},
                "finishReason": "STOP",
                "index": 0
            }],
            "usageMetadata": {
                "promptTokenCount": 4,
                "candidatesTokenCount": 7,
                "totalTokenCount": 11,
                "thoughtsTokenCount": 2
            },
            "modelVersion": "gemini-2.0-flash",
            "responseId": "resp-1"
        }));
        let result = map_response(resp, "google", "endpoint".into()).expect("mapped");
        assert_eq!(result.content, "Hello, world");
        assert_eq!(result.finish_reason, Some(FinishReason::Stop));
        assert_eq!(result.model.as_deref(), Some("gemini-2.0-flash"));
        assert_eq!(result.usage.total_tokens, Some(11));
        assert_eq!(result.usage.reasoning_tokens, Some(2));
        assert_eq!(result.provider.request_id.as_deref(), Some("resp-1"));
    }

    #[test]
    fn function_call_turns_stop_into_tool_calls() {
        let resp = parse(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"functionCall": {"name": "weather", "args": {"city": "Lima"}}}
                ]},
                "finishReason": "STOP"
            }]
        }));
        let result = map_response(resp, "google", "endpoint".into()).expect("mapped");
        assert_eq!(result.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(result.tool_calls[0].name, "weather");
        assert_eq!(result.tool_calls[0].arguments, json!({"city": "Lima"}));
    }

    #[test]
    fn blocked_prompt_is_a_content_filter_stop() {
        let resp = parse(json!({"promptFeedback": {"blockReason": "SAFETY"}}));
        let result = map_response(resp, "google", "endpoint".into()).expect("mapped");
        assert!(result.content.is_empty());
        assert_eq!(result.finish_reason, Some(FinishReason::ContentFilter));
    }

    #[test]
    fn empty_response_is_protocol_error() {
        let err = map_response(parse(json!({})), "google", "endpoint".into()).unwrap_err();
        assert!(matches!(err, LLMError::Protocol { .. }));
    }

    #[test]
    fn finish_reason_variants() {
        assert_eq!(convert_finish_reason("MAX_TOKENS", false), FinishReason::Length);
        assert_eq!(
            convert_finish_reason("BLOCKLIST", false),
            FinishReason::ContentFilter
        );
        assert_eq!(
            convert_finish_reason("OTHER", false),
            FinishReason::Other("OTHER".to_string())
        );
    }
}
