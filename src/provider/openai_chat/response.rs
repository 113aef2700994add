use serde_json::Value;

use crate::error::LLMError;
use crate::types::{
    EmbeddingResponse, FinalResult, FinishReason, ProviderMetadata, ToolCall, UsageSummary,
};

use super::presets::UsageQuirk;
use super::types::{
    GroqExtension, OpenAiChatResponse, OpenAiEmbeddingResponse, OpenAiMessageContent,
    OpenAiToolCallResponse, OpenAiUsage,
};

pub(crate) fn map_response(
    resp: OpenAiChatResponse,
    provider: &'static str,
    quirk: UsageQuirk,
    endpoint: String,
) -> Result<FinalResult, LLMError> {
    let raw = serde_json::to_value(&resp).ok();
    let choice = resp
        .choices
        .into_iter()
        .find(|choice| choice.index == 0)
        .ok_or_else(|| LLMError::protocol(provider, "response contains no choices"))?;

    let (content, tool_calls) = match choice.message {
        Some(message) => {
            let content = match message.content {
                None => String::new(),
                Some(OpenAiMessageContent::Text(text)) => text,
                Some(OpenAiMessageContent::Parts(parts)) => parts
                    .into_iter()
                    .filter(|part| part.kind == "text")
                    .filter_map(|part| part.text)
                    .collect(),
            };
            let tool_calls = message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|call| convert_tool_call_response(call, provider))
                .collect::<Result<Vec<_>, _>>()?;
            (content, tool_calls)
        }
        None => (String::new(), Vec::new()),
    };

    Ok(FinalResult {
        content,
        tool_calls,
        finish_reason: choice.finish_reason.as_deref().map(convert_finish_reason),
        usage: select_usage(resp.usage, resp.x_groq, quirk).unwrap_or_default(),
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

pub(crate) fn map_embedding_response(
    resp: OpenAiEmbeddingResponse,
    quirk: UsageQuirk,
) -> EmbeddingResponse {
    let mut data = resp.data;
    data.sort_by_key(|item| item.index);
    EmbeddingResponse {
        embeddings: data.into_iter().map(|item| item.embedding).collect(),
        model: resp.model,
        usage: resp
            .usage
            .map(|usage| convert_usage(usage, quirk))
            .unwrap_or_default(),
        served_by: String::new(),
    }
}

pub(crate) fn convert_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" | "eos" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        other => FinishReason::Other(other.to_string()),
    }
}

/// Picks the usage block the vendor actually populates.
pub(crate) fn select_usage(
    usage: Option<OpenAiUsage>,
    extension: Option<GroqExtension>,
    quirk: UsageQuirk,
) -> Option<UsageSummary> {
    let extension_usage = extension.and_then(|ext| ext.usage);
    let usage = match quirk {
        UsageQuirk::GroqExtension => extension_usage.or(usage),
        UsageQuirk::Standard | UsageQuirk::DeepSeekCache => usage.or(extension_usage),
    }?;
    let summary = convert_usage(usage, quirk);
    (!summary.is_empty()).then_some(summary)
}

pub(crate) fn convert_usage(usage: OpenAiUsage, quirk: UsageQuirk) -> UsageSummary {
    let detail_cached = usage
        .prompt_tokens_details
        .and_then(|details| details.cached_tokens);
    let cached_tokens = match quirk {
        UsageQuirk::DeepSeekCache => usage.prompt_cache_hit_tokens.or(detail_cached),
        UsageQuirk::Standard | UsageQuirk::GroqExtension => detail_cached,
    };
    UsageSummary {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
        reasoning_tokens: usage
            .completion_tokens_details
            .and_then(|details| details.reasoning_tokens),
        cached_tokens,
        cost: usage.cost,
        latency: None,
    }
}

fn convert_tool_call_response(
    call: OpenAiToolCallResponse,
    provider: &'static str,
) -> Result<ToolCall, LLMError> {
    if let Some(kind) = call.kind.as_deref().filter(|kind| *kind != "function") {
        return Err(LLMError::protocol(
            provider,
            format!("unsupported tool type {kind}"),
        ));
    }
    let function = call
        .function
        .ok_or_else(|| LLMError::protocol(provider, "tool call without function"))?;
    let arguments = match function.arguments {
        Some(args) if !args.trim().is_empty() => {
            serde_json::from_str(&args).unwrap_or(Value::String(args))
        }
        _ => Value::Object(Default::default()),
    };
    Ok(ToolCall {
        id: call.id,
        name: function.name.unwrap_or_default(),
        arguments,
    })
}
