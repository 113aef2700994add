use std::collections::HashMap;

use serde_json::{Map, Value, json};

use crate::error::LLMError;
use crate::types::{
    ContentPart, GenerationRequest, ImageContent, ImageSource, Message, TextContent, ToolCall,
    ToolChoice, ToolDefinition, ToolResult,
};

/// Output limit sent when the request does not set one; the API requires it.
pub(crate) const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Builds the Anthropic Messages request body.
pub(crate) fn build_anthropic_body(
    request: &GenerationRequest,
    model: &str,
    defaults: &HashMap<String, Value>,
    stream: bool,
) -> Result<Value, LLMError> {
    let mut body = Map::new();
    for (k, v) in defaults {
        body.insert(k.clone(), v.clone());
    }
    body.insert("model".to_string(), Value::String(model.to_string()));

    // System turns fold into the top-level `system` field.
    let mut system_texts = Vec::new();
    let mut messages = Vec::new();
    for message in request.conversation.messages() {
        match message.role.0.as_str() {
            "system" | "developer" => {
                if let Some(text) = message.joined_text() {
                    system_texts.push(text);
                }
            }
            _ => messages.push(convert_message(message)?),
        }
    }

    if messages.is_empty() {
        return Err(LLMError::Validation {
            message: "Anthropic Messages request requires at least one user/assistant message"
                .to_string(),
        });
    }
    body.insert("messages".to_string(), Value::Array(messages));

    if !system_texts.is_empty() {
        body.insert(
            "system".to_string(),
            Value::String(system_texts.join("\n\n")),
        );
    }

    let options = &request.options;
    body.insert(
        "max_tokens".to_string(),
        Value::from(options.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
    );
    if let Some(temperature) = options.temperature {
        body.insert("temperature".to_string(), Value::from(temperature));
    }
    if let Some(top_p) = options.top_p {
        body.insert("top_p".to_string(), Value::from(top_p));
    }
    if !options.stop.is_empty() {
        body.insert("stop_sequences".to_string(), json!(options.stop));
    }

    if !request.tools.is_empty() {
        body.insert(
            "tools".to_string(),
            Value::Array(convert_tools(&request.tools)),
        );
    }
    if let Some(choice) = &request.tool_choice {
        body.insert(
            "tool_choice".to_string(),
            convert_tool_choice(choice, options.parallel_tool_calls.unwrap_or(true)),
        );
    }

    for (k, v) in &options.extra {
        body.insert(k.clone(), v.clone());
    }

    body.insert("stream".to_string(), Value::Bool(stream));
    Ok(Value::Object(body))
}

fn convert_message(message: &Message) -> Result<Value, LLMError> {
    // Only user and assistant exist; tool results travel in user turns.
    let role = match message.role.0.as_str() {
        "assistant" => "assistant",
        _ => "user",
    };

    let content_blocks = message
        .content
        .iter()
        .map(convert_content_part)
        .collect::<Result<Vec<_>, _>>()?;
    if content_blocks.is_empty() {
        return Err(LLMError::Validation {
            message: "message must contain at least one content part".to_string(),
        });
    }

    Ok(json!({ "role": role, "content": content_blocks }))
}

fn convert_content_part(part: &ContentPart) -> Result<Value, LLMError> {
    match part {
        ContentPart::Text(TextContent { text }) => Ok(json!({
            "type": "text",
            "text": text
        })),
        ContentPart::Image(ImageContent { source, .. }) => Ok(match source {
            ImageSource::Base64 { data, mime_type } => json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": mime_type.as_deref().unwrap_or("image/png"),
                    "data": data
                }
            }),
            ImageSource::Url { url } => json!({
                "type": "image",
                "source": { "type": "url", "url": url }
            }),
        }),
        ContentPart::ToolCall(ToolCall {
            id,
            name,
            arguments,
        }) => {
            let id = id.clone().ok_or_else(|| LLMError::Validation {
                message: "tool_use content requires an id".to_string(),
            })?;
            Ok(json!({
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": arguments
            }))
        }
        ContentPart::ToolResult(ToolResult {
            call_id,
            output,
            is_error,
        }) => {
            let tool_use_id = call_id.clone().ok_or_else(|| LLMError::Validation {
                message: "tool_result content requires call_id (mapped to tool_use_id)".to_string(),
            })?;
            let content = match output {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            Ok(json!({
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": content,
                "is_error": is_error
            }))
        }
        ContentPart::Data { data } => Ok(data.clone()),
    }
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool
                    .input_schema
                    .clone()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}}))
            })
        })
        .collect()
}

fn convert_tool_choice(choice: &ToolChoice, parallel_tool_calls: bool) -> Value {
    let disable_parallel_tool_use = !parallel_tool_calls;
    match choice {
        ToolChoice::Auto => json!({
            "type": "auto",
            "disable_parallel_tool_use": disable_parallel_tool_use
        }),
        ToolChoice::Required => json!({
            "type": "any",
            "disable_parallel_tool_use": disable_parallel_tool_use
        }),
        ToolChoice::Tool { name } => json!({
            "type": "tool",
            "name": name,
            "disable_parallel_tool_use": disable_parallel_tool_use
        }),
        ToolChoice::None => json!({ "type": "none" }),
    }
}
