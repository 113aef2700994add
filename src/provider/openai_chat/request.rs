use std::collections::HashMap;

use serde_json::{Map, Value, json};

use crate::error::LLMError;
use crate::http::{FilePart, MultipartForm};
use crate::types::{
    ContentPart, EmbeddingRequest, GenerationRequest, ImageContent, ImageDetail, ImageSource,
    Message, ResponseFormat, TextContent, ToolCall, ToolChoice, ToolDefinition,
    TranscriptionRequest,
};

use super::presets::OpenAiPreset;

pub(crate) fn build_openai_body(
    request: &GenerationRequest,
    preset: &OpenAiPreset,
    model: &str,
    defaults: &HashMap<String, Value>,
    stream: bool,
) -> Result<Value, LLMError> {
    let mut body = Map::new();
    for (k, v) in defaults {
        body.insert(k.clone(), v.clone());
    }
    body.insert("model".to_string(), Value::String(model.to_string()));
    body.insert(
        "messages".to_string(),
        Value::Array(convert_messages(request.conversation.messages())?),
    );
    let options = &request.options;
    if let Some(temperature) = options.temperature {
        body.insert("temperature".to_string(), Value::from(temperature));
    }
    if let Some(top_p) = options.top_p {
        body.insert("top_p".to_string(), Value::from(top_p));
    }
    if let Some(max_tokens) = options.max_output_tokens {
        body.insert(preset.max_tokens_field.to_string(), Value::from(max_tokens));
    }
    if !options.stop.is_empty() {
        body.insert("stop".to_string(), json!(options.stop));
    }
    if let Some(penalty) = options.presence_penalty {
        body.insert("presence_penalty".to_string(), Value::from(penalty));
    }
    if let Some(penalty) = options.frequency_penalty {
        body.insert("frequency_penalty".to_string(), Value::from(penalty));
    }
    if let Some(parallel) = options.parallel_tool_calls {
        body.insert("parallel_tool_calls".to_string(), Value::from(parallel));
    }
    if !request.tools.is_empty() {
        body.insert(
            "tools".to_string(),
            Value::Array(convert_tools(&request.tools)),
        );
    }
    if let Some(choice) = &request.tool_choice {
        body.insert("tool_choice".to_string(), convert_tool_choice(choice));
    }
    if let Some(format) = &request.response_format {
        body.insert(
            "response_format".to_string(),
            convert_response_format(format),
        );
    }
    for (k, v) in &options.extra {
        body.insert(k.clone(), v.clone());
    }
    body.insert("stream".to_string(), Value::Bool(stream));
    if stream && preset.include_stream_usage {
        body.insert(
            "stream_options".to_string(),
            json!({ "include_usage": true }),
        );
    }
    Ok(Value::Object(body))
}

pub(crate) fn build_embedding_body(
    request: &EmbeddingRequest,
    model: &str,
) -> Result<Value, LLMError> {
    if request.input.is_empty() {
        return Err(LLMError::Validation {
            message: "embedding input must not be empty".to_string(),
        });
    }
    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(model.to_string()));
    body.insert("input".to_string(), json!(request.input));
    body.insert(
        "encoding_format".to_string(),
        Value::String("float".to_string()),
    );
    if let Some(dimensions) = request.dimensions {
        body.insert("dimensions".to_string(), Value::from(dimensions));
    }
    for (k, v) in &request.extra {
        body.insert(k.clone(), v.clone());
    }
    Ok(Value::Object(body))
}

pub(crate) fn build_transcription_form(
    request: &TranscriptionRequest,
    model: &str,
) -> Result<MultipartForm, LLMError> {
    if request.audio.is_empty() {
        return Err(LLMError::Validation {
            message: "audio payload must not be empty".to_string(),
        });
    }
    let mut form = MultipartForm::new()
        .file(FilePart {
            name: "file".to_string(),
            file_name: request.file_name.clone(),
            mime_type: request.mime_type.clone(),
            bytes: request.audio.clone(),
        })
        .text("model", model);
    if let Some(language) = &request.language {
        form = form.text("language", language.as_str());
    }
    if let Some(prompt) = &request.prompt {
        form = form.text("prompt", prompt.as_str());
    }
    form = form.text(
        "response_format",
        request.response_format.as_deref().unwrap_or("json"),
    );
    if let Some(temperature) = request.temperature {
        form = form.text("temperature", temperature.to_string());
    }
    Ok(form)
}

fn convert_messages(messages: &[Message]) -> Result<Vec<Value>, LLMError> {
    messages.iter().map(convert_message).collect()
}

fn convert_message(message: &Message) -> Result<Value, LLMError> {
    let mut obj = Map::new();
    obj.insert("role".to_string(), Value::String(message.role.0.clone()));
    if let Some(name) = &message.name {
        obj.insert("name".to_string(), Value::String(name.clone()));
    }

    let mut content_parts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut tool_results = Vec::new();

    for part in &message.content {
        match part {
            ContentPart::ToolCall(call) => tool_calls.push(convert_tool_call(call)?),
            ContentPart::ToolResult(result) => tool_results.push(result),
            other => content_parts.push(convert_content_part(other)),
        }
    }

    if message.role.0 == "tool" {
        let [result] = tool_results.as_slice() else {
            return Err(LLMError::Validation {
                message: "tool role expects exactly one tool result".to_string(),
            });
        };
        let call_id = result.call_id.clone().ok_or_else(|| LLMError::Validation {
            message: "tool message missing call_id".to_string(),
        })?;
        let content = match &result.output {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        obj.insert("tool_call_id".to_string(), Value::String(call_id));
        obj.insert("content".to_string(), Value::String(content));
        return Ok(Value::Object(obj));
    }

    // Plain text turns are sent as a string for vendors without multipart support.
    let content = match content_parts.as_slice() {
        [] => Value::Null,
        [single] if single["type"] == "text" => single["text"].clone(),
        _ => Value::Array(content_parts),
    };
    obj.insert("content".to_string(), content);
    if !tool_calls.is_empty() {
        obj.insert("tool_calls".to_string(), Value::Array(tool_calls));
    }
    Ok(Value::Object(obj))
}

fn convert_content_part(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text(TextContent { text }) => json!({"type": "text", "text": text}),
        ContentPart::Image(ImageContent { source, detail }) => {
            let detail = detail.as_ref().map(format_image_detail).unwrap_or("auto");
            let url = match source {
                ImageSource::Url { url } => url.clone(),
                ImageSource::Base64 { data, mime_type } => {
                    let mime = mime_type.as_deref().unwrap_or("image/jpeg");
                    format!("data:{mime};base64,{data}")
                }
            };
            json!({
                "type": "image_url",
                "image_url": { "url": url, "detail": detail }
            })
        }
        ContentPart::Data { data } => data.clone(),
        ContentPart::ToolCall(_) | ContentPart::ToolResult(_) => Value::Null,
    }
}

fn convert_tool_call(call: &ToolCall) -> Result<Value, LLMError> {
    let arguments = serde_json::to_string(&call.arguments).map_err(|err| LLMError::Validation {
        message: format!("invalid tool arguments: {err}"),
    })?;
    let mut obj = Map::new();
    if let Some(id) = &call.id {
        obj.insert("id".to_string(), Value::String(id.clone()));
    }
    obj.insert("type".to_string(), Value::String("function".to_string()));
    obj.insert(
        "function".to_string(),
        json!({
            "name": call.name,
            "arguments": arguments
        }),
    );
    Ok(Value::Object(obj))
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool
                        .input_schema
                        .clone()
                        .unwrap_or_else(|| json!({"type": "object", "properties": {}}))
                }
            })
        })
        .collect()
}

fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => Value::String("auto".to_string()),
        ToolChoice::Required => Value::String("required".to_string()),
        ToolChoice::None => Value::String("none".to_string()),
        ToolChoice::Tool { name } => json!({
            "type": "function",
            "function": { "name": name }
        }),
    }
}

fn convert_response_format(format: &ResponseFormat) -> Value {
    match format {
        ResponseFormat::Text => json!({ "type": "text" }),
        ResponseFormat::JsonObject => json!({ "type": "json_object" }),
        ResponseFormat::JsonSchema { schema } => {
            json!({ "type": "json_schema", "json_schema": schema })
        }
    }
}

fn format_image_detail(detail: &ImageDetail) -> &'static str {
    match detail {
        ImageDetail::Low => "low",
        ImageDetail::High => "high",
        ImageDetail::Auto => "auto",
    }
}
