use std::collections::HashMap;

use serde_json::{Map, Value, json};

use crate::error::LLMError;
use crate::types::{
    ContentPart, GenerationRequest, ImageContent, ImageSource, Message, ResponseFormat,
    TextContent, ToolCall, ToolChoice, ToolDefinition, ToolResult,
};

/// Builds the GenerateContent body.
///
/// The model travels in the URL path (`models/{model}:generateContent`), so it
/// never appears in the body.
pub(crate) fn build_gemini_body(
    request: &GenerationRequest,
    defaults: &HashMap<String, Value>,
) -> Result<Value, LLMError> {
    let mut body = Map::new();
    for (k, v) in defaults {
        body.insert(k.clone(), v.clone());
    }

    // System turns fold into `system_instruction`.
    let mut system_texts = Vec::new();
    let mut contents = Vec::new();
    for message in request.conversation.messages() {
        match message.role.0.as_str() {
            "system" | "developer" => {
                if let Some(text) = message.joined_text() {
                    system_texts.push(text);
                }
            }
            _ => contents.push(convert_message(message)?),
        }
    }

    if contents.is_empty() {
        return Err(LLMError::Validation {
            message: "Gemini GenerateContent request requires at least one content message"
                .to_string(),
        });
    }
    body.insert("contents".to_string(), Value::Array(contents));

    if !system_texts.is_empty() {
        body.insert(
            "system_instruction".to_string(),
            json!({ "parts": [{ "text": system_texts.join("\n\n") }] }),
        );
    }

    if let Some(config) = build_generation_config(request) {
        body.insert("generationConfig".to_string(), config);
    }

    if !request.tools.is_empty() {
        body.insert("tools".to_string(), convert_tools(&request.tools));
    }
    if let Some(choice) = &request.tool_choice {
        body.insert("toolConfig".to_string(), convert_tool_choice(choice));
    }

    for (k, v) in &request.options.extra {
        body.insert(k.clone(), v.clone());
    }

    Ok(Value::Object(body))
}

fn convert_message(message: &Message) -> Result<Value, LLMError> {
    // Gemini knows `user` and `model`; tool results travel in user turns.
    let role = match message.role.0.as_str() {
        "assistant" => "model",
        _ => "user",
    };
    let parts = message
        .content
        .iter()
        .map(convert_content_part)
        .collect::<Result<Vec<_>, _>>()?;
    if parts.is_empty() {
        return Err(LLMError::Validation {
            message: "message must contain at least one content part".to_string(),
        });
    }
    Ok(json!({ "role": role, "parts": parts }))
}

fn convert_content_part(part: &ContentPart) -> Result<Value, LLMError> {
    match part {
        ContentPart::Text(TextContent { text }) => Ok(json!({ "text": text })),
        ContentPart::Image(ImageContent { source, .. }) => Ok(match source {
            ImageSource::Base64 { data, mime_type } => json!({
                "inlineData": {
                    "mimeType": mime_type.as_deref().unwrap_or("image/jpeg"),
                    "data": data,
                }
            }),
            ImageSource::Url { url } => json!({
                "fileData": {
                    "mimeType": "application/octet-stream",
                    "fileUri": url,
                }
            }),
        }),
        ContentPart::ToolCall(ToolCall {
            name, arguments, ..
        }) => Ok(json!({
            "functionCall": { "name": name, "args": arguments }
        })),
        // Gemini matches results to calls by function name, carried in `call_id`.
        ContentPart::ToolResult(ToolResult {
            call_id, output, ..
        }) => {
            let name = call_id.clone().ok_or_else(|| LLMError::Validation {
                message: "functionResponse requires call_id holding the function name"
                    .to_string(),
            })?;
            let response = match output {
                Value::Object(_) => output.clone(),
                other => json!({ "content": other }),
            };
            Ok(json!({
                "functionResponse": { "name": name, "response": response }
            }))
        }
        ContentPart::Data { data } => Ok(data.clone()),
    }
}

fn build_generation_config(request: &GenerationRequest) -> Option<Value> {
    let options = &request.options;
    let mut config = Map::new();

    if let Some(temperature) = options.temperature {
        config.insert("temperature".to_string(), Value::from(temperature));
    }
    if let Some(top_p) = options.top_p {
        config.insert("topP".to_string(), Value::from(top_p));
    }
    if let Some(max_tokens) = options.max_output_tokens {
        config.insert("maxOutputTokens".to_string(), Value::from(max_tokens));
    }
    if !options.stop.is_empty() {
        config.insert("stopSequences".to_string(), json!(options.stop));
    }
    if let Some(penalty) = options.presence_penalty {
        config.insert("presencePenalty".to_string(), Value::from(penalty));
    }
    if let Some(penalty) = options.frequency_penalty {
        config.insert("frequencyPenalty".to_string(), Value::from(penalty));
    }

    match &request.response_format {
        None | Some(ResponseFormat::Text) => {}
        Some(ResponseFormat::JsonObject) => {
            config.insert(
                "responseMimeType".to_string(),
                Value::String("application/json".to_string()),
            );
        }
        Some(ResponseFormat::JsonSchema { schema }) => {
            config.insert(
                "responseMimeType".to_string(),
                Value::String("application/json".to_string()),
            );
            config.insert("responseSchema".to_string(), schema.clone());
        }
    }

    if config.is_empty() {
        None
    } else {
        Some(Value::Object(config))
    }
}

fn convert_tools(tools: &[ToolDefinition]) -> Value {
    let declarations: Vec<Value> = tools
        .iter()
        .map(|tool| {
            let mut declaration = Map::new();
            declaration.insert("name".to_string(), Value::String(tool.name.clone()));
            if let Some(description) = &tool.description {
                declaration.insert(
                    "description".to_string(),
                    Value::String(description.clone()),
                );
            }
            if let Some(schema) = &tool.input_schema {
                declaration.insert("parameters".to_string(), schema.clone());
            }
            Value::Object(declaration)
        })
        .collect();
    json!([{ "functionDeclarations": declarations }])
}

fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!({ "functionCallingConfig": { "mode": "AUTO" } }),
        ToolChoice::Required => json!({ "functionCallingConfig": { "mode": "ANY" } }),
        ToolChoice::None => json!({ "functionCallingConfig": { "mode": "NONE" } }),
        ToolChoice::Tool { name } => json!({
            "functionCallingConfig": {
                "mode": "ANY",
                "allowedFunctionNames": [name]
            }
        }),
    }
}
