use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::LLMError;
use crate::provider::retry::retry_after_from_headers;

/// Maps a non-2xx response to [`LLMError::Transport`], keeping the vendor message.
pub(crate) fn parse_openai_error(
    status: u16,
    headers: &HashMap<String, String>,
    body: &str,
) -> LLMError {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<InnerError>,
    }
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum InnerError {
        Detailed {
            message: Option<String>,
            code: Option<Value>,
        },
        Plain(String),
    }

    let retry_after = retry_after_from_headers(headers);
    let message = match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            error: Some(InnerError::Detailed { message, code }),
        }) => {
            let message = message.unwrap_or_else(|| "unknown error".to_string());
            match code {
                Some(Value::Null) | None => message,
                Some(code) => format!("{message} ({code})"),
            }
        }
        Ok(ErrorBody {
            error: Some(InnerError::Plain(message)),
        }) => message,
        _ => body.to_string(),
    };
    LLMError::http_status(status, message, retry_after)
}
