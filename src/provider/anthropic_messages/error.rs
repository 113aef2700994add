use std::collections::HashMap;

use serde::Deserialize;

use crate::error::LLMError;
use crate::provider::retry::retry_after_from_headers;

/// Parses error responses returned by the Anthropic Messages API.
pub(crate) fn parse_anthropic_error(
    status: u16,
    headers: &HashMap<String, String>,
    body: &str,
) -> LLMError {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<InnerError>,
    }

    #[derive(Deserialize)]
    struct InnerError {
        message: Option<String>,
        r#type: Option<String>,
    }

    let message = match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { error: Some(error) }) => {
            let message = error.message.unwrap_or_else(|| "unknown error".to_string());
            match error.r#type {
                Some(kind) => format!("{message} ({kind})"),
                None => message,
            }
        }
        // The payload cannot be parsed, surface the raw body.
        _ => body.to_string(),
    };
    LLMError::http_status(status, message, retry_after_from_headers(headers))
}
