use std::collections::HashMap;

use serde::Deserialize;

use crate::error::LLMError;
use crate::provider::retry::retry_after_from_headers;

#[derive(Deserialize)]
pub(crate) struct GeminiErrorBody {
    pub(crate) error: Option<GeminiInnerError>,
}

#[derive(Deserialize)]
pub(crate) struct GeminiInnerError {
    pub(crate) message: Option<String>,
    pub(crate) status: Option<String>,
}

impl GeminiInnerError {
    /// Vendor message suffixed with the Google RPC status, e.g. `(RESOURCE_EXHAUSTED)`.
    pub(crate) fn describe(self) -> String {
        let message = self.message.unwrap_or_else(|| "unknown error".to_string());
        match self.status.filter(|status| !status.is_empty()) {
            Some(status) => format!("{message} ({status})"),
            None => message,
        }
    }
}

/// Parses error responses returned by the Generative Language API.
pub(crate) fn parse_gemini_error(
    status: u16,
    headers: &HashMap<String, String>,
    body: &str,
) -> LLMError {
    let message = match serde_json::from_str::<GeminiErrorBody>(body) {
        Ok(GeminiErrorBody { error: Some(error) }) => error.describe(),
        _ => body.to_string(),
    };
    LLMError::http_status(status, message, retry_after_from_headers(headers))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn quota_errors_keep_rpc_status_and_retry_hint() {
        let body = r#"{
  "error": {
    "code": 429,
    "message": "quota exhausted",
    "status": "RESOURCE_EXHAUSTED"
  }
}"#;
        let headers = HashMap::from([("retry-after".to_string(), "5".to_string())]);
        match parse_gemini_error(429, &headers, body) {
            LLMError::Transport {
                message,
                status,
                retry_after,
            } => {
                assert_eq!(status, Some(429));
                assert_eq!(retry_after, Some(Duration::from_secs(5)));
                assert!(message.contains("quota exhausted"));
                assert!(message.contains("RESOURCE_EXHAUSTED"));
            }
            other => panic!("expected Transport error, got {other:?}"),
        }
    }

    #[test]
    fn unparseable_body_is_kept_verbatim() {
        let err = parse_gemini_error(500, &HashMap::new(), "not a json");
        assert!(err.to_string().contains("status 500: not a json"));
    }
}
