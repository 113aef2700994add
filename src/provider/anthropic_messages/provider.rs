use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::LLMError;
use crate::http::{
    DynHttpTransport, HttpResponse, collect_body_text, post_json_stream_with_headers,
    post_json_with_headers,
};
use crate::provider::{ChatStream, LLMProvider};
use crate::types::{CapabilityDescriptor, FinalResult, GenerationRequest};

use super::error::parse_anthropic_error;
use super::request::build_anthropic_body;
use super::response::map_response;
use super::stream::create_stream;
use super::types::AnthropicMessageResponse;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_VERSION: &str = "2023-06-01";

/// How the adapter authenticates.
#[derive(Debug, Clone)]
pub(crate) enum AnthropicAuth {
    /// `x-api-key` header.
    ApiKey(String),
    /// Key sent verbatim under a gateway-specific header.
    KeyHeader { name: String, key: String },
    /// `Authorization: Bearer` token.
    Bearer(String),
}

/// Anthropic Messages adapter. Offers generate and stream only.
pub struct AnthropicMessagesProvider {
    pub(crate) transport: DynHttpTransport,
    pub(crate) base_url: String,
    pub(crate) auth: AnthropicAuth,
    pub(crate) version: String,
    pub(crate) beta: Option<String>,
    pub(crate) default_model: Option<String>,
    pub(crate) headers: HashMap<String, String>,
    pub(crate) extra: HashMap<String, Value>,
    pub(crate) timeout: Option<Duration>,
}

impl AnthropicMessagesProvider {
    /// Creates an adapter with the default base URL and `anthropic-version`.
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            auth: AnthropicAuth::ApiKey(api_key.into()),
            version: DEFAULT_VERSION.to_string(),
            beta: None,
            default_model: None,
            headers: HashMap::new(),
            extra: HashMap::new(),
            timeout: None,
        }
    }

    /// Overrides the base URL, e.g. for a proxy.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Authenticates with `Authorization: Bearer` instead of `x-api-key`.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.auth = AnthropicAuth::Bearer(token.into());
        self
    }

    /// Sends the API key under `name` instead of `x-api-key`.
    pub fn with_api_key_header(mut self, name: impl Into<String>) -> Self {
        let key = match self.auth {
            AnthropicAuth::ApiKey(key) | AnthropicAuth::KeyHeader { key, .. } => key,
            AnthropicAuth::Bearer(token) => token,
        };
        self.auth = AnthropicAuth::KeyHeader {
            name: name.into(),
            key,
        };
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the `anthropic-beta` header (comma separated list).
    pub fn with_beta(mut self, beta: impl Into<String>) -> Self {
        self.beta = Some(beta.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/messages")
        } else {
            format!("{base}/v1/messages")
        }
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        match &self.auth {
            AnthropicAuth::ApiKey(key) => {
                headers.insert("x-api-key".to_string(), key.clone());
            }
            AnthropicAuth::KeyHeader { name, key } => {
                headers.insert(name.clone(), key.clone());
            }
            AnthropicAuth::Bearer(token) => {
                headers.insert("Authorization".to_string(), format!("Bearer {token}"));
            }
        }
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("Accept".to_string(), "application/json".to_string());
        headers.insert("anthropic-version".to_string(), self.version.clone());
        if let Some(beta) = &self.beta {
            headers.insert("anthropic-beta".to_string(), beta.clone());
        }
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
        headers
    }

    fn build_request_body(
        &self,
        request: &GenerationRequest,
        stream: bool,
    ) -> Result<(String, Value), LLMError> {
        let model = request
            .options
            .model
            .clone()
            .or_else(|| self.default_model.clone())
            .ok_or_else(|| LLMError::Validation {
                message: "model is required for Anthropic Messages".to_string(),
            })?;
        let body = build_anthropic_body(request, &model, &self.extra, stream)?;
        Ok((model, body))
    }

    fn ensure_success(&self, response: HttpResponse) -> Result<String, LLMError> {
        let status = response.status;
        let headers = response.headers.clone();
        let text = response.into_string()?;
        if (200..300).contains(&status) {
            Ok(text)
        } else {
            Err(parse_anthropic_error(status, &headers, &text))
        }
    }

    fn try_parse<T: DeserializeOwned>(&self, text: &str) -> Result<T, LLMError> {
        serde_json::from_str(text).map_err(|err| {
            LLMError::protocol(
                self.name(),
                format!("failed to parse Anthropic response: {err}"),
            )
        })
    }
}

#[async_trait]
impl LLMProvider for AnthropicMessagesProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<FinalResult, LLMError> {
        let (model, body) = self.build_request_body(request, false)?;
        debug!(provider = self.name(), %model, "sending messages request");
        let response = post_json_with_headers(
            self.transport.as_ref(),
            self.endpoint(),
            self.build_headers(),
            self.timeout,
            &body,
        )
        .await?;
        let text = self.ensure_success(response)?;
        let parsed: AnthropicMessageResponse = self.try_parse(&text)?;
        map_response(parsed, self.name(), self.endpoint())
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<ChatStream, LLMError> {
        let (model, body) = self.build_request_body(request, true)?;
        let mut headers = self.build_headers();
        headers.insert("Accept".to_string(), "text/event-stream".to_string());
        debug!(provider = self.name(), %model, "opening messages stream");
        let response = post_json_stream_with_headers(
            self.transport.as_ref(),
            self.endpoint(),
            headers,
            self.timeout,
            &body,
        )
        .await?;
        if !response.is_success() {
            let text = collect_body_text(response.body).await?;
            return Err(parse_anthropic_error(
                response.status,
                &response.headers,
                &text,
            ));
        }
        Ok(create_stream(response.body, self.name()))
    }

    fn capabilities(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            supports_generate: true,
            supports_stream: true,
            supports_embedding: false,
            supports_transcription: false,
            supports_tools: true,
            supports_image_input: true,
        }
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::http::{HttpRequest, HttpStreamResponse, HttpTransport};
    use crate::types::{EmbeddingRequest, Message, Operation};

    struct RecordingTransport {
        seen: Mutex<Vec<HttpRequest>>,
    }

    #[async_trait]
    impl HttpTransport for RecordingTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
            self.seen.lock().expect("lock").push(request);
            Ok(HttpResponse {
                status: 200,
                headers: HashMap::new(),
                body: br#"{"id":"msg_1","model":"claude-3-haiku","content":[{"type":"text","text":"Hi there"}],"stop_reason":"end_turn","usage":{"input_tokens":3,"output_tokens":2}}"#.to_vec(),
            })
        }

        async fn send_stream(&self, _request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
            Err(LLMError::transport("streaming not scripted"))
        }
    }

    #[tokio::test]
    async fn generate_sends_versioned_headers() {
        let transport = Arc::new(RecordingTransport {
            seen: Mutex::new(Vec::new()),
        });
        let provider = AnthropicMessagesProvider::new(transport.clone(), "sk-ant")
            .with_base_url("https://proxy.example.com/v1")
            .with_beta("tools-2024-04-04")
            .with_default_model("claude-3-haiku");
        let result = provider
            .generate(&GenerationRequest::new(vec![Message::user("Hello")]))
            .await
            .expect("result");
        assert_eq!(result.content, "Hi there");
        assert_eq!(result.usage.total_tokens, Some(5));

        let seen = transport.seen.lock().expect("lock");
        assert_eq!(seen[0].url, "https://proxy.example.com/v1/messages");
        assert_eq!(
            seen[0].headers.get("x-api-key").map(String::as_str),
            Some("sk-ant")
        );
        assert_eq!(
            seen[0].headers.get("anthropic-beta").map(String::as_str),
            Some("tools-2024-04-04")
        );
    }

    #[tokio::test]
    async fn bearer_and_custom_header_replace_x_api_key() {
        let transport = Arc::new(RecordingTransport {
            seen: Mutex::new(Vec::new()),
        });
        let request = GenerationRequest::new(vec![Message::user("Hello")]).with_model("claude");

        AnthropicMessagesProvider::new(transport.clone(), "unused")
            .with_bearer_token("oauth-token")
            .generate(&request)
            .await
            .expect("bearer");
        AnthropicMessagesProvider::new(transport.clone(), "sk-gateway")
            .with_api_key_header("x-gateway-key")
            .generate(&request)
            .await
            .expect("custom header");

        let seen = transport.seen.lock().expect("lock");
        assert_eq!(
            seen[0].headers.get("Authorization").map(String::as_str),
            Some("Bearer oauth-token")
        );
        assert!(!seen[0].headers.contains_key("x-api-key"));
        assert_eq!(
            seen[1].headers.get("x-gateway-key").map(String::as_str),
            Some("sk-gateway")
        );
        assert!(!seen[1].headers.contains_key("x-api-key"));
    }

    #[tokio::test]
    async fn embeddings_are_unsupported() {
        let transport = Arc::new(RecordingTransport {
            seen: Mutex::new(Vec::new()),
        });
        let provider = AnthropicMessagesProvider::new(transport.clone(), "sk-ant");
        let err = provider
            .embed(&EmbeddingRequest::single("hi"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LLMError::UnsupportedOperation {
                operation: Operation::Embed,
                ..
            }
        ));
        assert!(transport.seen.lock().expect("lock").is_empty());
    }
}
