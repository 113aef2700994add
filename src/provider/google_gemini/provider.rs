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

use super::error::parse_gemini_error;
use super::request::build_gemini_body;
use super::response::map_response;
use super::stream::create_stream;
use super::types::GeminiGenerateContentResponse;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Google Gemini `generateContent` adapter. Offers generate and stream only.
pub struct GoogleGeminiProvider {
    pub(crate) transport: DynHttpTransport,
    pub(crate) base_url: String,
    /// Header name and value carrying the credential.
    pub(crate) auth: (String, String),
    pub(crate) default_model: Option<String>,
    pub(crate) headers: HashMap<String, String>,
    pub(crate) extra: HashMap<String, Value>,
    pub(crate) timeout: Option<Duration>,
}

impl GoogleGeminiProvider {
    /// Creates an adapter for the public Generative Language endpoint.
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            auth: (API_KEY_HEADER.to_string(), api_key.into()),
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

    /// Sets a default model such as `gemini-2.0-flash` when the request omits one.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Authenticates with `Authorization: Bearer` instead of an API key.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.auth = ("Authorization".to_string(), format!("Bearer {}", token.into()));
        self
    }

    /// Sends the API key under `name` instead of `x-goog-api-key`.
    pub fn with_api_key_header(mut self, name: impl Into<String>) -> Self {
        self.auth.0 = name.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Adds a top-level body field such as `safetySettings`.
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn model_base(&self, model: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let model_path = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };
        if base.ends_with("/v1beta") {
            format!("{base}/{model_path}")
        } else {
            format!("{base}/v1beta/{model_path}")
        }
    }

    pub(crate) fn endpoint(&self, model: &str) -> String {
        format!("{}:generateContent", self.model_base(model))
    }

    pub(crate) fn stream_endpoint(&self, model: &str) -> String {
        format!("{}:streamGenerateContent?alt=sse", self.model_base(model))
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert(self.auth.0.clone(), self.auth.1.clone());
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("Accept".to_string(), "application/json".to_string());
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
        headers
    }

    fn build_request_body(&self, request: &GenerationRequest) -> Result<(String, Value), LLMError> {
        let model = request
            .options
            .model
            .clone()
            .or_else(|| self.default_model.clone())
            .ok_or_else(|| LLMError::Validation {
                message: "model is required for Google Gemini".to_string(),
            })?;
        let body = build_gemini_body(request, &self.extra)?;
        Ok((model, body))
    }

    fn ensure_success(&self, response: HttpResponse) -> Result<String, LLMError> {
        let status = response.status;
        let headers = response.headers.clone();
        let text = response.into_string()?;
        if (200..300).contains(&status) {
            Ok(text)
        } else {
            Err(parse_gemini_error(status, &headers, &text))
        }
    }

    fn try_parse<T: DeserializeOwned>(&self, text: &str) -> Result<T, LLMError> {
        serde_json::from_str(text).map_err(|err| {
            LLMError::protocol(self.name(), format!("failed to parse Gemini response: {err}"))
        })
    }
}

#[async_trait]
impl LLMProvider for GoogleGeminiProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<FinalResult, LLMError> {
        let (model, body) = self.build_request_body(request)?;
        let endpoint = self.endpoint(&model);
        debug!(provider = self.name(), %model, "sending generateContent request");
        let response = post_json_with_headers(
            self.transport.as_ref(),
            endpoint.clone(),
            self.build_headers(),
            self.timeout,
            &body,
        )
        .await?;
        let text = self.ensure_success(response)?;
        let parsed: GeminiGenerateContentResponse = self.try_parse(&text)?;
        let mut result = map_response(parsed, self.name(), endpoint)?;
        if result.model.is_none() {
            result.model = Some(model);
        }
        Ok(result)
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<ChatStream, LLMError> {
        let (model, body) = self.build_request_body(request)?;
        let mut headers = self.build_headers();
        headers.insert("Accept".to_string(), "text/event-stream".to_string());
        debug!(provider = self.name(), %model, "opening generateContent stream");
        let response = post_json_stream_with_headers(
            self.transport.as_ref(),
            self.stream_endpoint(&model),
            headers,
            self.timeout,
            &body,
        )
        .await?;
        if !response.is_success() {
            let text = collect_body_text(response.body).await?;
            return Err(parse_gemini_error(response.status, &response.headers, &text));
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
        "google"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use futures_util::StreamExt;

    use super::*;
    use crate::http::{HttpRequest, HttpStreamResponse, HttpTransport};
    use crate::types::{Message, Operation, TranscriptionRequest};

    struct RecordingTransport {
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl RecordingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpTransport for RecordingTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
            self.seen.lock().expect("lock").push(request);
            Ok(HttpResponse {
                status: 200,
                headers: HashMap::new(),
                body: br#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hi there"}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":3,"candidatesTokenCount":2,"totalTokenCount":5}}"#.to_vec(),
            })
        }

        async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
            self.seen.lock().expect("lock").push(request);
            let frame = b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hi\"}]},\"finishReason\":\"STOP\"}]}\n\n".to_vec();
            Ok(HttpStreamResponse {
                status: 200,
                headers: HashMap::new(),
                body: Box::pin(futures_util::stream::iter(vec![Ok::<_, LLMError>(frame)])),
            })
        }
    }

    #[tokio::test]
    async fn generate_targets_model_path_with_api_key_header() {
        let transport = RecordingTransport::new();
        let provider = GoogleGeminiProvider::new(transport.clone(), "g-key")
            .with_default_model("gemini-2.0-flash");
        let result = provider
            .generate(&GenerationRequest::new(vec![Message::user("Hello")]))
            .await
            .expect("result");
        assert_eq!(result.content, "Hi there");
        assert_eq!(result.usage.total_tokens, Some(5));
        assert_eq!(result.model.as_deref(), Some("gemini-2.0-flash"));

        let seen = transport.seen.lock().expect("lock");
        assert_eq!(
            seen[0].url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
        assert_eq!(
            seen[0].headers.get("x-goog-api-key").map(String::as_str),
            Some("g-key")
        );
    }

    #[tokio::test]
    async fn stream_uses_sse_endpoint() {
        let transport = RecordingTransport::new();
        let provider = GoogleGeminiProvider::new(transport.clone(), "g-key")
            .with_base_url("https://proxy.example.com/v1beta/");
        let request = GenerationRequest::new(vec![Message::user("Hello")])
            .with_model("models/gemini-1.5-pro");
        let deltas: Vec<_> = provider
            .stream(&request)
            .await
            .expect("stream")
            .collect()
            .await;
        assert_eq!(deltas.len(), 1);
        assert!(deltas[0].as_ref().expect("delta").is_terminal());

        let seen = transport.seen.lock().expect("lock");
        assert_eq!(
            seen[0].url,
            "https://proxy.example.com/v1beta/models/gemini-1.5-pro:streamGenerateContent?alt=sse"
        );
    }

    #[tokio::test]
    async fn bearer_token_replaces_api_key_header() {
        let transport = RecordingTransport::new();
        GoogleGeminiProvider::new(transport.clone(), "unused")
            .with_bearer_token("ya29.token")
            .generate(&GenerationRequest::new(vec![Message::user("Hi")]).with_model("gemini-pro"))
            .await
            .expect("result");
        let seen = transport.seen.lock().expect("lock");
        assert_eq!(
            seen[0].headers.get("Authorization").map(String::as_str),
            Some("Bearer ya29.token")
        );
        assert!(!seen[0].headers.contains_key("x-goog-api-key"));
    }

    #[tokio::test]
    async fn missing_model_is_validation_error() {
        let transport = RecordingTransport::new();
        let err = GoogleGeminiProvider::new(transport.clone(), "g-key")
            .generate(&GenerationRequest::new(vec![Message::user("Hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, LLMError::Validation { .. }));
        assert!(transport.seen.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn transcription_is_unsupported() {
        let provider = GoogleGeminiProvider::new(RecordingTransport::new(), "g-key");
        let err = provider
            .transcribe(&TranscriptionRequest::new(vec![0u8; 4], "a.wav"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LLMError::UnsupportedOperation {
                operation: Operation::Transcribe,
                ..
            }
        ));
    }
}
