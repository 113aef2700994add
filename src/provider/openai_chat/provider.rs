use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::LLMError;
use crate::http::{
    DynHttpTransport, HttpRequest, HttpResponse, collect_body_text, post_json_stream_with_headers,
    post_json_with_headers,
};
use crate::provider::{ChatStream, LLMProvider};
use crate::types::{
    CapabilityDescriptor, EmbeddingRequest, EmbeddingResponse, FinalResult, GenerationRequest,
    Operation, Transcription, TranscriptionRequest,
};

use super::error::parse_openai_error;
use super::presets::{OPENAI, OpenAiPreset};
use super::request::{build_embedding_body, build_openai_body, build_transcription_form};
use super::response::{map_embedding_response, map_response};
use super::stream::create_stream;
use super::types::{OpenAiChatResponse, OpenAiEmbeddingResponse, OpenAiTranscription};

/// Adapter for OpenAI and every OpenAI-compatible vendor.
///
/// The [`OpenAiPreset`] decides the default base URL, the capability subset
/// and how the vendor reports usage.
pub struct OpenAiChatProvider {
    pub(crate) transport: DynHttpTransport,
    pub(crate) preset: OpenAiPreset,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) organization: Option<String>,
    pub(crate) default_model: Option<String>,
    pub(crate) headers: HashMap<String, String>,
    pub(crate) extra: HashMap<String, Value>,
    pub(crate) timeout: Option<Duration>,
}

impl OpenAiChatProvider {
    /// Creates an OpenAI adapter with the default base URL.
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self::for_preset(transport, OPENAI, Some(api_key.into()))
    }

    /// Creates an adapter for an OpenAI-compatible vendor.
    pub fn for_preset(
        transport: DynHttpTransport,
        preset: OpenAiPreset,
        api_key: Option<String>,
    ) -> Self {
        Self {
            transport,
            preset,
            base_url: preset.base_url.to_string(),
            api_key,
            organization: None,
            default_model: None,
            headers: HashMap::new(),
            extra: HashMap::new(),
            timeout: None,
        }
    }

    /// Overrides the base URL; it must include the version segment, e.g. `.../v1`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Adds a header sent with every request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Adds a body parameter merged into every chat request.
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }

    fn build_headers(&self, json: bool) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        if let Some(key) = &self.api_key {
            headers.insert("Authorization".to_string(), format!("Bearer {key}"));
        }
        if json {
            headers.insert("Content-Type".to_string(), "application/json".to_string());
        }
        headers.insert("Accept".to_string(), "application/json".to_string());
        if let Some(org) = &self.organization {
            headers.insert("OpenAI-Organization".to_string(), org.clone());
        }
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
        headers
    }

    fn resolve_model(&self, requested: Option<&String>) -> Result<String, LLMError> {
        requested
            .or(self.default_model.as_ref())
            .cloned()
            .ok_or_else(|| LLMError::Validation {
                message: format!("model is required for {}", self.preset.engine),
            })
    }

    fn ensure_success(&self, response: HttpResponse) -> Result<String, LLMError> {
        let status = response.status;
        let headers = response.headers.clone();
        let text = response.into_string()?;
        if (200..300).contains(&status) {
            Ok(text)
        } else {
            Err(parse_openai_error(status, &headers, &text))
        }
    }

    fn try_parse<T: DeserializeOwned>(&self, text: &str) -> Result<T, LLMError> {
        serde_json::from_str(text).map_err(|err| {
            LLMError::protocol(self.name(), format!("failed to parse response: {err}"))
        })
    }

    fn require(&self, operation: Operation) -> Result<(), LLMError> {
        if self.capabilities().supports(operation) {
            Ok(())
        } else {
            Err(LLMError::unsupported(self.name(), operation))
        }
    }
}

#[async_trait]
impl LLMProvider for OpenAiChatProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<FinalResult, LLMError> {
        let model = self.resolve_model(request.options.model.as_ref())?;
        let body = build_openai_body(request, &self.preset, &model, &self.extra, false)?;
        let endpoint = self.endpoint("chat/completions");
        debug!(provider = self.name(), %model, "sending chat completion");
        let response = post_json_with_headers(
            self.transport.as_ref(),
            endpoint.clone(),
            self.build_headers(true),
            self.timeout,
            &body,
        )
        .await?;
        let text = self.ensure_success(response)?;
        let parsed: OpenAiChatResponse = self.try_parse(&text)?;
        map_response(parsed, self.name(), self.preset.usage, endpoint)
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<ChatStream, LLMError> {
        let model = self.resolve_model(request.options.model.as_ref())?;
        let body = build_openai_body(request, &self.preset, &model, &self.extra, true)?;
        let mut headers = self.build_headers(true);
        headers.insert("Accept".to_string(), "text/event-stream".to_string());
        debug!(provider = self.name(), %model, "opening chat completion stream");
        let response = post_json_stream_with_headers(
            self.transport.as_ref(),
            self.endpoint("chat/completions"),
            headers,
            self.timeout,
            &body,
        )
        .await?;
        if !response.is_success() {
            let text = collect_body_text(response.body).await?;
            return Err(parse_openai_error(response.status, &response.headers, &text));
        }
        Ok(create_stream(response.body, self.name(), self.preset.usage))
    }

    async fn embed(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse, LLMError> {
        self.require(Operation::Embed)?;
        let model = self.resolve_model(request.model.as_ref())?;
        let body = build_embedding_body(request, &model)?;
        let response = post_json_with_headers(
            self.transport.as_ref(),
            self.endpoint("embeddings"),
            self.build_headers(true),
            self.timeout,
            &body,
        )
        .await?;
        let text = self.ensure_success(response)?;
        let parsed: OpenAiEmbeddingResponse = self.try_parse(&text)?;
        if parsed.data.len() != request.input.len() {
            return Err(LLMError::protocol(
                self.name(),
                format!(
                    "expected {} embeddings, received {}",
                    request.input.len(),
                    parsed.data.len()
                ),
            ));
        }
        Ok(map_embedding_response(parsed, self.preset.usage))
    }

    async fn transcribe(&self, request: &TranscriptionRequest) -> Result<Transcription, LLMError> {
        self.require(Operation::Transcribe)?;
        let model = self.resolve_model(request.model.as_ref())?;
        let form = build_transcription_form(request, &model)?;
        let plain_text = matches!(
            request.response_format.as_deref(),
            Some("text" | "srt" | "vtt")
        );
        let http_request = HttpRequest::post_multipart(self.endpoint("audio/transcriptions"), form)
            .with_headers(self.build_headers(false))
            .with_timeout(self.timeout);
        let response = self.transport.send(http_request).await?;
        let text = self.ensure_success(response)?;
        if plain_text {
            return Ok(Transcription {
                text,
                language: None,
                duration_secs: None,
                served_by: String::new(),
                raw: None,
            });
        }
        let raw: Value = self.try_parse(&text)?;
        let parsed: OpenAiTranscription = serde_json::from_value(raw.clone()).map_err(|err| {
            LLMError::protocol(self.name(), format!("failed to parse transcription: {err}"))
        })?;
        Ok(Transcription {
            text: parsed.text,
            language: parsed.language,
            duration_secs: parsed.duration,
            served_by: String::new(),
            raw: Some(raw),
        })
    }

    fn capabilities(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            supports_generate: true,
            supports_stream: true,
            supports_embedding: self.preset.supports_embedding,
            supports_transcription: self.preset.supports_transcription,
            supports_tools: true,
            supports_image_input: true,
        }
    }

    fn name(&self) -> &'static str {
        self.preset.engine
    }
}
