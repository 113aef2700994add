use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::LLMError;
use crate::executor;
use crate::provider::{ChatStream, DynProvider};
use crate::types::{
    CapabilityDescriptor, Conversation, EmbeddingRequest, EmbeddingResponse, FinalResult,
    GenerationRequest, ToolChoice, ToolDefinition, Transcription, TranscriptionRequest,
    UsageSummary,
};

/// Error type returned by callbacks.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Everything a callback learns about one successful call.
#[derive(Debug, Clone, Copy)]
pub struct CallbackEvent<'a> {
    pub conversation: &'a Conversation,
    pub content: &'a str,
    pub usage: &'a UsageSummary,
    /// Handle of the façade that actually served the call.
    pub served_by: &'a str,
    pub metadata: &'a HashMap<String, Value>,
    pub result: &'a FinalResult,
}

/// Receives exactly one event per successful generate or stream.
///
/// A returned error surfaces to the caller as [`LLMError::Callback`], after the
/// result has been produced.
pub trait GenerationCallback: Send + Sync {
    fn on_complete(&self, event: &CallbackEvent<'_>) -> Result<(), CallbackError>;
}

impl<F> GenerationCallback for F
where
    F: Fn(&CallbackEvent<'_>) -> Result<(), CallbackError> + Send + Sync,
{
    fn on_complete(&self, event: &CallbackEvent<'_>) -> Result<(), CallbackError> {
        self(event)
    }
}

/// Caller-facing façade: one adapter, an optional fallback façade, an optional
/// callback and default tools.
///
/// A façade holds no per-call state and can be shared across tasks.
pub struct LLMClient {
    handle: String,
    provider: DynProvider,
    fallback: Option<Arc<LLMClient>>,
    callback: Option<Arc<dyn GenerationCallback>>,
    tools: Vec<ToolDefinition>,
    tool_choice: Option<ToolChoice>,
    metadata: HashMap<String, Value>,
}

impl fmt::Debug for LLMClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LLMClient")
            .field("handle", &self.handle)
            .field("provider", &self.provider.name())
            .field("fallback", &self.fallback.as_ref().map(|next| next.handle()))
            .field("callback", &self.callback.is_some())
            .field("tools", &self.tools.len())
            .finish()
    }
}

impl LLMClient {
    pub fn builder(handle: impl Into<String>, provider: DynProvider) -> LLMClientBuilder {
        LLMClientBuilder {
            handle: handle.into(),
            provider,
            fallback: None,
            callback: None,
            tools: Vec::new(),
            tool_choice: None,
            metadata: HashMap::new(),
        }
    }

    /// Sends a request and waits for the full response, walking the fallback chain on
    /// transport or protocol failures.
    ///
    /// # Errors
    ///
    /// [`LLMError::Provider`] once every façade failed, [`LLMError::UnsupportedOperation`]
    /// and [`LLMError::Validation`] immediately, and [`LLMError::Callback`] when the
    /// callback fails after the result was produced.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<FinalResult, LLMError> {
        executor::generate(self, &self.prepare(request)).await
    }

    /// Opens a stream of deltas.
    ///
    /// Fallback only happens before the first delta; a later failure ends the stream
    /// with [`LLMError::Provider`]. Dropping the stream releases the connection.
    pub async fn stream_generate(&self, request: &GenerationRequest) -> Result<ChatStream, LLMError> {
        executor::stream(self, self.prepare(request).into_owned()).await
    }

    /// Embeds a single text.
    pub async fn embedding(&self, text: impl Into<String>) -> Result<Vec<f32>, LLMError> {
        let response = self.embed(&EmbeddingRequest::single(text)).await?;
        response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| LLMError::Validation {
                message: "embedding response was empty".to_string(),
            })
    }

    /// Embeds every input of `request`.
    pub async fn embed(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse, LLMError> {
        executor::embed(self, request).await
    }

    pub async fn transcribe(
        &self,
        request: &TranscriptionRequest,
    ) -> Result<Transcription, LLMError> {
        executor::transcribe(self, request).await
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }

    /// Capabilities of this façade's own adapter.
    pub fn capabilities(&self) -> CapabilityDescriptor {
        self.provider.capabilities()
    }

    pub fn fallback(&self) -> Option<&Arc<LLMClient>> {
        self.fallback.as_ref()
    }

    /// This façade followed by every transitive fallback, in the order they are tried.
    pub fn chain(&self) -> Vec<&LLMClient> {
        let mut chain = vec![self];
        let mut current = self;
        while let Some(next) = &current.fallback {
            chain.push(next.as_ref());
            current = next.as_ref();
        }
        chain
    }

    pub fn chain_handles(&self) -> Vec<String> {
        self.chain()
            .into_iter()
            .map(|client| client.handle.clone())
            .collect()
    }

    pub(crate) fn callback(&self) -> Option<&Arc<dyn GenerationCallback>> {
        self.callback.as_ref()
    }

    pub(crate) fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }

    /// Applies the façade tools to a request that declares none.
    fn prepare<'r>(&self, request: &'r GenerationRequest) -> Cow<'r, GenerationRequest> {
        if self.tools.is_empty() || !request.tools.is_empty() {
            return Cow::Borrowed(request);
        }
        let mut request = request.clone();
        request.tools = self.tools.clone();
        if request.tool_choice.is_none() {
            request.tool_choice = self.tool_choice.clone();
        }
        Cow::Owned(request)
    }
}

/// Builder for [`LLMClient`].
pub struct LLMClientBuilder {
    handle: String,
    provider: DynProvider,
    fallback: Option<Arc<LLMClient>>,
    callback: Option<Arc<dyn GenerationCallback>>,
    tools: Vec<ToolDefinition>,
    tool_choice: Option<ToolChoice>,
    metadata: HashMap<String, Value>,
}

impl LLMClientBuilder {
    /// Sets the façade tried when this one fails recoverably.
    pub fn with_fallback(mut self, fallback: Arc<LLMClient>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&CallbackEvent<'_>) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Shares an existing callback implementation.
    pub fn with_callback_handler(mut self, callback: Arc<dyn GenerationCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Builds the façade.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::InvalidConfig`] when a handle appears twice in the chain.
    pub fn build(self) -> Result<LLMClient, LLMError> {
        let mut seen = HashSet::from([self.handle.clone()]);
        if let Some(fallback) = &self.fallback {
            for member in fallback.chain() {
                if !seen.insert(member.handle.clone()) {
                    return Err(LLMError::InvalidConfig {
                        field: "fallback".to_string(),
                        reason: format!("handle {} appears twice in the chain", member.handle),
                    });
                }
            }
        }

        Ok(LLMClient {
            handle: self.handle,
            provider: self.provider,
            fallback: self.fallback,
            callback: self.callback,
            tools: self.tools,
            tool_choice: self.tool_choice,
            metadata: self.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::provider::LLMProvider;
    use crate::types::Message;

    /// Provider that only answers capability queries.
    struct DummyProvider {
        name: &'static str,
        caps: CapabilityDescriptor,
    }

    #[async_trait]
    impl LLMProvider for DummyProvider {
        async fn generate(&self, _request: &GenerationRequest) -> Result<FinalResult, LLMError> {
            Err(LLMError::transport("dummy"))
        }

        async fn stream(&self, _request: &GenerationRequest) -> Result<ChatStream, LLMError> {
            Err(LLMError::transport("dummy"))
        }

        fn capabilities(&self) -> CapabilityDescriptor {
            self.caps.clone()
        }

        fn name(&self) -> &'static str {
            self.name
        }
    }

    fn dummy(name: &'static str) -> DynProvider {
        Arc::new(DummyProvider {
            name,
            caps: CapabilityDescriptor {
                supports_generate: true,
                supports_stream: true,
                supports_tools: true,
                ..CapabilityDescriptor::default()
            },
        })
    }

    #[test]
    fn chain_lists_transitive_fallbacks_in_order() {
        let last = Arc::new(LLMClient::builder("c", dummy("p3")).build().expect("c"));
        let middle = Arc::new(
            LLMClient::builder("b", dummy("p2"))
                .with_fallback(last)
                .build()
                .expect("b"),
        );
        let client = LLMClient::builder("a", dummy("p1"))
            .with_fallback(middle)
            .build()
            .expect("a");

        assert_eq!(client.chain_handles(), vec!["a", "b", "c"]);
        assert!(client.capabilities().supports_tools);
    }

    #[test]
    fn duplicate_handle_is_rejected() {
        let shared = Arc::new(LLMClient::builder("a", dummy("p1")).build().expect("a"));
        let middle = Arc::new(
            LLMClient::builder("b", dummy("p2"))
                .with_fallback(shared)
                .build()
                .expect("b"),
        );
        let err = LLMClient::builder("a", dummy("p3"))
            .with_fallback(middle)
            .build()
            .unwrap_err();
        match err {
            LLMError::InvalidConfig { field, reason } => {
                assert_eq!(field, "fallback");
                assert!(reason.contains("handle a"), "unexpected reason: {reason}");
            }
            other => panic!("unexpected error type: {other:?}"),
        }
    }

    #[test]
    fn facade_tools_fill_requests_without_tools() {
        let weather = ToolDefinition {
            name: "weather".to_string(),
            description: None,
            input_schema: None,
        };
        let client = LLMClient::builder("a", dummy("p1"))
            .with_tools(vec![weather.clone()])
            .with_tool_choice(ToolChoice::Auto)
            .build()
            .expect("a");

        let bare = GenerationRequest::new(vec![Message::user("hi")]);
        let prepared = client.prepare(&bare);
        assert!(matches!(prepared, Cow::Owned(_)));
        assert_eq!(prepared.tools, vec![weather]);
        assert_eq!(prepared.tool_choice, Some(ToolChoice::Auto));

        let own_tools = bare.clone().with_tools(vec![ToolDefinition {
            name: "search".to_string(),
            description: None,
            input_schema: None,
        }]);
        let prepared = client.prepare(&own_tools);
        assert!(matches!(prepared, Cow::Borrowed(_)));
        assert_eq!(prepared.tools[0].name, "search");
    }
}
