use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;

use crate::error::LLMError;
use crate::types::{
    CapabilityDescriptor, EmbeddingRequest, EmbeddingResponse, FinalResult, GenerationRequest,
    Operation, StreamDelta, Transcription, TranscriptionRequest,
};

pub mod anthropic_messages;
pub mod google_gemini;
pub mod openai_chat;
pub mod registry;
pub(crate) mod retry;

pub use registry::{ProviderFactory, ProviderRegistry, default_registry};

/// Stream of canonical deltas returned by [`LLMProvider::stream`].
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamDelta, LLMError>> + Send>>;

/// Contract every vendor adapter satisfies.
///
/// Adapters may support a strict subset of the four operations. The default
/// `embed` and `transcribe` implementations fail fast with
/// [`LLMError::UnsupportedOperation`] without touching the network.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Submits a request and waits for the full response.
    async fn generate(&self, request: &GenerationRequest) -> Result<FinalResult, LLMError>;

    /// Submits a request and returns incremental deltas in wire order.
    async fn stream(&self, request: &GenerationRequest) -> Result<ChatStream, LLMError>;

    /// Embeds every input string.
    async fn embed(&self, _request: &EmbeddingRequest) -> Result<EmbeddingResponse, LLMError> {
        Err(LLMError::unsupported(self.name(), Operation::Embed))
    }

    /// Transcribes an audio payload.
    async fn transcribe(
        &self,
        _request: &TranscriptionRequest,
    ) -> Result<Transcription, LLMError> {
        Err(LLMError::unsupported(self.name(), Operation::Transcribe))
    }

    /// Describes the supported operations.
    fn capabilities(&self) -> CapabilityDescriptor;

    /// Adapter name.
    fn name(&self) -> &'static str;
}

/// Thread-safe adapter handle.
pub type DynProvider = Arc<dyn LLMProvider>;
