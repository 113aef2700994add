//! Blocking façade over [`LLMClient`].
//!
//! Every call runs on a private current-thread runtime, so the orchestration
//! and normalisation code is the same one the async façade uses. These methods
//! must not be called from inside an async runtime.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::runtime::{Builder, Runtime};

use crate::client::LLMClient;
use crate::error::LLMError;
use crate::provider::ChatStream;
use crate::types::{
    CapabilityDescriptor, EmbeddingRequest, EmbeddingResponse, FinalResult, GenerationRequest,
    StreamDelta, Transcription, TranscriptionRequest,
};

pub struct BlockingClient {
    inner: Arc<LLMClient>,
    runtime: Arc<Runtime>,
}

impl BlockingClient {
    /// Wraps a façade.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::InvalidConfig`] when the runtime cannot be started.
    pub fn new(client: LLMClient) -> Result<Self, LLMError> {
        Self::from_shared(Arc::new(client))
    }

    /// Wraps a façade that is also used asynchronously elsewhere.
    pub fn from_shared(client: Arc<LLMClient>) -> Result<Self, LLMError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| LLMError::InvalidConfig {
                field: "runtime".to_string(),
                reason: err.to_string(),
            })?;
        Ok(Self {
            inner: client,
            runtime: Arc::new(runtime),
        })
    }

    pub fn generate(&self, request: &GenerationRequest) -> Result<FinalResult, LLMError> {
        self.runtime.block_on(self.inner.generate(request))
    }

    /// Opens a stream whose deltas are pulled one at a time by iteration.
    pub fn stream_generate(&self, request: &GenerationRequest) -> Result<BlockingStream, LLMError> {
        let inner = self.runtime.block_on(self.inner.stream_generate(request))?;
        Ok(BlockingStream {
            inner,
            runtime: self.runtime.clone(),
        })
    }

    pub fn embedding(&self, text: impl Into<String>) -> Result<Vec<f32>, LLMError> {
        self.runtime.block_on(self.inner.embedding(text))
    }

    pub fn embed(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse, LLMError> {
        self.runtime.block_on(self.inner.embed(request))
    }

    pub fn transcribe(&self, request: &TranscriptionRequest) -> Result<Transcription, LLMError> {
        self.runtime.block_on(self.inner.transcribe(request))
    }

    pub fn capabilities(&self) -> CapabilityDescriptor {
        self.inner.capabilities()
    }

    pub fn chain_handles(&self) -> Vec<String> {
        self.inner.chain_handles()
    }

    /// The wrapped async façade.
    pub fn client(&self) -> &Arc<LLMClient> {
        &self.inner
    }
}

/// Blocking iterator over a streamed response.
///
/// Dropping it drops the underlying stream and its connection.
pub struct BlockingStream {
    inner: ChatStream,
    runtime: Arc<Runtime>,
}

impl Iterator for BlockingStream {
    type Item = Result<StreamDelta, LLMError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.runtime.block_on(self.inner.next())
    }
}
