//! Chain walking, callback dispatch and usage finalisation shared by every
//! façade operation.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures_core::Stream;
use futures_util::{StreamExt, stream};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::aggregate::ResponseAggregator;
use crate::client::{CallbackEvent, GenerationCallback, LLMClient};
use crate::error::LLMError;
use crate::provider::ChatStream;
use crate::types::{
    EmbeddingRequest, EmbeddingResponse, FinalResult, GenerationRequest, Operation, StreamDelta,
    Transcription, TranscriptionRequest,
};
use crate::usage::UsageAccumulator;

/// Outcome of a successful chain walk.
struct Served<'a, T> {
    value: T,
    member: &'a LLMClient,
    attempted: Vec<String>,
}

/// Tries each chain member once, in order.
///
/// Transport and protocol failures move on to the next member; any other
/// failure is returned immediately. Exhausting the chain yields
/// [`LLMError::Provider`] wrapping the last failure.
async fn run_chain<'a, T, F, Fut>(
    chain: &[&'a LLMClient],
    operation: Operation,
    mut attempt: F,
) -> Result<Served<'a, T>, LLMError>
where
    F: FnMut(&'a LLMClient) -> Fut,
    Fut: Future<Output = Result<T, LLMError>>,
{
    let mut attempted = Vec::with_capacity(chain.len());
    let mut members = chain.iter().copied().peekable();
    while let Some(member) = members.next() {
        attempted.push(member.handle().to_string());
        debug!(
            handle = member.handle(),
            provider = member.provider().name(),
            %operation,
            "attempting call"
        );
        let err = match attempt(member).await {
            Ok(value) => {
                return Ok(Served {
                    value,
                    member,
                    attempted,
                });
            }
            Err(err) if err.is_recoverable() => err,
            Err(err) => return Err(err),
        };
        match members.peek() {
            Some(next) => warn!(
                handle = member.handle(),
                next = next.handle(),
                error = %err,
                "falling back"
            ),
            None => {
                warn!(?attempted, error = %err, "fallback chain exhausted");
                return Err(LLMError::Provider {
                    attempted,
                    source: Box::new(err),
                });
            }
        }
    }
    Err(LLMError::InvalidConfig {
        field: "fallback".to_string(),
        reason: "empty chain".to_string(),
    })
}

pub(crate) async fn generate(
    client: &LLMClient,
    request: &GenerationRequest,
) -> Result<FinalResult, LLMError> {
    let started = Instant::now();
    let chain = client.chain();
    let served = run_chain(&chain, Operation::Generate, |member| {
        member.provider().generate(request)
    })
    .await?;

    let mut result = served.value;
    result.served_by = served.member.handle().to_string();
    let mut usage = UsageAccumulator::new();
    usage.apply(&result.usage);
    result.usage = usage.finish(Some(started.elapsed()));

    let dispatch = CallbackDispatch::for_client(client, request.clone(), served.attempted);
    dispatch.fire(result)
}

pub(crate) async fn stream(
    client: &LLMClient,
    request: GenerationRequest,
) -> Result<ChatStream, LLMError> {
    let started = Instant::now();
    let chain = client.chain();
    let served = run_chain(&chain, Operation::Stream, |member| {
        let request = &request;
        async move {
            let provider = member.provider();
            let mut stream = provider.stream(request).await?;
            match stream.next().await {
                Some(Ok(first)) => Ok((first, stream)),
                Some(Err(err)) => Err(err),
                None => Err(LLMError::protocol(
                    provider.name(),
                    "stream closed before the first delta",
                )),
            }
        }
    })
    .await?;

    let (first, inner) = served.value;
    let served_by = served.member.handle().to_string();
    debug!(handle = %served_by, "stream committed");
    let dispatch = CallbackDispatch::for_client(client, request, served.attempted);
    Ok(Box::pin(OrchestratedStream {
        inner,
        pending: Some(first),
        aggregator: ResponseAggregator::new(),
        provider: served.member.provider().name(),
        served_by,
        started,
        dispatch: Some(dispatch),
        deferred: None,
        done: false,
    }))
}

pub(crate) async fn embed(
    client: &LLMClient,
    request: &EmbeddingRequest,
) -> Result<EmbeddingResponse, LLMError> {
    let chain = client.chain();
    let served = run_chain(&chain, Operation::Embed, |member| async move {
        let provider = member.provider();
        let response = provider.embed(request).await?;
        if response.embeddings.len() != request.input.len() {
            return Err(LLMError::protocol(
                provider.name(),
                format!(
                    "expected {} embeddings, received {}",
                    request.input.len(),
                    response.embeddings.len()
                ),
            ));
        }
        Ok(response)
    })
    .await?;
    let mut response = served.value;
    response.served_by = served.member.handle().to_string();
    Ok(response)
}

pub(crate) async fn transcribe(
    client: &LLMClient,
    request: &TranscriptionRequest,
) -> Result<Transcription, LLMError> {
    let chain = client.chain();
    let served = run_chain(&chain, Operation::Transcribe, |member| {
        member.provider().transcribe(request)
    })
    .await?;
    let mut transcription = served.value;
    transcription.served_by = served.member.handle().to_string();
    Ok(transcription)
}

/// Owned state needed to fire the invoked façade's callback.
struct CallbackDispatch {
    callback: Option<Arc<dyn GenerationCallback>>,
    request: GenerationRequest,
    metadata: HashMap<String, Value>,
    attempted: Vec<String>,
}

impl CallbackDispatch {
    fn for_client(client: &LLMClient, request: GenerationRequest, attempted: Vec<String>) -> Self {
        let mut metadata = client.metadata().clone();
        metadata.extend(
            request
                .metadata
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        Self {
            callback: client.callback().cloned(),
            request,
            metadata,
            attempted,
        }
    }

    fn fire(self, result: FinalResult) -> Result<FinalResult, LLMError> {
        let Some(callback) = self.callback else {
            return Ok(result);
        };
        let mut metadata = self.metadata;
        metadata.insert("attempted".to_string(), Value::from(self.attempted));
        if let Some(model) = &result.model {
            metadata.insert("model".to_string(), Value::String(model.clone()));
        }

        let event = CallbackEvent {
            conversation: &self.request.conversation,
            content: &result.content,
            usage: &result.usage,
            served_by: &result.served_by,
            metadata: &metadata,
            result: &result,
        };
        match callback.on_complete(&event) {
            Ok(()) => Ok(result),
            Err(err) => {
                error!(handle = %result.served_by, error = %err, "generation callback failed");
                Err(LLMError::Callback {
                    message: err.to_string(),
                    result: Box::new(result),
                })
            }
        }
    }
}

/// Stream handed to the caller once a chain member produced its first delta.
///
/// Failures from here on end the stream with [`LLMError::Provider`]. The callback
/// fires right after the terminal delta is yielded; a callback failure is
/// reported as one extra item.
struct OrchestratedStream {
    inner: ChatStream,
    pending: Option<StreamDelta>,
    aggregator: ResponseAggregator,
    provider: &'static str,
    served_by: String,
    started: Instant,
    dispatch: Option<CallbackDispatch>,
    deferred: Option<LLMError>,
    done: bool,
}

impl OrchestratedStream {
    fn fail(&mut self, err: LLMError) -> LLMError {
        self.finish();
        warn!(handle = %self.served_by, error = %err, "stream failed after the first delta");
        let attempted = self
            .dispatch
            .take()
            .map(|dispatch| dispatch.attempted)
            .unwrap_or_else(|| vec![self.served_by.clone()]);
        LLMError::Provider {
            attempted,
            source: Box::new(err),
        }
    }

    /// Releases the connection without waiting for the caller to drop the stream.
    fn finish(&mut self) {
        self.done = true;
        self.inner = Box::pin(stream::empty::<Result<StreamDelta, LLMError>>());
    }

    fn complete(&mut self) {
        self.finish();
        let Some(dispatch) = self.dispatch.take() else {
            return;
        };
        let mut result = std::mem::take(&mut self.aggregator).finish();
        result.served_by = self.served_by.clone();
        result.provider.provider = self.provider.to_string();
        result.usage.latency = Some(self.started.elapsed());
        if result.model.is_none() {
            result.model = dispatch.request.options.model.clone();
        }
        if let Err(err) = dispatch.fire(result) {
            self.deferred = Some(err);
        }
    }
}

impl Stream for OrchestratedStream {
    type Item = Result<StreamDelta, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(this.deferred.take().map(Err));
        }

        let item = match this.pending.take() {
            Some(first) => Some(Ok(first)),
            None => match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(item) => item,
                Poll::Pending => return Poll::Pending,
            },
        };

        match item {
            Some(Ok(delta)) => {
                this.aggregator.push(&delta);
                if delta.is_terminal() {
                    this.complete();
                }
                Poll::Ready(Some(Ok(delta)))
            }
            Some(Err(err)) => Poll::Ready(Some(Err(this.fail(err)))),
            None => {
                let err = LLMError::protocol(this.provider, "stream closed before a finish signal");
                Poll::Ready(Some(Err(this.fail(err))))
            }
        }
    }
}
