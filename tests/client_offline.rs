use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use unillm::http::{
    DynHttpTransport, HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport,
};
use unillm::provider::anthropic_messages::AnthropicMessagesProvider;
use unillm::provider::google_gemini::GoogleGeminiProvider;
use unillm::provider::openai_chat::OpenAiChatProvider;
use unillm::types::{FinalResult, FinishReason, GenerationRequest, Message, StreamDelta};
use unillm::{
    BlockingClient, CallbackEvent, ChatStream, DynProvider, LLMClient, LLMError, LLMProvider,
};

/// Byte stream that records when it is dropped.
struct TrackedBody {
    chunks: Vec<Vec<u8>>,
    released: Arc<AtomicBool>,
}

impl Stream for TrackedBody {
    type Item = Result<Vec<u8>, LLMError>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.chunks.is_empty() {
            // Simulates a connection that stays open.
            return Poll::Pending;
        }
        Poll::Ready(Some(Ok(this.chunks.remove(0))))
    }
}

impl Drop for TrackedBody {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Serves one scripted SSE body per streaming request.
struct SseTransport {
    frames: Vec<String>,
    released: Arc<AtomicBool>,
    hang_after_frames: bool,
}

impl SseTransport {
    fn new(frames: &[&str], hang_after_frames: bool) -> Arc<Self> {
        Arc::new(Self {
            frames: frames.iter().map(|frame| frame.to_string()).collect(),
            released: Arc::new(AtomicBool::new(false)),
            hang_after_frames,
        })
    }
}

#[async_trait]
impl HttpTransport for SseTransport {
    async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, LLMError> {
        Err(LLMError::transport("only streaming is scripted"))
    }

    async fn send_stream(&self, _request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
        let mut chunks: Vec<Vec<u8>> = self
            .frames
            .iter()
            .map(|frame| frame.clone().into_bytes())
            .collect();
        if !self.hang_after_frames {
            chunks.push(b"data: [DONE]\n\n".to_vec());
        }
        let body: Pin<Box<dyn Stream<Item = Result<Vec<u8>, LLMError>> + Send>> =
            if self.hang_after_frames {
                Box::pin(TrackedBody {
                    chunks,
                    released: self.released.clone(),
                })
            } else {
                Box::pin(futures_util::stream::iter(chunks.into_iter().map(Ok)))
            };
        Ok(HttpStreamResponse {
            status: 200,
            headers: HashMap::from([("content-type".to_string(), "text/event-stream".to_string())]),
            body,
        })
    }
}

const HELLO_FRAMES: [&str; 3] = [
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"He\"}}]}\n\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"llo\"}}]}\n\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
];

fn openai(transport: DynHttpTransport) -> DynProvider {
    Arc::new(OpenAiChatProvider::new(transport, "sk-test").with_default_model("gpt-4o-mini"))
}

/// Adapter programmed with a fixed outcome.
struct Programmed {
    name: &'static str,
    answer: Option<&'static str>,
    calls: AtomicUsize,
}

#[async_trait]
impl LLMProvider for Programmed {
    async fn generate(&self, _request: &GenerationRequest) -> Result<FinalResult, LLMError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.answer {
            Some(answer) => Ok(FinalResult {
                content: answer.to_string(),
                finish_reason: Some(FinishReason::Stop),
                ..FinalResult::default()
            }),
            None => Err(LLMError::transport("connection refused")),
        }
    }

    async fn stream(&self, _request: &GenerationRequest) -> Result<ChatStream, LLMError> {
        Err(LLMError::transport("connection refused"))
    }

    fn capabilities(&self) -> unillm::types::CapabilityDescriptor {
        unillm::types::CapabilityDescriptor {
            supports_generate: true,
            supports_stream: true,
            ..Default::default()
        }
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

#[tokio::test]
async fn transport_failure_falls_back_and_reports_the_serving_handle() {
    let primary = Arc::new(Programmed {
        name: "primary",
        answer: None,
        calls: AtomicUsize::new(0),
    });
    let backup = Arc::new(Programmed {
        name: "backup",
        answer: Some("Hi there"),
        calls: AtomicUsize::new(0),
    });
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();

    let fallback = LLMClient::builder("backup-handle", backup.clone() as DynProvider)
        .build()
        .expect("fallback");
    let client = LLMClient::builder("primary-handle", primary.clone() as DynProvider)
        .with_fallback(Arc::new(fallback))
        .with_callback(move |event: &CallbackEvent<'_>| {
            sink.lock()
                .expect("lock")
                .push(event.served_by.to_string());
            Ok(())
        })
        .build()
        .expect("client");

    let request = GenerationRequest::new(vec![Message::user("Hello")]).with_model("X");
    let result = client.generate(&request).await.expect("result");

    assert_eq!(result.content, "Hi there");
    assert_eq!(*events.lock().expect("lock"), vec!["backup-handle".to_string()]);
    assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    assert_eq!(backup.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn three_frames_yield_three_deltas() {
    let transport = SseTransport::new(&HELLO_FRAMES, false);
    let client = LLMClient::builder("openai", openai(transport))
        .build()
        .expect("client");

    let deltas: Vec<StreamDelta> = client
        .stream_generate(&GenerationRequest::new(vec![Message::user("Hi")]))
        .await
        .expect("stream")
        .map(|delta| delta.expect("delta"))
        .collect()
        .await;

    assert_eq!(deltas.len(), 3);
    assert_eq!(deltas[0].content, "He");
    assert_eq!(deltas[1].content, "llo");
    assert_eq!(deltas[2].content, "");
    assert_eq!(deltas[2].finish_reason, Some(FinishReason::Stop));
}

#[tokio::test]
async fn abandoning_a_stream_releases_the_connection() {
    let transport = SseTransport::new(&HELLO_FRAMES[..1], true);
    let released = transport.released.clone();
    let client = LLMClient::builder("openai", openai(transport))
        .build()
        .expect("client");

    let mut stream = client
        .stream_generate(&GenerationRequest::new(vec![Message::user("Hi")]))
        .await
        .expect("stream");
    let first = stream.next().await.expect("item").expect("delta");
    assert_eq!(first.content, "He");
    assert!(!released.load(Ordering::SeqCst));

    drop(stream);
    assert!(released.load(Ordering::SeqCst));
}

#[test]
fn blocking_and_async_streams_are_identical() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    let request = GenerationRequest::new(vec![Message::user("Hi")]);

    let async_client = LLMClient::builder("openai", openai(SseTransport::new(&HELLO_FRAMES, false)))
        .build()
        .expect("client");
    let async_deltas: Vec<StreamDelta> = runtime.block_on(async {
        async_client
            .stream_generate(&request)
            .await
            .expect("stream")
            .map(|delta| delta.expect("delta"))
            .collect()
            .await
    });
    drop(runtime);

    let blocking = BlockingClient::new(
        LLMClient::builder("openai", openai(SseTransport::new(&HELLO_FRAMES, false)))
            .build()
            .expect("client"),
    )
    .expect("blocking");
    let blocking_deltas: Vec<StreamDelta> = blocking
        .stream_generate(&request)
        .expect("stream")
        .collect::<Result<_, _>>()
        .expect("deltas");

    assert_eq!(async_deltas, blocking_deltas);
}

#[tokio::test]
async fn anthropic_stream_runs_through_the_facade() {
    let frames = [
        "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":5,\"output_tokens\":1}}}\n\n",
        "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
        "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Bonjour\"}}\n\n",
        "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":3}}\n\n",
        "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
    ];
    let transport = SseTransport::new(&frames, false);
    let provider: DynProvider = Arc::new(
        AnthropicMessagesProvider::new(transport, "sk-ant").with_default_model("claude-3-5-haiku"),
    );
    let usage = Arc::new(Mutex::new(None));
    let sink = usage.clone();
    let client = LLMClient::builder("anthropic", provider)
        .with_callback(move |event: &CallbackEvent<'_>| {
            *sink.lock().expect("lock") = Some(event.usage.clone());
            Ok(())
        })
        .build()
        .expect("client");

    let mut text = String::new();
    let mut stream = client
        .stream_generate(&GenerationRequest::new(vec![Message::user("Salut")]))
        .await
        .expect("stream");
    while let Some(delta) = stream.next().await {
        text.push_str(&delta.expect("delta").content);
    }

    assert_eq!(text, "Bonjour");
    let usage = usage.lock().expect("lock").clone().expect("callback fired");
    assert_eq!(usage.prompt_tokens, Some(5));
    assert_eq!(usage.completion_tokens, Some(3));
    assert_eq!(usage.total_tokens, Some(8));
    assert!(usage.latency.is_some());
}

#[tokio::test]
async fn gemini_stream_runs_through_the_facade() {
    let frames = [
        "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Hola\"}]},\"index\":0}],\"usageMetadata\":{\"promptTokenCount\":4,\"totalTokenCount\":4}}\r\n\r\n",
        "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\" amigo\"}]},\"finishReason\":\"STOP\",\"index\":0}],\"usageMetadata\":{\"promptTokenCount\":4,\"candidatesTokenCount\":2,\"totalTokenCount\":6}}\r\n\r\n",
    ];
    let transport = SseTransport::new(&frames, false);
    let provider: DynProvider = Arc::new(
        GoogleGeminiProvider::new(transport, "goog-key").with_default_model("gemini-2.0-flash"),
    );
    let usage = Arc::new(Mutex::new(None));
    let sink = usage.clone();
    let client = LLMClient::builder("google", provider)
        .with_callback(move |event: &CallbackEvent<'_>| {
            *sink.lock().expect("lock") = Some(event.usage.clone());
            Ok(())
        })
        .build()
        .expect("client");

    let deltas: Vec<StreamDelta> = client
        .stream_generate(&GenerationRequest::new(vec![Message::user("Hola")]))
        .await
        .expect("stream")
        .map(|delta| delta.expect("delta"))
        .collect()
        .await;

    assert_eq!(deltas.len(), 2);
    assert_eq!(deltas[0].content, "Hola");
    assert_eq!(deltas[1].content, " amigo");
    assert_eq!(deltas[1].finish_reason, Some(FinishReason::Stop));
    let usage = usage.lock().expect("lock").clone().expect("callback fired");
    assert_eq!(usage.prompt_tokens, Some(4));
    assert_eq!(usage.completion_tokens, Some(2));
    assert_eq!(usage.total_tokens, Some(6));
}
