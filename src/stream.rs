use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use tracing::debug;

use crate::error::LLMError;
use crate::http::HttpBodyStream;
use crate::types::{FinishReason, StreamDelta};
use crate::usage::UsageAccumulator;

/// Standardized SSE event yielded by [`StreamDecoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Raw `data:` payload emitted by the provider.
    Data(String),
    /// Terminal marker reported via `[DONE]`.
    Done,
}

/// Splits a provider SSE body into [`StreamEvent`] values.
pub struct StreamDecoder {
    body: HttpBodyStream,
    buffer: Vec<u8>,
    data_lines: Vec<Vec<u8>>,
    pending: VecDeque<Result<StreamEvent, LLMError>>,
    provider: &'static str,
    stream_closed: bool,
    done_received: bool,
}

impl StreamDecoder {
    /// Wraps a raw HTTP body stream and prepares it for SSE decoding.
    pub fn new(body: HttpBodyStream, provider: &'static str) -> Self {
        Self {
            body,
            buffer: Vec::new(),
            data_lines: Vec::new(),
            pending: VecDeque::new(),
            provider,
            stream_closed: false,
            done_received: false,
        }
    }

    fn handle_line(&mut self, line: Vec<u8>) {
        if let Some(rest) = line.strip_prefix(b"data:") {
            let data = rest.strip_prefix(b" ").unwrap_or(rest);
            self.data_lines.push(data.to_vec());
        }
    }

    fn flush_event(&mut self) -> Result<(), LLMError> {
        if self.data_lines.is_empty() {
            return Ok(());
        }

        let joined = self.data_lines.drain(..).collect::<Vec<_>>().join(&b'\n');
        if joined.is_empty() {
            return Ok(());
        }

        let data = String::from_utf8(joined).map_err(|err| {
            LLMError::protocol(
                self.provider,
                format!("invalid UTF-8 in stream chunk: {err}"),
            )
        })?;

        if data.trim() == "[DONE]" {
            if !self.done_received {
                self.done_received = true;
                self.pending.push_back(Ok(StreamEvent::Done));
            }
        } else {
            self.pending.push_back(Ok(StreamEvent::Data(data)));
        }

        Ok(())
    }

    fn drain_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
        buffer.iter().position(|b| *b == b'\n').map(|pos| {
            let mut line: Vec<u8> = buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            line
        })
    }
}

impl Stream for StreamDecoder {
    type Item = Result<StreamEvent, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(event) = this.pending.pop_front() {
            return Poll::Ready(Some(event));
        }

        if this.done_received {
            return Poll::Ready(None);
        }

        loop {
            if this.stream_closed {
                if !this.buffer.is_empty() {
                    let line = std::mem::take(&mut this.buffer);
                    this.handle_line(line);
                }
                if let Err(err) = this.flush_event() {
                    return Poll::Ready(Some(Err(err)));
                }
                return Poll::Ready(this.pending.pop_front());
            }

            match this.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.buffer.extend_from_slice(&bytes);
                    while let Some(line) = Self::drain_line(&mut this.buffer) {
                        if line.is_empty() {
                            if let Err(err) = this.flush_event() {
                                return Poll::Ready(Some(Err(err)));
                            }
                        } else {
                            this.handle_line(line);
                        }
                    }
                    if let Some(event) = this.pending.pop_front() {
                        return Poll::Ready(Some(event));
                    }
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err))),
                Poll::Ready(None) => this.stream_closed = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Outcome of normalizing one vendor frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// One or more canonical deltas, in wire order.
    Deltas(Vec<StreamDelta>),
    /// A recognised frame that carries no delta (pings, role announcements,
    /// block boundaries).
    KeepAlive,
    /// A recognised end-of-stream frame.
    End,
}

/// Converts one vendor-specific stream frame into canonical deltas.
///
/// Implementations must classify every frame they receive. A frame shape they
/// do not recognise is an error, never an empty result.
pub trait ChunkNormalizer: Send {
    /// Adapter name used in protocol errors.
    fn provider(&self) -> &'static str;

    /// Normalizes one `data:` payload.
    fn normalize(&mut self, payload: &str) -> Result<Normalized, LLMError>;
}

/// Drives a [`StreamDecoder`] through a [`ChunkNormalizer`].
///
/// The terminal delta is held back until the vendor ends the stream so usage
/// reported after the finish frame can be folded into it. The terminal delta
/// is therefore always the last item, and nothing follows it.
pub struct NormalizedStream<N> {
    decoder: Option<StreamDecoder>,
    normalizer: N,
    ready: VecDeque<StreamDelta>,
    terminal: Option<StreamDelta>,
    finished: bool,
}

impl<N: ChunkNormalizer> NormalizedStream<N> {
    pub fn new(decoder: StreamDecoder, normalizer: N) -> Self {
        Self {
            decoder: Some(decoder),
            normalizer,
            ready: VecDeque::new(),
            terminal: None,
            finished: false,
        }
    }

    /// Wraps a raw SSE body.
    pub fn from_body(body: HttpBodyStream, normalizer: N) -> Self {
        let decoder = StreamDecoder::new(body, normalizer.provider());
        Self::new(decoder, normalizer)
    }

    fn accept(&mut self, delta: StreamDelta) -> Result<(), LLMError> {
        let Some(terminal) = self.terminal.as_mut() else {
            if delta.is_terminal() {
                self.terminal = Some(delta);
            } else {
                self.ready.push_back(delta);
            }
            return Ok(());
        };

        if !delta.content.is_empty() || !delta.tool_calls.is_empty() {
            return Err(LLMError::protocol(
                self.normalizer.provider(),
                "content received after the finish signal",
            ));
        }
        if let Some(update) = delta.usage {
            let mut merged = UsageAccumulator::new();
            if let Some(existing) = &terminal.usage {
                merged.apply(existing);
            }
            merged.apply(&update);
            terminal.usage = Some(merged.snapshot());
        }
        Ok(())
    }

    /// Ends the stream, releasing the body and queuing the terminal delta.
    fn complete(&mut self) {
        self.decoder = None;
        let terminal = self
            .terminal
            .take()
            .unwrap_or_else(|| StreamDelta::finish(FinishReason::Stop));
        self.ready.push_back(terminal);
        self.finished = true;
    }

    fn fail(&mut self, err: LLMError) -> Poll<Option<Result<StreamDelta, LLMError>>> {
        self.decoder = None;
        self.ready.clear();
        self.terminal = None;
        self.finished = true;
        Poll::Ready(Some(Err(err)))
    }
}

impl<N: ChunkNormalizer + Unpin> Stream for NormalizedStream<N> {
    type Item = Result<StreamDelta, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(delta) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(delta)));
            }
            if this.finished {
                return Poll::Ready(None);
            }
            let Some(decoder) = this.decoder.as_mut() else {
                return Poll::Ready(None);
            };

            match Pin::new(decoder).poll_next(cx) {
                Poll::Ready(Some(Ok(StreamEvent::Data(payload)))) => {
                    match this.normalizer.normalize(&payload) {
                        Ok(Normalized::Deltas(deltas)) => {
                            for delta in deltas {
                                if let Err(err) = this.accept(delta) {
                                    return this.fail(err);
                                }
                            }
                        }
                        Ok(Normalized::KeepAlive) => {}
                        Ok(Normalized::End) => this.complete(),
                        Err(err) => return this.fail(err),
                    }
                }
                Poll::Ready(Some(Ok(StreamEvent::Done))) => this.complete(),
                Poll::Ready(Some(Err(err))) => {
                    if this.terminal.is_none() {
                        return this.fail(err);
                    }
                    debug!(
                        provider = this.normalizer.provider(),
                        error = %err,
                        "stream body failed after finish signal"
                    );
                    this.complete();
                }
                Poll::Ready(None) => {
                    if this.terminal.is_some() {
                        debug!(
                            provider = this.normalizer.provider(),
                            "stream closed after finish signal without end frame"
                        );
                        this.complete();
                    } else {
                        let err = LLMError::protocol(
                            this.normalizer.provider(),
                            "stream closed before a finish signal",
                        );
                        return this.fail(err);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
