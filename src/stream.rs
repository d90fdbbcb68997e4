use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::StreamExt;
use futures_util::stream;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::error::AIError;
use crate::http::HttpBodyStream;
use crate::provider::StreamTranslator;
use crate::types::{Provider, StreamChunk};

/// Pull-based sequence of normalized chunks.
///
/// Yields at most one terminal chunk (`Done` or `Error`) and nothing after it.
pub type ChatStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// Standardized SSE event yielded by [`StreamDecoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Raw `data:` payload emitted by the provider.
    Data(String),
    /// Terminal marker reported via `[DONE]`.
    Done,
}

/// Splits a provider SSE body into [`StreamEvent`] values.
///
/// `event:` and comment lines are ignored; every family tags its payloads in JSON.
pub struct StreamDecoder {
    body: HttpBodyStream,
    buffer: Vec<u8>,
    data_lines: Vec<Vec<u8>>,
    pending: VecDeque<Result<StreamEvent, AIError>>,
    provider: Provider,
    stream_closed: bool,
    done_received: bool,
}

impl StreamDecoder {
    pub fn new(body: HttpBodyStream, provider: Provider) -> Self {
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
        if line.starts_with(b"data:") {
            let mut data = line[5..].to_vec();
            if data.first() == Some(&b' ') {
                data.remove(0);
            }
            self.data_lines.push(data);
        }
    }

    fn flush_event(&mut self) {
        if self.data_lines.is_empty() {
            return;
        }

        let mut joined = Vec::new();
        for (idx, mut segment) in self.data_lines.drain(..).enumerate() {
            if idx > 0 {
                joined.push(b'\n');
            }
            joined.append(&mut segment);
        }

        if joined.is_empty() {
            return;
        }

        let data = match String::from_utf8(joined) {
            Ok(data) => data,
            Err(err) => {
                tracing::debug!(provider = %self.provider, error = %err, "skipping non UTF-8 stream line");
                return;
            }
        };

        if data.trim() == "[DONE]" {
            if !self.done_received {
                self.done_received = true;
                self.pending.push_back(Ok(StreamEvent::Done));
            }
        } else {
            self.pending.push_back(Ok(StreamEvent::Data(data)));
        }
    }

    fn drain_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
        buffer.iter().position(|b| *b == b'\n').map(|pos| {
            let mut line: Vec<u8> = buffer.drain(..=pos).collect();
            if line.last() == Some(&b'\n') {
                line.pop();
            }
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            line
        })
    }
}

impl Stream for StreamDecoder {
    type Item = Result<StreamEvent, AIError>;

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
                    let line = this.buffer.drain(..).collect::<Vec<u8>>();
                    this.handle_line(line);
                }
                this.flush_event();
                return Poll::Ready(this.pending.pop_front());
            }

            match this.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.buffer.extend_from_slice(&bytes);
                    while let Some(line) = Self::drain_line(&mut this.buffer) {
                        if line.is_empty() {
                            this.flush_event();
                        } else {
                            this.handle_line(line);
                        }
                    }
                    if let Some(event) = this.pending.pop_front() {
                        return Poll::Ready(Some(event));
                    }
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err))),
                Poll::Ready(None) => {
                    this.stream_closed = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Parses one SSE payload, logging and skipping anything that is not valid JSON.
pub(crate) fn parse_event<T: DeserializeOwned>(provider: Provider, data: &str) -> Option<T> {
    match serde_json::from_str(data) {
        Ok(event) => Some(event),
        Err(err) => {
            tracing::debug!(%provider, error = %err, "skipping malformed stream event");
            None
        }
    }
}

/// Reads an entire body stream into a string, used for non-2xx streaming answers.
pub(crate) async fn collect_body_text(mut body: HttpBodyStream) -> Result<String, AIError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk?);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// A stream that yields exactly one error chunk.
pub(crate) fn error_stream(error: AIError) -> ChatStream {
    Box::pin(stream::iter([StreamChunk::Error(error)]))
}

struct ChunkPump {
    decoder: StreamDecoder,
    translator: StreamTranslator,
    cancellation: Option<CancellationToken>,
    queue: VecDeque<StreamChunk>,
    provider: Provider,
    finished: bool,
}

enum Pulled {
    Event(Option<Result<StreamEvent, AIError>>),
    Cancelled,
}

impl ChunkPump {
    async fn pull(&mut self) -> Pulled {
        match &self.cancellation {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Pulled::Cancelled,
                event = self.decoder.next() => Pulled::Event(event),
            },
            None => Pulled::Event(self.decoder.next().await),
        }
    }

    fn absorb(&mut self, pulled: Pulled) {
        match pulled {
            Pulled::Cancelled => {
                self.queue.clear();
                self.queue
                    .push_back(StreamChunk::Error(AIError::cancelled().with_provider(self.provider)));
            }
            Pulled::Event(Some(Ok(StreamEvent::Data(data)))) => {
                let chunks = self.translator.on_data(&data);
                self.queue.extend(chunks);
            }
            Pulled::Event(Some(Ok(StreamEvent::Done))) => {
                let chunks = self.translator.on_done();
                self.queue.extend(chunks);
            }
            Pulled::Event(Some(Err(err))) => {
                let err = if err.provider.is_none() {
                    err.with_provider(self.provider)
                } else {
                    err
                };
                self.queue.push_back(StreamChunk::Error(err));
            }
            Pulled::Event(None) => {
                let chunks = self.translator.on_close();
                self.queue.extend(chunks);
                if !self.queue.iter().any(StreamChunk::is_terminal) {
                    self.queue.push_back(StreamChunk::Done {
                        usage: None,
                        cost: None,
                        finish_reason: None,
                    });
                }
            }
        }
    }
}

/// Drives a decoder through a translator, yielding normalized chunks lazily.
///
/// Firing `cancellation` ends the stream with a TIMEOUT error chunk.
pub(crate) fn chunk_stream(
    decoder: StreamDecoder,
    translator: StreamTranslator,
    cancellation: Option<CancellationToken>,
) -> ChatStream {
    let provider = translator.provider();
    let pump = ChunkPump {
        decoder,
        translator,
        cancellation,
        queue: VecDeque::new(),
        provider,
        finished: false,
    };

    Box::pin(stream::unfold(pump, |mut pump| async move {
        loop {
            if let Some(chunk) = pump.queue.pop_front() {
                if chunk.is_terminal() {
                    pump.finished = true;
                    pump.queue.clear();
                }
                return Some((chunk, pump));
            }
            if pump.finished {
                return None;
            }
            let pulled = pump.pull().await;
            pump.absorb(pulled);
        }
    }))
}
