use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use portal_core::errors::TransportError;
use portal_core::gateway::{ChatGateway, ChatRequest, ChunkStream};

/// Scripted reply for one `open_stream` call.
pub enum MockResponse {
    /// Yield these body chunks, then close.
    Chunks(Vec<Bytes>),
    /// Yield these chunks, then stay open until the reader gives up.
    ChunksThenStall(Vec<Bytes>),
    /// Yield these chunks, then fail mid-body.
    ChunksThenError(Vec<Bytes>, TransportError),
    /// Fail before any body is returned.
    Error(TransportError),
    /// Body fed by the test through a channel.
    Channel(mpsc::Receiver<Result<Bytes, TransportError>>),
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// One `data:` line per JSON payload, then `[DONE]`.
    pub fn frames(payloads: &[serde_json::Value]) -> Self {
        let mut chunks: Vec<Bytes> = payloads.iter().map(frame).collect();
        chunks.push(done_frame());
        Self::Chunks(chunks)
    }

    /// A plain content reply split into the given deltas.
    pub fn text(deltas: &[&str]) -> Self {
        let payloads: Vec<_> = deltas
            .iter()
            .map(|d| serde_json::json!({ "content": d }))
            .collect();
        Self::frames(&payloads)
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }

    /// A response whose chunks are pushed by the returned sender.
    pub fn channel() -> (mpsc::Sender<Result<Bytes, TransportError>>, Self) {
        let (tx, rx) = mpsc::channel(32);
        (tx, Self::Channel(rx))
    }
}

/// Encode a JSON payload as one wire frame.
pub fn frame(payload: &serde_json::Value) -> Bytes {
    Bytes::from(format!("data: {payload}\n\n"))
}

pub fn done_frame() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

/// Gateway that replays scripted responses in order and records requests.
pub struct MockGateway {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<ChatRequest>>,
    call_count: AtomicUsize,
}

impl MockGateway {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, response: MockResponse) {
        self.responses.lock().push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        self.requests.lock().last().cloned()
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

fn into_stream(chunks: Vec<Bytes>) -> impl futures::Stream<Item = Result<Bytes, TransportError>> {
    stream::iter(chunks.into_iter().map(Ok))
}

#[async_trait]
impl ChatGateway for MockGateway {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<ChunkStream, TransportError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let mut response = self.responses.lock().pop_front().ok_or_else(|| {
            TransportError::InvalidRequest(format!("MockGateway: no response configured for call {idx}"))
        })?;

        loop {
            response = match response {
                MockResponse::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    *inner
                }
                MockResponse::Chunks(chunks) => return Ok(Box::pin(into_stream(chunks))),
                MockResponse::ChunksThenStall(chunks) => {
                    return Ok(Box::pin(into_stream(chunks).chain(stream::pending())));
                }
                MockResponse::ChunksThenError(chunks, err) => {
                    return Ok(Box::pin(into_stream(chunks).chain(stream::once(async { Err(err) }))));
                }
                MockResponse::Error(err) => return Err(err),
                MockResponse::Channel(rx) => return Ok(Box::pin(ReceiverStream::new(rx))),
            };
        }
    }
}
