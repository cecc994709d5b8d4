//! Shared test backend for relay integration tests
//!
//! `MockBackend` answers completions and streams per model and counts how
//! many upstream streams are currently open, so tests can observe when the
//! relay releases them.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;

use relay_core::backend::{ChunkStream, CompletionResponse};
use relay_core::{
    ChatBackend, ChatRelay, CompletionRequest, ModelCatalog, RelaySettings, RelayStream,
    StreamChunk, StreamEvent, UpstreamError,
};

/// A key that passes validation
pub const KEY: &str = "sk-or-v1-integration-test-key";

/// Reaction to a non-streaming call
#[derive(Clone, Debug)]
pub enum Completion {
    /// Reply with this text
    Reply(String),
    /// Fail with this error
    Fail(UpstreamError),
    /// Never answer
    Hang,
}

/// Reaction to a streaming call
#[derive(Clone, Debug)]
pub enum Streaming {
    /// Stream the pieces, then usage, then end
    Text(Vec<String>),
    /// Reject requests that carry tools, otherwise stream the pieces
    RejectTools(Vec<String>),
    /// Yield a chunk every `interval` forever
    Endless(Duration),
}

/// Decrements the open-stream counter when the stream is dropped
struct OpenStream(Arc<AtomicUsize>);

impl OpenStream {
    fn new(open: &Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(open))
    }
}

impl Drop for OpenStream {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
pub struct MockBackend {
    completions: Arc<Mutex<HashMap<String, Completion>>>,
    streams: Arc<Mutex<HashMap<String, Streaming>>>,
    complete_calls: Arc<Mutex<Vec<CompletionRequest>>>,
    stream_calls: Arc<Mutex<Vec<CompletionRequest>>>,
    open: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_complete(self, model: &str, completion: Completion) -> Self {
        self.completions.lock().insert(model.to_string(), completion);
        self
    }

    pub fn on_stream(self, model: &str, streaming: Streaming) -> Self {
        self.streams.lock().insert(model.to_string(), streaming);
        self
    }

    pub fn on_text(self, model: &str, pieces: &[&str]) -> Self {
        self.on_stream(model, Streaming::Text(owned(pieces)))
    }

    pub fn complete_calls(&self) -> Vec<CompletionRequest> {
        self.complete_calls.lock().clone()
    }

    pub fn stream_calls_for(&self, model: &str) -> Vec<CompletionRequest> {
        self.stream_calls
            .lock()
            .iter()
            .filter(|call| call.model == model)
            .cloned()
            .collect()
    }

    /// Upstream streams not yet dropped
    pub fn open_streams(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    fn text_stream(&self, pieces: Vec<String>) -> ChunkStream {
        let guard = OpenStream::new(&self.open);
        let mut chunks: Vec<Result<StreamChunk, UpstreamError>> =
            pieces.into_iter().map(|p| Ok(StreamChunk::text(p))).collect();
        chunks.push(Ok(StreamChunk::usage(12, 34)));
        futures::stream::iter(chunks)
            .map(move |chunk| {
                let _held = &guard;
                chunk
            })
            .boxed()
    }

    fn endless_stream(&self, interval: Duration) -> ChunkStream {
        let guard = OpenStream::new(&self.open);
        futures::stream::unfold((guard, 0u64), move |(guard, n)| async move {
            tokio::time::sleep(interval).await;
            Some((Ok(StreamChunk::text(format!("tick {n} "))), (guard, n + 1)))
        })
        .boxed()
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, UpstreamError> {
        self.complete_calls.lock().push(request.clone());
        let completion = self.completions.lock().get(&request.model).cloned();

        match completion {
            Some(Completion::Reply(content)) => Ok(CompletionResponse {
                content,
                model: request.model.clone(),
                usage: None,
                duration_ms: 1,
            }),
            Some(Completion::Fail(e)) => Err(e),
            Some(Completion::Hang) => futures::future::pending().await,
            None => Err(UpstreamError::Status {
                status: 404,
                message: format!("no completion for {}", request.model),
            }),
        }
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<ChunkStream, UpstreamError> {
        self.stream_calls.lock().push(request.clone());
        let streaming = self.streams.lock().get(&request.model).cloned();

        match streaming {
            Some(Streaming::Text(pieces)) => Ok(self.text_stream(pieces)),
            Some(Streaming::RejectTools(_)) if request.has_tools() => Err(UpstreamError::Status {
                status: 400,
                message: "tool use is not supported by this model".into(),
            }),
            Some(Streaming::RejectTools(pieces)) => Ok(self.text_stream(pieces)),
            Some(Streaming::Endless(interval)) => Ok(self.endless_stream(interval)),
            None => Err(UpstreamError::Status {
                status: 404,
                message: format!("no stream for {}", request.model),
            }),
        }
    }
}

pub fn owned(pieces: &[&str]) -> Vec<String> {
    pieces.iter().map(|p| (*p).to_string()).collect()
}

pub fn relay(backend: &MockBackend, settings: RelaySettings) -> ChatRelay {
    ChatRelay::new(
        Arc::new(backend.clone()),
        Arc::new(ModelCatalog::default()),
        settings,
    )
}

pub async fn collect(mut stream: RelayStream) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = stream.next_event().await {
        events.push(event);
    }
    events
}

/// Event kinds for one model, in order
pub fn kinds_for<'a>(events: &'a [StreamEvent], model: &str) -> Vec<&'a str> {
    events
        .iter()
        .filter(|e| e.model() == Some(model))
        .map(StreamEvent::kind)
        .collect()
}
