//! Scripted backend for unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;

use super::error::UpstreamError;
use super::traits::{ChatBackend, ChunkStream, CompletionRequest, CompletionResponse, StreamChunk};

/// One scripted reaction to a call
#[derive(Clone, Debug)]
pub enum Script {
    /// Stream these items, then end
    Chunks(Vec<Result<StreamChunk, UpstreamError>>),
    /// Stream these chunks, then never yield again
    ChunksThenStall(Vec<StreamChunk>),
    /// Reject the streaming request before any chunk
    Reject(UpstreamError),
    /// Answer a non-streaming call
    Reply(String),
    /// Fail a non-streaming call
    Fail(UpstreamError),
    /// Never answer
    Hang,
}

/// Backend that plays back per-model scripts and records every request
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    scripts: Arc<Mutex<HashMap<String, VecDeque<Script>>>>,
    calls: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a script for the next call to `model`
    #[must_use]
    pub fn on(self, model: &str, script: Script) -> Self {
        self.scripts
            .lock()
            .entry(model.to_string())
            .or_default()
            .push_back(script);
        self
    }

    /// Convenience: stream text pieces followed by usage
    #[must_use]
    pub fn on_text(self, model: &str, pieces: &[&str], tokens_in: u64, tokens_out: u64) -> Self {
        let mut chunks: Vec<_> = pieces.iter().map(|p| Ok(StreamChunk::text(*p))).collect();
        chunks.push(Ok(StreamChunk::usage(tokens_in, tokens_out)));
        self.on(model, Script::Chunks(chunks))
    }

    /// Every request seen so far
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().clone()
    }

    /// Requests seen for one model
    pub fn calls_for(&self, model: &str) -> Vec<CompletionRequest> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.model == model)
            .cloned()
            .collect()
    }

    fn next(&self, request: &CompletionRequest) -> Option<Script> {
        self.calls.lock().push(request.clone());
        self.scripts
            .lock()
            .get_mut(&request.model)
            .and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "Scripted"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, UpstreamError> {
        match self.next(request) {
            Some(Script::Reply(content)) => Ok(CompletionResponse {
                content,
                model: request.model.clone(),
                usage: None,
                duration_ms: 1,
            }),
            Some(Script::Fail(err) | Script::Reject(err)) => Err(err),
            Some(Script::Hang) => futures::future::pending().await,
            _ => Err(UpstreamError::Status {
                status: 404,
                message: format!("no completion scripted for {}", request.model),
            }),
        }
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<ChunkStream, UpstreamError> {
        match self.next(request) {
            Some(Script::Chunks(items)) => Ok(futures::stream::iter(items).boxed()),
            Some(Script::ChunksThenStall(chunks)) => Ok(futures::stream::iter(chunks.into_iter().map(Ok))
                .chain(futures::stream::pending())
                .boxed()),
            Some(Script::Reject(err) | Script::Fail(err)) => Err(err),
            Some(Script::Hang) => futures::future::pending().await,
            _ => Err(UpstreamError::Status {
                status: 404,
                message: format!("no stream scripted for {}", request.model),
            }),
        }
    }
}
