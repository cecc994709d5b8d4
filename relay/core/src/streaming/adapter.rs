//! Single-model stream adapter
//!
//! Drives one upstream streaming completion and emits `content*`, then
//! `stats` or `error`, then `done` for that model.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::{Conversation, StreamSettings, SubStream};
use crate::backend::{
    ChatBackend, ChunkStream, CompletionRequest, DeltaContent, DeltaPart, ImageConfig, StreamChunk,
    UpstreamError, Usage,
};
use crate::catalog::ModelCatalog;
use crate::events::{ModelStats, StreamEvent};
use crate::messages::ModelId;

/// Markdown for an image returned by a model; the URL is used as-is
#[must_use]
pub fn markdown_image(url: &str) -> String {
    format!("![Generated Image]({url})")
}

/// Renderable text pieces of one chunk, in order
#[must_use]
pub fn chunk_texts(chunk: &StreamChunk) -> Vec<String> {
    let mut texts = Vec::new();
    for delta in chunk.choices.iter().filter_map(|choice| choice.delta.as_ref()) {
        match &delta.content {
            Some(DeltaContent::Text(text)) if !text.is_empty() => texts.push(text.clone()),
            Some(DeltaContent::Parts(parts)) => {
                for part in parts {
                    match part {
                        DeltaPart::Text { text } if !text.is_empty() => texts.push(text.clone()),
                        DeltaPart::ImageUrl { image_url } => texts.push(markdown_image(&image_url.url)),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
        texts.extend(delta.images.iter().map(|image| markdown_image(&image.image_url.url)));
    }
    texts
}

/// Lifecycle of one upstream call
pub enum AdapterState {
    /// Opening the stream, with or without tool definitions
    Requesting {
        /// Whether tools are attached to this attempt
        with_tools: bool,
    },
    /// The model rejected tools; opening again without them
    RetryingWithoutTools,
    /// Reading chunks
    Streaming(ChunkStream),
    /// The upstream stream ended cleanly
    Finished,
}

impl AdapterState {
    /// State name for logging
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Requesting { .. } => "requesting",
            Self::RetryingWithoutTools => "retrying_without_tools",
            Self::Streaming(_) => "streaming",
            Self::Finished => "finished",
        }
    }
}

/// How an adapter run ended
#[derive(Clone, Debug, PartialEq)]
pub enum AdapterOutcome {
    /// Stats were emitted
    Completed(ModelStats),
    /// An error event was emitted
    Failed(String),
    /// The output channel closed; nothing more was sent
    CallerGone,
}

enum Failure {
    Upstream(UpstreamError),
    CallerGone,
}

impl From<UpstreamError> for Failure {
    fn from(err: UpstreamError) -> Self {
        Self::Upstream(err)
    }
}

/// Converts one backend's stream into normalized events
#[derive(Clone)]
pub struct StreamAdapter {
    backend: Arc<dyn ChatBackend>,
    catalog: Arc<ModelCatalog>,
    settings: StreamSettings,
}

impl StreamAdapter {
    /// Create an adapter
    #[must_use]
    pub fn new(backend: Arc<dyn ChatBackend>, catalog: Arc<ModelCatalog>, settings: StreamSettings) -> Self {
        Self {
            backend,
            catalog,
            settings,
        }
    }

    /// Stream settings in use
    #[must_use]
    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    /// Run the adapter on its own task and read its events directly
    #[must_use]
    pub fn spawn(&self, model: ModelId, conversation: Arc<Conversation>) -> SubStream {
        let (tx, rx) = mpsc::channel(self.settings.channel_capacity);
        let mut tasks = JoinSet::new();
        let adapter = self.clone();
        tasks.spawn(async move { adapter.run(model, conversation, tx).await });
        SubStream::new(rx, tasks)
    }

    /// Stream one model's answer into `tx`
    ///
    /// Always ends with `done{model}` unless the receiver is gone.
    pub async fn run(
        &self,
        model: ModelId,
        conversation: Arc<Conversation>,
        tx: mpsc::Sender<StreamEvent>,
    ) -> AdapterOutcome {
        let start = Instant::now();
        let deadline = self.settings.stream_timeout;

        let result = tokio::time::timeout(deadline, self.drive(&model, &conversation, &tx))
            .await
            .unwrap_or(Err(Failure::Upstream(UpstreamError::Timeout(deadline))));
        let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (event, outcome) = match result {
            Ok(usage) => {
                let usage = usage.unwrap_or_default();
                let stats = ModelStats {
                    model: model.to_string(),
                    tokens_in: usage.prompt_tokens,
                    tokens_out: usage.completion_tokens,
                    cost: self
                        .catalog
                        .cost_for(&model, usage.prompt_tokens, usage.completion_tokens),
                    latency_ms,
                };
                tracing::info!(
                    model = %model,
                    latency_ms,
                    tokens_in = stats.tokens_in,
                    tokens_out = stats.tokens_out,
                    "Model stream completed"
                );
                (StreamEvent::Stats(stats.clone()), AdapterOutcome::Completed(stats))
            }
            Err(Failure::Upstream(err)) => {
                tracing::warn!(model = %model, latency_ms, error = %err, "Model stream failed");
                let message = err.to_string();
                (
                    StreamEvent::error(model.as_str(), message.clone()),
                    AdapterOutcome::Failed(message),
                )
            }
            Err(Failure::CallerGone) => {
                tracing::debug!(model = %model, "Caller disconnected, stopping model stream");
                return AdapterOutcome::CallerGone;
            }
        };

        if tx.send(event).await.is_err() || tx.send(StreamEvent::done(model.as_str())).await.is_err()
        {
            return AdapterOutcome::CallerGone;
        }
        outcome
    }

    fn request(&self, model: &ModelId, conversation: &Conversation, with_tools: bool) -> CompletionRequest {
        let mut request = CompletionRequest::new(model.as_str(), conversation.messages.clone())
            .with_api_key(conversation.api_key.as_str());
        if with_tools {
            request = request.with_tools(conversation.tools.clone());
        }
        if self.catalog.supports_image_output(model) {
            let image_config = conversation.image_options.as_ref().map(|options| ImageConfig {
                aspect_ratio: options.aspect_ratio.clone(),
            });
            request = request.with_image_output(image_config);
        }
        request
    }

    async fn drive(
        &self,
        model: &ModelId,
        conversation: &Conversation,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<Option<Usage>, Failure> {
        let mut state = AdapterState::Requesting {
            with_tools: conversation.tools.is_some(),
        };
        let mut usage = None;

        loop {
            tracing::trace!(model = %model, state = state.name(), "Adapter step");
            state = match state {
                AdapterState::Requesting { with_tools } => {
                    match self.backend.stream(&self.request(model, conversation, with_tools)).await {
                        Ok(chunks) => AdapterState::Streaming(chunks),
                        Err(err) if with_tools && err.is_tool_unsupported() => {
                            tracing::warn!(
                                model = %model,
                                error = %err,
                                "Model does not support tools, retrying without them"
                            );
                            AdapterState::RetryingWithoutTools
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                AdapterState::RetryingWithoutTools => AdapterState::Streaming(
                    self.backend
                        .stream(&self.request(model, conversation, false))
                        .await?,
                ),
                AdapterState::Streaming(mut chunks) => {
                    usage = self.read_chunks(model, &mut chunks, tx).await?;
                    AdapterState::Finished
                }
                AdapterState::Finished => return Ok(usage),
            };
        }
    }

    async fn read_chunks(
        &self,
        model: &ModelId,
        chunks: &mut ChunkStream,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<Option<Usage>, Failure> {
        let chunk_timeout = self.settings.chunk_timeout;
        let mut usage = None;

        loop {
            let chunk = match tokio::time::timeout(chunk_timeout, chunks.next()).await {
                Err(_) => return Err(UpstreamError::Stalled(chunk_timeout).into()),
                Ok(None) => return Ok(usage),
                Ok(Some(chunk)) => chunk?,
            };

            if let Some(error) = chunk.error.as_ref() {
                return Err(UpstreamError::Api(error.message.clone()).into());
            }
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }

            for text in chunk_texts(&chunk) {
                if tx.send(StreamEvent::content(model.as_str(), text)).await.is_err() {
                    return Err(Failure::CallerGone);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_utils::{Script, ScriptedBackend};
    use crate::backend::{ChunkChoice, ChunkDelta, DeltaImage, DeltaImageUrl};
    use crate::messages::{ChatTurn, ImageOptions};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const MODEL: &str = "openai/gpt-4o";

    fn model(raw: &str) -> ModelId {
        ModelId::parse(raw).unwrap()
    }

    fn conversation() -> Arc<Conversation> {
        Arc::new(Conversation::new(
            vec![ChatTurn::user("hi").to_upstream()],
            "sk-or-v1-0123456789abcdef",
        ))
    }

    fn adapter(backend: &ScriptedBackend, settings: StreamSettings) -> StreamAdapter {
        StreamAdapter::new(Arc::new(backend.clone()), Arc::new(ModelCatalog::default()), settings)
    }

    async fn collect(adapter: &StreamAdapter, model_id: &str, conversation: Arc<Conversation>) -> Vec<StreamEvent> {
        let mut sub = adapter.spawn(model(model_id), conversation);
        let mut events = Vec::new();
        while let Some(event) = sub.next_event().await {
            events.push(event);
        }
        events
    }

    fn parts_chunk(parts: Vec<DeltaPart>) -> StreamChunk {
        StreamChunk {
            choices: vec![ChunkChoice {
                delta: Some(ChunkDelta {
                    content: Some(DeltaContent::Parts(parts)),
                    images: Vec::new(),
                }),
                finish_reason: None,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_markdown_image_keeps_url() {
        let url = "data:image/png;base64,iVBORw0KGgo=";
        assert_eq!(markdown_image(url), format!("![Generated Image]({url})"));
    }

    #[test]
    fn test_chunk_texts_handles_parts_and_images() {
        let mut chunk = parts_chunk(vec![
            DeltaPart::Text { text: "Here".into() },
            DeltaPart::Text { text: String::new() },
            DeltaPart::ImageUrl {
                image_url: DeltaImageUrl { url: "https://img/1.png".into() },
            },
            DeltaPart::Other,
        ]);
        if let Some(delta) = chunk.choices[0].delta.as_mut() {
            delta.images.push(DeltaImage {
                image_url: DeltaImageUrl { url: "https://img/2.png".into() },
            });
        }

        assert_eq!(
            chunk_texts(&chunk),
            vec![
                "Here".to_string(),
                "![Generated Image](https://img/1.png)".to_string(),
                "![Generated Image](https://img/2.png)".to_string(),
            ]
        );
        assert!(chunk_texts(&StreamChunk::usage(1, 2)).is_empty());
    }

    #[tokio::test]
    async fn test_content_then_stats_then_done() {
        let backend = ScriptedBackend::new().on_text(MODEL, &["Hel", "lo"], 1_000, 2_000);
        let events = collect(&adapter(&backend, StreamSettings::default()), MODEL, conversation()).await;

        assert_eq!(events.len(), 4);
        assert_eq!(events[0], StreamEvent::content(MODEL, "Hel"));
        assert_eq!(events[1], StreamEvent::content(MODEL, "lo"));
        let StreamEvent::Stats(stats) = &events[2] else {
            panic!("expected stats, got {:?}", events[2]);
        };
        assert_eq!((stats.tokens_in, stats.tokens_out), (1_000, 2_000));
        // gpt-4o: $2.50 in / $10.00 out per million
        assert!((stats.cost - 0.0225).abs() < 1e-9);
        assert_eq!(events[3], StreamEvent::done(MODEL));
    }

    #[tokio::test]
    async fn test_missing_usage_still_emits_zero_stats() {
        let backend = ScriptedBackend::new().on(MODEL, Script::Chunks(vec![Ok(StreamChunk::text("x"))]));
        let events = collect(&adapter(&backend, StreamSettings::default()), MODEL, conversation()).await;

        let StreamEvent::Stats(stats) = &events[1] else {
            panic!("expected stats");
        };
        assert_eq!((stats.tokens_in, stats.tokens_out), (0, 0));
        assert!(stats.cost.abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_mid_stream_error_chunk() {
        let error_chunk: StreamChunk =
            serde_json::from_str(r#"{"error":{"message":"overloaded"}}"#).unwrap();
        let backend = ScriptedBackend::new().on(
            MODEL,
            Script::Chunks(vec![Ok(StreamChunk::text("partial")), Ok(error_chunk)]),
        );
        let events = collect(&adapter(&backend, StreamSettings::default()), MODEL, conversation()).await;

        assert_eq!(
            events,
            vec![
                StreamEvent::content(MODEL, "partial"),
                StreamEvent::error(MODEL, "upstream error: overloaded"),
                StreamEvent::done(MODEL),
            ]
        );
    }

    #[tokio::test]
    async fn test_tool_rejection_retries_once_without_tools() {
        let rejection = UpstreamError::Status {
            status: 404,
            message: "No endpoints found that support tool use".into(),
        };
        let backend = ScriptedBackend::new()
            .on(MODEL, Script::Reject(rejection))
            .on_text(MODEL, &["ok"], 1, 1);

        let conversation = Arc::new(
            Conversation::new(vec![ChatTurn::user("hi").to_upstream()], "sk-or-v1-0123456789abcdef")
                .with_tools(Some(vec![serde_json::json!({"type": "function"})])),
        );
        let events = collect(&adapter(&backend, StreamSettings::default()), MODEL, conversation).await;

        assert_eq!(events[0], StreamEvent::content(MODEL, "ok"));
        let calls = backend.calls_for(MODEL);
        assert_eq!(calls.len(), 2);
        assert!(calls[0].has_tools());
        assert!(!calls[1].has_tools());
    }

    #[tokio::test]
    async fn test_other_rejection_is_not_retried() {
        let backend = ScriptedBackend::new().on(
            MODEL,
            Script::Reject(UpstreamError::Status {
                status: 401,
                message: "bad key".into(),
            }),
        );
        let conversation = Arc::new(
            Conversation::new(Vec::new(), "sk-or-v1-0123456789abcdef")
                .with_tools(Some(vec![serde_json::json!({"type": "function"})])),
        );
        let events = collect(&adapter(&backend, StreamSettings::default()), MODEL, conversation).await;

        assert_eq!(
            events,
            vec![
                StreamEvent::error(MODEL, "upstream returned 401: bad key"),
                StreamEvent::done(MODEL),
            ]
        );
        assert_eq!(backend.calls_for(MODEL).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_stream_times_out() {
        let backend = ScriptedBackend::new()
            .on(MODEL, Script::ChunksThenStall(vec![StreamChunk::text("slow")]));
        let settings = StreamSettings::default().with_chunk_timeout(Duration::from_secs(30));
        let events = collect(&adapter(&backend, settings), MODEL, conversation()).await;

        assert_eq!(
            events,
            vec![
                StreamEvent::content(MODEL, "slow"),
                StreamEvent::error(MODEL, "upstream stream stalled: no data for 30s"),
                StreamEvent::done(MODEL),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_stream_timeout() {
        let backend = ScriptedBackend::new().on(MODEL, Script::Hang);
        let settings = StreamSettings::default().with_stream_timeout(Duration::from_secs(5));
        let events = collect(&adapter(&backend, settings), MODEL, conversation()).await;

        assert_eq!(
            events[0],
            StreamEvent::error(MODEL, "upstream request timed out after 5s")
        );
    }

    #[tokio::test]
    async fn test_image_output_model_request() {
        let image_model = "google/gemini-2.5-flash-image-preview";
        let backend = ScriptedBackend::new().on_text(image_model, &[], 1, 1);
        let conversation = Arc::new(
            Conversation::new(Vec::new(), "sk-or-v1-0123456789abcdef").with_image_options(Some(
                ImageOptions {
                    aspect_ratio: Some("16:9".into()),
                },
            )),
        );
        collect(&adapter(&backend, StreamSettings::default()), image_model, conversation).await;

        let calls = backend.calls_for(image_model);
        assert_eq!(calls[0].modalities, Some(vec!["image".to_string(), "text".to_string()]));
        assert_eq!(
            calls[0].image_config.as_ref().and_then(|c| c.aspect_ratio.as_deref()),
            Some("16:9")
        );
    }

    #[tokio::test]
    async fn test_closed_receiver_stops_adapter() {
        let backend = ScriptedBackend::new().on_text(MODEL, &["a", "b", "c"], 1, 1);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let outcome = adapter(&backend, StreamSettings::default())
            .run(model(MODEL), conversation(), tx)
            .await;
        assert_eq!(outcome, AdapterOutcome::CallerGone);
    }
}
