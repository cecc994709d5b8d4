//! Relay Pipeline
//!
//! [`ChatRelay`] composes validation, routing, the stream adapters, the
//! merger and the title summarizer into one request-scoped event stream.
//!
//! # Event order
//!
//! ```text
//! router{..}?            auto mode only, always first
//! content/stats/error/done per model, interleaved across models
//! done{multi, aggregate} multi-model only, after every model's done
//! summary{title}?        when a title was requested
//! ```

use std::sync::Arc;

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::backend::ChatBackend;
use crate::catalog::ModelCatalog;
use crate::error::RelayError;
use crate::events::StreamEvent;
use crate::messages::{Attachment, ChatMode, ChatRequest, ChatTurn, ModelId};
use crate::routing::{ModelRouter, RouterConfig};
use crate::streaming::{Conversation, MergedStream, MultiStreamMerger, StreamAdapter, StreamSettings, SubStream};
use crate::summarizer::{SummarizerConfig, TitleSummarizer};
use crate::validation::{validate_request, ModelSelection, RequestLimits, ValidatedRequest};

/// Settings for every stage of the pipeline
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Adapter timeouts and channel sizing
    pub stream: StreamSettings,
    /// Router settings
    pub router: RouterConfig,
    /// Summarizer settings
    pub summarizer: SummarizerConfig,
    /// Request validation limits
    pub limits: RequestLimits,
}

/// A request that passed validation and has not started yet
#[derive(Clone, Debug)]
pub struct PreparedRequest {
    request: ChatRequest,
    validated: ValidatedRequest,
}

impl PreparedRequest {
    /// Mode of the request
    #[must_use]
    pub fn mode(&self) -> ChatMode {
        self.request.mode
    }

    /// Number of models that will run (one in auto mode)
    #[must_use]
    pub fn model_count(&self) -> usize {
        match &self.validated.selection {
            ModelSelection::Auto => 1,
            ModelSelection::Manual(models) => models.len(),
        }
    }
}

/// The relay entry point, shared across requests
#[derive(Clone)]
pub struct ChatRelay {
    catalog: Arc<ModelCatalog>,
    router: ModelRouter,
    adapter: StreamAdapter,
    merger: MultiStreamMerger,
    summarizer: TitleSummarizer,
    limits: RequestLimits,
}

impl ChatRelay {
    /// Create a relay over `backend`
    #[must_use]
    pub fn new(backend: Arc<dyn ChatBackend>, catalog: Arc<ModelCatalog>, settings: RelaySettings) -> Self {
        let adapter = StreamAdapter::new(Arc::clone(&backend), Arc::clone(&catalog), settings.stream);
        Self {
            router: ModelRouter::new(Arc::clone(&backend), Arc::clone(&catalog), settings.router),
            merger: MultiStreamMerger::new(adapter.clone()),
            adapter,
            summarizer: TitleSummarizer::new(backend, Arc::clone(&catalog), settings.summarizer),
            limits: settings.limits,
            catalog,
        }
    }

    /// Model catalog in use
    #[must_use]
    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Validate a request without starting any work
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn prepare(&self, request: ChatRequest) -> Result<PreparedRequest, RelayError> {
        let validated = validate_request(&request, &self.limits)?;
        Ok(PreparedRequest { request, validated })
    }

    /// Start a prepared request
    ///
    /// Spawns the title task immediately; routing and model streams start
    /// when the returned stream is first polled. Must be called from within
    /// a Tokio runtime.
    #[must_use]
    pub fn launch(&self, prepared: PreparedRequest) -> RelayStream {
        let PreparedRequest { request, validated } = prepared;
        let ValidatedRequest { api_key, selection } = validated;

        let user_turn = request.user_turn();
        let mut turns: Vec<ChatTurn> = Vec::with_capacity(request.conversation_history.len() + 2);
        if let Some(prompt) = request.system_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            turns.push(ChatTurn::system(prompt));
        }
        turns.extend(request.conversation_history.iter().cloned());
        turns.push(user_turn);

        let title = request.wants_title().then(|| {
            let summarizer = self.summarizer.clone();
            let fallback = summarizer.fallback(&turns);
            let title_turns = turns.clone();
            let key = api_key.clone();
            let mut tasks = JoinSet::new();
            tasks.spawn(async move { summarizer.summarize(&title_turns, &key).await });
            TitleTask { tasks, fallback }
        });

        let conversation = Arc::new(
            Conversation::new(turns.iter().map(ChatTurn::to_upstream).collect(), api_key)
                .with_tools(request.tools)
                .with_image_options(request.image_options),
        );

        let phase = match selection {
            ModelSelection::Auto => Phase::Routing,
            ModelSelection::Manual(models) => Phase::Launch(models),
        };

        tracing::info!(
            mode = ?request.mode,
            history_turns = request.conversation_history.len(),
            attachments = request.attachments.len(),
            title = title.is_some(),
            "Relay request started"
        );

        RelayStream {
            phase,
            user_text: request.message,
            attachments: request.attachments,
            conversation,
            router: self.router.clone(),
            adapter: self.adapter.clone(),
            merger: self.merger.clone(),
            title,
        }
    }

    /// Validate and start a request
    ///
    /// # Errors
    ///
    /// Returns the first validation failure; nothing is started in that case.
    pub fn start(&self, request: ChatRequest) -> Result<RelayStream, RelayError> {
        let prepared = self.prepare(request)?;
        Ok(self.launch(prepared))
    }
}

/// Background title generation with its precomputed fallback
struct TitleTask {
    tasks: JoinSet<String>,
    fallback: String,
}

impl TitleTask {
    async fn title(mut self) -> String {
        match self.tasks.join_next().await {
            Some(Ok(title)) => title,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Title task failed, using fallback");
                self.fallback
            }
            None => self.fallback,
        }
    }
}

enum Phase {
    Routing,
    Launch(Vec<ModelId>),
    Single(SubStream),
    Multi(MergedStream),
    Title,
    Done,
}

/// Request-scoped event stream
///
/// Dropping it aborts the model streams and the title task.
pub struct RelayStream {
    phase: Phase,
    user_text: String,
    attachments: Vec<Attachment>,
    conversation: Arc<Conversation>,
    router: ModelRouter,
    adapter: StreamAdapter,
    merger: MultiStreamMerger,
    title: Option<TitleTask>,
}

impl RelayStream {
    /// Next event, or `None` when the response is complete
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            match &mut self.phase {
                Phase::Routing => {
                    let decision = self
                        .router
                        .route(&self.user_text, &self.attachments, &self.conversation.api_key)
                        .await;
                    let event = StreamEvent::Router {
                        chosen_model: decision.model.to_string(),
                        reasoning: decision.reasoning,
                    };
                    self.phase = Phase::Launch(vec![decision.model]);
                    return Some(event);
                }
                Phase::Launch(models) => {
                    let models = std::mem::take(models);
                    let conversation = Arc::clone(&self.conversation);
                    self.phase = match models.as_slice() {
                        [single] => Phase::Single(self.adapter.spawn(single.clone(), conversation)),
                        _ => Phase::Multi(self.merger.merge(&models, conversation)),
                    };
                }
                Phase::Single(sub) => match sub.next_event().await {
                    Some(event) => return Some(event),
                    None => self.phase = Phase::Title,
                },
                Phase::Multi(merged) => match merged.next_event().await {
                    Some(event) => return Some(event),
                    None => self.phase = Phase::Title,
                },
                Phase::Title => {
                    self.phase = Phase::Done;
                    if let Some(task) = self.title.take() {
                        return Some(StreamEvent::Summary {
                            title: task.title().await,
                        });
                    }
                }
                Phase::Done => return None,
            }
        }
    }

    /// Adapt into a `Stream` for the wire encoder
    pub fn into_stream(self) -> impl Stream<Item = StreamEvent> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next_event().await.map(|event| (event, stream))
        })
    }
}
