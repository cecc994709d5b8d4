//! Streaming Infrastructure for Multi-Model Responses
//!
//! Turns upstream chunk streams into the relay's [`StreamEvent`] vocabulary
//! and merges several of them into one output.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      MultiStreamMerger                            │
//! │                                                                   │
//! │  ┌───────────────┐  ┌───────────────┐  ┌───────────────┐          │
//! │  │ StreamAdapter │  │ StreamAdapter │  │ StreamAdapter │  JoinSet │
//! │  │  (model: A)   │  │  (model: B)   │  │  (model: C)   │          │
//! │  └───────┬───────┘  └───────┬───────┘  └───────┬───────┘          │
//! │          │ content*,stats|error,done            │                 │
//! │          └──────────────────┼───────────────────┘                 │
//! │                             ▼                                     │
//! │                bounded mpsc (arrival order)                       │
//! │                             │                                     │
//! │                             ▼                                     │
//! │        MergedStream ──▶ ... ──▶ done{multi, aggregate}            │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A single-model request skips the merger and reads one adapter's
//! [`SubStream`] directly.
//!
//! # Cancellation
//!
//! Dropping a [`SubStream`] or [`MergedStream`] drops its `JoinSet`, which
//! aborts every adapter task and with it the upstream HTTP response.

mod adapter;
mod merger;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

pub use adapter::{chunk_texts, markdown_image, AdapterOutcome, AdapterState, StreamAdapter};
pub use merger::{MergedStream, MultiStreamMerger};

use crate::events::StreamEvent;
use crate::messages::{ImageOptions, UpstreamMessage};

/// Timeouts and buffering for backend streams
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Maximum gap between two upstream chunks
    pub chunk_timeout: Duration,
    /// Maximum duration of one model's whole sub-stream
    pub stream_timeout: Duration,
    /// Capacity of the event channel
    pub channel_capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            chunk_timeout: Duration::from_secs(30),
            stream_timeout: Duration::from_secs(120),
            channel_capacity: 64,
        }
    }
}

impl StreamSettings {
    /// Set the per-chunk timeout
    #[must_use]
    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    /// Set the whole-stream timeout
    #[must_use]
    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }

    /// Set the channel capacity
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

/// Everything a backend needs to answer one user turn
///
/// Shared read-only by every adapter of a request.
#[derive(Clone)]
pub struct Conversation {
    /// Messages sent upstream, oldest first
    pub messages: Vec<UpstreamMessage>,
    /// Caller's upstream key
    pub api_key: String,
    /// Tool definitions, if any
    pub tools: Option<Vec<serde_json::Value>>,
    /// Options for image-output models
    pub image_options: Option<ImageOptions>,
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("messages", &self.messages.len())
            .field("tools", &self.tools.as_ref().map(Vec::len))
            .field("image_options", &self.image_options)
            .finish_non_exhaustive()
    }
}

impl Conversation {
    /// Conversation with no tools or image options
    pub fn new(messages: Vec<UpstreamMessage>, api_key: impl Into<String>) -> Self {
        Self {
            messages,
            api_key: api_key.into(),
            tools: None,
            image_options: None,
        }
    }

    /// Attach tool definitions
    #[must_use]
    pub fn with_tools(mut self, tools: Option<Vec<serde_json::Value>>) -> Self {
        self.tools = tools.filter(|t| !t.is_empty());
        self
    }

    /// Attach image options
    #[must_use]
    pub fn with_image_options(mut self, options: Option<ImageOptions>) -> Self {
        self.image_options = options;
        self
    }
}

/// One adapter's events, read directly
#[derive(Debug)]
pub struct SubStream {
    rx: mpsc::Receiver<StreamEvent>,
    _tasks: JoinSet<AdapterOutcome>,
}

impl SubStream {
    pub(crate) fn new(rx: mpsc::Receiver<StreamEvent>, tasks: JoinSet<AdapterOutcome>) -> Self {
        Self { rx, _tasks: tasks }
    }

    /// Next event, or `None` once the adapter has sent `done`
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }
}
