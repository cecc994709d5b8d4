//! Upstream Backend Traits
//!
//! Trait and wire types for the chat-completions API the relay forwards to.
//! The relay only depends on [`ChatBackend`]; the HTTP implementation lives
//! in [`super::OpenRouterBackend`] and tests substitute scripted backends.

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use super::error::UpstreamError;
use crate::messages::UpstreamMessage;

/// Decoded chunks from one streaming completion, ending before `[DONE]`
pub type ChunkStream = BoxStream<'static, Result<StreamChunk, UpstreamError>>;

/// Image generation settings sent to image-output models
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Aspect ratio such as `1:1` or `16:9`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
}

/// A chat-completions request
#[derive(Clone, Default, Serialize)]
pub struct CompletionRequest {
    /// Upstream model id
    pub model: String,
    /// Conversation
    pub messages: Vec<UpstreamMessage>,
    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Completion token cap
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Tool definitions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<serde_json::Value>>,
    /// Output modalities for image-output models
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
    /// Image settings for image-output models
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_config: Option<ImageConfig>,
    /// Bearer key, never serialized into the body
    #[serde(skip)]
    pub api_key: String,
}

impl fmt::Debug for CompletionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionRequest")
            .field("model", &self.model)
            .field("messages", &self.messages.len())
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("tools", &self.tools.as_ref().map(Vec::len))
            .field("modalities", &self.modalities)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl CompletionRequest {
    /// Create a request for a model and conversation
    pub fn new(model: impl Into<String>, messages: Vec<UpstreamMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Default::default()
        }
    }

    /// Set the bearer key
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Attach tool definitions; an empty list means no tools
    #[must_use]
    pub fn with_tools(mut self, tools: Option<Vec<serde_json::Value>>) -> Self {
        self.tools = tools.filter(|t| !t.is_empty());
        self
    }

    /// Ask an image-output model for images and text
    #[must_use]
    pub fn with_image_output(mut self, image_config: Option<ImageConfig>) -> Self {
        self.modalities = Some(vec!["image".to_string(), "text".to_string()]);
        self.image_config = image_config.filter(|c| c.aspect_ratio.is_some());
        self
    }

    /// Whether tool definitions are attached
    #[must_use]
    pub fn has_tools(&self) -> bool {
        self.tools.is_some()
    }
}

/// Token usage reported by the upstream
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize)]
pub struct Usage {
    /// Prompt tokens
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Completion tokens
    #[serde(default)]
    pub completion_tokens: u64,
}

/// Result of a non-streaming completion
#[derive(Clone, Debug)]
pub struct CompletionResponse {
    /// Assistant text
    pub content: String,
    /// Model that answered
    pub model: String,
    /// Usage, if reported
    pub usage: Option<Usage>,
    /// Round-trip time in milliseconds
    pub duration_ms: u64,
}

/// Error object embedded in a response or stream chunk
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ApiErrorBody {
    /// Error message
    #[serde(default)]
    pub message: String,
    /// Provider error code, number or string
    #[serde(default)]
    pub code: Option<serde_json::Value>,
}

/// Image reference inside a delta
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct DeltaImageUrl {
    /// URL or data URI
    pub url: String,
}

/// One part of an array-typed delta
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeltaPart {
    /// Text part
    Text {
        /// Text
        #[serde(default)]
        text: String,
    },
    /// Inline image part
    ImageUrl {
        /// Image reference
        image_url: DeltaImageUrl,
    },
    /// Anything else the relay does not render
    #[serde(other)]
    Other,
}

/// Delta content: a string or an array of parts
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DeltaContent {
    /// Text delta
    Text(String),
    /// Multimodal delta
    Parts(Vec<DeltaPart>),
}

/// Image emitted by image-output models alongside the text delta
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct DeltaImage {
    /// Image reference
    pub image_url: DeltaImageUrl,
}

/// Incremental message content
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ChunkDelta {
    /// Content delta
    #[serde(default)]
    pub content: Option<DeltaContent>,
    /// Generated images
    #[serde(default)]
    pub images: Vec<DeltaImage>,
}

/// One choice inside a chunk
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ChunkChoice {
    /// Content delta
    #[serde(default)]
    pub delta: Option<ChunkDelta>,
    /// Why generation stopped, on the last content chunk
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// One decoded `data:` payload of a streaming completion
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct StreamChunk {
    /// Choices (normally one)
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    /// Usage, present on the terminal chunk
    #[serde(default)]
    pub usage: Option<Usage>,
    /// Error reported mid-stream
    #[serde(default)]
    pub error: Option<ApiErrorBody>,
}

impl StreamChunk {
    /// Chunk carrying a single text delta
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            choices: vec![ChunkChoice {
                delta: Some(ChunkDelta {
                    content: Some(DeltaContent::Text(text.into())),
                    images: Vec::new(),
                }),
                finish_reason: None,
            }],
            ..Default::default()
        }
    }

    /// Terminal chunk carrying usage only
    #[must_use]
    pub fn usage(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            usage: Some(Usage {
                prompt_tokens,
                completion_tokens,
            }),
            ..Default::default()
        }
    }

    /// Parse a `data:` payload
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Decode`] if the payload is not a chunk object.
    pub fn parse(data: &str) -> Result<Self, UpstreamError> {
        serde_json::from_str(data)
            .map_err(|e| UpstreamError::Decode(format!("{e}: {}", truncate_for_log(data))))
    }
}

/// Trim payloads before they go into error messages
pub(crate) fn truncate_for_log(text: &str) -> String {
    const LIMIT: usize = 200;
    if text.chars().count() <= LIMIT {
        text.to_string()
    } else {
        let cut: String = text.chars().take(LIMIT).collect();
        format!("{cut}...")
    }
}

/// Chat-completions backend
///
/// Implementations own connection handling, timeouts and translation of
/// transport failures into [`UpstreamError`].
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Send a request and wait for the full response
    async fn complete(&self, request: &CompletionRequest)
        -> Result<CompletionResponse, UpstreamError>;

    /// Send a request and stream decoded chunks
    ///
    /// Dropping the returned stream releases the underlying connection.
    async fn stream(&self, request: &CompletionRequest) -> Result<ChunkStream, UpstreamError>;
}
