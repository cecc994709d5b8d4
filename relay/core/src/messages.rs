//! Request and Conversation Types
//!
//! Types describing what a caller sends to the relay: the inbound chat
//! request, the conversation turns it carries, attachments, and model
//! identities.
//!
//! Everything here is request-scoped. The relay keeps no conversation state
//! between calls; the caller supplies the full history every time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Model Identity
// ============================================================================

/// Errors produced when parsing a [`ModelId`]
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ModelIdError {
    /// The identifier was empty
    #[error("model id is empty")]
    Empty,
    /// The identifier has no `provider/` prefix
    #[error("model id '{0}' must have the form provider/model")]
    MissingProvider(String),
    /// The identifier contains whitespace or an empty segment
    #[error("model id '{0}' is malformed")]
    Malformed(String),
}

/// Upstream model identity in `provider/model[:modifier]` form
///
/// Used as the correlation key for every event a backend produces within a
/// multi-model run. The optional modifier (e.g. `:online`) is passed through
/// to the upstream API untouched.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelId(String);

impl ModelId {
    /// Parse and validate a model identifier
    ///
    /// # Errors
    ///
    /// Returns a [`ModelIdError`] if the id is empty, lacks a provider, or
    /// contains whitespace or empty segments.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ModelIdError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ModelIdError::Empty);
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(ModelIdError::Malformed(raw));
        }

        let Some((provider, rest)) = trimmed.split_once('/') else {
            return Err(ModelIdError::MissingProvider(raw));
        };
        let name = rest.split_once(':').map_or(rest, |(name, _)| name);
        let modifier_ok = rest.split_once(':').map_or(true, |(_, m)| !m.is_empty());

        if provider.is_empty() || name.is_empty() || !modifier_ok {
            return Err(ModelIdError::Malformed(raw));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// The full identifier, including any modifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Provider segment (`openai` in `openai/gpt-4o`)
    #[must_use]
    pub fn provider(&self) -> &str {
        self.0.split_once('/').map_or("", |(provider, _)| provider)
    }

    /// Modifier after the colon, if any (`online` in `x/y:online`)
    #[must_use]
    pub fn modifier(&self) -> Option<&str> {
        self.0.split_once(':').map(|(_, modifier)| modifier)
    }

    /// Identifier without the modifier, used for catalog lookups
    #[must_use]
    pub fn base(&self) -> &str {
        self.0.split_once(':').map_or(&self.0, |(base, _)| base)
    }

    /// Whether the `:online` web-search modifier is set
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.modifier() == Some("online")
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ModelId {
    type Err = ModelIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ModelId {
    type Error = ModelIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ModelId> for String {
    fn from(id: ModelId) -> Self {
        id.0
    }
}

// ============================================================================
// Conversation Turns
// ============================================================================

/// Who authored a turn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The human caller
    User,
    /// A model response
    Assistant,
    /// Instructions that frame the conversation
    System,
}

/// Reference to an image by URL or inline data URI
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    /// HTTP(S) URL or `data:` URI
    pub url: String,
}

/// Inline file payload forwarded upstream
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePart {
    /// Original file name
    pub filename: String,
    /// `data:` URI holding the file contents
    pub file_data: String,
}

/// One part of a multimodal turn
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text
    Text {
        /// The text
        text: String,
    },
    /// An image reference
    ImageUrl {
        /// Where the image lives
        image_url: ImageUrl,
    },
    /// An inline file
    File {
        /// File payload
        file: FilePart,
    },
}

impl ContentPart {
    /// Create a text part
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create an image part
    pub fn image(url: impl Into<String>) -> Self {
        Self::ImageUrl {
            image_url: ImageUrl { url: url.into() },
        }
    }
}

/// Turn content: plain text or an ordered list of parts
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    /// Plain text content
    Text(String),
    /// Multimodal content
    Parts(Vec<ContentPart>),
}

impl Default for TurnContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl TurnContent {
    /// Concatenated text of the content, ignoring non-text parts
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Convert into an ordered part list
    #[must_use]
    pub fn into_parts(self) -> Vec<ContentPart> {
        match self {
            Self::Text(text) if text.is_empty() => Vec::new(),
            Self::Text(text) => vec![ContentPart::Text { text }],
            Self::Parts(parts) => parts,
        }
    }
}

/// Kind of media attached to a turn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    /// Still image
    Image,
    /// Video clip
    Video,
    /// Audio clip
    Audio,
    /// Any other document
    #[serde(other)]
    File,
}

impl AttachmentKind {
    /// Whether this attachment needs a vision-capable model
    #[must_use]
    pub fn is_visual(self) -> bool {
        matches!(self, Self::Image | Self::Video)
    }
}

/// Media attached to a turn
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Media kind
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    /// URL or `data:` URI
    pub url: String,
    /// MIME type, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Size in bytes, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Original file name, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Attachment {
    /// Create an image attachment
    pub fn image(url: impl Into<String>) -> Self {
        Self {
            kind: AttachmentKind::Image,
            url: url.into(),
            mime_type: None,
            size: None,
            name: None,
        }
    }

    /// Convert into the content part forwarded upstream
    #[must_use]
    pub fn to_part(&self) -> ContentPart {
        match self.kind {
            AttachmentKind::Image => ContentPart::image(self.url.clone()),
            _ if self.url.starts_with("data:") => ContentPart::File {
                file: FilePart {
                    filename: self
                        .name
                        .clone()
                        .unwrap_or_else(|| "attachment".to_string()),
                    file_data: self.url.clone(),
                },
            },
            _ => ContentPart::text(format!(
                "[Attached {}: {}]",
                self.name.as_deref().unwrap_or("file"),
                self.url
            )),
        }
    }
}

/// One turn of a conversation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Author of the turn
    pub role: MessageRole,
    /// Turn content
    #[serde(default)]
    pub content: TurnContent,
    /// Media attached to the turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl ChatTurn {
    /// Create a text turn
    pub fn new(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: TurnContent::Text(text.into()),
            attachments: Vec::new(),
        }
    }

    /// Create a user turn
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, text)
    }

    /// Create an assistant turn
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, text)
    }

    /// Create a system turn
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(MessageRole::System, text)
    }

    /// Attach media to the turn
    #[must_use]
    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Plain text of the turn
    #[must_use]
    pub fn text(&self) -> String {
        self.content.text()
    }

    /// Whether this is a system turn
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.role == MessageRole::System
    }

    /// Convert into the upstream message shape, folding attachments into parts
    #[must_use]
    pub fn to_upstream(&self) -> UpstreamMessage {
        if self.attachments.is_empty() {
            return UpstreamMessage {
                role: self.role,
                content: self.content.clone(),
            };
        }

        let mut parts = self.content.clone().into_parts();
        parts.extend(self.attachments.iter().map(Attachment::to_part));
        UpstreamMessage {
            role: self.role,
            content: TurnContent::Parts(parts),
        }
    }
}

/// A message in the shape the chat-completions API expects
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamMessage {
    /// Author
    pub role: MessageRole,
    /// Content (text or parts)
    pub content: TurnContent,
}

// ============================================================================
// Inbound Request
// ============================================================================

/// How the relay picks backend models
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    /// The router picks a single model
    #[default]
    Auto,
    /// The caller lists one or more models
    Manual,
}

/// Options for image-output models
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageOptions {
    /// Requested aspect ratio, e.g. `16:9`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
}

/// Body of `POST /api/chat`
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatRequest {
    /// The new user message
    pub message: String,
    /// Media attached to the new message
    pub attachments: Vec<Attachment>,
    /// Model selection mode
    pub mode: ChatMode,
    /// Models requested in manual mode
    pub models: Vec<String>,
    /// Caller's upstream API key
    pub api_key: Option<String>,
    /// Prior turns, oldest first
    pub conversation_history: Vec<ChatTurn>,
    /// Optional system prompt placed before the history
    pub system_prompt: Option<String>,
    /// Options for image-output models
    pub image_options: Option<ImageOptions>,
    /// Tool definitions forwarded upstream
    pub tools: Option<Vec<serde_json::Value>>,
    /// Whether to generate a conversation title
    pub generate_title: Option<bool>,
}

impl ChatRequest {
    /// Create a request for a single message in auto mode
    pub fn auto(message: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            api_key: Some(api_key.into()),
            ..Default::default()
        }
    }

    /// Create a manual-mode request for the given models
    pub fn manual(
        message: impl Into<String>,
        api_key: impl Into<String>,
        models: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            message: message.into(),
            api_key: Some(api_key.into()),
            mode: ChatMode::Manual,
            models: models.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// The new message as a turn, attachments included
    #[must_use]
    pub fn user_turn(&self) -> ChatTurn {
        ChatTurn::user(self.message.clone()).with_attachments(self.attachments.clone())
    }

    /// Whether a title should be generated for this request
    ///
    /// Defaults to the first turn of a conversation when the caller does not say.
    #[must_use]
    pub fn wants_title(&self) -> bool {
        self.generate_title
            .unwrap_or(self.conversation_history.is_empty())
    }
}
