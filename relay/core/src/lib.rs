//! Relay Core - Multi-Model Streaming Chat Relay
//!
//! This crate implements the request pipeline behind `POST /api/chat`: it
//! validates a chat request, picks one or more backend models, streams their
//! completions from an OpenRouter-compatible upstream, and merges everything
//! into a single ordered event stream. It has no HTTP server dependencies;
//! the `relay-daemon` crate puts it on the network.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          ChatRelay                                │
//! │                                                                   │
//! │  ChatRequest ──▶ validate_request ──┬──(auto)──▶ ModelRouter      │
//! │                                     │                 │           │
//! │                                     │            router event     │
//! │                                     ▼                 ▼           │
//! │                    ┌────────────────────────────────────────┐     │
//! │                    │ StreamAdapter (1 model)                │     │
//! │                    │ MultiStreamMerger (N models)           │     │
//! │                    └──────────────────┬─────────────────────┘     │
//! │                                       │                           │
//! │        TitleSummarizer (background) ──┤                           │
//! │                                       ▼                           │
//! │                                  RelayStream                      │
//! └───────────────────────────────────────┼───────────────────────────┘
//!                                         │ StreamEvent
//!                                         ▼
//!                            wire::pump ──▶ SSE frames
//! ```
//!
//! # Key Types
//!
//! - [`ChatRelay`]: Entry point; validates and starts requests
//! - [`RelayStream`]: One request's ordered event stream
//! - [`StreamEvent`]: Events sent to the client
//! - [`ChatBackend`]: Upstream abstraction ([`OpenRouterBackend`] in production)
//! - [`ModelCatalog`]: Known models, pricing and role assignments
//! - [`CompositeRateLimiter`]: Per-caller and global request limits
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use relay_core::{ChatRelay, ChatRequest, ModelCatalog, OpenRouterBackend, OpenRouterConfig, RelaySettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = Arc::new(OpenRouterBackend::new(OpenRouterConfig::default())?);
//!     let relay = ChatRelay::new(backend, Arc::new(ModelCatalog::default()), RelaySettings::default());
//!
//!     let mut stream = relay.start(ChatRequest::auto("Hello!", "sk-or-v1-..."))?;
//!     while let Some(event) = stream.next_event().await {
//!         println!("{}", serde_json::to_string(&event)?);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: Upstream client abstraction and the OpenRouter implementation
//! - [`catalog`]: Model pricing, auto-selection allow-list and role models
//! - [`config`]: TOML + environment configuration
//! - [`error`]: Client-facing request errors
//! - [`events`]: Stream event vocabulary and statistics
//! - [`messages`]: Request, turn and model id types
//! - [`rate_limit`]: Fixed-window rate limiting
//! - [`relay`]: The request pipeline
//! - [`routing`]: Auto-mode model selection
//! - [`streaming`]: Per-model adapters and the multi-model merger
//! - [`summarizer`]: Conversation titles
//! - [`validation`]: Request validation
//! - [`wire`]: SSE framing

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod messages;
pub mod rate_limit;
pub mod relay;
pub mod routing;
pub mod streaming;
pub mod summarizer;
pub mod validation;
pub mod wire;

// Re-exports for convenience
pub use backend::{
    ChatBackend, CompletionRequest, CompletionResponse, OpenRouterBackend, OpenRouterConfig,
    StreamChunk, UpstreamError,
};
pub use catalog::{ModelCatalog, ModelEntry, ModelPricing, ModelRoles};
pub use error::RelayError;
pub use events::{AggregateStats, ModelStats, StreamEvent};
pub use messages::{
    Attachment, AttachmentKind, ChatMode, ChatRequest, ChatTurn, MessageRole, ModelId,
};
pub use relay::{ChatRelay, PreparedRequest, RelaySettings, RelayStream};
pub use validation::RequestLimits;

// Rate limiting exports
pub use rate_limit::{
    CompositeRateLimiter, LimitScope, RateLimitConfig, RateLimitDecision, RateLimiter,
    SweeperHandle,
};

// Streaming exports
pub use streaming::{Conversation, MultiStreamMerger, StreamAdapter, StreamSettings};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, RelayConfigFile, RelayToml,
};
