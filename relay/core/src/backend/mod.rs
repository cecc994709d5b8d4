//! Upstream Backend Integration
//!
//! Access to the chat-completions aggregation API through a common trait, so
//! the router, adapters and summarizer never touch HTTP directly.
//!
//! # Usage
//!
//! ```ignore
//! use relay_core::backend::{ChatBackend, CompletionRequest, OpenRouterBackend, OpenRouterConfig};
//!
//! let backend = OpenRouterBackend::new(OpenRouterConfig::default())?;
//! let request = CompletionRequest::new("openai/gpt-4o-mini", messages).with_api_key(key);
//! let mut chunks = backend.stream(&request).await?;
//! ```

mod error;
mod openrouter;
mod traits;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::UpstreamError;
pub use openrouter::{OpenRouterBackend, OpenRouterConfig, DEFAULT_BASE_URL};
pub use traits::{
    ApiErrorBody, ChatBackend, ChunkChoice, ChunkDelta, ChunkStream, CompletionRequest,
    CompletionResponse, DeltaContent, DeltaImage, DeltaImageUrl, DeltaPart, ImageConfig,
    StreamChunk, Usage,
};
