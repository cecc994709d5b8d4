//! Request Validation
//!
//! Synchronous checks run before any upstream call. A request that fails
//! here never opens a stream.

use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::messages::{ChatMode, ChatRequest, ModelId};

/// Required prefix of upstream API keys
pub const API_KEY_PREFIX: &str = "sk-or-";

const API_KEY_MIN_LEN: usize = 20;
const API_KEY_MAX_LEN: usize = 200;

/// Size limits applied to inbound requests
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLimits {
    /// Maximum characters in the new message
    pub max_message_chars: usize,
    /// Maximum models in one manual request
    pub max_models: usize,
    /// Maximum attachments on the new message
    pub max_attachments: usize,
    /// Maximum prior turns
    pub max_history_turns: usize,
    /// Models callers may request; empty allows any well-formed id
    pub allowed_models: Vec<ModelId>,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_message_chars: 32_000,
            max_models: 5,
            max_attachments: 10,
            max_history_turns: 100,
            allowed_models: Vec::new(),
        }
    }
}

impl RequestLimits {
    /// Restrict requests to these models
    #[must_use]
    pub fn with_allowed_models(mut self, models: Vec<ModelId>) -> Self {
        self.allowed_models = models;
        self
    }

    /// Set the model cap
    #[must_use]
    pub fn with_max_models(mut self, max: usize) -> Self {
        self.max_models = max;
        self
    }

    fn allows(&self, model: &ModelId) -> bool {
        self.allowed_models.is_empty()
            || self
                .allowed_models
                .iter()
                .any(|allowed| allowed == model || allowed.as_str() == model.base())
    }
}

/// How the models for a request will be chosen
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelSelection {
    /// The router picks one model
    Auto,
    /// The caller's models, de-duplicated in order
    Manual(Vec<ModelId>),
}

/// A request that passed validation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedRequest {
    /// Upstream key, trimmed
    pub api_key: String,
    /// Model selection
    pub selection: ModelSelection,
}

/// Whether `key` has the shape of an upstream API key
#[must_use]
pub fn is_valid_api_key(key: &str) -> bool {
    key.starts_with(API_KEY_PREFIX)
        && (API_KEY_MIN_LEN..=API_KEY_MAX_LEN).contains(&key.len())
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Validate a request against `limits`
///
/// # Errors
///
/// Returns the first [`RelayError`] the request violates.
pub fn validate_request(
    request: &ChatRequest,
    limits: &RequestLimits,
) -> Result<ValidatedRequest, RelayError> {
    if request.message.trim().is_empty() && request.attachments.is_empty() {
        return Err(RelayError::MissingMessage);
    }

    let len = request.message.chars().count();
    if len > limits.max_message_chars {
        return Err(RelayError::MessageTooLong {
            len,
            max: limits.max_message_chars,
        });
    }

    if request.attachments.len() > limits.max_attachments {
        return Err(RelayError::TooManyAttachments {
            count: request.attachments.len(),
            max: limits.max_attachments,
        });
    }

    let api_key = match request.api_key.as_deref().map(str::trim) {
        None | Some("") => return Err(RelayError::MissingApiKey),
        Some(key) if !is_valid_api_key(key) => return Err(RelayError::InvalidApiKey),
        Some(key) => key.to_string(),
    };

    let selection = match request.mode {
        ChatMode::Auto => ModelSelection::Auto,
        ChatMode::Manual => ModelSelection::Manual(validate_models(&request.models, limits)?),
    };

    if request.conversation_history.len() > limits.max_history_turns {
        return Err(RelayError::HistoryTooLong {
            len: request.conversation_history.len(),
            max: limits.max_history_turns,
        });
    }

    Ok(ValidatedRequest { api_key, selection })
}

fn validate_models(raw: &[String], limits: &RequestLimits) -> Result<Vec<ModelId>, RelayError> {
    let mut models: Vec<ModelId> = Vec::with_capacity(raw.len());
    for entry in raw {
        let model = ModelId::parse(entry.as_str()).map_err(|e| RelayError::ModelNotAllowed {
            model: entry.clone(),
            reason: e.to_string(),
        })?;
        if !models.contains(&model) {
            models.push(model);
        }
    }

    if models.is_empty() {
        return Err(RelayError::NoModels);
    }
    if models.len() > limits.max_models {
        return Err(RelayError::TooManyModels {
            count: models.len(),
            max: limits.max_models,
        });
    }
    if let Some(model) = models.iter().find(|m| !limits.allows(m)) {
        return Err(RelayError::ModelNotAllowed {
            model: model.to_string(),
            reason: "not in the allowed model list".to_string(),
        });
    }

    Ok(models)
}
