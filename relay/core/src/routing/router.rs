//! Auto-mode model routing
//!
//! Cheap heuristics first (attachments, image-generation phrasing), then a
//! single classifier completion. Routing never fails: every problem falls
//! back to the catalog's default model with a reason saying why.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::extract::first_json_object;
use crate::backend::{ChatBackend, CompletionRequest};
use crate::catalog::ModelCatalog;
use crate::messages::{Attachment, ChatTurn, ModelId};

/// Classifier sampling temperature
pub const CLASSIFIER_TEMPERATURE: f32 = 0.1;

/// Classifier completion token cap
pub const CLASSIFIER_MAX_TOKENS: u32 = 150;

/// Reason given when visual attachments force the vision model
pub const REASON_VISUAL: &str = "Image/video content detected";
/// Reason given for image-generation prompts
pub const REASON_IMAGE_GENERATION: &str = "Image generation request detected";
/// Reason given when the classifier reply is not usable JSON
pub const REASON_PARSE_FAILED: &str = "Failed to parse router response, using default";
/// Reason given when the classifier call fails
pub const REASON_ROUTER_ERROR: &str = "Router error, using default";

/// Prompts that ask for an image to be produced
const IMAGE_GENERATION_PHRASES: &[&str] = &[
    "generate an image",
    "generate an image of",
    "create an image",
    "draw a picture",
    "draw a picture of",
    "make an image",
    "generate a picture",
    "create a picture",
    "generate a photo",
    "create a logo",
    "design an image",
    "illustrate",
    "paint a picture",
    "sketch a",
];

/// Router settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Deadline for the classifier call
    pub timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

impl RouterConfig {
    /// Set the classifier deadline
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// The model chosen for an auto-mode request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutingDecision {
    /// Chosen model
    pub model: ModelId,
    /// Why it was chosen
    pub reasoning: String,
}

impl RoutingDecision {
    fn new(model: ModelId, reasoning: impl Into<String>) -> Self {
        Self {
            model,
            reasoning: reasoning.into(),
        }
    }
}

/// Decide from the request alone, without any network call
///
/// Returns `None` when the classifier has to decide.
#[must_use]
pub fn route_heuristic(
    user_text: &str,
    attachments: &[Attachment],
    catalog: &ModelCatalog,
) -> Option<RoutingDecision> {
    let roles = catalog.roles();

    if attachments.iter().any(|a| a.kind.is_visual()) {
        return Some(RoutingDecision::new(roles.vision_model.clone(), REASON_VISUAL));
    }

    let text_lower = user_text.to_lowercase();
    if IMAGE_GENERATION_PHRASES
        .iter()
        .any(|phrase| text_lower.contains(phrase))
    {
        return Some(RoutingDecision::new(
            roles.image_generation_model.clone(),
            REASON_IMAGE_GENERATION,
        ));
    }

    None
}

/// Build the classifier system prompt from the catalog's auto-selectable models
#[must_use]
pub fn classifier_prompt(catalog: &ModelCatalog) -> String {
    let mut prompt = String::from(
        "You are a routing assistant. Pick the single best model for the user's message \
         from this list:\n\n",
    );
    for entry in catalog.auto_models() {
        let _ = writeln!(prompt, "- {}: {}", entry.id, entry.description);
    }
    let _ = write!(
        prompt,
        "\nGuidelines:\n\
         - Prefer the cheapest model that can answer well.\n\
         - Coding, debugging and technical analysis need a strong coding model.\n\
         - Math and logic puzzles need a reasoning model.\n\
         - Questions about current events need a model with web search.\n\
         - Very long inputs need a long-context model.\n\
         - Casual chat and quick facts should use {}.\n\n\
         Respond with JSON only, in the form \
         {{\"model\": \"<model id from the list>\", \"reasoning\": \"<one short sentence>\"}}",
        catalog.roles().default_model
    );
    prompt
}

#[derive(Deserialize)]
struct ClassifierReply {
    model: String,
    #[serde(default)]
    reasoning: String,
}

/// Interpret the classifier's raw reply
#[must_use]
pub fn parse_classifier_reply(reply: &str, catalog: &ModelCatalog) -> RoutingDecision {
    let default_model = catalog.roles().default_model.clone();

    let Some(parsed) = first_json_object(reply)
        .and_then(|json| serde_json::from_str::<ClassifierReply>(json).ok())
    else {
        return RoutingDecision::new(default_model, REASON_PARSE_FAILED);
    };

    match ModelId::parse(parsed.model.as_str()) {
        Ok(model) if catalog.is_auto_selectable(&model) => {
            let reasoning = if parsed.reasoning.trim().is_empty() {
                format!("Router selected {model}")
            } else {
                parsed.reasoning.trim().to_string()
            };
            RoutingDecision::new(model, reasoning)
        }
        _ => RoutingDecision::new(
            default_model,
            format!("Router selected unavailable model {}, using default", parsed.model),
        ),
    }
}

/// Picks the backend model for auto-mode requests
#[derive(Clone)]
pub struct ModelRouter {
    backend: Arc<dyn ChatBackend>,
    catalog: Arc<ModelCatalog>,
    config: RouterConfig,
}

impl ModelRouter {
    /// Create a router
    #[must_use]
    pub fn new(backend: Arc<dyn ChatBackend>, catalog: Arc<ModelCatalog>, config: RouterConfig) -> Self {
        Self {
            backend,
            catalog,
            config,
        }
    }

    /// Choose a model for the new user turn
    pub async fn route(
        &self,
        user_text: &str,
        attachments: &[Attachment],
        api_key: &str,
    ) -> RoutingDecision {
        if let Some(decision) = route_heuristic(user_text, attachments, &self.catalog) {
            tracing::debug!(model = %decision.model, reasoning = %decision.reasoning, "Heuristic route");
            return decision;
        }

        let router_model = &self.catalog.roles().router_model;
        let request = CompletionRequest::new(
            router_model.as_str(),
            vec![
                ChatTurn::system(classifier_prompt(&self.catalog)).to_upstream(),
                ChatTurn::user(user_text).to_upstream(),
            ],
        )
        .with_api_key(api_key)
        .with_temperature(CLASSIFIER_TEMPERATURE)
        .with_max_tokens(CLASSIFIER_MAX_TOKENS);

        let outcome = tokio::time::timeout(self.config.timeout, self.backend.complete(&request)).await;

        let decision = match outcome {
            Ok(Ok(response)) => parse_classifier_reply(&response.content, &self.catalog),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Router classifier call failed");
                RoutingDecision::new(self.catalog.roles().default_model.clone(), REASON_ROUTER_ERROR)
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX),
                    "Router classifier timed out"
                );
                RoutingDecision::new(self.catalog.roles().default_model.clone(), REASON_ROUTER_ERROR)
            }
        };

        tracing::info!(model = %decision.model, reasoning = %decision.reasoning, "Routed request");
        decision
    }
}
