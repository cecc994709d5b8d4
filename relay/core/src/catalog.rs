//! Model Catalog
//!
//! Immutable table of per-model pricing and capabilities, built once at
//! startup and shared by `Arc` with the router, the stream adapter and the
//! summarizer. Lookups never fail: unknown models fall back to default
//! pricing and are treated as having no special capabilities.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::messages::{ModelId, ModelIdError};

/// Prices in USD per million tokens
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Input (prompt) price per million tokens
    pub input_per_million: f64,
    /// Output (completion) price per million tokens
    pub output_per_million: f64,
}

impl ModelPricing {
    /// Create a pricing entry from per-million prices
    #[must_use]
    pub const fn per_million(input: f64, output: f64) -> Self {
        Self {
            input_per_million: input,
            output_per_million: output,
        }
    }

    /// Cost of a call in USD
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cost(&self, tokens_in: u64, tokens_out: u64) -> f64 {
        (tokens_in as f64 * self.input_per_million + tokens_out as f64 * self.output_per_million)
            / 1_000_000.0
    }
}

impl Default for ModelPricing {
    fn default() -> Self {
        Self::per_million(1.0, 2.0)
    }
}

/// Catalog entry for one model
#[derive(Clone, Debug, PartialEq)]
pub struct ModelEntry {
    /// Model identifier (without modifier)
    pub id: ModelId,
    /// Token pricing
    pub pricing: ModelPricing,
    /// Whether the router may pick this model in auto mode
    pub auto_select: bool,
    /// What the model is good at, shown to the router
    pub description: String,
    /// Whether the model can return images
    pub image_output: bool,
}

/// Role assignments for the fixed models the relay relies on
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRoles {
    /// Fallback for auto mode
    pub default_model: ModelId,
    /// Model that runs the routing classifier
    pub router_model: ModelId,
    /// Model chosen for image/video input
    pub vision_model: ModelId,
    /// Model chosen for image-generation prompts
    pub image_generation_model: ModelId,
    /// Model that writes conversation titles
    pub title_model: ModelId,
}

impl Default for ModelRoles {
    fn default() -> Self {
        Self {
            default_model: builtin_id("openai/gpt-4o-mini"),
            router_model: builtin_id("openai/gpt-4o-mini"),
            vision_model: builtin_id("openai/gpt-4o"),
            image_generation_model: builtin_id("google/gemini-2.5-flash-image-preview"),
            title_model: builtin_id("openai/gpt-4o-mini"),
        }
    }
}

/// Built-in ids are literals known to be well formed
fn builtin_id(raw: &'static str) -> ModelId {
    match ModelId::parse(raw) {
        Ok(id) => id,
        Err(err) => unreachable!("built-in model id {raw} is invalid: {err}"),
    }
}

/// (id, input $/M, output $/M, auto-select, image output, description)
const BUILTIN_MODELS: &[(&str, f64, f64, bool, bool, &str)] = &[
    (
        "openai/gpt-4o-mini",
        0.15,
        0.60,
        true,
        false,
        "Fast and inexpensive. Quick questions, casual chat, short rewrites.",
    ),
    (
        "openai/gpt-4o",
        2.50,
        10.00,
        true,
        false,
        "Strong general-purpose model with vision. Broad knowledge and nuanced writing.",
    ),
    (
        "anthropic/claude-sonnet-4",
        3.00,
        15.00,
        true,
        false,
        "Best for coding, debugging, technical writing and careful analysis.",
    ),
    (
        "google/gemini-2.5-pro",
        1.25,
        10.00,
        true,
        false,
        "Very long context. Large documents, summarizing long inputs.",
    ),
    (
        "deepseek/deepseek-r1",
        0.55,
        2.19,
        true,
        false,
        "Step-by-step reasoning. Math, logic puzzles, proofs.",
    ),
    (
        "perplexity/sonar",
        1.00,
        1.00,
        true,
        false,
        "Live web search. Current events, recent facts, citations.",
    ),
    (
        "google/gemini-2.5-flash-image-preview",
        0.30,
        2.50,
        false,
        true,
        "Image generation and editing.",
    ),
];

/// Immutable pricing and capability table
#[derive(Clone, Debug)]
pub struct ModelCatalog {
    entries: Vec<ModelEntry>,
    index: HashMap<String, usize>,
    default_pricing: ModelPricing,
    roles: ModelRoles,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        ModelCatalogBuilder::with_builtins().build()
    }
}

impl ModelCatalog {
    /// Start an empty builder
    #[must_use]
    pub fn builder() -> ModelCatalogBuilder {
        ModelCatalogBuilder::default()
    }

    /// Entry for a model, ignoring any `:modifier`
    #[must_use]
    pub fn get(&self, model: &ModelId) -> Option<&ModelEntry> {
        self.index
            .get(model.as_str())
            .or_else(|| self.index.get(model.base()))
            .map(|&i| &self.entries[i])
    }

    /// Pricing for a model, falling back to default rates
    #[must_use]
    pub fn pricing_for(&self, model: &ModelId) -> ModelPricing {
        self.get(model)
            .map_or(self.default_pricing, |entry| entry.pricing)
    }

    /// Cost in USD of a call to `model`
    #[must_use]
    pub fn cost_for(&self, model: &ModelId, tokens_in: u64, tokens_out: u64) -> f64 {
        self.pricing_for(model).cost(tokens_in, tokens_out)
    }

    /// Whether the router may pick this model
    #[must_use]
    pub fn is_auto_selectable(&self, model: &ModelId) -> bool {
        self.get(model).is_some_and(|entry| entry.auto_select)
    }

    /// Models the router may pick, in catalog order
    pub fn auto_models(&self) -> impl Iterator<Item = &ModelEntry> {
        self.entries.iter().filter(|entry| entry.auto_select)
    }

    /// Whether the model can return images
    #[must_use]
    pub fn supports_image_output(&self, model: &ModelId) -> bool {
        self.get(model).is_some_and(|entry| entry.image_output)
    }

    /// Fixed role assignments
    #[must_use]
    pub fn roles(&self) -> &ModelRoles {
        &self.roles
    }

    /// Pricing used for unknown models
    #[must_use]
    pub fn default_pricing(&self) -> ModelPricing {
        self.default_pricing
    }

    /// Number of known models
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog has no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builder for [`ModelCatalog`]
#[derive(Clone, Debug, Default)]
pub struct ModelCatalogBuilder {
    entries: Vec<ModelEntry>,
    default_pricing: ModelPricing,
    roles: ModelRoles,
}

impl ModelCatalogBuilder {
    /// Builder pre-populated with the built-in model table
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut builder = Self::default();
        for &(id, input, output, auto_select, image_output, description) in BUILTIN_MODELS {
            builder = builder.model(ModelEntry {
                id: builtin_id(id),
                pricing: ModelPricing::per_million(input, output),
                auto_select,
                description: description.to_string(),
                image_output,
            });
        }
        builder
    }

    /// Add or replace a model entry
    #[must_use]
    pub fn model(mut self, entry: ModelEntry) -> Self {
        match self.entries.iter_mut().find(|e| e.id.base() == entry.id.base()) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
        self
    }

    /// Add a model from raw parts
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is not a valid model identifier.
    pub fn model_raw(
        self,
        id: &str,
        pricing: ModelPricing,
        auto_select: bool,
        description: impl Into<String>,
    ) -> Result<Self, ModelIdError> {
        let id = ModelId::parse(id)?;
        Ok(self.model(ModelEntry {
            id,
            pricing,
            auto_select,
            description: description.into(),
            image_output: false,
        }))
    }

    /// Set pricing for unknown models
    #[must_use]
    pub fn default_pricing(mut self, pricing: ModelPricing) -> Self {
        self.default_pricing = pricing;
        self
    }

    /// Set role assignments
    #[must_use]
    pub fn roles(mut self, roles: ModelRoles) -> Self {
        self.roles = roles;
        self
    }

    /// Freeze into a catalog
    #[must_use]
    pub fn build(self) -> ModelCatalog {
        let index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.id.base().to_string(), i))
            .collect();

        ModelCatalog {
            entries: self.entries,
            index,
            default_pricing: self.default_pricing,
            roles: self.roles,
        }
    }
}
