//! Stream Events
//!
//! The normalized event vocabulary every relay response is made of. Each
//! backend's sub-stream is a sequence of `content*` followed by `stats` or
//! `error`, then `done`. A multi-model response adds a final
//! `done{model: "multi"}` carrying [`AggregateStats`].
//!
//! Events serialize as JSON objects tagged by `type`:
//!
//! ```text
//! {"type":"content","model":"openai/gpt-4o","text":"Hel"}
//! {"type":"stats","model":"openai/gpt-4o","tokensIn":12,"tokensOut":40,"cost":0.0004,"latencyMs":1830}
//! {"type":"done","model":"openai/gpt-4o"}
//! {"type":"summary","title":"Rust Borrow Checker Basics"}
//! ```

use serde::{Deserialize, Serialize};

/// Model tag used on the final `done` event of a multi-model response
pub const MULTI_MODEL_TAG: &str = "multi";

/// Usage and cost for one backend model
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStats {
    /// Model the stats belong to
    pub model: String,
    /// Prompt tokens
    pub tokens_in: u64,
    /// Completion tokens
    pub tokens_out: u64,
    /// Cost in USD
    pub cost: f64,
    /// Wall-clock time from request to end of stream
    pub latency_ms: u64,
}

/// Totals across all models that took part in one request
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    /// Sum of prompt tokens
    pub total_tokens_in: u64,
    /// Sum of completion tokens
    pub total_tokens_out: u64,
    /// Sum of cost in USD
    pub total_cost: f64,
    /// Mean latency over models that reported stats
    pub average_latency_ms: f64,
    /// Number of models that reported stats
    pub models_completed: usize,
}

impl AggregateStats {
    /// Aggregate a set of per-model stats
    #[must_use]
    pub fn from_stats<'a>(stats: impl IntoIterator<Item = &'a ModelStats>) -> Self {
        let mut accumulator = AggregateAccumulator::default();
        for entry in stats {
            accumulator.record(entry);
        }
        accumulator.finish()
    }
}

/// Running totals, finished into [`AggregateStats`]
///
/// Models that errored never call [`record`](Self::record), so they do not
/// count towards the latency divisor.
#[derive(Clone, Debug, Default)]
pub struct AggregateAccumulator {
    tokens_in: u64,
    tokens_out: u64,
    cost: f64,
    latency_sum_ms: u64,
    samples: usize,
}

impl AggregateAccumulator {
    /// Add one model's stats
    pub fn record(&mut self, stats: &ModelStats) {
        self.tokens_in += stats.tokens_in;
        self.tokens_out += stats.tokens_out;
        self.cost += stats.cost;
        self.latency_sum_ms += stats.latency_ms;
        self.samples += 1;
    }

    /// Number of models recorded so far
    #[must_use]
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Produce the aggregate; all zeros when nothing was recorded
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn finish(&self) -> AggregateStats {
        let average_latency_ms = if self.samples == 0 {
            0.0
        } else {
            self.latency_sum_ms as f64 / self.samples as f64
        };

        AggregateStats {
            total_tokens_in: self.tokens_in,
            total_tokens_out: self.tokens_out,
            total_cost: self.cost,
            average_latency_ms,
            models_completed: self.samples,
        }
    }
}

/// One event on the relay's output stream
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    /// Text from a model
    Content {
        /// Producing model
        model: String,
        /// Text delta
        text: String,
    },
    /// Usage and cost for a model, emitted once after its content
    Stats(ModelStats),
    /// A model failed; its sub-stream ends after this
    Error {
        /// Failing model
        model: String,
        /// Human-readable failure description
        message: String,
    },
    /// End of a sub-stream, or of the whole multi-model run
    Done {
        /// Model id, or [`MULTI_MODEL_TAG`]
        model: String,
        /// Totals, only on the multi-model terminal event
        #[serde(default, skip_serializing_if = "Option::is_none")]
        aggregate: Option<AggregateStats>,
    },
    /// Auto-mode routing decision
    Router {
        /// Model the router picked
        chosen_model: String,
        /// Why it was picked
        reasoning: String,
    },
    /// Generated conversation title
    Summary {
        /// The title
        title: String,
    },
}

impl StreamEvent {
    /// Create a content event
    pub fn content(model: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Content {
            model: model.into(),
            text: text.into(),
        }
    }

    /// Create an error event
    pub fn error(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            model: model.into(),
            message: message.into(),
        }
    }

    /// Create a per-model done event
    pub fn done(model: impl Into<String>) -> Self {
        Self::Done {
            model: model.into(),
            aggregate: None,
        }
    }

    /// Create the terminal multi-model done event
    #[must_use]
    pub fn done_multi(aggregate: AggregateStats) -> Self {
        Self::Done {
            model: MULTI_MODEL_TAG.to_string(),
            aggregate: Some(aggregate),
        }
    }

    /// The model this event is attributed to, if any
    #[must_use]
    pub fn model(&self) -> Option<&str> {
        match self {
            Self::Content { model, .. } | Self::Error { model, .. } | Self::Done { model, .. } => {
                Some(model)
            }
            Self::Stats(stats) => Some(&stats.model),
            Self::Router { .. } | Self::Summary { .. } => None,
        }
    }

    /// Whether this is any `done` event
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }

    /// Short name of the variant, for logging
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Content { .. } => "content",
            Self::Stats(_) => "stats",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
            Self::Router { .. } => "router",
            Self::Summary { .. } => "summary",
        }
    }
}
