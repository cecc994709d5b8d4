//! Model Routing
//!
//! Chooses the backend model for auto-mode requests.
//!
//! # Architecture
//!
//! ```text
//! user turn ──▶ route_heuristic ──(match)──▶ vision / image-generation model
//!                     │
//!                  (no match)
//!                     ▼
//!              classifier call ──▶ first_json_object ──▶ allow-list check
//!                     │                                        │
//!               (error/timeout)                          (bad/unknown)
//!                     └──────────────▶ default model ◀─────────┘
//! ```

pub mod extract;
mod router;

pub use extract::first_json_object;
pub use router::{
    classifier_prompt, parse_classifier_reply, route_heuristic, ModelRouter, RouterConfig,
    RoutingDecision, CLASSIFIER_MAX_TOKENS, CLASSIFIER_TEMPERATURE, REASON_IMAGE_GENERATION,
    REASON_PARSE_FAILED, REASON_ROUTER_ERROR, REASON_VISUAL,
};
