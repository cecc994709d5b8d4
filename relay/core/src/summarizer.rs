//! Conversation Title Summarizer
//!
//! Asks a small model for a short title. Best-effort: any failure produces a
//! fallback title from the first user message, so callers always get one.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::{ChatBackend, CompletionRequest};
use crate::catalog::ModelCatalog;
use crate::messages::{ChatTurn, MessageRole};

/// Title used when nothing better is available
pub const DEFAULT_TITLE: &str = "New Chat";

const TITLE_TEMPERATURE: f32 = 0.3;

const TITLE_PROMPT: &str = "Write a short, descriptive title (3-6 words) for the conversation below. \
Reply with the title only: no quotes, no punctuation at the end, no explanation.";

/// Summarizer settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarizerConfig {
    /// Recent non-system turns shown to the model
    pub max_turns: usize,
    /// Per-turn character cap
    pub max_chars_per_turn: usize,
    /// Completion token cap
    pub max_tokens: u32,
    /// Fallback title length before `...`
    pub fallback_title_chars: usize,
    /// Hard cap on the cleaned title
    pub max_title_chars: usize,
    /// Deadline for the title call
    pub timeout: Duration,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            max_turns: 6,
            max_chars_per_turn: 500,
            max_tokens: 30,
            fallback_title_chars: 50,
            max_title_chars: 60,
            timeout: Duration::from_secs(10),
        }
    }
}

impl SummarizerConfig {
    /// Set the deadline
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn truncate_chars(text: &str, max: usize) -> (String, bool) {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max).collect();
    let cut = chars.next().is_some();
    (head, cut)
}

/// Title derived from the first user turn
#[must_use]
pub fn fallback_title(turns: &[ChatTurn], max_chars: usize) -> String {
    let first_user = turns
        .iter()
        .filter(|turn| turn.role == MessageRole::User)
        .map(|turn| turn.text().trim().to_string())
        .find(|text| !text.is_empty());

    match first_user {
        Some(text) => {
            let (head, cut) = truncate_chars(&text, max_chars);
            if cut {
                format!("{}...", head.trim_end())
            } else {
                head
            }
        }
        None => DEFAULT_TITLE.to_string(),
    }
}

/// Normalize a model-written title; `None` if nothing usable is left
#[must_use]
pub fn clean_title(raw: &str, max_chars: usize) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|line| !line.is_empty())?;

    let mut title = line.trim_start_matches('#').trim();
    if let Some(rest) = title
        .get(..6)
        .filter(|prefix| prefix.eq_ignore_ascii_case("title:"))
        .and_then(|_| title.get(6..))
    {
        title = rest.trim();
    }
    let title = title
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*' | '_' | '“' | '”' | '‘' | '’'))
        .trim()
        .trim_end_matches('.')
        .trim();

    if title.is_empty() || title.eq_ignore_ascii_case("new chat") {
        return None;
    }

    let (head, _) = truncate_chars(title, max_chars);
    Some(head.trim_end().to_string())
}

/// Writes conversation titles
#[derive(Clone)]
pub struct TitleSummarizer {
    backend: Arc<dyn ChatBackend>,
    catalog: Arc<ModelCatalog>,
    config: SummarizerConfig,
}

impl TitleSummarizer {
    /// Create a summarizer
    #[must_use]
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        catalog: Arc<ModelCatalog>,
        config: SummarizerConfig,
    ) -> Self {
        Self {
            backend,
            catalog,
            config,
        }
    }

    /// Settings in use
    #[must_use]
    pub fn config(&self) -> &SummarizerConfig {
        &self.config
    }

    /// Fallback title for these turns
    #[must_use]
    pub fn fallback(&self, turns: &[ChatTurn]) -> String {
        fallback_title(turns, self.config.fallback_title_chars)
    }

    /// Transcript of the most recent non-system turns
    #[must_use]
    pub fn transcript(&self, turns: &[ChatTurn]) -> String {
        let recent: Vec<&ChatTurn> = turns.iter().filter(|turn| !turn.is_system()).collect();
        let start = recent.len().saturating_sub(self.config.max_turns);

        recent[start..]
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    MessageRole::User => "User",
                    MessageRole::Assistant => "Assistant",
                    MessageRole::System => "System",
                };
                let (text, cut) = truncate_chars(turn.text().trim(), self.config.max_chars_per_turn);
                if cut {
                    format!("{role}: {text}...")
                } else {
                    format!("{role}: {text}")
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Title for a conversation; never fails
    pub async fn summarize(&self, turns: &[ChatTurn], api_key: &str) -> String {
        if turns.iter().all(ChatTurn::is_system) {
            return DEFAULT_TITLE.to_string();
        }

        let fallback = self.fallback(turns);
        let model = &self.catalog.roles().title_model;
        let request = CompletionRequest::new(
            model.as_str(),
            vec![
                ChatTurn::system(TITLE_PROMPT).to_upstream(),
                ChatTurn::user(self.transcript(turns)).to_upstream(),
            ],
        )
        .with_api_key(api_key)
        .with_temperature(TITLE_TEMPERATURE)
        .with_max_tokens(self.config.max_tokens);

        match tokio::time::timeout(self.config.timeout, self.backend.complete(&request)).await {
            Ok(Ok(response)) => match clean_title(&response.content, self.config.max_title_chars) {
                Some(title) => {
                    tracing::debug!(title = %title, "Generated conversation title");
                    title
                }
                None => {
                    tracing::debug!("Title model returned nothing usable, using fallback");
                    fallback
                }
            },
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Title generation failed, using fallback");
                fallback
            }
            Err(_) => {
                tracing::warn!("Title generation timed out, using fallback");
                fallback
            }
        }
    }
}
