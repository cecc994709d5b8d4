//! TOML Configuration File Support
//!
//! Centralized configuration loading for the relay, from a TOML file at
//! `~/.config/chat-relay/relay.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the daemon through [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! - `$XDG_CONFIG_HOME/chat-relay/relay.toml` (typically `~/.config/chat-relay/relay.toml`)
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! bind_addr = "0.0.0.0:8080"
//!
//! [upstream]
//! base_url = "https://openrouter.ai/api/v1"
//! referer = "https://chat.example.com"
//! app_title = "Example Chat"
//! stream_timeout_secs = 120
//! chunk_timeout_secs = 30
//!
//! [rate_limit]
//! per_caller_limit = 20
//! global_limit = 1000
//! window_secs = 60
//!
//! [router]
//! default_model = "openai/gpt-4o-mini"
//! timeout_ms = 10000
//!
//! [summarizer]
//! model = "openai/gpt-4o-mini"
//! max_turns = 6
//!
//! [limits]
//! max_models = 5
//! allowed_models = []
//!
//! [[models]]
//! id = "mistralai/mistral-large"
//! input_price_per_million = 2.0
//! output_price_per_million = 6.0
//! auto_select = true
//! description = "Multilingual writing and European languages."
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::OpenRouterConfig;
use crate::catalog::{ModelCatalog, ModelCatalogBuilder, ModelEntry, ModelPricing, ModelRoles};
use crate::messages::ModelId;
use crate::rate_limit::RateLimitConfig;
use crate::relay::RelaySettings;
use crate::routing::RouterConfig;
use crate::streaming::StreamSettings;
use crate::summarizer::SummarizerConfig;
use crate::validation::RequestLimits;

/// Default listen address
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Listen address, e.g. `0.0.0.0:8080`
    pub bind_addr: Option<String>,
}

/// Upstream section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamToml {
    /// API root
    pub base_url: Option<String>,

    /// `HTTP-Referer` attribution header
    pub referer: Option<String>,

    /// `X-Title` attribution header
    pub app_title: Option<String>,

    /// Connect timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,

    /// Overall streaming timeout per model in seconds
    pub stream_timeout_secs: Option<u64>,

    /// Maximum gap between stream chunks in seconds
    pub chunk_timeout_secs: Option<u64>,

    /// Timeout for non-streaming completions in seconds
    pub completion_timeout_secs: Option<u64>,

    /// Capacity of the merged event channel
    pub channel_capacity: Option<usize>,
}

/// Rate limiting section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitToml {
    /// Whether rate limiting is enabled
    pub enabled: Option<bool>,

    /// Requests per caller per window
    pub per_caller_limit: Option<u32>,

    /// Requests across all callers per window
    pub global_limit: Option<u32>,

    /// Window length in seconds
    pub window_secs: Option<u64>,

    /// Maximum tracked callers
    pub max_entries: Option<usize>,

    /// Sweep interval in seconds
    pub sweep_interval_secs: Option<u64>,
}

/// Router section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterToml {
    /// Model that runs the classifier
    pub router_model: Option<String>,

    /// Fallback model for auto mode
    pub default_model: Option<String>,

    /// Model for image/video input
    pub vision_model: Option<String>,

    /// Model for image-generation prompts
    pub image_generation_model: Option<String>,

    /// Classifier timeout in milliseconds
    pub timeout_ms: Option<u64>,
}

/// Summarizer section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerToml {
    /// Model that writes titles
    pub model: Option<String>,

    /// Number of recent turns shown to the model
    pub max_turns: Option<usize>,

    /// Per-turn character cap
    pub max_chars_per_turn: Option<usize>,

    /// Completion token cap
    pub max_tokens: Option<u32>,

    /// Length of the fallback title before `...`
    pub fallback_title_chars: Option<usize>,

    /// Timeout in milliseconds
    pub timeout_ms: Option<u64>,
}

/// Request limits section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsToml {
    /// Maximum characters in the new message
    pub max_message_chars: Option<usize>,

    /// Maximum models per manual request
    pub max_models: Option<usize>,

    /// Maximum attachments on the new message
    pub max_attachments: Option<usize>,

    /// Maximum prior turns
    pub max_history_turns: Option<usize>,

    /// Models callers may request; empty allows any
    pub allowed_models: Option<Vec<String>>,
}

/// One `[[models]]` catalog entry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelToml {
    /// Model id
    pub id: String,

    /// Input price in USD per million tokens
    #[serde(default)]
    pub input_price_per_million: Option<f64>,

    /// Output price in USD per million tokens
    #[serde(default)]
    pub output_price_per_million: Option<f64>,

    /// Whether the router may pick this model
    #[serde(default)]
    pub auto_select: bool,

    /// Strengths shown to the router
    #[serde(default)]
    pub description: String,

    /// Whether the model returns images
    #[serde(default)]
    pub image_output: bool,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayToml {
    /// Server section
    pub server: ServerToml,

    /// Upstream section
    pub upstream: UpstreamToml,

    /// Rate limiting section
    pub rate_limit: RateLimitToml,

    /// Router section
    pub router: RouterToml,

    /// Summarizer section
    pub summarizer: SummarizerToml,

    /// Request limits section
    pub limits: LimitsToml,

    /// Extra or overridden catalog entries
    pub models: Vec<ModelToml>,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Centralized configuration for the relay
///
/// Consolidates all configuration sources and tracks where values came from.
/// Use [`load_config`] to load configuration with proper priority handling.
#[derive(Clone, Debug)]
pub struct RelayConfigFile {
    /// Listen address
    pub bind_addr: SocketAddr,

    /// Upstream connection settings
    pub upstream: OpenRouterConfig,

    /// Per-model stream timeouts and channel sizing
    pub stream: StreamSettings,

    /// Rate limit configuration
    pub rate_limit: RateLimitConfig,

    /// Router settings
    pub router: RouterConfig,

    /// Summarizer settings
    pub summarizer: SummarizerConfig,

    /// Request validation limits
    pub limits: RequestLimits,

    /// Role model assignments
    pub roles: ModelRoles,

    /// Catalog entries added on top of the built-in table
    pub models: Vec<ModelEntry>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for RelayConfigFile {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            upstream: OpenRouterConfig::default(),
            stream: StreamSettings::default(),
            rate_limit: RateLimitConfig::default(),
            router: RouterConfig::default(),
            summarizer: SummarizerConfig::default(),
            limits: RequestLimits::default(),
            roles: ModelRoles::default(),
            models: Vec::new(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl RelayConfigFile {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Build the model catalog: built-ins, then `[[models]]`, with these roles
    #[must_use]
    pub fn catalog(&self) -> ModelCatalog {
        self.models
            .iter()
            .cloned()
            .fold(ModelCatalogBuilder::with_builtins(), ModelCatalogBuilder::model)
            .roles(self.roles.clone())
            .build()
    }

    /// Settings for the relay pipeline
    #[must_use]
    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            stream: self.stream.clone(),
            router: self.router.clone(),
            summarizer: self.summarizer.clone(),
            limits: self.limits.clone(),
        }
    }

    /// Reject values that would make the relay unusable
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero_durations = [
            ("upstream.connect_timeout_ms", self.upstream.connect_timeout),
            ("upstream.completion_timeout_secs", self.upstream.completion_timeout),
            ("upstream.stream_timeout_secs", self.stream.stream_timeout),
            ("upstream.chunk_timeout_secs", self.stream.chunk_timeout),
            ("rate_limit.window_secs", self.rate_limit.window),
            ("rate_limit.sweep_interval_secs", self.rate_limit.sweep_interval),
            ("router.timeout_ms", self.router.timeout),
            ("summarizer.timeout_ms", self.summarizer.timeout),
        ];
        if let Some((name, _)) = zero_durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::ValidationError(format!("{name} must be greater than zero")));
        }

        let zero_counts = [
            ("upstream.channel_capacity", self.stream.channel_capacity),
            ("rate_limit.max_entries", self.rate_limit.max_entries),
            ("summarizer.max_turns", self.summarizer.max_turns),
            ("summarizer.max_chars_per_turn", self.summarizer.max_chars_per_turn),
            ("limits.max_message_chars", self.limits.max_message_chars),
            ("limits.max_models", self.limits.max_models),
        ];
        if let Some((name, _)) = zero_counts.iter().find(|(_, n)| *n == 0) {
            return Err(ConfigError::ValidationError(format!("{name} must be greater than zero")));
        }

        if self.rate_limit.enabled
            && (self.rate_limit.per_caller_limit == 0 || self.rate_limit.global_limit == 0)
        {
            return Err(ConfigError::ValidationError(
                "rate limits must be greater than zero when rate limiting is enabled".to_string(),
            ));
        }

        if self.summarizer.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "summarizer.max_tokens must be greater than zero".to_string(),
            ));
        }

        if self.stream.chunk_timeout > self.stream.stream_timeout {
            tracing::warn!(
                chunk_timeout_secs = self.stream.chunk_timeout.as_secs(),
                stream_timeout_secs = self.stream.stream_timeout.as_secs(),
                "Chunk timeout exceeds stream timeout; only the stream timeout will apply"
            );
        }

        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/chat-relay/relay.toml` or
/// `~/.config/chat-relay/relay.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("chat-relay").join("relay.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if the
/// merged configuration fails validation. A missing config file is not an
/// error (defaults are used).
pub fn load_config() -> Result<RelayConfigFile, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, then the process environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if the result is invalid.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<RelayConfigFile, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration reading environment variables through `env`
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<RelayConfigFile, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    // Start with defaults
    let mut config = RelayConfigFile::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: RelayToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    // Environment overrides file values
    apply_env_config(&mut config, env)?;

    config.validate()?;
    Ok(config)
}

fn parse_model(field: &str, raw: &str) -> Result<ModelId, ConfigError> {
    ModelId::parse(raw).map_err(|e| ConfigError::ValidationError(format!("{field}: {e}")))
}

fn parse_bind_addr(raw: &str) -> Result<SocketAddr, ConfigError> {
    raw.parse()
        .map_err(|e| ConfigError::ValidationError(format!("server.bind_addr '{raw}': {e}")))
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut RelayConfigFile, toml: &RelayToml) -> Result<(), ConfigError> {
    // Server
    if let Some(ref addr) = toml.server.bind_addr {
        config.bind_addr = parse_bind_addr(addr)?;
    }

    // Upstream
    let upstream = &toml.upstream;
    if let Some(ref url) = upstream.base_url {
        config.upstream = config.upstream.clone().with_base_url(url.clone());
    }
    if upstream.referer.is_some() {
        config.upstream.referer = upstream.referer.clone();
    }
    if upstream.app_title.is_some() {
        config.upstream.app_title = upstream.app_title.clone();
    }
    if let Some(ms) = upstream.connect_timeout_ms {
        config.upstream.connect_timeout = Duration::from_millis(ms);
    }
    if let Some(secs) = upstream.stream_timeout_secs {
        config.stream.stream_timeout = Duration::from_secs(secs);
        config.upstream.stream_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = upstream.chunk_timeout_secs {
        config.stream.chunk_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = upstream.completion_timeout_secs {
        config.upstream.completion_timeout = Duration::from_secs(secs);
    }
    if let Some(capacity) = upstream.channel_capacity {
        config.stream.channel_capacity = capacity;
    }

    // Rate limit
    let rate = &toml.rate_limit;
    if let Some(enabled) = rate.enabled {
        config.rate_limit.enabled = enabled;
    }
    if let Some(limit) = rate.per_caller_limit {
        config.rate_limit.per_caller_limit = limit;
    }
    if let Some(limit) = rate.global_limit {
        config.rate_limit.global_limit = limit;
    }
    if let Some(secs) = rate.window_secs {
        config.rate_limit.window = Duration::from_secs(secs);
    }
    if let Some(max) = rate.max_entries {
        config.rate_limit.max_entries = max;
    }
    if let Some(secs) = rate.sweep_interval_secs {
        config.rate_limit.sweep_interval = Duration::from_secs(secs);
    }

    // Router
    let router = &toml.router;
    if let Some(ref model) = router.router_model {
        config.roles.router_model = parse_model("router.router_model", model)?;
    }
    if let Some(ref model) = router.default_model {
        config.roles.default_model = parse_model("router.default_model", model)?;
    }
    if let Some(ref model) = router.vision_model {
        config.roles.vision_model = parse_model("router.vision_model", model)?;
    }
    if let Some(ref model) = router.image_generation_model {
        config.roles.image_generation_model =
            parse_model("router.image_generation_model", model)?;
    }
    if let Some(ms) = router.timeout_ms {
        config.router.timeout = Duration::from_millis(ms);
    }

    // Summarizer
    let summarizer = &toml.summarizer;
    if let Some(ref model) = summarizer.model {
        config.roles.title_model = parse_model("summarizer.model", model)?;
    }
    if let Some(turns) = summarizer.max_turns {
        config.summarizer.max_turns = turns;
    }
    if let Some(chars) = summarizer.max_chars_per_turn {
        config.summarizer.max_chars_per_turn = chars;
    }
    if let Some(tokens) = summarizer.max_tokens {
        config.summarizer.max_tokens = tokens;
    }
    if let Some(chars) = summarizer.fallback_title_chars {
        config.summarizer.fallback_title_chars = chars;
    }
    if let Some(ms) = summarizer.timeout_ms {
        config.summarizer.timeout = Duration::from_millis(ms);
    }

    // Limits
    let limits = &toml.limits;
    if let Some(chars) = limits.max_message_chars {
        config.limits.max_message_chars = chars;
    }
    if let Some(models) = limits.max_models {
        config.limits.max_models = models;
    }
    if let Some(attachments) = limits.max_attachments {
        config.limits.max_attachments = attachments;
    }
    if let Some(turns) = limits.max_history_turns {
        config.limits.max_history_turns = turns;
    }
    if let Some(ref allowed) = limits.allowed_models {
        config.limits.allowed_models = allowed
            .iter()
            .map(|raw| parse_model("limits.allowed_models", raw))
            .collect::<Result<_, _>>()?;
    }

    // Catalog entries
    let defaults = ModelPricing::default();
    for model in &toml.models {
        config.models.push(ModelEntry {
            id: parse_model("models.id", &model.id)?,
            pricing: ModelPricing::per_million(
                model.input_price_per_million.unwrap_or(defaults.input_per_million),
                model.output_price_per_million.unwrap_or(defaults.output_per_million),
            ),
            auto_select: model.auto_select,
            description: model.description.clone(),
            image_output: model.image_output,
        });
    }

    Ok(())
}

/// Parse a numeric environment value, warning on garbage
fn env_number<T: std::str::FromStr>(key: &str, raw: &str) -> Option<T> {
    let parsed = raw.trim().parse::<T>().ok();
    if parsed.is_none() {
        tracing::warn!(key, value = raw, "Ignoring unparsable environment value");
    }
    parsed
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut RelayConfigFile, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(addr) = env("RELAY_BIND_ADDR") {
        config.bind_addr = parse_bind_addr(&addr)?;
        config.source = ConfigSource::Env;
    }
    if let Some(url) = env("RELAY_UPSTREAM_URL") {
        config.upstream = config.upstream.clone().with_base_url(url);
        config.source = ConfigSource::Env;
    }
    if let Some(raw) = env("RELAY_STREAM_TIMEOUT_SECS") {
        if let Some(secs) = env_number::<u64>("RELAY_STREAM_TIMEOUT_SECS", &raw) {
            config.stream.stream_timeout = Duration::from_secs(secs);
            config.upstream.stream_timeout = Duration::from_secs(secs);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(raw) = env("RELAY_CHUNK_TIMEOUT_SECS") {
        if let Some(secs) = env_number::<u64>("RELAY_CHUNK_TIMEOUT_SECS", &raw) {
            config.stream.chunk_timeout = Duration::from_secs(secs);
            config.source = ConfigSource::Env;
        }
    }

    // Rate limit settings from environment
    if let Some(raw) = env("RELAY_RATE_LIMIT_PER_CALLER") {
        if let Some(limit) = env_number::<u32>("RELAY_RATE_LIMIT_PER_CALLER", &raw) {
            config.rate_limit.per_caller_limit = limit;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(raw) = env("RELAY_RATE_LIMIT_GLOBAL") {
        if let Some(limit) = env_number::<u32>("RELAY_RATE_LIMIT_GLOBAL", &raw) {
            config.rate_limit.global_limit = limit;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(raw) = env("RELAY_RATE_LIMIT_WINDOW_SECS") {
        if let Some(secs) = env_number::<u64>("RELAY_RATE_LIMIT_WINDOW_SECS", &raw) {
            config.rate_limit.window = Duration::from_secs(secs);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(enabled) = env("RELAY_RATE_LIMIT_ENABLED") {
        config.rate_limit.enabled = enabled != "0" && enabled.to_lowercase() != "false";
        config.source = ConfigSource::Env;
    }

    if let Some(model) = env("RELAY_DEFAULT_MODEL") {
        config.roles.default_model = parse_model("RELAY_DEFAULT_MODEL", &model)?;
        config.source = ConfigSource::Env;
    }
    if let Some(raw) = env("RELAY_MAX_MESSAGE_CHARS") {
        if let Some(chars) = env_number::<usize>("RELAY_MAX_MESSAGE_CHARS", &raw) {
            config.limits.max_message_chars = chars;
            config.source = ConfigSource::Env;
        }
    }

    Ok(())
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Listen address override
    pub bind_addr: Option<SocketAddr>,

    /// Upstream API root override
    pub upstream_url: Option<String>,

    /// Default model override
    pub default_model: Option<ModelId>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set listen address override
    #[must_use]
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = Some(addr);
        self
    }

    /// Set upstream URL override
    #[must_use]
    pub fn with_upstream_url(mut self, url: String) -> Self {
        self.upstream_url = Some(url);
        self
    }

    /// Set default model override
    #[must_use]
    pub fn with_default_model(mut self, model: ModelId) -> Self {
        self.default_model = Some(model);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut RelayConfigFile) {
        if self.bind_addr.is_some() || self.upstream_url.is_some() || self.default_model.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(addr) = self.bind_addr {
            config.bind_addr = addr;
        }

        if let Some(ref url) = self.upstream_url {
            config.upstream = config.upstream.clone().with_base_url(url.clone());
        }

        if let Some(ref model) = self.default_model {
            config.roles.default_model = model.clone();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_toml(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    // =========================================================================
    // Default Configuration Tests
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = RelayConfigFile::default();

        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.stream.stream_timeout, Duration::from_secs(120));
        assert_eq!(config.stream.chunk_timeout, Duration::from_secs(30));
        assert_eq!(config.summarizer.max_turns, 6);
        assert_eq!(config.limits.max_message_chars, 32_000);
        assert_eq!(config.limits.max_models, 5);
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.to_string_lossy().contains("chat-relay"));
            assert!(p.to_string_lossy().ends_with("relay.toml"));
        }
    }

    // =========================================================================
    // TOML Parsing Tests
    // =========================================================================

    #[test]
    fn test_parse_valid_toml() {
        let file = write_toml(
            r#"
[server]
bind_addr = "0.0.0.0:9000"

[upstream]
base_url = "http://localhost:4000/v1/"
referer = "https://chat.example.com"
stream_timeout_secs = 90
chunk_timeout_secs = 15
channel_capacity = 32

[rate_limit]
per_caller_limit = 5
global_limit = 50
window_secs = 30

[router]
default_model = "anthropic/claude-sonnet-4"
timeout_ms = 2500

[summarizer]
model = "openai/gpt-4o"
max_turns = 4

[limits]
max_models = 3
allowed_models = ["openai/gpt-4o", "anthropic/claude-sonnet-4"]

[[models]]
id = "mistralai/mistral-large"
input_price_per_million = 2.0
output_price_per_million = 6.0
auto_select = true
description = "Multilingual"
"#,
        );

        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();

        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:9000");
        assert_eq!(config.upstream.base_url, "http://localhost:4000/v1");
        assert_eq!(config.upstream.referer.as_deref(), Some("https://chat.example.com"));
        assert_eq!(config.stream.stream_timeout, Duration::from_secs(90));
        assert_eq!(config.stream.chunk_timeout, Duration::from_secs(15));
        assert_eq!(config.stream.channel_capacity, 32);
        assert_eq!(config.rate_limit.per_caller_limit, 5);
        assert_eq!(config.rate_limit.window, Duration::from_secs(30));
        assert_eq!(config.roles.default_model.as_str(), "anthropic/claude-sonnet-4");
        assert_eq!(config.router.timeout, Duration::from_millis(2500));
        assert_eq!(config.roles.title_model.as_str(), "openai/gpt-4o");
        assert_eq!(config.summarizer.max_turns, 4);
        assert_eq!(config.limits.allowed_models.len(), 2);
        assert_eq!(config.source(), ConfigSource::File);

        let catalog = config.catalog();
        let mistral = ModelId::parse("mistralai/mistral-large").unwrap();
        assert!(catalog.is_auto_selectable(&mistral));
        assert_eq!(catalog.pricing_for(&mistral), ModelPricing::per_million(2.0, 6.0));
    }

    #[test]
    fn test_parse_partial_toml() {
        let file = write_toml("[rate_limit]\nper_caller_limit = 7\n");
        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();

        assert_eq!(config.rate_limit.per_caller_limit, 7);
        assert_eq!(config.rate_limit.global_limit, 1000);
        assert_eq!(config.upstream.base_url, crate::backend::DEFAULT_BASE_URL);
    }

    #[test]
    fn test_missing_file_graceful() {
        let path = PathBuf::from("/nonexistent/path/relay.toml");
        let config = load_config_with_env(Some(path), no_env).unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_malformed_toml_error() {
        let file = write_toml("[upstream\nstream_timeout_secs = \"soon\"\n");
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result.unwrap_err(), ConfigError::ParseError(_)));
    }

    #[test]
    fn test_invalid_model_id_rejected() {
        let file = write_toml("[router]\ndefault_model = \"gpt-4o\"\n");
        let err = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(ref msg) if msg.contains("router.default_model")));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let file = write_toml("[upstream]\nchunk_timeout_secs = 0\n");
        let err = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap_err();
        assert!(err.to_string().contains("upstream.chunk_timeout_secs"));
    }

    #[test]
    fn test_zero_rate_limit_allowed_when_disabled() {
        let file = write_toml("[rate_limit]\nenabled = false\nper_caller_limit = 0\n");
        assert!(load_config_with_env(Some(file.path().to_path_buf()), no_env).is_ok());

        let file = write_toml("[rate_limit]\nper_caller_limit = 0\n");
        assert!(load_config_with_env(Some(file.path().to_path_buf()), no_env).is_err());
    }

    // =========================================================================
    // Priority Ordering Tests
    // =========================================================================

    #[test]
    fn test_env_overrides_file() {
        let file = write_toml(
            "[router]\ndefault_model = \"openai/gpt-4o\"\n[upstream]\nchunk_timeout_secs = 10\n",
        );
        let env: HashMap<&str, &str> = HashMap::from([
            ("RELAY_DEFAULT_MODEL", "deepseek/deepseek-r1"),
            ("RELAY_CHUNK_TIMEOUT_SECS", "5"),
            ("RELAY_RATE_LIMIT_ENABLED", "false"),
            ("RELAY_MAX_MESSAGE_CHARS", "not-a-number"),
        ]);

        let config = load_config_with_env(Some(file.path().to_path_buf()), |key| {
            env.get(key).map(|v| (*v).to_string())
        })
        .unwrap();

        assert_eq!(config.roles.default_model.as_str(), "deepseek/deepseek-r1");
        assert_eq!(config.stream.chunk_timeout, Duration::from_secs(5));
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.limits.max_message_chars, 32_000);
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_cli_overrides_env() {
        let mut config = RelayConfigFile::default();
        config.roles.default_model = ModelId::parse("openai/gpt-4o").unwrap();
        config.set_source(ConfigSource::Env);

        let overrides = ConfigOverrides::new()
            .with_default_model(ModelId::parse("anthropic/claude-sonnet-4").unwrap())
            .with_bind_addr(SocketAddr::from(([0, 0, 0, 0], 3000)))
            .with_upstream_url("http://mock/v1".to_string());
        overrides.apply(&mut config);

        assert_eq!(config.roles.default_model.as_str(), "anthropic/claude-sonnet-4");
        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.upstream.base_url, "http://mock/v1");
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_config_overrides_empty_no_change() {
        let mut config = RelayConfigFile::default();
        ConfigOverrides::new().apply(&mut config);
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_relay_settings_follow_config() {
        let mut config = RelayConfigFile::default();
        config.summarizer.max_turns = 2;
        config.limits.max_models = 1;
        let settings = config.relay_settings();
        assert_eq!(settings.summarizer.max_turns, 2);
        assert_eq!(settings.limits.max_models, 1);
    }

    // =========================================================================
    // ConfigSource / Error Tests
    // =========================================================================

    #[test]
    fn test_config_source_display() {
        assert_eq!(format!("{}", ConfigSource::Cli), "CLI");
        assert_eq!(format!("{}", ConfigSource::Env), "environment");
        assert_eq!(format!("{}", ConfigSource::File), "config file");
        assert_eq!(format!("{}", ConfigSource::Default), "default");
    }

    #[test]
    fn test_config_error_display() {
        let read_err = ConfigError::ReadError {
            path: PathBuf::from("/test/path"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        let msg = format!("{read_err}");
        assert!(msg.contains("/test/path"));
        assert!(msg.contains("Failed to read"));
    }
}
