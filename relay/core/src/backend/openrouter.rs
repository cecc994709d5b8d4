//! OpenRouter Backend Implementation
//!
//! HTTP client for an OpenRouter-compatible chat-completions API.
//!
//! # API
//!
//! - `POST {base_url}/chat/completions` - completions, batch or SSE stream
//!
//! Streaming responses are server-sent events whose `data:` payloads are
//! JSON chunks, terminated by a literal `[DONE]`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::StreamExt;
use serde::Serialize;

use super::error::UpstreamError;
use super::traits::{
    truncate_for_log, ChatBackend, ChunkStream, CompletionRequest, CompletionResponse,
    StreamChunk, Usage,
};

/// Default API root
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// SSE payload that ends a stream
const DONE_SENTINEL: &str = "[DONE]";

/// Connection settings for [`OpenRouterBackend`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenRouterConfig {
    /// API root, without the `/chat/completions` suffix
    pub base_url: String,
    /// Sent as `HTTP-Referer` for attribution
    pub referer: Option<String>,
    /// Sent as `X-Title` for attribution
    pub app_title: Option<String>,
    /// TCP/TLS connect deadline
    pub connect_timeout: Duration,
    /// Deadline for non-streaming completions
    pub completion_timeout: Duration,
    /// Deadline for a streaming request to return its headers
    pub stream_timeout: Duration,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            referer: None,
            app_title: Some("Chat Relay".to_string()),
            connect_timeout: Duration::from_secs(10),
            completion_timeout: Duration::from_secs(30),
            stream_timeout: Duration::from_secs(120),
        }
    }
}

impl OpenRouterConfig {
    /// Set the API root
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the attribution headers
    #[must_use]
    pub fn with_attribution(mut self, referer: Option<String>, app_title: Option<String>) -> Self {
        self.referer = referer;
        self.app_title = app_title;
        self
    }

    /// Set the deadlines
    #[must_use]
    pub fn with_timeouts(mut self, connect: Duration, completion: Duration, stream: Duration) -> Self {
        self.connect_timeout = connect;
        self.completion_timeout = completion;
        self.stream_timeout = stream;
        self
    }
}

#[derive(Serialize)]
struct UsageFlag {
    include: bool,
}

/// Outbound body: the request plus transport-only fields
#[derive(Serialize)]
struct RequestBody<'a> {
    #[serde(flatten)]
    request: &'a CompletionRequest,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<UsageFlag>,
}

#[derive(serde::Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(serde::Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(serde::Deserialize)]
struct ResponseBody {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    error: Option<super::traits::ApiErrorBody>,
}

/// Chat-completions client
#[derive(Clone, Debug)]
pub struct OpenRouterBackend {
    config: OpenRouterConfig,
    http_client: reqwest::Client,
}

impl OpenRouterBackend {
    /// Create a backend
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Network`] if the HTTP client cannot be built.
    pub fn new(config: OpenRouterConfig) -> Result<Self, UpstreamError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| UpstreamError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Connection settings
    #[must_use]
    pub fn config(&self) -> &OpenRouterConfig {
        &self.config
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }

    fn build(&self, request: &CompletionRequest, stream: bool) -> reqwest::RequestBuilder {
        let body = RequestBody {
            request,
            stream,
            usage: stream.then_some(UsageFlag { include: true }),
        };

        let mut builder = self
            .http_client
            .post(self.completions_url())
            .bearer_auth(&request.api_key)
            .json(&body);

        if let Some(referer) = &self.config.referer {
            builder = builder.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.config.app_title {
            builder = builder.header("X-Title", title);
        }
        if stream {
            builder = builder.header(reqwest::header::ACCEPT, "text/event-stream");
        }
        builder
    }

    /// Send and check the status, turning non-2xx into [`UpstreamError::Status`]
    async fn send_checked(
        &self,
        builder: reqwest::RequestBuilder,
        deadline: Duration,
    ) -> Result<reqwest::Response, UpstreamError> {
        let response = tokio::time::timeout(deadline, builder.send())
            .await
            .map_err(|_| UpstreamError::Timeout(deadline))?
            .map_err(|e| UpstreamError::from_reqwest(&e, deadline))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(UpstreamError::from_status_body(status.as_u16(), &body))
    }
}

/// Turn one SSE event into a chunk; `None` skips comments and keep-alives
fn decode_event(data: &str) -> Option<Result<StreamChunk, UpstreamError>> {
    let data = data.trim();
    if data.is_empty() {
        return None;
    }
    Some(StreamChunk::parse(data))
}

#[async_trait]
impl ChatBackend for OpenRouterBackend {
    fn name(&self) -> &str {
        "OpenRouter"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, UpstreamError> {
        let start = Instant::now();
        let deadline = self.config.completion_timeout;

        let response = self
            .send_checked(self.build(request, false).timeout(deadline), deadline)
            .await?;
        let text = response
            .text()
            .await
            .map_err(|e| UpstreamError::from_reqwest(&e, deadline))?;
        let body: ResponseBody = serde_json::from_str(&text)
            .map_err(|e| UpstreamError::Decode(format!("{e}: {}", truncate_for_log(&text))))?;

        if let Some(error) = body.error {
            return Err(UpstreamError::Api(error.message));
        }

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::debug!(
            model = %request.model,
            duration_ms,
            "Completion finished"
        );

        Ok(CompletionResponse {
            content,
            model: body.model.unwrap_or_else(|| request.model.clone()),
            usage: body.usage,
            duration_ms,
        })
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<ChunkStream, UpstreamError> {
        let deadline = self.config.stream_timeout;
        let response = self
            .send_checked(self.build(request, true), deadline)
            .await?;

        tracing::debug!(model = %request.model, "Upstream stream opened");

        let chunks = response
            .bytes_stream()
            .eventsource()
            .take_while(|event| {
                let done = matches!(event, Ok(e) if e.data.trim() == DONE_SENTINEL);
                futures::future::ready(!done)
            })
            .filter_map(move |event| {
                let decoded = match event {
                    Ok(event) => decode_event(&event.data),
                    Err(EventStreamError::Transport(e)) => {
                        Some(Err(UpstreamError::from_reqwest(&e, deadline)))
                    }
                    Err(EventStreamError::Utf8(e)) => Some(Err(UpstreamError::Decode(e.to_string()))),
                    Err(EventStreamError::Parser(e)) => {
                        Some(Err(UpstreamError::Decode(e.to_string())))
                    }
                };
                futures::future::ready(decoded)
            });

        Ok(chunks.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ChatTurn;

    #[test]
    fn test_stream_body_includes_usage_flag() {
        let request = CompletionRequest::new("openai/gpt-4o", vec![ChatTurn::user("hi").to_upstream()])
            .with_api_key("sk-or-abc");
        let body = serde_json::to_value(RequestBody {
            request: &request,
            stream: true,
            usage: Some(UsageFlag { include: true }),
        })
        .unwrap();

        assert_eq!(body["stream"], true);
        assert_eq!(body["usage"]["include"], true);
        assert_eq!(body["model"], "openai/gpt-4o");
        assert!(body.get("api_key").is_none());
    }

    #[test]
    fn test_batch_body_omits_usage_flag() {
        let request = CompletionRequest::new("a/b", Vec::new());
        let body = serde_json::to_value(RequestBody {
            request: &request,
            stream: false,
            usage: None,
        })
        .unwrap();
        assert_eq!(body["stream"], false);
        assert!(body.get("usage").is_none());
    }

    #[test]
    fn test_config_trims_trailing_slash() {
        let config = OpenRouterConfig::default().with_base_url("http://localhost:9000/v1/");
        let backend = OpenRouterBackend::new(config).unwrap();
        assert_eq!(backend.completions_url(), "http://localhost:9000/v1/chat/completions");
        assert_eq!(backend.name(), "OpenRouter");
    }

    #[test]
    fn test_decode_event_skips_blank_payloads() {
        assert!(decode_event("   ").is_none());
        assert!(matches!(decode_event("{\"choices\":[]}"), Some(Ok(_))));
        assert!(matches!(decode_event("garbage"), Some(Err(UpstreamError::Decode(_)))));
    }
}
