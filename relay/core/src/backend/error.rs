//! Upstream failure taxonomy

use std::time::Duration;

use thiserror::Error;

/// Failures talking to the upstream completions API
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum UpstreamError {
    /// The whole call exceeded its deadline
    #[error("upstream request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// No chunk arrived within the per-chunk deadline
    #[error("upstream stream stalled: no data for {}s", .0.as_secs())]
    Stalled(Duration),

    /// Connection-level failure
    #[error("network error: {0}")]
    Network(String),

    /// Non-2xx response
    #[error("upstream returned {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Error message from the body, or the raw body
        message: String,
    },

    /// Error object reported inside a stream or body
    #[error("upstream error: {0}")]
    Api(String),

    /// Unparsable payload
    #[error("invalid upstream payload: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// Whether the upstream rejected the request because the model cannot use tools
    #[must_use]
    pub fn is_tool_unsupported(&self) -> bool {
        match self {
            Self::Status { status, message } if (400..500).contains(status) => {
                let message = message.to_lowercase();
                message.contains("tool") && message.contains("support")
            }
            _ => false,
        }
    }

    /// Whether the failure was a deadline
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Stalled(_))
    }

    /// Translate a transport error
    #[must_use]
    pub fn from_reqwest(err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout)
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            Self::Network(err.to_string())
        }
    }

    /// Build a status error from a response body, preferring its `error.message`
    #[must_use]
    pub fn from_status_body(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|value| {
                value
                    .pointer("/error/message")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| super::traits::truncate_for_log(body.trim()));

        Self::Status { status, message }
    }
}
