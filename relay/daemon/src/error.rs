//! HTTP error responses
//!
//! Every rejection is a JSON body `{"error": <message>, "code": <code>}`
//! with the status the error maps to. Rate limit denials also carry the
//! `X-RateLimit-*` and `Retry-After` headers.

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use relay_core::{RateLimitDecision, RelayError};

/// `X-RateLimit-Limit`
pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
/// `X-RateLimit-Remaining`
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
/// `X-RateLimit-Reset`
pub const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// Request rejected before the stream starts
#[derive(Debug, Error)]
pub enum ApiError {
    /// Body is not a valid chat request
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    /// Validation failure from the relay
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// Caller or global limit exceeded
    #[error("rate limit exceeded, retry in {}s", .0.retry_after_secs())]
    RateLimited(RateLimitDecision),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl ApiError {
    /// Machine-readable code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidBody(_) => "INVALID_BODY",
            Self::Relay(e) => e.code(),
            Self::RateLimited(_) => "RATE_LIMITED",
        }
    }

    /// HTTP status
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Self::Relay(e) => StatusCode::from_u16(e.status()).unwrap_or(StatusCode::BAD_REQUEST),
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

/// Rate limit headers for a decision
#[must_use]
pub fn rate_limit_headers(decision: &RateLimitDecision) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(RATE_LIMIT_RESET, HeaderValue::from(decision.reset_at_unix()));
    headers
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.to_string(),
            code: self.code(),
        };

        match self {
            Self::RateLimited(decision) => {
                let mut headers = rate_limit_headers(&decision);
                headers.insert(
                    axum::http::header::RETRY_AFTER,
                    HeaderValue::from(decision.retry_after_secs()),
                );
                (status, headers, Json(body)).into_response()
            }
            _ => (status, Json(body)).into_response(),
        }
    }
}
