//! HTTP Server
//!
//! Routes:
//! - `POST /api/chat`: validate, rate limit, then stream SSE frames
//! - `GET /health`: liveness probe
//!
//! # Request Flow
//!
//! ```text
//!   body ──▶ ChatRequest ──▶ ChatRelay::prepare ──▶ rate limiter
//!                                  │ 4xx                 │ 429
//!                                  ▼                     ▼
//!                              ApiError             ApiError
//!
//!   ChatRelay::launch ──▶ pump task ──▶ mpsc<Bytes> ──▶ response body
//! ```
//!
//! The pump task owns the relay stream. When the client goes away the body
//! receiver is dropped, the pump's next send fails, and dropping the relay
//! stream aborts every upstream call.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::trace::TraceLayer;
use tracing::{info, Instrument};
use uuid::Uuid;

use relay_core::wire::{pump, PumpOutcome};
use relay_core::{ChatRelay, ChatRequest, CompositeRateLimiter};

use crate::error::{rate_limit_headers, ApiError};

/// Response header carrying the request id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Caller key used when no address is known
const UNKNOWN_CALLER: &str = "unknown";

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    relay: ChatRelay,
    limiter: Arc<CompositeRateLimiter>,
    channel_capacity: usize,
}

impl AppState {
    /// Create handler state
    #[must_use]
    pub fn new(relay: ChatRelay, limiter: Arc<CompositeRateLimiter>, channel_capacity: usize) -> Self {
        Self {
            relay,
            limiter,
            channel_capacity: channel_capacity.max(1),
        }
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// Caller identity: first `X-Forwarded-For` entry, else the peer address
#[must_use]
pub fn caller_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_CALLER.to_string())
}

async fn chat(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request_id = Uuid::new_v4();
    let caller = caller_key(&headers, peer.map(|ConnectInfo(addr)| addr));
    let span = tracing::info_span!("chat", request_id = %request_id, caller = %caller);

    let request: ChatRequest =
        serde_json::from_slice(&body).map_err(|e| ApiError::InvalidBody(e.to_string()))?;

    let prepared = span.in_scope(|| state.relay.prepare(request)).map_err(|e| {
        span.in_scope(|| info!(code = e.code(), error = %e, "Request rejected"));
        ApiError::from(e)
    })?;

    let decision = state.limiter.check(&caller);
    if !decision.allowed {
        span.in_scope(|| info!(scope = ?decision.scope, "Request rate limited"));
        return Err(ApiError::RateLimited(decision));
    }

    span.in_scope(|| {
        info!(
            mode = ?prepared.mode(),
            models = prepared.model_count(),
            remaining = decision.remaining,
            "Streaming response"
        );
    });
    let stream = span.in_scope(|| state.relay.launch(prepared));

    let (tx, rx) = mpsc::channel::<Bytes>(state.channel_capacity);
    tokio::spawn(
        async move {
            match pump(stream.into_stream(), &tx).await {
                PumpOutcome::Completed => info!("Stream completed"),
                PumpOutcome::ClientDisconnected => info!("Stream cancelled by client"),
            }
        }
        .instrument(span),
    );

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    let mut response = body.into_response();
    let response_headers = response.headers_mut();
    response_headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    response_headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response_headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response_headers.extend(rate_limit_headers(&decision));
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response_headers.insert(REQUEST_ID_HEADER, value);
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_key_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"));
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();

        assert_eq!(caller_key(&headers, Some(peer)), "203.0.113.7");
        assert_eq!(caller_key(&HeaderMap::new(), Some(peer)), "127.0.0.1");
        assert_eq!(caller_key(&HeaderMap::new(), None), UNKNOWN_CALLER);
    }

    #[test]
    fn test_empty_forwarded_for_falls_back_to_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(""));
        let peer: SocketAddr = "[::1]:9000".parse().unwrap();
        assert_eq!(caller_key(&headers, Some(peer)), "::1");
    }
}
