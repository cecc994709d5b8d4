//! Relay Daemon - HTTP front end for the chat relay
//!
//! Exposes [`relay_core::ChatRelay`] as `POST /api/chat`, streaming
//! Server-Sent Events, with per-caller and global rate limiting in front.
//!
//! # Module Overview
//!
//! - [`server`]: Router, handlers and shared state
//! - [`error`]: JSON error responses and rate limit headers

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod server;

pub use error::ApiError;
pub use server::{caller_key, router, AppState, REQUEST_ID_HEADER};
