//! Relay Error Types
//!
//! Errors that reject a request before any event is streamed. Everything
//! that goes wrong after streaming starts is reported in-band as an `error`
//! event instead.

use thiserror::Error;

/// Request rejected before streaming
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    /// No text and no attachments
    #[error("message is required")]
    MissingMessage,

    /// Message exceeds the character limit
    #[error("message is too long ({len} characters, maximum {max})")]
    MessageTooLong {
        /// Characters sent
        len: usize,
        /// Configured maximum
        max: usize,
    },

    /// Too many attachments on the new message
    #[error("too many attachments ({count}, maximum {max})")]
    TooManyAttachments {
        /// Attachments sent
        count: usize,
        /// Configured maximum
        max: usize,
    },

    /// No upstream API key supplied
    #[error("an API key is required")]
    MissingApiKey,

    /// The API key does not look like an upstream key
    #[error("API key format is invalid")]
    InvalidApiKey,

    /// Manual mode without models
    #[error("at least one model must be selected")]
    NoModels,

    /// Too many models requested
    #[error("too many models selected ({count}, maximum {max})")]
    TooManyModels {
        /// Models requested after de-duplication
        count: usize,
        /// Configured maximum
        max: usize,
    },

    /// Unparsable or disallowed model
    #[error("model '{model}' is not allowed: {reason}")]
    ModelNotAllowed {
        /// Model as sent
        model: String,
        /// Why it was rejected
        reason: String,
    },

    /// Conversation history is too long
    #[error("conversation history is too long ({len} turns, maximum {max})")]
    HistoryTooLong {
        /// Turns sent
        len: usize,
        /// Configured maximum
        max: usize,
    },

    /// Caller or global rate limit exceeded
    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the window resets
        retry_after_secs: u64,
    },

    /// Unexpected failure before streaming
    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Stable machine-readable code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingMessage => "MISSING_MESSAGE",
            Self::MessageTooLong { .. } => "MESSAGE_TOO_LONG",
            Self::TooManyAttachments { .. } => "TOO_MANY_ATTACHMENTS",
            Self::MissingApiKey => "MISSING_API_KEY",
            Self::InvalidApiKey => "INVALID_API_KEY",
            Self::NoModels => "NO_MODELS",
            Self::TooManyModels { .. } => "TOO_MANY_MODELS",
            Self::ModelNotAllowed { .. } => "MODEL_NOT_ALLOWED",
            Self::HistoryTooLong { .. } => "HISTORY_TOO_LONG",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status for the error response
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::MissingApiKey | Self::InvalidApiKey => 401,
            Self::RateLimited { .. } => 429,
            Self::Internal(_) => 500,
            _ => 400,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_statuses() {
        let cases = [
            (RelayError::MissingMessage, "MISSING_MESSAGE", 400),
            (RelayError::MissingApiKey, "MISSING_API_KEY", 401),
            (RelayError::InvalidApiKey, "INVALID_API_KEY", 401),
            (RelayError::NoModels, "NO_MODELS", 400),
            (
                RelayError::RateLimited {
                    retry_after_secs: 3,
                },
                "RATE_LIMITED",
                429,
            ),
            (RelayError::Internal("x".into()), "INTERNAL_ERROR", 500),
        ];

        for (err, code, status) in cases {
            assert_eq!(err.code(), code);
            assert_eq!(err.status(), status);
        }
    }

    #[test]
    fn test_messages_carry_limits() {
        let err = RelayError::TooManyModels { count: 7, max: 5 };
        assert_eq!(err.to_string(), "too many models selected (7, maximum 5)");
    }
}
