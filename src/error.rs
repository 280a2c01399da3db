// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error types shared by the conversation, usage, and rate-limited completion core.

use std::time::Duration;
use thiserror::Error;

/// Carried by a [`CoreError::RateLimit`] when a provider signals "too many requests".
#[derive(Debug, Clone, Default)]
pub struct RateLimitError {
    /// Parsed from the provider's `Retry-After` header. Zero if absent or unparseable.
    pub retry_after: Duration,
    /// Response body, kept for diagnostics.
    pub body: String,
}

impl RateLimitError {
    pub fn new(retry_after: Duration, body: impl Into<String>) -> Self {
        Self {
            retry_after,
            body: body.into(),
        }
    }
}

impl std::fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rate limited, retry after {:?}: {}",
            self.retry_after, self.body
        )
    }
}

/// The crate-wide error type for every failure mode surfaced by [`crate::conversation`],
/// [`crate::usage`], [`crate::completer`], and [`crate::limiter`].
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// The server indicated the caller should back off and retry.
    #[error("rate limited: {0}")]
    RateLimit(RateLimitError),

    /// The caller's cancellation token fired before the operation completed.
    #[error("operation cancelled")]
    Cancelled,

    /// Network-level failure reaching the provider.
    #[error("transport error: {0}")]
    Transport(String),

    /// A non-2xx, non-429 HTTP response.
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body could not be decoded into the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// An internal invariant was violated (e.g. an out-of-range conversation index).
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl CoreError {
    /// True iff this error is a [`CoreError::RateLimit`], the only kind the rate-limited
    /// completer's retry loop acts on.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, CoreError::RateLimit(_))
    }

    pub fn as_rate_limit(&self) -> Option<&RateLimitError> {
        match self {
            CoreError::RateLimit(rle) => Some(rle),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        CoreError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Decode(err.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_error_display_includes_body() {
        let err = CoreError::RateLimit(RateLimitError::new(Duration::from_secs(5), "slow down"));
        assert!(err.to_string().contains("slow down"));
    }

    #[test]
    fn is_rate_limit_distinguishes_kinds() {
        let rl = CoreError::RateLimit(RateLimitError::default());
        let status = CoreError::Status {
            status: 500,
            body: "oops".into(),
        };
        assert!(rl.is_rate_limit());
        assert!(!status.is_rate_limit());
    }

    #[test]
    fn as_rate_limit_extracts_payload() {
        let err = CoreError::RateLimit(RateLimitError::new(Duration::from_secs(2), "body"));
        let rle = err.as_rate_limit().expect("should be a rate limit error");
        assert_eq!(rle.retry_after, Duration::from_secs(2));
    }

    #[test]
    fn cancelled_is_not_rate_limit() {
        assert!(!CoreError::Cancelled.is_rate_limit());
    }

    #[test]
    fn decode_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: CoreError = json_err.into();
        assert!(matches!(err, CoreError::Decode(_)));
    }
}
