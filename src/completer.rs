// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! The abstract completion contract implemented by every concrete provider.

use std::time::SystemTime;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::conversation::Conversation;
use crate::error::Result;
use crate::message::Message;
use crate::usage::UsageTracker;

/// A tool a [`Completer`] may offer the model, decoupled from any particular
/// provider's wire format.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A provider's last-reported view of its own remaining quota.
///
/// Zero/default timestamps mean "unknown" rather than "now".
#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimitInfo {
    pub remaining_requests: i64,
    pub remaining_tokens: i64,
    pub requests_reset: Option<SystemTime>,
    pub tokens_reset: Option<SystemTime>,
}

/// Produces one assistant [`Message`] from a conversation and a tool list.
///
/// Implementers must:
/// - honor `ctx` cancellation promptly, returning [`crate::error::CoreError::Cancelled`];
/// - return a `RateLimitError`-kind error (never a plain `Status`) when the
///   server signals "too many requests";
/// - otherwise surface transport/decode/status errors unchanged.
///
/// The two capability methods default to `None`/absent so a `RateLimitedCompleter`
/// can degrade gracefully when the inner Completer does not track usage or
/// report rate-limit headers.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(
        &self,
        ctx: &CancellationToken,
        conversation: &Conversation,
        tools: &[ToolDefinition],
    ) -> Result<Message>;

    /// The usage tracker this Completer records into, if it tracks usage at all.
    fn usage_tracker(&self) -> Option<&UsageTracker> {
        None
    }

    /// The model's context window, in tokens, if known.
    fn model_max_tokens(&self) -> Option<u32> {
        None
    }

    /// The most recently observed [`RateLimitInfo`], if this Completer parses
    /// rate-limit headers from provider responses.
    fn last_rate_limit_info(&self) -> Option<RateLimitInfo> {
        None
    }
}
