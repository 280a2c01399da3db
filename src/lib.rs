// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Provider-agnostic LLM completion client core.
//!
//! This crate exposes the shared runtime used by callers that want one
//! uniform completion contract across heterogeneous HTTP-based model
//! providers:
//! - `conversation`: concurrent, append-only message log with broadcast
//!   wake-ups for observers.
//! - `usage`: thread-safe token usage bookkeeping.
//! - `completer`: the abstract `Completer` contract every provider adapter
//!   implements, plus the capability methods a `RateLimitedCompleter` probes.
//! - `limiter`: `RateLimitedCompleter`, combining proactive sliding-window
//!   admission, reactive 429 retry with jittered backoff, and adaptive
//!   server-informed preemption.
//! - `headers`: rate-limit and `Retry-After` header parsing shared by
//!   provider adapters.
//! - `providers`: concrete `Completer` implementations.
//! - `testing`: a scriptable `Completer` double for exercising the limiter
//!   without a network dependency.

pub mod completer;
pub mod conversation;
pub mod error;
pub mod headers;
pub mod limiter;
pub mod message;
pub mod providers;
pub mod testing;
pub mod usage;

pub use completer::{Completer, RateLimitInfo, ToolDefinition};
pub use conversation::Conversation;
pub use error::{CoreError, RateLimitError, Result};
pub use limiter::{RateLimitConfig, RateLimitedCompleter};
pub use message::{Message, Part, Role};
pub use usage::{TokenCount, UsageTracker};
