// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! A scriptable [`Completer`] double used to exercise [`crate::limiter::RateLimitedCompleter`]
//! without a network dependency.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::completer::{Completer, RateLimitInfo, ToolDefinition};
use crate::conversation::Conversation;
use crate::error::{CoreError, RateLimitError, Result};
use crate::message::Message;
use crate::usage::{TokenCount, UsageTracker};

/// One scripted outcome for [`MockCompleter::complete`].
pub enum MockOutcome {
    Success {
        message: Message,
        usage: TokenCount,
    },
    RateLimited {
        retry_after: Duration,
        body: String,
    },
    Error(CoreError),
}

impl MockOutcome {
    pub fn ok(message: Message, usage: TokenCount) -> Self {
        MockOutcome::Success { message, usage }
    }

    pub fn rate_limited(retry_after: Duration, body: impl Into<String>) -> Self {
        MockOutcome::RateLimited {
            retry_after,
            body: body.into(),
        }
    }

    pub fn error(err: CoreError) -> Self {
        MockOutcome::Error(err)
    }
}

/// A [`Completer`] whose responses are scripted in advance, one per call,
/// repeating the last scripted outcome once the script is exhausted.
pub struct MockCompleter {
    outcomes: Mutex<Vec<MockOutcome>>,
    call_count: AtomicUsize,
    tracker: UsageTracker,
    rate_limit_info: Mutex<Option<RateLimitInfo>>,
    next_rate_limit_info: Mutex<Option<RateLimitInfo>>,
}

impl MockCompleter {
    pub fn new(outcomes: Vec<MockOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes),
            call_count: AtomicUsize::new(0),
            tracker: UsageTracker::new(),
            rate_limit_info: Mutex::new(None),
            next_rate_limit_info: Mutex::new(None),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Sets the [`RateLimitInfo`] that will be reported starting with the
    /// next call to `complete`.
    pub fn set_next_rate_limit_info(&self, info: RateLimitInfo) {
        *self.next_rate_limit_info.lock().unwrap() = Some(info);
    }
}

#[async_trait]
impl Completer for MockCompleter {
    async fn complete(
        &self,
        ctx: &CancellationToken,
        _conversation: &Conversation,
        _tools: &[ToolDefinition],
    ) -> Result<Message> {
        if ctx.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        let mut outcomes = self.outcomes.lock().unwrap();
        let last = outcomes.len().saturating_sub(1);
        let pick = idx.min(last);
        let outcome = match outcomes.get(pick) {
            Some(MockOutcome::Success { message, usage }) => {
                let message = message.clone();
                let usage = *usage;
                drop(outcomes);
                self.tracker.add(usage);
                if let Some(info) = self.next_rate_limit_info.lock().unwrap().take() {
                    *self.rate_limit_info.lock().unwrap() = Some(info);
                }
                Ok(message)
            }
            Some(MockOutcome::RateLimited { retry_after, body }) => {
                let err = RateLimitError::new(*retry_after, body.clone());
                drop(outcomes);
                Err(CoreError::RateLimit(err))
            }
            Some(MockOutcome::Error(err)) => {
                let err = err.clone();
                drop(outcomes);
                Err(err)
            }
            None => {
                drop(outcomes);
                Err(CoreError::Invariant("no scripted outcome".into()))
            }
        };
        outcome
    }

    fn usage_tracker(&self) -> Option<&UsageTracker> {
        Some(&self.tracker)
    }

    fn model_max_tokens(&self) -> Option<u32> {
        Some(8192)
    }

    fn last_rate_limit_info(&self) -> Option<RateLimitInfo> {
        *self.rate_limit_info.lock().unwrap()
    }
}

/// A virtual clock usable by [`crate::limiter::Clock`] test substitutes: time only
/// advances when [`VirtualClock::advance`] is called.
pub struct VirtualClock {
    now: Mutex<SystemTime>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(SystemTime::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }

    pub fn current(&self) -> SystemTime {
        *self.now.lock().unwrap()
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}
