// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! [`RateLimitedCompleter`]: proactive sliding-window admission, reactive
//! 429 retry with jittered backoff, and adaptive server-informed preemption,
//! composed around any inner [`Completer`].

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::completer::{Completer, RateLimitInfo, ToolDefinition};
use crate::conversation::Conversation;
use crate::error::{CoreError, RateLimitError, Result};
use crate::message::Message;
use crate::usage::{TokenCount, UsageTracker};

/// Reads wall-clock time. Injectable so tests can drive the limiter with a
/// virtual clock instead of real time.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// The default [`Clock`], backed by `SystemTime::now()`.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Suspends the current task for `dur`, or returns early with
/// [`CoreError::Cancelled`] if `ctx` fires first. Injectable so tests can
/// substitute an instantaneous sleep.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, ctx: &CancellationToken, dur: Duration) -> Result<()>;
}

/// The default [`Sleeper`], backed by `tokio::time::sleep`.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, ctx: &CancellationToken, dur: Duration) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(dur) => Ok(()),
            _ = ctx.cancelled() => Err(CoreError::Cancelled),
        }
    }
}

/// Supplies a uniform random value in `[0, 1)` for backoff jitter.
/// Injectable so tests can make jitter deterministic.
pub trait Jitter: Send + Sync {
    fn rand01(&self) -> f64;
}

/// The default [`Jitter`], backed by the thread-local RNG.
pub struct RandJitter;

impl Jitter for RandJitter {
    fn rand01(&self) -> f64 {
        rand::rng().random::<f64>()
    }
}

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct TokenEntry {
    timestamp: SystemTime,
    input_tokens: u64,
    output_tokens: u64,
}

/// Ceilings the limiter enforces. `None` in any field disables that
/// dimension's admission check; `Some(0)` is a real ceiling of zero tokens
/// or requests per minute, not a sentinel for "disabled".
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub input_tpm: Option<u64>,
    pub output_tpm: Option<u64>,
    pub rpm: Option<u64>,
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            input_tpm: None,
            output_tpm: None,
            rpm: None,
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Decorates an inner [`Completer`] with proactive window admission,
/// reactive retry, and adaptive preemption.
///
/// Two mutexes guard internal state: a plain `std::sync::Mutex` over the
/// sliding window (never held across an `.await`), and a `tokio::sync::Mutex`
/// serializing inner calls (held across the inner `.await` so usage
/// before/after snapshots are accurate). Nested acquisition is always
/// completion-then-window, never the reverse.
pub struct RateLimitedCompleter {
    inner: Arc<dyn Completer>,
    config: RateLimitConfig,
    window: std::sync::Mutex<Vec<TokenEntry>>,
    completion_lock: AsyncMutex<()>,
    fallback_tracker: UsageTracker,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    jitter: Arc<dyn Jitter>,
}

impl RateLimitedCompleter {
    pub fn new(inner: Arc<dyn Completer>, config: RateLimitConfig) -> Self {
        Self {
            inner,
            config,
            window: std::sync::Mutex::new(Vec::new()),
            completion_lock: AsyncMutex::new(()),
            fallback_tracker: UsageTracker::new(),
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            jitter: Arc::new(RandJitter),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn Jitter>) -> Self {
        self.jitter = jitter;
        self
    }

    fn ceilings_enabled(&self) -> bool {
        self.config.input_tpm.is_some() || self.config.output_tpm.is_some() || self.config.rpm.is_some()
    }

    async fn wait_for_capacity(&self, ctx: &CancellationToken) -> Result<()> {
        if !self.ceilings_enabled() {
            return Ok(());
        }
        loop {
            let now = self.clock.now();
            let cutoff = now.checked_sub(WINDOW).unwrap_or(SystemTime::UNIX_EPOCH);
            let wait_dur = {
                let mut window = self.window.lock().unwrap();
                window.retain(|e| e.timestamp > cutoff);

                let input_total: u64 = window.iter().map(|e| e.input_tokens).sum();
                let output_total: u64 = window.iter().map(|e| e.output_tokens).sum();
                let request_count = window.len() as u64;

                let input_ok = self.config.input_tpm.map_or(true, |l| input_total < l);
                let output_ok = self.config.output_tpm.map_or(true, |l| output_total < l);
                let rpm_ok = self.config.rpm.map_or(true, |l| request_count < l);

                if input_ok && output_ok && rpm_ok {
                    None
                } else {
                    let oldest = window.first().map(|e| e.timestamp).unwrap_or(now);
                    let target = oldest + WINDOW;
                    Some(target.duration_since(now).unwrap_or(Duration::ZERO))
                }
            };

            match wait_dur {
                None => return Ok(()),
                Some(d) => {
                    let d = d.max(Duration::from_millis(10));
                    debug!(wait_ms = d.as_millis() as u64, "waiting for rate limit window capacity");
                    self.sleeper.sleep(ctx, d).await?;
                }
            }
        }
    }

    async fn one_attempt(
        &self,
        ctx: &CancellationToken,
        conversation: &Conversation,
        tools: &[ToolDefinition],
    ) -> Result<Message> {
        let _guard = self.completion_lock.lock().await;

        let before = self.inner.usage_tracker().map(|t| t.total());
        let result = self.inner.complete(ctx, conversation, tools).await;

        if result.is_ok() {
            let now = self.clock.now();
            let entry = if let Some(tracker) = self.inner.usage_tracker() {
                let after = tracker.total();
                let before = before.unwrap_or_default();
                TokenEntry {
                    timestamp: now,
                    input_tokens: after.input_tokens.saturating_sub(before.input_tokens),
                    output_tokens: after.output_tokens.saturating_sub(before.output_tokens),
                }
            } else {
                TokenEntry {
                    timestamp: now,
                    input_tokens: 0,
                    output_tokens: 0,
                }
            };
            self.window.lock().unwrap().push(entry);
        }

        result
    }

    async fn adapt_from_server_info(&self, ctx: &CancellationToken) -> Result<()> {
        let Some(info) = self.inner.last_rate_limit_info() else {
            return Ok(());
        };
        let now = self.clock.now();
        let mut sleep_until: Option<SystemTime> = None;

        if info.remaining_requests <= 1 {
            if let Some(reset) = info.requests_reset {
                if reset > now {
                    sleep_until = Some(reset);
                }
            }
        }
        if info.remaining_tokens <= 1 {
            if let Some(reset) = info.tokens_reset {
                if reset > now {
                    sleep_until = Some(sleep_until.map_or(reset, |cur| cur.max(reset)));
                }
            }
        }

        if let Some(target) = sleep_until {
            let dur = target.duration_since(now).unwrap_or(Duration::ZERO);
            debug!(sleep_ms = dur.as_millis() as u64, "adapting to server-reported rate limit");
            self.sleeper.sleep(ctx, dur).await?;
        }
        Ok(())
    }

    fn backoff_for_attempt(&self, attempt: u32, rle: &RateLimitError) -> Duration {
        let exp = self.config.base_delay.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
        let backoff = exp.max(rle.retry_after);
        let jitter = 0.75 + self.jitter.rand01() * 0.5;
        backoff.mul_f64(jitter)
    }

    async fn complete_inner(
        &self,
        ctx: &CancellationToken,
        conversation: &Conversation,
        tools: &[ToolDefinition],
    ) -> Result<Message> {
        self.wait_for_capacity(ctx).await?;

        // Floor of 1 retry (>=2 attempts total) regardless of what a caller
        // constructs `RateLimitConfig` with.
        let max_retries = self.config.max_retries.max(1);

        let mut last_err: Option<RateLimitError> = None;
        for attempt in 0..=max_retries {
            match self.one_attempt(ctx, conversation, tools).await {
                Ok(msg) => {
                    self.adapt_from_server_info(ctx).await?;
                    return Ok(msg);
                }
                Err(CoreError::RateLimit(rle)) => {
                    if attempt == max_retries {
                        last_err = Some(rle);
                        break;
                    }
                    let backoff = self.backoff_for_attempt(attempt, &rle);
                    warn!(attempt, backoff_ms = backoff.as_millis() as u64, "rate limited, backing off");
                    last_err = Some(rle);
                    self.sleeper.sleep(ctx, backoff).await?;
                }
                Err(other) => return Err(other),
            }
        }

        match last_err {
            Some(rle) => Err(CoreError::RateLimit(rle)),
            None => Err(CoreError::Invariant("retries exhausted with no recorded error".into())),
        }
    }
}

#[async_trait]
impl Completer for RateLimitedCompleter {
    async fn complete(
        &self,
        ctx: &CancellationToken,
        conversation: &Conversation,
        tools: &[ToolDefinition],
    ) -> Result<Message> {
        self.complete_inner(ctx, conversation, tools).await
    }

    fn usage_tracker(&self) -> Option<&UsageTracker> {
        Some(self.inner.usage_tracker().unwrap_or(&self.fallback_tracker))
    }

    fn model_max_tokens(&self) -> Option<u32> {
        if self.inner.usage_tracker().is_some() {
            self.inner.model_max_tokens()
        } else {
            None
        }
    }

    fn last_rate_limit_info(&self) -> Option<RateLimitInfo> {
        self.inner.last_rate_limit_info()
    }
}
