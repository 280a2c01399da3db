// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Rate-limit header parsing shared by provider adapters.
//!
//! Two header families are recognized: the OpenAI-compatible `x-ratelimit-*`
//! set, and Anthropic's `anthropic-ratelimit-*` set. `Retry-After` parsing is
//! separate since it appears on any 429 regardless of provider family.

use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;

use crate::completer::RateLimitInfo;

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    header_str(headers, name)?.trim().parse().ok()
}

/// Parses an RFC 3339 timestamp, then a `humantime`-style duration string
/// added to `now`, then gives up (returns `None`).
fn parse_reset(value: &str, now: SystemTime) -> Option<SystemTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc).into());
    }
    if let Ok(dur) = humantime::parse_duration(value.trim()) {
        return Some(now + dur);
    }
    None
}

fn reset_from_header(headers: &HeaderMap, name: &str, now: SystemTime) -> Option<SystemTime> {
    header_str(headers, name).and_then(|v| parse_reset(v, now))
}

/// Parses OpenAI-family `x-ratelimit-*` headers. Returns `None` if neither
/// `remaining` header is present.
pub fn parse_openai_rate_limit(headers: &HeaderMap, now: SystemTime) -> Option<RateLimitInfo> {
    let remaining_requests = header_i64(headers, "x-ratelimit-remaining-requests");
    let remaining_tokens = header_i64(headers, "x-ratelimit-remaining-tokens");
    if remaining_requests.is_none() && remaining_tokens.is_none() {
        return None;
    }
    Some(RateLimitInfo {
        remaining_requests: remaining_requests.unwrap_or(i64::MAX),
        remaining_tokens: remaining_tokens.unwrap_or(i64::MAX),
        requests_reset: reset_from_header(headers, "x-ratelimit-reset-requests", now),
        tokens_reset: reset_from_header(headers, "x-ratelimit-reset-tokens", now),
    })
}

/// Parses Anthropic's `anthropic-ratelimit-*` headers. Returns `None` if
/// neither `remaining` header is present.
pub fn parse_anthropic_rate_limit(headers: &HeaderMap, now: SystemTime) -> Option<RateLimitInfo> {
    let remaining_requests = header_i64(headers, "anthropic-ratelimit-requests-remaining");
    let remaining_tokens = header_i64(headers, "anthropic-ratelimit-tokens-remaining");
    if remaining_requests.is_none() && remaining_tokens.is_none() {
        return None;
    }
    Some(RateLimitInfo {
        remaining_requests: remaining_requests.unwrap_or(i64::MAX),
        remaining_tokens: remaining_tokens.unwrap_or(i64::MAX),
        requests_reset: reset_from_header(headers, "anthropic-ratelimit-requests-reset", now),
        tokens_reset: reset_from_header(headers, "anthropic-ratelimit-tokens-reset", now),
    })
}

/// Parses a `Retry-After` header value: integer seconds, or an HTTP-date
/// (RFC 7231). A date at or before `now` yields zero. Anything unparseable
/// also yields zero.
pub fn parse_retry_after(value: &str, now: SystemTime) -> Duration {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Duration::from_secs(secs);
    }
    if let Some(dur) = parse_http_date(value, now) {
        return dur;
    }
    Duration::ZERO
}

fn parse_http_date(value: &str, now: SystemTime) -> Option<Duration> {
    // RFC 7231 IMF-fixdate, e.g. "Sun, 06 Nov 1994 08:49:37 GMT", is a
    // restricted form of RFC 2822 that chrono's RFC 2822 parser accepts.
    let target: SystemTime = if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        dt.with_timezone(&Utc).into()
    } else {
        let ndt = chrono::NaiveDateTime::parse_from_str(value, "%a, %d %b %Y %H:%M:%S GMT").ok()?;
        ndt.and_utc().into()
    };
    target.duration_since(now).ok()
}
