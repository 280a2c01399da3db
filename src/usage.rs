// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Thread-safe append-only token usage bookkeeping.

use std::sync::Mutex;

/// Input/output token counts recorded for a single completion call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenCount {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenCount {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl std::ops::Add for TokenCount {
    type Output = TokenCount;

    fn add(self, rhs: TokenCount) -> TokenCount {
        TokenCount::new(
            self.input_tokens + rhs.input_tokens,
            self.output_tokens + rhs.output_tokens,
        )
    }
}

/// Ordered log of [`TokenCount`] entries. Every operation takes a plain
/// `std::sync::Mutex`, never held across an `.await`, since the tracker does
/// no I/O of its own.
#[derive(Default)]
pub struct UsageTracker {
    entries: Mutex<Vec<TokenCount>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, count: TokenCount) {
        self.entries.lock().unwrap().push(count);
    }

    pub fn last(&self) -> Option<TokenCount> {
        self.entries.lock().unwrap().last().copied()
    }

    pub fn total(&self) -> TokenCount {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .fold(TokenCount::default(), |acc, c| acc + *c)
    }

    pub fn count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn reset(&self) {
        self.entries.lock().unwrap().clear();
    }
}
