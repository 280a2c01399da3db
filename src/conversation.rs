// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Concurrent, append-only message log with broadcast wake-ups.
//!
//! Observers call [`Conversation::wait`] to block until the log grows past a
//! threshold they last observed. The wake-up protocol samples `(len, notify)`
//! under the read lock, drops the lock, then awaits the notify — registering
//! interest via `Notify::notified().enable()` before the lock is released is
//! what keeps an `Append` that lands between the sample and the await from
//! being lost.

use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, Result};
use crate::message::{Message, Role};

struct Inner {
    messages: Vec<Message>,
}

/// An append-only, concurrently observable sequence of [`Message`]s.
pub struct Conversation {
    inner: RwLock<Inner>,
    notify: Notify,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                messages: Vec::new(),
            }),
            notify: Notify::new(),
        }
    }

    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            inner: RwLock::new(Inner { messages }),
            notify: Notify::new(),
        }
    }

    /// Appends one or more messages and wakes every waiter blocked in [`Self::wait`].
    pub async fn append(&self, msgs: impl IntoIterator<Item = Message>) {
        let mut guard = self.inner.write().await;
        guard.messages.extend(msgs);
        // Must happen while still holding the write lock: a waiter that samples
        // len under the read lock can only observe either the pre- or post-append
        // state, never a state where len has grown but notify_waiters hasn't fired.
        self.notify.notify_waiters();
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn at(&self, index: usize) -> Result<Message> {
        let guard = self.inner.read().await;
        guard
            .messages
            .get(index)
            .cloned()
            .ok_or_else(|| CoreError::Invariant(format!("index {index} out of range")))
    }

    pub async fn last(&self) -> Option<Message> {
        self.inner.read().await.messages.last().cloned()
    }

    pub async fn snapshot(&self) -> Vec<Message> {
        self.inner.read().await.messages.clone()
    }

    /// Messages from `offset` onward. Returns an empty vec if `offset >= len()`.
    pub async fn since(&self, offset: usize) -> Vec<Message> {
        let guard = self.inner.read().await;
        if offset >= guard.messages.len() {
            Vec::new()
        } else {
            guard.messages[offset..].to_vec()
        }
    }

    pub async fn by_sender(&self, sender: &str) -> Vec<Message> {
        let guard = self.inner.read().await;
        guard
            .messages
            .iter()
            .filter(|m| m.sender() == sender)
            .cloned()
            .collect()
    }

    /// Text of the first [`Role::System`] message, or an empty string if there is none.
    pub async fn system_prompt(&self) -> String {
        let guard = self.inner.read().await;
        guard
            .messages
            .iter()
            .find(|m| m.role() == Role::System)
            .map(|m| m.text())
            .unwrap_or_default()
    }

    /// Blocks until `len() > n`, or until `ctx` is cancelled.
    ///
    /// Returns the length observed when it woke. On cancellation, returns the
    /// length observed at cancellation time alongside [`CoreError::Cancelled`].
    pub async fn wait(&self, ctx: &CancellationToken, n: usize) -> (usize, Option<CoreError>) {
        loop {
            let guard = self.inner.read().await;
            let len = guard.messages.len();
            if len > n {
                return (len, None);
            }
            // Register interest while still holding the read lock so that an
            // Append racing us between this line and the lock drop below is
            // guaranteed to be observed by this waiter's `notified` future.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            drop(guard);

            tokio::select! {
                _ = notified => continue,
                _ = ctx.cancelled() => {
                    return (self.len().await, Some(CoreError::Cancelled));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Part;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn append_increases_len_monotonically() {
        let convo = Conversation::new();
        convo.append([Message::user("a", "hi")]).await;
        assert_eq!(convo.len().await, 1);
        convo.append([Message::user("a", "there")]).await;
        assert_eq!(convo.len().await, 2);
    }

    #[tokio::test]
    async fn since_returns_empty_past_the_end() {
        let convo = Conversation::new();
        convo.append([Message::user("a", "hi")]).await;
        assert!(convo.since(5).await.is_empty());
        assert_eq!(convo.since(0).await.len(), 1);
    }

    #[tokio::test]
    async fn system_prompt_finds_first_system_message() {
        let convo = Conversation::with_messages(vec![
            Message::system("Be helpful."),
            Message::user("alice", "hi"),
        ]);
        assert_eq!(convo.system_prompt().await, "Be helpful.");
        let since = convo.since(0).await;
        assert_eq!(since.len(), 2);
        assert_eq!(since[1].text(), "hi");
    }

    #[tokio::test]
    async fn at_out_of_range_is_invariant_error() {
        let convo = Conversation::new();
        let err = convo.at(0).await.unwrap_err();
        assert!(matches!(err, CoreError::Invariant(_)));
    }

    #[tokio::test]
    async fn wait_wakes_on_append_past_threshold() {
        let convo = Arc::new(Conversation::new());
        let ctx = CancellationToken::new();
        let waiter = {
            let convo = convo.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { convo.wait(&ctx, 0).await })
        };

        // Give the waiter a chance to register before we append.
        tokio::time::sleep(Duration::from_millis(20)).await;
        convo.append([Message::user("a", "hi")]).await;

        let (len, err) = waiter.await.unwrap();
        assert_eq!(len, 1);
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn wait_returns_immediately_if_already_past_threshold() {
        let convo = Conversation::new();
        convo.append([Message::user("a", "hi")]).await;
        let ctx = CancellationToken::new();
        let (len, err) = convo.wait(&ctx, 0).await;
        assert_eq!(len, 1);
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn wait_honors_cancellation() {
        let convo = Conversation::new();
        let ctx = CancellationToken::new();
        ctx.cancel();
        let (_len, err) = convo.wait(&ctx, 0).await;
        assert!(matches!(err, Some(CoreError::Cancelled)));
    }

    #[tokio::test]
    async fn concurrent_waiters_all_wake_on_one_append() {
        let convo = Arc::new(Conversation::new());
        let ctx = CancellationToken::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let convo = convo.clone();
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move { convo.wait(&ctx, 0).await }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        convo.append([Message::assistant("model", vec![Part::text("hi")])]).await;

        for h in handles {
            let (len, err) = h.await.unwrap();
            assert!(len >= 1);
            assert!(err.is_none());
        }
    }
}
