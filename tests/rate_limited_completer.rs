// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! End-to-end tests wiring a [`Conversation`] through a
//! [`RateLimitedCompleter`] wrapping a scripted [`MockCompleter`].

use std::sync::Arc;
use std::time::Duration;

use ratelimited_completer::testing::{MockCompleter, MockOutcome};
use ratelimited_completer::{
    Completer, Conversation, Message, Part, RateLimitConfig, RateLimitedCompleter, TokenCount,
};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn full_round_trip_through_conversation_and_limiter() {
    let convo = Conversation::new();
    convo
        .append([
            Message::system("Be concise."),
            Message::user("alice", "what's 2+2?"),
        ])
        .await;

    let mock = Arc::new(MockCompleter::new(vec![MockOutcome::ok(
        Message::assistant("model", vec![Part::text("4")]),
        TokenCount::new(20, 2),
    )]));
    let limiter = RateLimitedCompleter::new(mock, RateLimitConfig::default());
    let ctx = CancellationToken::new();

    let reply = limiter.complete(&ctx, &convo, &[]).await.unwrap();
    assert_eq!(reply.text(), "4");

    convo.append([reply]).await;
    assert_eq!(convo.len().await, 3);
    assert_eq!(convo.system_prompt().await, "Be concise.");
}

#[tokio::test]
async fn retries_surface_through_the_public_api() {
    let mock = Arc::new(MockCompleter::new(vec![
        MockOutcome::rate_limited(Duration::from_millis(1), "busy"),
        MockOutcome::ok(Message::assistant("model", vec![Part::text("ok")]), TokenCount::default()),
    ]));
    let config = RateLimitConfig {
        max_retries: 3,
        base_delay: Duration::from_millis(1),
        ..Default::default()
    };
    let limiter = RateLimitedCompleter::new(mock.clone(), config);
    let convo = Conversation::new();
    convo.append([Message::user("alice", "hi")]).await;
    let ctx = CancellationToken::new();

    let reply = limiter.complete(&ctx, &convo, &[]).await.unwrap();
    assert_eq!(reply.text(), "ok");
    assert_eq!(mock.call_count(), 2);
}

#[tokio::test]
async fn waiting_observer_sees_the_assistant_reply_appended_after_completion() {
    let convo = Arc::new(Conversation::new());
    convo.append([Message::user("alice", "hi")]).await;

    let mock = Arc::new(MockCompleter::new(vec![MockOutcome::ok(
        Message::assistant("model", vec![Part::text("hello")]),
        TokenCount::default(),
    )]));
    let limiter = Arc::new(RateLimitedCompleter::new(mock, RateLimitConfig::default()));
    let ctx = CancellationToken::new();

    let waiter = {
        let convo = convo.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { convo.wait(&ctx, 1).await })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    let reply = limiter.complete(&ctx, &convo, &[]).await.unwrap();
    convo.append([reply]).await;

    let (len, err) = waiter.await.unwrap();
    assert_eq!(len, 2);
    assert!(err.is_none());
}
