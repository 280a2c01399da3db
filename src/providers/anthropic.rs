// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! A reference [`Completer`] adapter for Anthropic's Messages API.
//!
//! Exercises every seam the core defines: 429s become [`RateLimitError`]
//! (with `Retry-After` parsed per [`crate::headers`]), other non-2xx
//! responses become [`CoreError::Status`], successful responses are decoded
//! into a [`Message`] and recorded into this adapter's own [`UsageTracker`],
//! and `anthropic-ratelimit-*` response headers are parsed into
//! [`RateLimitInfo`] on every response, success or failure.

use std::sync::Mutex;
use std::time::SystemTime;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::completer::{Completer, RateLimitInfo, ToolDefinition};
use crate::conversation::Conversation;
use crate::error::{CoreError, RateLimitError, Result};
use crate::headers::{parse_anthropic_rate_limit, parse_retry_after};
use crate::message::{Message, Part, Role};
use crate::usage::{TokenCount, UsageTracker};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicCompleter {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    tracker: UsageTracker,
    last_rate_limit: Mutex<Option<RateLimitInfo>>,
}

impl AnthropicCompleter {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
            tracker: UsageTracker::new(),
            last_rate_limit: Mutex::new(None),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_request(&self, system: &str, messages: &[Message], tools: &[ToolDefinition]) -> serde_json::Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": DEFAULT_MAX_TOKENS,
            "messages": messages.iter().filter(|m| m.role() != Role::System).map(convert_message).collect::<Vec<_>>(),
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools.iter().map(convert_tool).collect::<Vec<_>>());
        }
        body
    }

    fn parse_error(&self, status: u16, body: &str, retry_after: std::time::Duration) -> CoreError {
        if status == 429 {
            return CoreError::RateLimit(RateLimitError::new(retry_after, body.to_string()));
        }
        CoreError::Status {
            status,
            body: body.to_string(),
        }
    }
}

fn convert_message(msg: &Message) -> serde_json::Value {
    let role = match msg.role() {
        Role::User | Role::System => "user",
        Role::Assistant => "assistant",
        Role::Tool => "user",
    };
    let content: Vec<serde_json::Value> = msg
        .parts()
        .iter()
        .map(|part| match part {
            Part::Text { text } => json!({"type": "text", "text": text}),
            Part::ToolCall { id, name, arguments, .. } => json!({
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": serde_json::from_str::<serde_json::Value>(arguments).unwrap_or(json!({})),
            }),
            Part::ToolResult { tool_call_id, content } => json!({
                "type": "tool_result",
                "tool_use_id": tool_call_id,
                "content": content,
            }),
        })
        .collect();
    json!({"role": role, "content": content})
}

fn convert_tool(tool: &ToolDefinition) -> serde_json::Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: serde_json::Value },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[async_trait]
impl Completer for AnthropicCompleter {
    async fn complete(
        &self,
        ctx: &CancellationToken,
        conversation: &Conversation,
        tools: &[ToolDefinition],
    ) -> Result<Message> {
        if ctx.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        let system = conversation.system_prompt().await;
        let messages = conversation.snapshot().await;
        let body = self.build_request(&system, &messages, tools);

        let send = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send();

        let response = tokio::select! {
            res = send => res?,
            _ = ctx.cancelled() => return Err(CoreError::Cancelled),
        };

        let status = response.status().as_u16();
        let now = SystemTime::now();
        let rate_limit_info = parse_anthropic_rate_limit(response.headers(), now);
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(|v| parse_retry_after(v, now))
            .unwrap_or_default();

        if rate_limit_info.is_some() {
            *self.last_rate_limit.lock().unwrap() = rate_limit_info;
        }

        if !response.status().is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(self.parse_error(status, &body_text, retry_after));
        }

        let parsed: AnthropicResponse = response.json().await.map_err(|e| CoreError::Decode(e.to_string()))?;

        let mut parts = Vec::new();
        for block in &parsed.content {
            match block {
                AnthropicContentBlock::Text { text } => parts.push(Part::text(text.clone())),
                AnthropicContentBlock::ToolUse { id, name, input } => {
                    parts.push(Part::tool_call(id.clone(), name.clone(), input.to_string()))
                }
                AnthropicContentBlock::Other => {}
            }
        }

        self.tracker.add(TokenCount::new(parsed.usage.input_tokens, parsed.usage.output_tokens));

        Ok(Message::assistant(self.model.clone(), parts))
    }

    fn usage_tracker(&self) -> Option<&UsageTracker> {
        Some(&self.tracker)
    }

    fn model_max_tokens(&self) -> Option<u32> {
        Some(DEFAULT_MAX_TOKENS)
    }

    fn last_rate_limit_info(&self) -> Option<RateLimitInfo> {
        *self.last_rate_limit.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn success_body() -> serde_json::Value {
        json!({
            "content": [{"type": "text", "text": "hello there"}],
            "usage": {"input_tokens": 12, "output_tokens": 4},
        })
    }

    #[tokio::test]
    async fn successful_completion_records_usage_and_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(success_body()))
            .mount(&server)
            .await;

        let completer = AnthropicCompleter::new("test-key", "claude-3-5-sonnet")
            .with_base_url(format!("{}/v1/messages", server.uri()));
        let convo = Conversation::with_messages(vec![Message::user("alice", "hi")]);
        let ctx = CancellationToken::new();

        let msg = completer.complete(&ctx, &convo, &[]).await.unwrap();
        assert_eq!(msg.text(), "hello there");
        assert_eq!(completer.usage_tracker().unwrap().total(), TokenCount::new(12, 4));
    }

    #[tokio::test]
    async fn rate_limited_response_becomes_rate_limit_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "2")
                    .set_body_string("slow down"),
            )
            .mount(&server)
            .await;

        let completer = AnthropicCompleter::new("test-key", "claude-3-5-sonnet")
            .with_base_url(format!("{}/v1/messages", server.uri()));
        let convo = Conversation::with_messages(vec![Message::user("alice", "hi")]);
        let ctx = CancellationToken::new();

        let err = completer.complete(&ctx, &convo, &[]).await.unwrap_err();
        let rle = err.as_rate_limit().expect("should be rate limited");
        assert_eq!(rle.retry_after, std::time::Duration::from_secs(2));
        assert_eq!(rle.body, "slow down");
    }

    #[tokio::test]
    async fn server_error_is_status_not_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            .mount(&server)
            .await;

        let completer = AnthropicCompleter::new("test-key", "claude-3-5-sonnet")
            .with_base_url(format!("{}/v1/messages", server.uri()));
        let convo = Conversation::with_messages(vec![Message::user("alice", "hi")]);
        let ctx = CancellationToken::new();

        let err = completer.complete(&ctx, &convo, &[]).await.unwrap_err();
        assert!(matches!(err, CoreError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn rate_limit_headers_are_captured_for_reporting() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("anthropic-ratelimit-requests-remaining", "1")
                    .insert_header("anthropic-ratelimit-tokens-remaining", "500")
                    .set_body_json(success_body()),
            )
            .mount(&server)
            .await;

        let completer = AnthropicCompleter::new("test-key", "claude-3-5-sonnet")
            .with_base_url(format!("{}/v1/messages", server.uri()));
        let convo = Conversation::with_messages(vec![Message::user("alice", "hi")]);
        let ctx = CancellationToken::new();

        completer.complete(&ctx, &convo, &[]).await.unwrap();
        let info = completer.last_rate_limit_info().expect("should have info");
        assert_eq!(info.remaining_requests, 1);
        assert_eq!(info.remaining_tokens, 500);
    }
}
