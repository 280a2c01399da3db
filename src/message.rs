// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Messages and message parts held by a [`crate::conversation::Conversation`].
//!
//! A [`Message`] is immutable once constructed: it exposes constructors and accessors
//! only, so a reference handed to one observer can never be mutated out from under
//! another holding the same conversation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One piece of a message's content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        /// JSON-encoded arguments, kept as a string since the wire format of any
        /// particular provider is outside this crate's scope.
        arguments: String,
        #[serde(default)]
        metadata: HashMap<String, String>,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Part::ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Part::ToolResult {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A single message in a [`crate::conversation::Conversation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    sender: String,
    role: Role,
    parts: Vec<Part>,
}

impl Message {
    pub fn new(sender: impl Into<String>, role: Role, parts: Vec<Part>) -> Self {
        Self {
            sender: sender.into(),
            role,
            parts,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new("system", Role::System, vec![Part::text(text)])
    }

    pub fn user(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(sender, Role::User, vec![Part::text(text)])
    }

    pub fn assistant(sender: impl Into<String>, parts: Vec<Part>) -> Self {
        Self::new(sender, Role::Assistant, parts)
    }

    pub fn tool(sender: impl Into<String>, tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(
            sender,
            Role::Tool,
            vec![Part::tool_result(tool_call_id, content)],
        )
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// Concatenation of every [`Part::Text`] segment, in order, joined with no separator.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("")
    }
}
