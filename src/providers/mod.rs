// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Concrete [`crate::completer::Completer`] implementations.

pub mod anthropic;

pub use anthropic::AnthropicCompleter;
