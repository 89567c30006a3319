// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextRole {
    System,
    User,
    Assistant,
    ToolResult,
}

/// Tool-call metadata attached to a tool-result message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePart {
    pub tool_name: String,
    pub tool_call_id: String,
}

/// One message in a session's ordered history.
///
/// The list is append-only; pruning rewrites the `content` of an existing
/// message in place (setting `truncated`), and compaction marks a prefix
/// `compacted` after prepending a synthetic system summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: ContextRole,
    pub content: String,
    /// Explicit token count; when absent the content is estimated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<MessagePart>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub compacted: bool,
}

impl ContextMessage {
    fn new(role: ContextRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tokens: None,
            parts: Vec::new(),
            truncated: false,
            compacted: false,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ContextRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ContextRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ContextRole::Assistant, content)
    }

    pub fn tool_result(content: impl Into<String>, parts: Vec<MessagePart>) -> Self {
        let mut m = Self::new(ContextRole::ToolResult, content);
        m.parts = parts;
        m
    }

    /// Names of the tools that produced this message.
    pub fn tool_names(&self) -> Vec<&str> {
        self.parts.iter().map(|p| p.tool_name.as_str()).collect()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
