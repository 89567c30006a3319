// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    ToolResult,
}

/// A single message in the unified conversation shape sent to a provider.
///
/// The system prompt is *not* a message — it travels as a separate request
/// field so adapters that hoist it to a top-level field (Anthropic) and
/// adapters that inline it as the first message (OpenAI-compatible) both
/// translate losslessly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: MessageContent::Text(text.into()) }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: MessageContent::Text(text.into()) }
    }

    pub fn tool_result(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::ToolResult,
            content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: id.into(),
                content: content.into(),
            }]),
        }
    }

    /// Return the plain text of this message, if it is a single text body.
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(t) => Some(t),
            MessageContent::Blocks(blocks) if blocks.len() == 1 => match &blocks[0] {
                ContentBlock::Text { text } => Some(text),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Message content: a plain string or a list of typed blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: serde_json::Value,
}

// ─── Request / response ───────────────────────────────────────────────────────

/// Provider-neutral completion request.
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub model: String,
    pub system_prompt: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSchema>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_output_tokens: Option<u32>,
}

/// A completed tool call with fully accumulated JSON arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded argument object
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FinishReason {
    #[default]
    Stop,
    ToolUse,
    MaxTokens,
    Error,
}

/// Token usage from one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Aggregated provider response.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

// ─── Stream events ────────────────────────────────────────────────────────────

/// Public streaming event set.  `Done` carries the final aggregated response
/// and is always the last event of a stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta(String),
    ToolCallStart { index: u32, id: String, name: String },
    /// A fragment of the JSON arguments for the call opened at `index`.
    ToolCallDelta { index: u32, arguments: String },
    ToolCallEnd { index: u32 },
    Done(LlmResponse),
}

/// Adapter-level event: the unified stream vocabulary plus the bookkeeping
/// signals (usage, finish reason, message end) that the client folds into the
/// terminal [`StreamEvent::Done`] instead of exposing.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    TextDelta(String),
    ToolCallStart { index: u32, id: String, name: String },
    ToolCallDelta { index: u32, arguments: String },
    ToolCallEnd { index: u32 },
    Usage(Usage),
    Finish(FinishReason),
    /// The provider signalled the end of the message.
    End,
}

// ─── Stream aggregation ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
    closed: bool,
}

/// Folds a sequence of [`ProviderEvent`]s into the public event stream and
/// the final [`LlmResponse`].
///
/// Tool-call arguments accumulate across `ToolCallDelta` events until the
/// matching `ToolCallEnd`.  Adapters without an explicit end marker (the
/// OpenAI wire format) leave calls open; [`ResponseAccumulator::finish`]
/// closes them and returns the synthetic `ToolCallEnd` events to forward.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    text: String,
    calls: BTreeMap<u32, PartialCall>,
    usage: Usage,
    finish: Option<FinishReason>,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one adapter event; returns the public event to forward, if any.
    pub fn absorb(&mut self, ev: ProviderEvent) -> Option<StreamEvent> {
        match ev {
            ProviderEvent::TextDelta(t) => {
                if t.is_empty() {
                    return None;
                }
                self.text.push_str(&t);
                Some(StreamEvent::TextDelta(t))
            }
            ProviderEvent::ToolCallStart { index, id, name } => {
                let call = self.calls.entry(index).or_default();
                call.id = id.clone();
                call.name = name.clone();
                Some(StreamEvent::ToolCallStart { index, id, name })
            }
            ProviderEvent::ToolCallDelta { index, arguments } => {
                self.calls.entry(index).or_default().arguments.push_str(&arguments);
                Some(StreamEvent::ToolCallDelta { index, arguments })
            }
            ProviderEvent::ToolCallEnd { index } => {
                // Spurious end markers for non-tool blocks are dropped.
                match self.calls.get_mut(&index) {
                    Some(call) if !call.closed => {
                        call.closed = true;
                        Some(StreamEvent::ToolCallEnd { index })
                    }
                    _ => None,
                }
            }
            ProviderEvent::Usage(u) => {
                self.usage.input_tokens += u.input_tokens;
                self.usage.output_tokens += u.output_tokens;
                self.usage.total_tokens = self.usage.input_tokens + self.usage.output_tokens;
                None
            }
            ProviderEvent::Finish(reason) => {
                self.finish = Some(reason);
                None
            }
            ProviderEvent::End => None,
        }
    }

    /// Close any still-open tool calls, returning the synthetic
    /// `ToolCallEnd` events to forward before the terminal `Done`.
    pub fn close_open_calls(&mut self) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        for (index, call) in self.calls.iter_mut() {
            if !call.closed {
                call.closed = true;
                out.push(StreamEvent::ToolCallEnd { index: *index });
            }
        }
        out
    }

    /// Produce the final aggregated response.
    pub fn finish(mut self) -> LlmResponse {
        let tool_calls: Vec<ToolCall> = std::mem::take(&mut self.calls)
            .into_values()
            .filter(|c| !c.name.is_empty())
            .map(|c| ToolCall { id: c.id, name: c.name, arguments: c.arguments })
            .collect();
        let finish_reason = match self.finish {
            Some(r) => r,
            None if !tool_calls.is_empty() => FinishReason::ToolUse,
            None => FinishReason::Stop,
        };
        LlmResponse {
            text: self.text,
            tool_calls,
            finish_reason,
            usage: self.usage,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
