// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Adapter for OpenAI-compatible chat completion APIs.
//!
//! Many providers speak the same `/chat/completions` wire format.  This
//! module provides a single [`OpenAiCompatAdapter`] that each registry entry
//! configures with its own id and default base URL.
use serde_json::{json, Value};

use crate::{
    ContentBlock, FinishReason, LlmRequest, LlmResponse, MessageContent, ProviderAdapter,
    ProviderError, ProviderEvent, Role, ToolCall, ToolSchema, Usage,
};

#[derive(Debug)]
pub struct OpenAiCompatAdapter {
    /// Provider id returned by [`ProviderAdapter::name`].
    id: &'static str,
    /// API base that ends **before** `/chat/completions`.
    base_url: &'static str,
}

impl OpenAiCompatAdapter {
    pub fn new(id: &'static str, base_url: &'static str) -> Self {
        Self { id, base_url }
    }
}

impl ProviderAdapter for OpenAiCompatAdapter {
    fn name(&self) -> &str {
        self.id
    }

    fn default_base_url(&self) -> &str {
        self.base_url
    }

    fn endpoint(&self, base_url: &str) -> String {
        format!("{}/chat/completions", base_url.trim_end_matches('/'))
    }

    fn headers(&self, api_key: Option<&str>) -> Vec<(String, String)> {
        let mut headers = vec![("content-type".to_string(), "application/json".to_string())];
        if let Some(key) = api_key {
            headers.push(("authorization".to_string(), format!("Bearer {key}")));
        }
        headers
    }

    fn build_request(&self, req: &LlmRequest, stream: bool) -> Value {
        let mut messages: Vec<Value> = Vec::new();
        if let Some(system) = &req.system_prompt {
            if !system.is_empty() {
                messages.push(json!({ "role": "system", "content": system }));
            }
        }
        messages.extend(build_messages(&req.messages));

        let mut body = json!({
            "model": req.model,
            "messages": messages,
            "stream": stream,
        });
        if stream {
            // Ask for the final usage chunk; providers that do not support
            // this option ignore it.
            body["stream_options"] = json!({ "include_usage": true });
        }
        if let Some(mt) = req.max_output_tokens {
            body["max_tokens"] = json!(mt);
        }
        if let Some(t) = req.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = req.top_p {
            body["top_p"] = json!(p);
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(|t| self.convert_tool(t)).collect();
            body["tools"] = json!(tools);
        }
        body
    }

    fn parse_response(&self, body: &Value) -> Result<LlmResponse, ProviderError> {
        let message = &body["choices"][0]["message"];
        let text = message["content"].as_str().unwrap_or("").to_string();
        let tool_calls: Vec<ToolCall> = message["tool_calls"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|tc| ToolCall {
                id: tc["id"].as_str().unwrap_or("").to_string(),
                name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                arguments: tc["function"]["arguments"].as_str().unwrap_or("{}").to_string(),
            })
            .collect();
        let finish_reason = match body["choices"][0]["finish_reason"].as_str() {
            Some("tool_calls") => FinishReason::ToolUse,
            Some("length") => FinishReason::MaxTokens,
            _ => FinishReason::Stop,
        };
        let usage = Usage {
            input_tokens: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: body["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
            total_tokens: body["usage"]["total_tokens"].as_u64().unwrap_or(0) as u32,
        };
        Ok(LlmResponse { text, tool_calls, finish_reason, usage })
    }

    fn parse_sse_event(
        &self,
        _event: Option<&str>,
        data: &str,
    ) -> Result<Vec<ProviderEvent>, ProviderError> {
        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(_) => return Ok(Vec::new()),
        };
        let mut events = Vec::new();

        // The final chunk (with stream_options.include_usage) has an empty
        // choices array and a usage object.
        if let Some(u) = v.get("usage").filter(|u| !u.is_null()) {
            let input = u["prompt_tokens"].as_u64().unwrap_or(0) as u32;
            let output = u["completion_tokens"].as_u64().unwrap_or(0) as u32;
            events.push(ProviderEvent::Usage(Usage {
                input_tokens: input,
                output_tokens: output,
                total_tokens: input + output,
            }));
        }

        let choice = &v["choices"][0];
        if choice.is_null() {
            return Ok(events);
        }
        let delta = &choice["delta"];
        if let Some(text) = delta["content"].as_str() {
            if !text.is_empty() {
                events.push(ProviderEvent::TextDelta(text.to_string()));
            }
        }
        for tc in delta["tool_calls"].as_array().into_iter().flatten() {
            let index = tc["index"].as_u64().unwrap_or(0) as u32;
            // A chunk carrying the call id opens the call; argument fragments
            // may ride along in the same chunk.
            if let Some(id) = tc["id"].as_str() {
                events.push(ProviderEvent::ToolCallStart {
                    index,
                    id: id.to_string(),
                    name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                });
            }
            if let Some(args) = tc["function"]["arguments"].as_str() {
                if !args.is_empty() {
                    events.push(ProviderEvent::ToolCallDelta {
                        index,
                        arguments: args.to_string(),
                    });
                }
            }
        }
        // There is no per-call end marker on this wire format; the client
        // closes open calls when the finish reason arrives.
        match choice["finish_reason"].as_str() {
            Some("tool_calls") => {
                events.push(ProviderEvent::Finish(FinishReason::ToolUse));
                events.push(ProviderEvent::End);
            }
            Some("length") => {
                events.push(ProviderEvent::Finish(FinishReason::MaxTokens));
                events.push(ProviderEvent::End);
            }
            Some(_) => {
                events.push(ProviderEvent::Finish(FinishReason::Stop));
                events.push(ProviderEvent::End);
            }
            None => {}
        }
        Ok(events)
    }

    fn convert_tool(&self, tool: &ToolSchema) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters,
            }
        })
    }
}

/// Convert the unified message list into the chat-completions shape.
fn build_messages(messages: &[crate::ChatMessage]) -> Vec<Value> {
    let mut out = Vec::new();
    for m in messages {
        match (&m.role, &m.content) {
            (Role::ToolResult, MessageContent::Blocks(blocks)) => {
                for b in blocks {
                    if let ContentBlock::ToolResult { tool_use_id, content } = b {
                        out.push(json!({
                            "role": "tool",
                            "tool_call_id": tool_use_id,
                            "content": content,
                        }));
                    }
                }
            }
            (role, MessageContent::Text(t)) => {
                let role = match role {
                    Role::User | Role::ToolResult => "user",
                    Role::Assistant => "assistant",
                };
                out.push(json!({ "role": role, "content": t }));
            }
            (Role::Assistant, MessageContent::Blocks(blocks)) => {
                // An assistant turn with tool_use blocks becomes a message
                // with a tool_calls array.
                let mut text = String::new();
                let mut tool_calls = Vec::new();
                for b in blocks {
                    match b {
                        ContentBlock::Text { text: t } => text.push_str(t),
                        ContentBlock::ToolUse { id, name, input } => tool_calls.push(json!({
                            "id": id,
                            "type": "function",
                            "function": { "name": name, "arguments": input.to_string() },
                        })),
                        ContentBlock::ToolResult { .. } => {}
                    }
                }
                let mut msg = json!({ "role": "assistant", "content": text });
                if !tool_calls.is_empty() {
                    msg["tool_calls"] = json!(tool_calls);
                }
                out.push(msg);
            }
            (Role::User, MessageContent::Blocks(blocks)) => {
                let text: String = blocks
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                out.push(json!({ "role": "user", "content": text }));
            }
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatMessage;

    fn adapter() -> OpenAiCompatAdapter {
        OpenAiCompatAdapter::new("openai", "https://api.openai.com/v1")
    }

    #[test]
    fn endpoint_appends_chat_completions() {
        assert_eq!(
            adapter().endpoint("https://api.openai.com/v1"),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn headers_use_bearer_auth() {
        let headers = adapter().headers(Some("sk-x"));
        assert!(headers
            .iter()
            .any(|(k, v)| k == "authorization" && v == "Bearer sk-x"));
    }

    #[test]
    fn build_request_inlines_system_message_first() {
        let req = LlmRequest {
            model: "gpt-4o".into(),
            system_prompt: Some("sys".into()),
            messages: vec![ChatMessage::user("hi")],
            ..LlmRequest::default()
        };
        let body = adapter().build_request(&req, false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert!(body.get("stream_options").is_none(), "no usage chunk for non-streaming");
    }

    #[test]
    fn tool_result_message_uses_tool_role() {
        let msgs = build_messages(&[ChatMessage::tool_result("call_9", "out")]);
        assert_eq!(msgs[0]["role"], "tool");
        assert_eq!(msgs[0]["tool_call_id"], "call_9");
    }

    #[test]
    fn convert_tool_wraps_in_function() {
        let t = ToolSchema {
            name: "emit_file".into(),
            description: "d".into(),
            parameters: json!({"type": "object"}),
        };
        let v = adapter().convert_tool(&t);
        assert_eq!(v["type"], "function");
        assert_eq!(v["function"]["name"], "emit_file");
    }

    // ── SSE chunk decoding ────────────────────────────────────────────────────

    #[test]
    fn content_delta_decoded() {
        let evs = adapter()
            .parse_sse_event(None, r#"{"choices":[{"delta":{"content":"hi"}}]}"#)
            .unwrap();
        assert!(matches!(&evs[..], [ProviderEvent::TextDelta(t)] if t == "hi"));
    }

    #[test]
    fn tool_call_chunk_with_id_opens_and_appends() {
        let evs = adapter()
            .parse_sse_event(
                None,
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"emit_file","arguments":"{\"a\""}}]}}]}"#,
            )
            .unwrap();
        assert!(matches!(
            &evs[0],
            ProviderEvent::ToolCallStart { index: 0, id, name } if id == "call_1" && name == "emit_file"
        ));
        assert!(matches!(
            &evs[1],
            ProviderEvent::ToolCallDelta { index: 0, arguments } if arguments == "{\"a\""
        ));
    }

    #[test]
    fn argument_only_chunk_appends() {
        let evs = adapter()
            .parse_sse_event(
                None,
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":":1}"}}]}}]}"#,
            )
            .unwrap();
        assert!(matches!(
            &evs[..],
            [ProviderEvent::ToolCallDelta { index: 0, arguments }] if arguments == ":1}"
        ));
    }

    #[test]
    fn finish_reason_tool_calls_ends_stream() {
        let evs = adapter()
            .parse_sse_event(None, r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#)
            .unwrap();
        assert!(matches!(evs[0], ProviderEvent::Finish(FinishReason::ToolUse)));
        assert!(matches!(evs[1], ProviderEvent::End));
    }

    #[test]
    fn usage_only_chunk_decoded() {
        let evs = adapter()
            .parse_sse_event(
                None,
                r#"{"choices":[],"usage":{"prompt_tokens":5,"completion_tokens":3}}"#,
            )
            .unwrap();
        assert!(matches!(
            evs[0],
            ProviderEvent::Usage(Usage { input_tokens: 5, output_tokens: 3, total_tokens: 8 })
        ));
    }

    #[test]
    fn non_streaming_response_parsed() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": "hello",
                    "tool_calls": [
                        {"id": "c1", "function": {"name": "emit_file", "arguments": "{}"}}
                    ]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": { "prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3 }
        });
        let resp = adapter().parse_response(&body).unwrap();
        assert_eq!(resp.text, "hello");
        assert_eq!(resp.tool_calls[0].name, "emit_file");
        assert_eq!(resp.finish_reason, FinishReason::ToolUse);
        assert_eq!(resp.usage.total_tokens, 3);
    }
}
