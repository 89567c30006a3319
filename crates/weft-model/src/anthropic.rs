// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde_json::{json, Value};
use tracing::warn;

use crate::{
    ContentBlock, FinishReason, LlmRequest, LlmResponse, MessageContent, ProviderAdapter,
    ProviderError, ProviderEvent, Role, ToolCall, ToolSchema, Usage,
};

/// Adapter for the Anthropic Messages API.
///
/// The system prompt travels as the top-level `system` field, tool results
/// are sent as `user` messages carrying `tool_result` blocks, and streaming
/// uses named SSE events (`message_start`, `content_block_delta`, …).
#[derive(Debug, Default)]
pub struct AnthropicAdapter;

impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_base_url(&self) -> &str {
        "https://api.anthropic.com"
    }

    fn endpoint(&self, base_url: &str) -> String {
        format!("{}/v1/messages", base_url.trim_end_matches('/'))
    }

    fn headers(&self, api_key: Option<&str>) -> Vec<(String, String)> {
        let mut headers = vec![
            ("anthropic-version".to_string(), "2023-06-01".to_string()),
            ("content-type".to_string(), "application/json".to_string()),
        ];
        if let Some(key) = api_key {
            headers.push(("x-api-key".to_string(), key.to_string()));
        }
        headers
    }

    fn build_request(&self, req: &LlmRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": req.model,
            "messages": build_messages(&req.messages),
            "max_tokens": req.max_output_tokens.unwrap_or(4096),
            "stream": stream,
        });
        if let Some(t) = req.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = req.top_p {
            body["top_p"] = json!(p);
        }
        if let Some(system) = &req.system_prompt {
            if !system.is_empty() {
                body["system"] = json!(system);
            }
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(|t| self.convert_tool(t)).collect();
            body["tools"] = json!(tools);
        }
        body
    }

    fn parse_response(&self, body: &Value) -> Result<LlmResponse, ProviderError> {
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in body["content"].as_array().into_iter().flatten() {
            match block["type"].as_str().unwrap_or("") {
                "text" => text.push_str(block["text"].as_str().unwrap_or("")),
                "tool_use" => tool_calls.push(ToolCall {
                    id: block["id"].as_str().unwrap_or("").to_string(),
                    name: block["name"].as_str().unwrap_or("").to_string(),
                    arguments: block["input"].to_string(),
                }),
                _ => {}
            }
        }
        let finish_reason = match body["stop_reason"].as_str() {
            Some("tool_use") => FinishReason::ToolUse,
            Some("max_tokens") => FinishReason::MaxTokens,
            _ => FinishReason::Stop,
        };
        let usage = parse_usage(&body["usage"]);
        Ok(LlmResponse { text, tool_calls, finish_reason, usage })
    }

    fn parse_sse_event(
        &self,
        event: Option<&str>,
        data: &str,
    ) -> Result<Vec<ProviderEvent>, ProviderError> {
        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(_) => return Ok(Vec::new()),
        };
        // The payload's own `type` field is authoritative; the SSE `event:`
        // name mirrors it and is only used as a fallback.
        let kind = v["type"].as_str().or(event).unwrap_or("");
        let events = match kind {
            "message_start" => match v["message"].get("usage") {
                Some(u) => vec![ProviderEvent::Usage(Usage {
                    input_tokens: u["input_tokens"].as_u64().unwrap_or(0) as u32,
                    output_tokens: 0,
                    total_tokens: 0,
                })],
                None => Vec::new(),
            },
            "content_block_start" => {
                let index = v["index"].as_u64().unwrap_or(0) as u32;
                let block = &v["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    vec![ProviderEvent::ToolCallStart {
                        index,
                        id: block["id"].as_str().unwrap_or("").to_string(),
                        name: block["name"].as_str().unwrap_or("").to_string(),
                    }]
                } else {
                    Vec::new()
                }
            }
            "content_block_delta" => {
                let index = v["index"].as_u64().unwrap_or(0) as u32;
                let delta = &v["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => {
                        let text = delta["text"].as_str().unwrap_or("").to_string();
                        if text.is_empty() {
                            Vec::new()
                        } else {
                            vec![ProviderEvent::TextDelta(text)]
                        }
                    }
                    "input_json_delta" => vec![ProviderEvent::ToolCallDelta {
                        index,
                        arguments: delta["partial_json"].as_str().unwrap_or("").to_string(),
                    }],
                    // thinking / signature deltas are not part of the unified
                    // stream vocabulary and are silently discarded.
                    _ => Vec::new(),
                }
            }
            "content_block_stop" => {
                let index = v["index"].as_u64().unwrap_or(0) as u32;
                vec![ProviderEvent::ToolCallEnd { index }]
            }
            "message_delta" => {
                let mut events = Vec::new();
                match v["delta"]["stop_reason"].as_str() {
                    Some("tool_use") => events.push(ProviderEvent::Finish(FinishReason::ToolUse)),
                    Some("max_tokens") => {
                        events.push(ProviderEvent::Finish(FinishReason::MaxTokens))
                    }
                    Some(_) => events.push(ProviderEvent::Finish(FinishReason::Stop)),
                    None => {}
                }
                if let Some(u) = v.get("usage") {
                    events.push(ProviderEvent::Usage(Usage {
                        input_tokens: 0,
                        output_tokens: u["output_tokens"].as_u64().unwrap_or(0) as u32,
                        total_tokens: 0,
                    }));
                }
                events
            }
            "message_stop" => vec![ProviderEvent::End],
            "error" => {
                let msg = v["error"]["message"].as_str().unwrap_or("stream error");
                return Err(ProviderError::transport("anthropic", msg));
            }
            // ping and unknown event types are ignored.
            _ => Vec::new(),
        };
        Ok(events)
    }

    fn convert_tool(&self, tool: &ToolSchema) -> Value {
        json!({
            "name": tool.name,
            "description": tool.description,
            "input_schema": tool.parameters,
        })
    }
}

fn parse_usage(u: &Value) -> Usage {
    let input = u["input_tokens"].as_u64().unwrap_or(0) as u32;
    let output = u["output_tokens"].as_u64().unwrap_or(0) as u32;
    Usage { input_tokens: input, output_tokens: output, total_tokens: input + output }
}

/// Convert the unified message list into the Anthropic wire format.
fn build_messages(messages: &[crate::ChatMessage]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for m in messages {
        let role = match m.role {
            Role::User | Role::ToolResult => "user",
            Role::Assistant => "assistant",
        };
        match &m.content {
            MessageContent::Text(t) => {
                out.push(json!({ "role": role, "content": t }));
            }
            MessageContent::Blocks(blocks) if !blocks.is_empty() => {
                let content: Vec<Value> = blocks
                    .iter()
                    .map(|b| match b {
                        ContentBlock::Text { text } => json!({ "type": "text", "text": text }),
                        ContentBlock::ToolUse { id, name, input } => {
                            // Anthropic requires tool_use.id to be non-empty;
                            // an empty id arises when a content_block_start
                            // was missing from an earlier stream.
                            let safe_id = if id.is_empty() {
                                warn!(tool_name = %name, "tool_use block has empty id; substituting fallback");
                                "tc_fallback"
                            } else {
                                id.as_str()
                            };
                            json!({
                                "type": "tool_use",
                                "id": safe_id,
                                "name": name,
                                "input": input,
                            })
                        }
                        ContentBlock::ToolResult { tool_use_id, content } => json!({
                            "type": "tool_result",
                            "tool_use_id": tool_use_id,
                            "content": content,
                        }),
                    })
                    .collect();
                out.push(json!({ "role": role, "content": content }));
            }
            MessageContent::Blocks(_) => {
                out.push(json!({ "role": role, "content": "" }));
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

    #[test]
    fn adapter_name_and_endpoint() {
        let a = AnthropicAdapter;
        assert_eq!(a.name(), "anthropic");
        assert_eq!(
            a.endpoint("https://api.anthropic.com"),
            "https://api.anthropic.com/v1/messages"
        );
    }

    #[test]
    fn headers_include_api_key_when_present() {
        let a = AnthropicAdapter;
        let headers = a.headers(Some("sk-test"));
        assert!(headers.iter().any(|(k, v)| k == "x-api-key" && v == "sk-test"));
        assert!(headers.iter().any(|(k, _)| k == "anthropic-version"));
    }

    #[test]
    fn build_request_hoists_system_prompt() {
        let a = AnthropicAdapter;
        let req = LlmRequest {
            model: "claude-sonnet-4-5".into(),
            system_prompt: Some("be terse".into()),
            messages: vec![ChatMessage::user("hi")],
            ..LlmRequest::default()
        };
        let body = a.build_request(&req, true);
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hi");
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn tool_result_message_becomes_user_block() {
        let msgs = build_messages(&[ChatMessage::tool_result("tc-1", "output")]);
        assert_eq!(msgs[0]["role"], "user");
        let block = &msgs[0]["content"][0];
        assert_eq!(block["type"], "tool_result");
        assert_eq!(block["tool_use_id"], "tc-1");
    }

    #[test]
    fn convert_tool_uses_input_schema_field() {
        let a = AnthropicAdapter;
        let t = ToolSchema {
            name: "emit_file".into(),
            description: "d".into(),
            parameters: json!({ "type": "object" }),
        };
        let v = a.convert_tool(&t);
        assert_eq!(v["name"], "emit_file");
        assert_eq!(v["input_schema"]["type"], "object");
    }

    // ── SSE event decoding ────────────────────────────────────────────────────

    fn decode(a: &AnthropicAdapter, json: &str) -> Vec<ProviderEvent> {
        a.parse_sse_event(None, json).unwrap()
    }

    #[test]
    fn text_delta_decoded() {
        let a = AnthropicAdapter;
        let evs = decode(
            &a,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#,
        );
        assert!(matches!(&evs[..], [ProviderEvent::TextDelta(t)] if t == "hi"));
    }

    #[test]
    fn empty_text_delta_yields_nothing() {
        let a = AnthropicAdapter;
        let evs = decode(
            &a,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":""}}"#,
        );
        assert!(evs.is_empty());
    }

    #[test]
    fn tool_use_block_start_opens_call() {
        let a = AnthropicAdapter;
        let evs = decode(
            &a,
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_01","name":"emit_file"}}"#,
        );
        assert!(matches!(
            &evs[..],
            [ProviderEvent::ToolCallStart { index: 1, id, name }] if id == "toolu_01" && name == "emit_file"
        ));
    }

    #[test]
    fn text_block_start_yields_nothing() {
        let a = AnthropicAdapter;
        let evs = decode(
            &a,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
        );
        assert!(evs.is_empty());
    }

    #[test]
    fn input_json_delta_decoded() {
        let a = AnthropicAdapter;
        let evs = decode(
            &a,
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"k\":"}}"#,
        );
        assert!(matches!(
            &evs[..],
            [ProviderEvent::ToolCallDelta { index: 1, arguments }] if arguments == "{\"k\":"
        ));
    }

    #[test]
    fn block_stop_closes_index() {
        let a = AnthropicAdapter;
        let evs = decode(&a, r#"{"type":"content_block_stop","index":1}"#);
        assert!(matches!(&evs[..], [ProviderEvent::ToolCallEnd { index: 1 }]));
    }

    #[test]
    fn message_delta_carries_finish_and_usage() {
        let a = AnthropicAdapter;
        let evs = decode(
            &a,
            r#"{"type":"message_delta","delta":{"stop_reason":"max_tokens"},"usage":{"output_tokens":88}}"#,
        );
        assert!(matches!(evs[0], ProviderEvent::Finish(FinishReason::MaxTokens)));
        assert!(matches!(
            evs[1],
            ProviderEvent::Usage(Usage { output_tokens: 88, .. })
        ));
    }

    #[test]
    fn message_stop_ends_stream() {
        let a = AnthropicAdapter;
        let evs = decode(&a, r#"{"type":"message_stop"}"#);
        assert!(matches!(&evs[..], [ProviderEvent::End]));
    }

    #[test]
    fn ping_ignored() {
        let a = AnthropicAdapter;
        assert!(decode(&a, r#"{"type":"ping"}"#).is_empty());
    }

    #[test]
    fn error_event_surfaces_as_provider_error() {
        let a = AnthropicAdapter;
        let err = a
            .parse_sse_event(None, r#"{"type":"error","error":{"message":"overloaded"}}"#)
            .unwrap_err();
        assert!(err.raw.contains("overloaded"));
    }

    #[test]
    fn non_streaming_response_parsed() {
        let a = AnthropicAdapter;
        let body = serde_json::json!({
            "content": [
                { "type": "text", "text": "done" },
                { "type": "tool_use", "id": "t1", "name": "emit_file", "input": {"path": "a"} }
            ],
            "stop_reason": "tool_use",
            "usage": { "input_tokens": 12, "output_tokens": 5 }
        });
        let resp = a.parse_response(&body).unwrap();
        assert_eq!(resp.text, "done");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.finish_reason, FinishReason::ToolUse);
        assert_eq!(resp.usage.total_tokens, 17);
    }
}
