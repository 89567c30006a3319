// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use tokio_util::sync::CancellationToken;

use crate::{
    provider::{EventStream, ModelClient},
    FinishReason, LlmRequest, LlmResponse, ProviderError, Role, StreamEvent, ToolCall, Usage,
};

/// A pre-scripted mock client.  Each call to `stream` pops the next event
/// script from the front of the queue, letting tests specify exact event
/// sequences — including tool calls — without network access.
///
/// When the script queue is empty the client falls back to echoing the last
/// user message, so it can also serve as a general-purpose dry-run backend.
pub struct ScriptedMockClient {
    scripts: Mutex<Vec<Vec<StreamEvent>>>,
    /// The last [`LlmRequest`] seen by this client.  Written on each call so
    /// tests can inspect what was sent.
    pub last_request: Arc<Mutex<Option<LlmRequest>>>,
    /// When set, every call fails with this error before any event is
    /// produced.  Used to exercise retry and failure paths.
    fail_with: Mutex<Option<ProviderError>>,
}

impl ScriptedMockClient {
    /// Build a client from a list of response scripts.  The outer `Vec` is
    /// the ordered list of calls; the inner `Vec` is the event sequence for
    /// that call.  A terminal [`StreamEvent::Done`] is appended automatically
    /// when a script does not end with one.
    pub fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            last_request: Arc::new(Mutex::new(None)),
            fail_with: Mutex::new(None),
        }
    }

    /// A client with no scripts: every call echoes the last user message.
    pub fn echo() -> Self {
        Self::new(Vec::new())
    }

    /// Convenience: one script that streams `text` and finishes.
    pub fn script_text(text: impl Into<String>) -> Vec<StreamEvent> {
        vec![StreamEvent::TextDelta(text.into())]
    }

    /// Convenience: one script that issues a single complete tool call.
    pub fn script_tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Vec<StreamEvent> {
        let (id, name, arguments) = (id.into(), name.into(), arguments.into());
        vec![
            StreamEvent::ToolCallStart { index: 0, id, name },
            StreamEvent::ToolCallDelta { index: 0, arguments },
            StreamEvent::ToolCallEnd { index: 0 },
        ]
    }

    /// Make every subsequent call fail with `err`.
    pub fn fail_with(self, err: ProviderError) -> Self {
        *self.fail_with.lock().unwrap() = Some(err.clone());
        self
    }

    /// Aggregate a script into the response its `Done` event carries.
    fn aggregate(events: &[StreamEvent]) -> LlmResponse {
        let mut text = String::new();
        let mut calls: Vec<ToolCall> = Vec::new();
        for ev in events {
            match ev {
                StreamEvent::TextDelta(t) => text.push_str(t),
                StreamEvent::ToolCallStart { id, name, .. } => calls.push(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: String::new(),
                }),
                StreamEvent::ToolCallDelta { arguments, .. } => {
                    if let Some(last) = calls.last_mut() {
                        last.arguments.push_str(arguments);
                    }
                }
                StreamEvent::ToolCallEnd { .. } | StreamEvent::Done(_) => {}
            }
        }
        let finish_reason = if calls.is_empty() { FinishReason::Stop } else { FinishReason::ToolUse };
        LlmResponse {
            text,
            tool_calls: calls,
            finish_reason,
            usage: Usage { input_tokens: 10, output_tokens: 10, total_tokens: 20 },
        }
    }
}

#[async_trait]
impl ModelClient for ScriptedMockClient {
    fn provider_name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn stream(
        &self,
        req: LlmRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, ProviderError> {
        *self.last_request.lock().unwrap() = Some(req.clone());
        if let Some(err) = self.fail_with.lock().unwrap().clone() {
            return Err(err);
        }
        if cancel.is_cancelled() {
            return Err(ProviderError::cancelled("mock"));
        }

        let mut events = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                let reply = req
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .and_then(|m| m.as_text())
                    .unwrap_or("[no input]");
                vec![StreamEvent::TextDelta(format!("MOCK: {reply}"))]
            } else {
                scripts.remove(0)
            }
        };
        if !matches!(events.last(), Some(StreamEvent::Done(_))) {
            let response = Self::aggregate(&events);
            events.push(StreamEvent::Done(response));
        }
        let items: Vec<Result<StreamEvent, ProviderError>> = events.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(items)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatMessage;
    use futures::StreamExt;

    #[tokio::test]
    async fn echo_streams_last_user_message() {
        let mock = ScriptedMockClient::echo();
        let req = LlmRequest {
            model: "m".into(),
            messages: vec![ChatMessage::user("hello")],
            ..LlmRequest::default()
        };
        let resp = mock.complete(req, CancellationToken::new()).await.unwrap();
        assert_eq!(resp.text, "MOCK: hello");
        assert_eq!(resp.finish_reason, FinishReason::Stop);
    }

    #[tokio::test]
    async fn scripts_pop_in_order() {
        let mock = ScriptedMockClient::new(vec![
            ScriptedMockClient::script_text("first"),
            ScriptedMockClient::script_text("second"),
        ]);
        let req = LlmRequest::default();
        let cancel = CancellationToken::new();
        let a = mock.complete(req.clone(), cancel.clone()).await.unwrap();
        let b = mock.complete(req, cancel).await.unwrap();
        assert_eq!(a.text, "first");
        assert_eq!(b.text, "second");
    }

    #[tokio::test]
    async fn tool_call_script_aggregates_arguments() {
        let mock = ScriptedMockClient::new(vec![ScriptedMockClient::script_tool_call(
            "tc1",
            "emit_file",
            "{\"path\":\"a.tsx\"}",
        )]);
        let resp = mock
            .complete(LlmRequest::default(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "emit_file");
        assert_eq!(resp.tool_calls[0].arguments, "{\"path\":\"a.tsx\"}");
        assert_eq!(resp.finish_reason, FinishReason::ToolUse);
    }

    #[tokio::test]
    async fn done_is_always_last_event() {
        let mock = ScriptedMockClient::new(vec![ScriptedMockClient::script_text("x")]);
        let mut stream = mock
            .stream(LlmRequest::default(), CancellationToken::new())
            .await
            .unwrap();
        let mut last = None;
        while let Some(ev) = stream.next().await {
            last = Some(ev.unwrap());
        }
        assert!(matches!(last, Some(StreamEvent::Done(_))));
    }

    #[tokio::test]
    async fn records_last_request() {
        let mock = ScriptedMockClient::echo();
        let req = LlmRequest {
            model: "probe".into(),
            messages: vec![ChatMessage::user("q")],
            ..LlmRequest::default()
        };
        let _ = mock.complete(req, CancellationToken::new()).await;
        let seen = mock.last_request.lock().unwrap();
        assert_eq!(seen.as_ref().unwrap().model, "probe");
    }

    #[tokio::test]
    async fn fail_with_surfaces_error() {
        let mock = ScriptedMockClient::echo().fail_with(ProviderError::http("mock", 503, "down"));
        let err = mock
            .complete(LlmRequest::default(), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.status_code, Some(503));
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn cancelled_token_rejected() {
        let mock = ScriptedMockClient::echo();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = mock.complete(LlmRequest::default(), cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
