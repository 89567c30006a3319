// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::{LlmRequest, LlmResponse, ProviderError, ProviderEvent, StreamEvent, ToolSchema};

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ProviderError>> + Send>>;

/// Pure translation layer between the unified model and one provider's wire
/// format.  Adapters do no I/O and hold no per-request state — the client
/// owns retry, back-off, cancellation, and usage accounting.
pub trait ProviderAdapter: Send + Sync {
    /// Provider id, e.g. `"anthropic"`.
    fn name(&self) -> &str;

    /// Default API base URL used when config does not override it.
    fn default_base_url(&self) -> &str;

    /// Full endpoint URL for a completion request.
    fn endpoint(&self, base_url: &str) -> String;

    /// Header set for a request, including auth when a key is present.
    fn headers(&self, api_key: Option<&str>) -> Vec<(String, String)>;

    /// Map the unified request into the provider's native body.
    fn build_request(&self, req: &LlmRequest, stream: bool) -> serde_json::Value;

    /// Decode a complete (non-streaming) response body.
    fn parse_response(&self, body: &serde_json::Value) -> Result<LlmResponse, ProviderError>;

    /// Decode one SSE frame into zero or more adapter events.
    ///
    /// `event` is the frame's `event:` field (absent for providers that
    /// multiplex on a `type` field inside the payload).
    fn parse_sse_event(
        &self,
        event: Option<&str>,
        data: &str,
    ) -> Result<Vec<ProviderEvent>, ProviderError>;

    /// Translate a unified tool schema into the provider's definition shape.
    fn convert_tool(&self, tool: &ToolSchema) -> serde_json::Value;

    /// Translate an HTTP failure into the typed error taxonomy.
    fn convert_error(&self, status: u16, body: &str) -> ProviderError {
        ProviderError::http(self.name(), status, body)
    }
}

/// A client that can drive completions against some model backend.
///
/// Implemented by the HTTP [`crate::LlmClient`] and by the scripted mock, so
/// the executor is generic over real and hermetic-test backends.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Provider id for status display and error attribution.
    fn provider_name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Send a completion request and return a streaming response.
    ///
    /// The stream is lazy, finite, and non-restartable; its last event is
    /// always [`StreamEvent::Done`] carrying the aggregated response.
    /// Cancelling `cancel` aborts the request; the resulting error is fatal
    /// and never retried.
    async fn stream(
        &self,
        req: LlmRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, ProviderError>;

    /// Drive [`ModelClient::stream`] to completion and return the final
    /// aggregated response.
    async fn complete(
        &self,
        req: LlmRequest,
        cancel: CancellationToken,
    ) -> Result<LlmResponse, ProviderError> {
        let mut stream = self.stream(req, cancel).await?;
        let mut last: Option<LlmResponse> = None;
        while let Some(ev) = stream.next().await {
            if let StreamEvent::Done(resp) = ev? {
                last = Some(resp);
            }
        }
        last.ok_or_else(|| {
            ProviderError::transport(self.provider_name(), "stream ended without a done event")
        })
    }
}
