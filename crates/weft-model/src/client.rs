// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use weft_config::ModelConfig;

use crate::{
    provider::{EventStream, ModelClient, ProviderAdapter},
    registry, LlmRequest, LlmResponse, ProviderError, ResponseAccumulator, SseFrame, SseParser,
    StreamEvent, Usage,
};

/// Running totals across every request made through one client.
#[derive(Debug, Default)]
struct UsageCounter {
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

impl UsageCounter {
    fn add(&self, u: Usage) {
        self.input_tokens.fetch_add(u.input_tokens as u64, Ordering::Relaxed);
        self.output_tokens.fetch_add(u.output_tokens as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> Usage {
        let input = self.input_tokens.load(Ordering::Relaxed) as u32;
        let output = self.output_tokens.load(Ordering::Relaxed) as u32;
        Usage { input_tokens: input, output_tokens: output, total_tokens: input + output }
    }
}

/// Provider-neutral HTTP client.
///
/// The adapter translates between the unified model and one wire format;
/// this type owns everything stateful: the connection pool, the retry loop
/// with exponential back-off, cancellation, the SSE idle timeout, and usage
/// accounting.
pub struct LlmClient {
    adapter: Arc<dyn ProviderAdapter>,
    cfg: ModelConfig,
    http: reqwest::Client,
    usage: Arc<UsageCounter>,
}

impl LlmClient {
    pub fn new(adapter: Arc<dyn ProviderAdapter>, cfg: ModelConfig) -> Self {
        Self {
            adapter,
            cfg,
            http: reqwest::Client::new(),
            usage: Arc::new(UsageCounter::default()),
        }
    }

    /// Tokens consumed across every request made through this client.
    pub fn total_usage(&self) -> Usage {
        self.usage.snapshot()
    }

    fn resolve_api_key(&self) -> Option<String> {
        if let Some(k) = &self.cfg.api_key {
            return Some(k.clone());
        }
        if let Some(env) = &self.cfg.api_key_env {
            return std::env::var(env).ok();
        }
        // Fall back to the registry default env var for this provider.
        registry::get_meta(self.adapter.name())
            .and_then(|m| m.default_api_key_env)
            .and_then(|env| std::env::var(env).ok())
    }

    fn endpoint(&self) -> String {
        let base = self
            .cfg
            .base_url
            .clone()
            .unwrap_or_else(|| self.adapter.default_base_url().to_string());
        self.adapter.endpoint(&base)
    }

    /// Issue the HTTP POST, translating transport and status failures into
    /// the typed error taxonomy.  Does not retry — the callers own that.
    async fn send_once(
        &self,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let key = self.resolve_api_key();
        let mut builder = self.http.post(self.endpoint());
        for (name, value) in self.adapter.headers(key.as_deref()) {
            builder = builder.header(name, value);
        }
        let resp = builder
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::transport(self.adapter.name(), e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(self.adapter.convert_error(status.as_u16(), &text));
        }
        Ok(resp)
    }

    /// Retry wrapper: re-issues the request on retryable errors with
    /// exponential back-off.  Cancellation aborts immediately.
    async fn send_with_retry(
        &self,
        body: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, ProviderError> {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(ProviderError::cancelled(self.adapter.name()));
            }
            match self.send_once(body).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.retryable && attempt < self.cfg.max_retries => {
                    let delay =
                        Duration::from_millis(self.cfg.backoff_base_ms << attempt.min(8));
                    warn!(
                        provider = self.adapter.name(),
                        attempt,
                        status = ?e.status_code,
                        delay_ms = delay.as_millis() as u64,
                        "retryable provider error; backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(ProviderError::cancelled(self.adapter.name()));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ModelClient for LlmClient {
    fn provider_name(&self) -> &str {
        self.adapter.name()
    }

    fn model_name(&self) -> &str {
        &self.cfg.name
    }

    async fn stream(
        &self,
        req: LlmRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, ProviderError> {
        let body = self.adapter.build_request(&req, true);
        debug!(provider = self.adapter.name(), model = %req.model, "opening completion stream");
        let resp = self.send_with_retry(&body, &cancel).await?;

        let (tx, rx) = mpsc::channel::<Result<StreamEvent, ProviderError>>(64);
        let adapter = self.adapter.clone();
        let usage = self.usage.clone();
        let idle = Duration::from_secs(self.cfg.stream_idle_timeout_secs);

        tokio::spawn(async move {
            let provider = adapter.name().to_string();
            let mut bytes = resp.bytes_stream();
            let mut parser = SseParser::new();
            let mut acc = ResponseAccumulator::new();

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        let _ = tx.send(Err(ProviderError::cancelled(provider.as_str()))).await;
                        return;
                    }
                    next = tokio::time::timeout(idle, bytes.next()) => next,
                };
                let chunk = match next {
                    Err(_) => {
                        let _ = tx
                            .send(Err(ProviderError::idle_timeout(provider.as_str(), idle.as_secs())))
                            .await;
                        return;
                    }
                    Ok(None) => break,
                    Ok(Some(Err(e))) => {
                        let _ = tx
                            .send(Err(ProviderError::transport(provider.as_str(), e.to_string())))
                            .await;
                        return;
                    }
                    Ok(Some(Ok(b))) => b,
                };
                let text = String::from_utf8_lossy(&chunk).to_string();
                for frame in parser.feed(&text) {
                    if forward_frame(&*adapter, &frame, &mut acc, &tx).await.is_err() {
                        return;
                    }
                }
                if parser.is_done() {
                    break;
                }
            }
            // Flush any partial trailing line before terminating.
            for frame in parser.finish() {
                if forward_frame(&*adapter, &frame, &mut acc, &tx).await.is_err() {
                    return;
                }
            }
            for ev in acc.close_open_calls() {
                let _ = tx.send(Ok(ev)).await;
            }
            let response = acc.finish();
            usage.add(response.usage);
            let _ = tx.send(Ok(StreamEvent::Done(response))).await;
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn complete(
        &self,
        req: LlmRequest,
        cancel: CancellationToken,
    ) -> Result<LlmResponse, ProviderError> {
        let body = self.adapter.build_request(&req, false);
        let resp = self.send_with_retry(&body, &cancel).await?;
        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::transport(self.adapter.name(), e.to_string()))?;
        let parsed = self.adapter.parse_response(&value)?;
        self.usage.add(parsed.usage);
        Ok(parsed)
    }
}

/// Decode one SSE frame through the adapter and forward the resulting
/// public events.  `Err(())` means the receiver is gone or the adapter
/// reported a stream error; the pump must stop.
async fn forward_frame(
    adapter: &dyn ProviderAdapter,
    frame: &SseFrame,
    acc: &mut ResponseAccumulator,
    tx: &mpsc::Sender<Result<StreamEvent, ProviderError>>,
) -> Result<(), ()> {
    match adapter.parse_sse_event(frame.event.as_deref(), &frame.data) {
        Ok(events) => {
            for ev in events {
                if let Some(public) = acc.absorb(ev) {
                    if tx.send(Ok(public)).await.is_err() {
                        return Err(());
                    }
                }
            }
            Ok(())
        }
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            Err(())
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
