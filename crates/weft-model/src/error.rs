// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// HTTP status codes the client may retry with exponential back-off.
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Error produced by a provider adapter or the client transport.
#[derive(Debug, Clone, Error)]
#[error("{provider} provider error (status {status_code:?}, retryable {retryable}): {raw}")]
pub struct ProviderError {
    /// Provider id (e.g. `"anthropic"`).
    pub provider: String,
    /// HTTP status, when the error originated from a response.
    pub status_code: Option<u16>,
    /// Whether the client's back-off loop may retry this error.
    pub retryable: bool,
    /// Raw provider payload or transport message.
    pub raw: String,
}

impl ProviderError {
    /// Error for a non-success HTTP status.  Retryable iff the status is in
    /// [`RETRYABLE_STATUSES`].
    pub fn http(provider: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            status_code: Some(status),
            retryable: RETRYABLE_STATUSES.contains(&status),
            raw: body.into(),
        }
    }

    /// Transport-level failure (connect error, TLS, malformed response).
    /// Not retryable: without a status there is no evidence the provider is
    /// healthy enough for a retry to succeed.
    pub fn transport(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            status_code: None,
            retryable: false,
            raw: msg.into(),
        }
    }

    /// The SSE stream went idle past the configured timeout.  Maps to a
    /// retryable error so the back-off loop owns recovery.
    pub fn idle_timeout(provider: impl Into<String>, secs: u64) -> Self {
        Self {
            provider: provider.into(),
            status_code: None,
            retryable: true,
            raw: format!("stream idle for more than {secs}s"),
        }
    }

    /// The caller's abort signal fired.  Always fatal, never retried.
    pub fn cancelled(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            status_code: None,
            retryable: false,
            raw: "request cancelled".into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status_code.is_none() && self.raw == "request cancelled"
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
