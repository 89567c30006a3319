// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod registry;
mod anthropic;
mod client;
mod error;
mod mock;
mod openai_compat;
mod provider;
mod sse;
mod types;

pub use anthropic::AnthropicAdapter;
pub use client::LlmClient;
pub use error::ProviderError;
pub use mock::ScriptedMockClient;
pub use openai_compat::OpenAiCompatAdapter;
pub use provider::{EventStream, ModelClient, ProviderAdapter};
pub use registry::{get_adapter, list_adapters, AdapterMeta};
pub use sse::{SseFrame, SseParser};
pub use types::*;

use std::sync::Arc;

use anyhow::bail;
use weft_config::ModelConfig;

/// Construct a shared [`ModelClient`] from configuration.
///
/// Selects the adapter implementation based on `cfg.provider`; the special
/// provider id `"mock"` yields an echo mock so tests and dry runs need no
/// network access.
pub fn from_config(cfg: &ModelConfig) -> anyhow::Result<Arc<dyn ModelClient>> {
    if cfg.provider == "mock" {
        return Ok(Arc::new(ScriptedMockClient::echo()));
    }
    match registry::get_adapter(&cfg.provider) {
        Some(adapter) => Ok(Arc::new(LlmClient::new(adapter, cfg.clone()))),
        None => {
            let known: Vec<&str> = registry::known_adapter_ids().collect();
            bail!(
                "unknown model provider: {:?} (known providers: {})",
                cfg.provider,
                known.join(", ")
            )
        }
    }
}
