// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Adapter registry: static metadata for every supported provider.
//!
//! This module is the single source of truth for which provider ids exist
//! and what their defaults are.  Construction of the client lives in
//! [`crate::from_config`].
use std::sync::Arc;

use crate::{AnthropicAdapter, OpenAiCompatAdapter, ProviderAdapter};

/// Metadata describing a registered provider adapter.
#[derive(Debug, Clone)]
pub struct AdapterMeta {
    /// Unique provider id used in the `model.provider` config field.
    pub id: &'static str,
    /// Human-readable display name.
    pub name: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// Default environment variable that holds the API key.
    /// `None` for providers that require no key (local servers).
    pub default_api_key_env: Option<&'static str>,
    /// Default base URL when config does not set `model.base_url`.
    pub default_base_url: &'static str,
}

/// Complete registry of supported adapters.
pub static ADAPTERS: &[AdapterMeta] = &[
    AdapterMeta {
        id: "anthropic",
        name: "Anthropic",
        description: "Anthropic Claude models (Messages API)",
        default_api_key_env: Some("ANTHROPIC_API_KEY"),
        default_base_url: "https://api.anthropic.com",
    },
    AdapterMeta {
        id: "openai",
        name: "OpenAI",
        description: "OpenAI GPT models (chat completions)",
        default_api_key_env: Some("OPENAI_API_KEY"),
        default_base_url: "https://api.openai.com/v1",
    },
    AdapterMeta {
        id: "openrouter",
        name: "OpenRouter",
        description: "OpenRouter gateway (OpenAI-compatible)",
        default_api_key_env: Some("OPENROUTER_API_KEY"),
        default_base_url: "https://openrouter.ai/api/v1",
    },
    AdapterMeta {
        id: "deepseek",
        name: "DeepSeek",
        description: "DeepSeek models (OpenAI-compatible)",
        default_api_key_env: Some("DEEPSEEK_API_KEY"),
        default_base_url: "https://api.deepseek.com/v1",
    },
    AdapterMeta {
        id: "ollama",
        name: "Ollama",
        description: "Local Ollama server (OpenAI-compatible, no key)",
        default_api_key_env: None,
        default_base_url: "http://localhost:11434/v1",
    },
];

/// Look up adapter metadata by provider id.
pub fn get_meta(id: &str) -> Option<&'static AdapterMeta> {
    ADAPTERS.iter().find(|m| m.id == id)
}

/// Construct the adapter implementation for a registered provider id.
pub fn get_adapter(id: &str) -> Option<Arc<dyn ProviderAdapter>> {
    let meta = get_meta(id)?;
    Some(match meta.id {
        "anthropic" => Arc::new(AnthropicAdapter),
        // Everything else in the table speaks the chat-completions format.
        _ => Arc::new(OpenAiCompatAdapter::new(meta.id, meta.default_base_url)),
    })
}

/// All registered adapter descriptors.
pub fn list_adapters() -> impl Iterator<Item = &'static AdapterMeta> {
    ADAPTERS.iter()
}

/// All registered provider ids.
pub fn known_adapter_ids() -> impl Iterator<Item = &'static str> {
    ADAPTERS.iter().map(|m| m.id)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
