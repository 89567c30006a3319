// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Top-level configuration for the orchestration core.
///
/// Every section has serde defaults so an empty (or absent) config file
/// yields a fully working setup.  Field names use snake_case in YAML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub pruning: PruningConfig,
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub reflection: ReflectionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier: "anthropic" | "openai" | any OpenAI-compatible
    /// gateway registered in `weft_model::registry` | "mock".
    pub provider: String,
    /// Model name forwarded to the provider API.
    pub name: String,
    /// Environment variable that holds the API key (read at runtime).
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files.
    pub api_key: Option<String>,
    /// Base URL override.  Useful for local proxies and gateways; for most
    /// hosted providers the registry default is used.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion.
    pub max_output_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0).
    pub temperature: Option<f32>,
    /// Nucleus sampling parameter.
    pub top_p: Option<f32>,
    /// Maximum automatic retries for retryable provider errors
    /// (HTTP 429/500/502/503/504).  Cancellation is never retried.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential back-off between retries, in milliseconds.
    /// Attempt n sleeps `backoff_base_ms * 2^n`.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// SSE idle timeout: if no bytes arrive on a stream for this long the
    /// request fails with a retryable error.
    #[serde(default = "default_idle_timeout_secs")]
    pub stream_idle_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".into(),
            name: "claude-sonnet-4-5".into(),
            api_key_env: None,
            api_key: None,
            base_url: None,
            max_output_tokens: None,
            temperature: None,
            top_p: None,
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            stream_idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

/// Controls the structured truncation of individual tool-result messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruningConfig {
    /// Messages whose suffix (from themselves to the end of the history)
    /// fits within this many tokens are never pruned.
    #[serde(default = "default_protect_window")]
    pub protect_window: usize,
    /// A pruning pass that would save fewer tokens than this is discarded
    /// and the original history is kept.
    #[serde(default = "default_min_savings")]
    pub min_savings: usize,
    /// Tool names whose results are never truncated.
    #[serde(default = "default_protected_tools")]
    pub protected_tools: Vec<String>,
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            protect_window: default_protect_window(),
            min_savings: default_min_savings(),
            protected_tools: default_protected_tools(),
        }
    }
}

/// Controls history compaction into a synthetic summary message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Compaction triggers when current tokens exceed
    /// `compression_threshold * max_tokens`.
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: f64,
    /// A compaction that would save fewer tokens than this is skipped.
    #[serde(default = "default_min_savings")]
    pub min_savings: usize,
    /// Context window budget for a session.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            compression_threshold: default_compression_threshold(),
            min_savings: default_min_savings(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Capacities of the four cache shards plus TTL behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_max_sections")]
    pub max_sections: usize,
    #[serde(default = "default_max_contents")]
    pub max_contents: usize,
    #[serde(default = "default_max_skills")]
    pub max_skills: usize,
    #[serde(default = "default_max_parse_results")]
    pub max_parse_results: usize,
    /// Base time-to-live per entry, in seconds.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Per-entry TTL jitter fraction.  The effective TTL is
    /// `ttl * (1 + U(-jitter, +jitter))` so shard entries written together
    /// do not all expire in the same instant.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_sections: default_max_sections(),
            max_contents: default_max_contents(),
            max_skills: default_max_skills(),
            max_parse_results: default_max_parse_results(),
            ttl_secs: default_ttl_secs(),
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum number of tasks of a parallel wave that run concurrently.
    #[serde(default = "default_parallel_fan_out")]
    pub parallel_fan_out: usize,
    /// Per-task timeout applied when the task itself does not specify one.
    #[serde(default = "default_task_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Base delay for exponential back-off between task retries, in
    /// milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub retry_backoff_base_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            parallel_fan_out: default_parallel_fan_out(),
            default_timeout_ms: default_task_timeout_ms(),
            retry_backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionConfig {
    /// A wave result scoring below this triggers a replan (bounded by the
    /// plan's `max_replan_depth`).
    #[serde(default = "default_pass_score")]
    pub pass_score: u32,
    /// Score penalty per fatal issue.
    #[serde(default = "default_penalty_fatal")]
    pub penalty_fatal: u32,
    /// Score penalty per major issue.
    #[serde(default = "default_penalty_major")]
    pub penalty_major: u32,
    /// Score penalty per minor issue.
    #[serde(default = "default_penalty_minor")]
    pub penalty_minor: u32,
    /// Phrases whose presence in a generated artifact raises
    /// `PLACEHOLDER_CONTENT_DETECTED`.
    #[serde(default = "default_placeholder_phrases")]
    pub placeholder_phrases: Vec<String>,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            pass_score: default_pass_score(),
            penalty_fatal: default_penalty_fatal(),
            penalty_major: default_penalty_major(),
            penalty_minor: default_penalty_minor(),
            placeholder_phrases: default_placeholder_phrases(),
        }
    }
}

// ─── Serde default helpers ────────────────────────────────────────────────────

fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_idle_timeout_secs() -> u64 {
    30
}
fn default_protect_window() -> usize {
    40_000
}
fn default_min_savings() -> usize {
    20_000
}
fn default_protected_tools() -> Vec<String> {
    vec!["skill".into(), "lsp".into()]
}
fn default_compression_threshold() -> f64 {
    0.8
}
fn default_max_tokens() -> usize {
    180_000
}
fn default_max_sections() -> usize {
    50
}
fn default_max_contents() -> usize {
    100
}
fn default_max_skills() -> usize {
    50
}
fn default_max_parse_results() -> usize {
    20
}
fn default_ttl_secs() -> u64 {
    300
}
fn default_jitter() -> f64 {
    0.1
}
fn default_parallel_fan_out() -> usize {
    8
}
fn default_task_timeout_ms() -> u64 {
    60_000
}
fn default_pass_score() -> u32 {
    90
}
fn default_penalty_fatal() -> u32 {
    40
}
fn default_penalty_major() -> u32 {
    15
}
fn default_penalty_minor() -> u32 {
    5
}
fn default_placeholder_phrases() -> Vec<String> {
    vec![
        "占位".into(),
        "TODO".into(),
        "Lorem ipsum".into(),
        "可扩展增删改查".into(),
    ]
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_values() {
        let c = Config::default();
        assert_eq!(c.pruning.protect_window, 40_000);
        assert_eq!(c.pruning.min_savings, 20_000);
        assert_eq!(c.pruning.protected_tools, vec!["skill", "lsp"]);
        assert_eq!(c.compaction.compression_threshold, 0.8);
        assert_eq!(c.compaction.max_tokens, 180_000);
        assert_eq!(c.cache.max_sections, 50);
        assert_eq!(c.cache.max_contents, 100);
        assert_eq!(c.cache.max_skills, 50);
        assert_eq!(c.cache.max_parse_results, 20);
        assert_eq!(c.cache.ttl_secs, 300);
        assert_eq!(c.cache.jitter, 0.1);
        assert_eq!(c.executor.parallel_fan_out, 8);
        assert_eq!(c.executor.default_timeout_ms, 60_000);
        assert_eq!(c.reflection.pass_score, 90);
    }

    #[test]
    fn empty_yaml_deserialises_to_defaults() {
        let c: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(c.cache.max_contents, 100);
        assert_eq!(c.model.provider, "anthropic");
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let c: Config = serde_yaml::from_str("cache:\n  max_sections: 7\n").unwrap();
        assert_eq!(c.cache.max_sections, 7);
        assert_eq!(c.cache.max_contents, 100, "untouched fields keep defaults");
    }

    #[test]
    fn reflection_penalties_configurable() {
        let c: Config =
            serde_yaml::from_str("reflection:\n  penalty_fatal: 60\n  pass_score: 75\n").unwrap();
        assert_eq!(c.reflection.penalty_fatal, 60);
        assert_eq!(c.reflection.pass_score, 75);
        assert_eq!(c.reflection.penalty_major, 15);
    }

    #[test]
    fn config_round_trips_through_yaml() {
        let c = Config::default();
        let text = serde_yaml::to_string(&c).unwrap();
        let back: Config = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back.executor.parallel_fan_out, c.executor.parallel_fan_out);
        assert_eq!(back.reflection.placeholder_phrases, c.reflection.placeholder_phrases);
    }
}
