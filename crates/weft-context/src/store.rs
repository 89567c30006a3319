// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use weft_config::{CompactionConfig, PruningConfig};

use crate::message::{ContextMessage, ContextRole};
use crate::prune::{prune_history, PruneReport};
use crate::tokens;

/// Closed vocabulary of framework and platform names recognised as topics
/// when summarising user messages during compaction.
const TOPIC_VOCAB: &[&str] = &[
    "React", "Vue", "Angular", "Svelte", "Next.js", "Nuxt", "Vite", "Tailwind", "TypeScript",
    "JavaScript", "Node", "Express", "H5", "小程序", "iOS", "Android", "web", "mobile", "desktop",
];

fn decision_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:决定|决策|选择|使用|采用)[:：]\s*(.+)").expect("static regex"))
}

/// Statistics from one compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactReport {
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub messages_compacted: usize,
}

/// Ordered message history for one session, with token accounting,
/// pruning, and summarising compaction.
///
/// The store itself is single-writer; callers that share it across tasks
/// wrap it in a lock.
#[derive(Debug)]
pub struct ContextStore {
    messages: Vec<ContextMessage>,
    compaction: CompactionConfig,
    pruning: PruningConfig,
}

impl ContextStore {
    pub fn new(compaction: CompactionConfig, pruning: PruningConfig) -> Self {
        Self { messages: Vec::new(), compaction, pruning }
    }

    pub fn push(&mut self, msg: ContextMessage) {
        self.messages.push(msg);
    }

    pub fn messages(&self) -> &[ContextMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Current token total over the message list.
    pub fn total_tokens(&self) -> usize {
        tokens::count_messages(&self.messages)
    }

    /// Fraction of the configured budget consumed (0.0–1.0).
    pub fn budget_fraction(&self) -> f64 {
        if self.compaction.max_tokens == 0 {
            return 0.0;
        }
        self.total_tokens() as f64 / self.compaction.max_tokens as f64
    }

    /// Run a pruning pass over the history (see [`prune_history`]).
    pub fn prune(&mut self) -> PruneReport {
        prune_history(&mut self.messages, &self.pruning)
    }

    /// Compact the history when it exceeds the compression threshold.
    ///
    /// Builds a deterministic summary (topics from user messages, code-block
    /// counts from assistant messages, technical decisions from any message),
    /// prepends it as a synthetic system message, and marks the summarised
    /// messages `compacted`.  Skipped entirely when the projected savings
    /// fall below `min_savings`.
    pub fn compact(&mut self) -> Option<CompactReport> {
        let before = self.total_tokens();
        let threshold =
            (self.compaction.compression_threshold * self.compaction.max_tokens as f64) as usize;
        if before <= threshold {
            return None;
        }

        let candidates: Vec<usize> = self
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.role != ContextRole::System && !m.compacted)
            .map(|(i, _)| i)
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let summary = self.build_summary(&candidates);
        let summary_tokens = tokens::estimate(&summary);
        let original_tokens: usize = candidates
            .iter()
            .map(|&i| {
                let m = &self.messages[i];
                m.tokens.unwrap_or_else(|| tokens::estimate(&m.content))
            })
            .sum();
        if original_tokens.saturating_sub(summary_tokens) < self.compaction.min_savings {
            debug!(
                original_tokens,
                summary_tokens,
                min_savings = self.compaction.min_savings,
                "compaction below savings floor; skipped"
            );
            return None;
        }

        for &i in &candidates {
            self.messages[i].compacted = true;
        }
        let mut summary_msg = ContextMessage::system(summary);
        summary_msg.tokens = Some(summary_tokens);
        self.messages.insert(0, summary_msg);

        let report = CompactReport {
            tokens_before: before,
            tokens_after: self.effective_tokens(),
            messages_compacted: candidates.len(),
        };
        debug!(?report, "compacted history");
        Some(report)
    }

    /// Token total counting compacted messages as absorbed by the summary.
    pub fn effective_tokens(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| !m.compacted)
            .map(|m| m.tokens.unwrap_or_else(|| tokens::estimate(&m.content)))
            .sum()
    }

    /// The history as sent to a provider: compacted messages are dropped in
    /// favour of the summary that stands for them.
    pub fn effective_messages(&self) -> Vec<&ContextMessage> {
        self.messages.iter().filter(|m| !m.compacted).collect()
    }

    fn build_summary(&self, candidates: &[usize]) -> String {
        let mut topics: Vec<&str> = Vec::new();
        let mut code_blocks = 0usize;
        let mut decisions: Vec<String> = Vec::new();

        for &i in candidates {
            let m = &self.messages[i];
            match m.role {
                ContextRole::User => {
                    for topic in TOPIC_VOCAB {
                        if m.content.contains(topic) && !topics.contains(topic) {
                            topics.push(topic);
                        }
                    }
                }
                ContextRole::Assistant => {
                    code_blocks += m.content.matches("```").count() / 2;
                }
                _ => {}
            }
            for cap in decision_re().captures_iter(&m.content) {
                if let Some(d) = cap.get(1) {
                    decisions.push(d.as_str().trim().to_string());
                }
            }
        }

        let mut out = String::from("[context summary]\n");
        if !topics.is_empty() {
            out.push_str(&format!("topics: {}\n", topics.join(", ")));
        }
        if code_blocks > 0 {
            out.push_str(&format!("assistant code blocks: {code_blocks}\n"));
        }
        if !decisions.is_empty() {
            out.push_str("decisions:\n");
            for d in &decisions {
                out.push_str(&format!("  - {d}\n"));
            }
        }
        out.push_str(&format!("messages summarised: {}\n", candidates.len()));
        out
    }
}

// ─── Section selection ────────────────────────────────────────────────────────

/// One reusable prompt section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSection {
    pub id: String,
    pub title: String,
    pub content: String,
}

impl PromptSection {
    pub fn new(id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self { id: id.into(), title: title.into(), content: content.into() }
    }

    fn tokens(&self) -> usize {
        tokens::estimate(&self.content)
    }
}

/// The section library sections are drawn from.
#[derive(Debug, Clone, Default)]
pub struct SectionCatalog {
    /// Always considered first, in order.
    pub core: Vec<PromptSection>,
    /// Keyed by tech-stack entry (e.g. `"react"`).
    pub tech: HashMap<String, Vec<PromptSection>>,
    /// Keyed by platform (e.g. `"web"`).
    pub platform: HashMap<String, Vec<PromptSection>>,
}

/// What the caller is assembling a prompt for.
#[derive(Debug, Clone, Default)]
pub struct SectionRequest {
    pub mode: String,
    pub platform: String,
    pub tech_stack: Vec<String>,
    /// Caller-supplied extra sections, considered last.
    pub custom: Vec<PromptSection>,
}

/// Budget fraction of `max_tokens` available for prompt sections.
const SECTION_BUDGET_FRACTION: f64 = 0.4;

/// Select sections in priority order — core, then tech-stack, then
/// platform, then caller-custom — until the budget
/// (`0.4 × max_tokens`) is exhausted.  Duplicate ids are selected once.
pub fn select_sections(
    catalog: &SectionCatalog,
    req: &SectionRequest,
    max_tokens: usize,
) -> Vec<PromptSection> {
    let budget = (max_tokens as f64 * SECTION_BUDGET_FRACTION) as usize;
    let mut selected: Vec<PromptSection> = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    let mut used = 0usize;

    let mut consider = |section: &PromptSection, selected: &mut Vec<PromptSection>| {
        if seen.contains(&section.id) {
            return;
        }
        let cost = section.tokens();
        if used + cost > budget {
            return;
        }
        used += cost;
        seen.push(section.id.clone());
        selected.push(section.clone());
    };

    for s in &catalog.core {
        consider(s, &mut selected);
    }
    for tech in &req.tech_stack {
        if let Some(sections) = catalog.tech.get(tech) {
            for s in sections {
                consider(s, &mut selected);
            }
        }
    }
    if let Some(sections) = catalog.platform.get(&req.platform) {
        for s in sections {
            consider(s, &mut selected);
        }
    }
    for s in &req.custom {
        consider(s, &mut selected);
    }
    selected
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store(max_tokens: usize, min_savings: usize) -> ContextStore {
        ContextStore::new(
            CompactionConfig {
                compression_threshold: 0.8,
                min_savings,
                max_tokens,
            },
            PruningConfig::default(),
        )
    }

    // ── Token accounting ──────────────────────────────────────────────────────

    #[test]
    fn total_tokens_sums_history() {
        let mut s = store(1000, 10);
        s.push(ContextMessage::user("12345678")); // 2
        s.push(ContextMessage::assistant("1234")); // 1
        assert_eq!(s.total_tokens(), 3);
    }

    #[test]
    fn budget_fraction_tracks_usage() {
        let mut s = store(100, 10);
        s.push(ContextMessage::user(&"x".repeat(200))); // 50 tokens
        assert!((s.budget_fraction() - 0.5).abs() < 1e-9);
    }

    // ── Compaction ────────────────────────────────────────────────────────────

    #[test]
    fn below_threshold_is_untouched() {
        let mut s = store(1_000_000, 10);
        s.push(ContextMessage::user("short"));
        assert!(s.compact().is_none());
    }

    #[test]
    fn over_threshold_prepends_summary_and_marks() {
        let mut s = store(100, 1);
        s.push(ContextMessage::user(format!("build a React app {}", "x".repeat(400))));
        s.push(ContextMessage::assistant("```js\ncode\n```"));
        let report = s.compact().expect("should compact");
        assert_eq!(report.messages_compacted, 2);
        assert!(report.tokens_after < report.tokens_before);

        assert_eq!(s.messages()[0].role, ContextRole::System);
        let summary = &s.messages()[0].content;
        assert!(summary.contains("topics: React"));
        assert!(summary.contains("assistant code blocks: 1"));
        assert!(s.messages()[1].compacted);
        assert!(s.messages()[2].compacted);
    }

    #[test]
    fn compaction_extracts_decisions() {
        let mut s = store(100, 1);
        s.push(ContextMessage::user(format!("决定: 使用 React Router {}", "x".repeat(400))));
        s.compact().expect("should compact");
        assert!(s.messages()[0].content.contains("使用 React Router"));
    }

    #[test]
    fn insufficient_savings_skips_compaction() {
        let mut s = store(100, 1_000_000);
        s.push(ContextMessage::user("x".repeat(400)));
        assert!(s.compact().is_none());
        assert!(!s.messages()[0].compacted);
    }

    #[test]
    fn effective_messages_drop_compacted_prefix() {
        let mut s = store(100, 1);
        s.push(ContextMessage::user("x".repeat(400)));
        s.push(ContextMessage::user("x".repeat(400)));
        s.compact().unwrap();
        s.push(ContextMessage::user("fresh"));
        let effective = s.effective_messages();
        // summary + fresh
        assert_eq!(effective.len(), 2);
        assert_eq!(effective[0].role, ContextRole::System);
        assert_eq!(effective[1].content, "fresh");
    }

    #[test]
    fn second_compaction_ignores_already_compacted() {
        let mut s = store(100, 1);
        s.push(ContextMessage::user("x".repeat(400)));
        s.compact().unwrap();
        s.push(ContextMessage::user("y".repeat(400)));
        let report = s.compact().unwrap();
        assert_eq!(report.messages_compacted, 1, "only the new message");
    }

    // ── Section selection ─────────────────────────────────────────────────────

    fn catalog() -> SectionCatalog {
        let mut tech = HashMap::new();
        tech.insert(
            "react".to_string(),
            vec![PromptSection::new("tech-react", "React", "react rules ".repeat(10))],
        );
        let mut platform = HashMap::new();
        platform.insert(
            "web".to_string(),
            vec![PromptSection::new("plat-web", "Web", "web rules ".repeat(10))],
        );
        SectionCatalog {
            core: vec![PromptSection::new("core-1", "Core", "core rules ".repeat(10))],
            tech,
            platform,
        }
    }

    fn request() -> SectionRequest {
        SectionRequest {
            mode: "generate".into(),
            platform: "web".into(),
            tech_stack: vec!["react".into()],
            custom: vec![PromptSection::new("custom-1", "Extra", "extra ".repeat(10))],
        }
    }

    #[test]
    fn selection_follows_priority_order() {
        let picked = select_sections(&catalog(), &request(), 100_000);
        let ids: Vec<&str> = picked.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["core-1", "tech-react", "plat-web", "custom-1"]);
    }

    #[test]
    fn selection_respects_budget() {
        // Budget 0.4 * 100 = 40 tokens; each section is ~30 tokens, so only
        // the core section fits.
        let picked = select_sections(&catalog(), &request(), 100);
        let ids: Vec<&str> = picked.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["core-1"]);
    }

    #[test]
    fn duplicate_ids_selected_once() {
        let mut cat = catalog();
        cat.tech
            .get_mut("react")
            .unwrap()
            .push(PromptSection::new("core-1", "Dup", "dup"));
        let picked = select_sections(&cat, &request(), 100_000);
        let count = picked.iter().filter(|s| s.id == "core-1").count();
        assert_eq!(count, 1);
    }

    #[test]
    fn unknown_platform_contributes_nothing() {
        let mut req = request();
        req.platform = "vr".into();
        let picked = select_sections(&catalog(), &req, 100_000);
        assert!(picked.iter().all(|s| s.id != "plat-web"));
    }
}
