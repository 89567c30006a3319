// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! In-place structured truncation of bulky tool-output messages.
//!
//! Pruning never drops a message.  A tool result that is old enough (its
//! suffix no longer fits the protect window) and whose tool is not protected
//! has its `content` rewritten to a compact digest that preserves the
//! signals a model needs to keep working: which tools ran, what failed,
//! which files were touched, and the shape of any code blocks.  A content
//! hash lets later turns verify which original output a digest stands for.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use weft_config::PruningConfig;

use crate::message::{ContextMessage, ContextRole};
use crate::tokens;

const MAX_ERROR_LINES: usize = 3;
const MAX_FILE_PATHS: usize = 5;
const MAX_CODE_DIGESTS: usize = 3;

fn error_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)error|failed").expect("static regex"))
}

fn file_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\w-]+\.[\w]+").expect("static regex"))
}

/// Result of one pruning pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Number of messages whose content was rewritten.
    pub pruned: usize,
    /// Tokens saved by the pass (0 when the pass was discarded).
    pub saved_tokens: usize,
}

/// Walk the history oldest-first and truncate eligible tool results.
///
/// A message is skipped when it is a system message, when its suffix (from
/// itself to the end of the list) already fits within `protect_window`
/// tokens, or when one of its tools is in `protected_tools`.  When the
/// total savings of the pass fall below `min_savings` the transformation is
/// discarded and the list is left untouched.
pub fn prune_history(messages: &mut Vec<ContextMessage>, cfg: &PruningConfig) -> PruneReport {
    // Suffix token sums: suffix[i] = tokens from message i to the end.
    let counts: Vec<usize> = messages
        .iter()
        .map(|m| m.tokens.unwrap_or_else(|| tokens::estimate(&m.content)))
        .collect();
    let mut suffix = vec![0usize; counts.len() + 1];
    for i in (0..counts.len()).rev() {
        suffix[i] = suffix[i + 1] + counts[i];
    }

    let mut replacements: Vec<(usize, String)> = Vec::new();
    let mut saved = 0usize;
    for (i, msg) in messages.iter().enumerate() {
        if msg.role == ContextRole::System {
            continue;
        }
        if suffix[i] <= cfg.protect_window {
            // Everything from here on is recent enough to keep verbatim.
            break;
        }
        if msg.role != ContextRole::ToolResult || msg.truncated {
            continue;
        }
        if msg.tool_names().iter().any(|t| cfg.protected_tools.iter().any(|p| p == t)) {
            continue;
        }
        let digest = structured_truncation(msg);
        let new_tokens = tokens::estimate(&digest);
        if new_tokens < counts[i] {
            saved += counts[i] - new_tokens;
            replacements.push((i, digest));
        }
    }

    if saved < cfg.min_savings {
        debug!(saved, min_savings = cfg.min_savings, "pruning pass below savings floor; discarded");
        return PruneReport::default();
    }

    let pruned = replacements.len();
    for (i, digest) in replacements {
        let msg = &mut messages[i];
        msg.tokens = Some(tokens::estimate(&digest));
        msg.content = digest;
        msg.truncated = true;
    }
    debug!(pruned, saved, "pruned tool outputs");
    PruneReport { pruned, saved_tokens: saved }
}

/// Build the replacement digest for one tool-result message.
fn structured_truncation(msg: &ContextMessage) -> String {
    let content = &msg.content;
    let original_tokens = msg.tokens.unwrap_or_else(|| tokens::estimate(content));

    let mut out = String::new();
    out.push_str("[tool output truncated]\n");
    out.push_str(&format!("original: ~{original_tokens} tokens\n"));

    let tools = msg.tool_names();
    if !tools.is_empty() {
        out.push_str(&format!("tools: {}\n", tools.join(", ")));
    }

    let errors: Vec<&str> = content
        .lines()
        .filter(|l| error_line_re().is_match(l))
        .take(MAX_ERROR_LINES)
        .collect();
    if !errors.is_empty() {
        out.push_str("errors:\n");
        for line in errors {
            out.push_str(&format!("  {}\n", line.trim()));
        }
    }

    let paths = distinct_file_paths(content);
    if !paths.is_empty() {
        out.push_str(&format!("files: {}\n", paths.join(", ")));
    }

    let (digests, degraded) = code_block_digests(content);
    if !digests.is_empty() {
        out.push_str("code:\n");
        for d in digests {
            out.push_str(&format!("  {d}\n"));
        }
    }
    if degraded {
        out.push_str("digest: degraded\n");
    }

    out.push_str(&format!("hash: fnv1a:{:08x}\n", fnv1a32(content)));
    out
}

/// Up to five distinct `name.ext` tokens in first-seen order.
fn distinct_file_paths(content: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for m in file_path_re().find_iter(content) {
        let s = m.as_str().to_string();
        if !seen.contains(&s) {
            seen.push(s);
            if seen.len() == MAX_FILE_PATHS {
                break;
            }
        }
    }
    seen
}

/// Digest up to three fenced code blocks.  Returns `(digests, degraded)`;
/// `degraded` is set when fences are unbalanced or a block yields nothing,
/// so consumers know the digest under-represents the original.
fn code_block_digests(content: &str) -> (Vec<String>, bool) {
    let mut blocks: Vec<&str> = Vec::new();
    let mut rest = content;
    let mut degraded = false;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        // Skip the language tag line.
        let body_start = after.find('\n').map(|p| p + 1).unwrap_or(after.len());
        let body = &after[body_start..];
        match body.find("```") {
            Some(close) => {
                blocks.push(&body[..close]);
                rest = &body[close + 3..];
            }
            None => {
                degraded = true;
                break;
            }
        }
        if blocks.len() == MAX_CODE_DIGESTS {
            break;
        }
    }

    let mut digests = Vec::new();
    for block in blocks {
        let mut parts: Vec<String> = Vec::new();
        for line in block.lines() {
            let t = line.trim();
            if t.starts_with("export ") {
                parts.push(t.chars().take(60).collect());
            } else if t.starts_with("function ") || t.contains("=> {") || t.starts_with("const ") {
                if let Some(sig) = t.split('{').next() {
                    parts.push(sig.trim().chars().take(60).collect());
                }
            } else if let Some(rest) = t.strip_prefix("interface ") {
                let name: String =
                    rest.chars().take_while(|c| c.is_alphanumeric() || *c == '_').collect();
                parts.push(format!("interface {name}"));
            } else if t.contains("mock") || t.contains("Mock") {
                parts.push(t.chars().take(60).collect());
            } else if t.starts_with("//") && parts.is_empty() {
                parts.push(t.chars().take(60).collect());
            }
            if parts.len() >= 4 {
                break;
            }
        }
        if parts.is_empty() {
            degraded = true;
        } else {
            digests.push(parts.join("; "));
        }
    }
    (digests, degraded)
}

/// 32-bit FNV-1a over the raw bytes.
fn fnv1a32(data: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in data.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessagePart;

    fn tool_msg(content: &str, tool: &str) -> ContextMessage {
        ContextMessage::tool_result(
            content,
            vec![MessagePart { tool_name: tool.into(), tool_call_id: "t".into() }],
        )
    }

    fn loose_policy() -> PruningConfig {
        PruningConfig { protect_window: 10, min_savings: 1, protected_tools: vec!["skill".into()] }
    }

    #[test]
    fn fnv1a32_matches_known_vectors() {
        // Standard FNV-1a test vectors.
        assert_eq!(fnv1a32(""), 0x811c_9dc5);
        assert_eq!(fnv1a32("a"), 0xe40c_292c);
        assert_eq!(fnv1a32("foobar"), 0xbf9c_f968);
    }

    #[test]
    fn prunes_old_tool_output() {
        let big = "x ".repeat(4000); // ~2000 tokens
        let mut msgs = vec![tool_msg(&big, "shell"), ContextMessage::user("recent")];
        let report = prune_history(&mut msgs, &loose_policy());
        assert_eq!(report.pruned, 1);
        assert!(report.saved_tokens > 0);
        assert!(msgs[0].truncated);
        assert!(msgs[0].content.starts_with("[tool output truncated]"));
    }

    #[test]
    fn protected_tool_is_never_pruned() {
        let big = "x ".repeat(4000);
        let mut msgs = vec![tool_msg(&big, "skill"), ContextMessage::user("recent")];
        let report = prune_history(&mut msgs, &loose_policy());
        assert_eq!(report.pruned, 0);
        assert!(!msgs[0].truncated);
    }

    #[test]
    fn system_messages_skipped() {
        let big = "x ".repeat(4000);
        let mut msgs = vec![ContextMessage::system(big), ContextMessage::user("hi")];
        let report = prune_history(&mut msgs, &loose_policy());
        assert_eq!(report.pruned, 0);
    }

    #[test]
    fn suffix_within_protect_window_is_safe() {
        let mut cfg = loose_policy();
        cfg.protect_window = 1_000_000;
        let big = "x ".repeat(4000);
        let mut msgs = vec![tool_msg(&big, "shell")];
        assert_eq!(prune_history(&mut msgs, &cfg).pruned, 0);
    }

    #[test]
    fn pass_below_min_savings_is_discarded() {
        let mut cfg = loose_policy();
        cfg.min_savings = 1_000_000;
        let big = "x ".repeat(4000);
        let mut msgs = vec![tool_msg(&big, "shell"), ContextMessage::user("r")];
        let before = msgs[0].content.clone();
        let report = prune_history(&mut msgs, &cfg);
        assert_eq!(report, PruneReport::default());
        assert_eq!(msgs[0].content, before, "original list returned unchanged");
    }

    #[test]
    fn digest_extracts_error_lines_and_paths() {
        let content = format!(
            "compiling src/App.tsx\nerror: missing semicolon\nBuild FAILED in main.ts\n{}",
            "pad ".repeat(4000)
        );
        let mut msgs = vec![tool_msg(&content, "shell"), ContextMessage::user("r")];
        prune_history(&mut msgs, &loose_policy());
        let digest = &msgs[0].content;
        assert!(digest.contains("error: missing semicolon"));
        assert!(digest.contains("App.tsx"));
        assert!(digest.contains("main.ts"));
        assert!(digest.contains("tools: shell"));
        assert!(digest.contains("hash: fnv1a:"));
    }

    #[test]
    fn digest_caps_error_lines_at_three() {
        let mut content = String::new();
        for i in 0..10 {
            content.push_str(&format!("error number {i}\n"));
        }
        content.push_str(&"pad ".repeat(4000));
        let mut msgs = vec![tool_msg(&content, "shell"), ContextMessage::user("r")];
        prune_history(&mut msgs, &loose_policy());
        let count = msgs[0].content.matches("error number").count();
        assert_eq!(count, 3);
    }

    #[test]
    fn digest_caps_file_paths_at_five_distinct() {
        let paths = distinct_file_paths("a.ts b.ts c.ts a.ts d.ts e.ts f.ts");
        assert_eq!(paths, vec!["a.ts", "b.ts", "c.ts", "d.ts", "e.ts"]);
    }

    #[test]
    fn code_digest_extracts_exports_and_interfaces() {
        let content = "```ts\nexport function hello() {}\ninterface Props {\n  a: string\n}\n```";
        let (digests, degraded) = code_block_digests(content);
        assert!(!degraded);
        assert_eq!(digests.len(), 1);
        assert!(digests[0].contains("export function hello"));
        assert!(digests[0].contains("interface Props"));
    }

    #[test]
    fn unbalanced_fence_sets_degraded() {
        let (digests, degraded) = code_block_digests("```ts\nexport const x = 1\n");
        assert!(degraded);
        assert!(digests.is_empty());
    }

    #[test]
    fn empty_block_sets_degraded() {
        let (digests, degraded) = code_block_digests("```\n\n```");
        assert!(degraded);
        assert!(digests.is_empty());
    }

    #[test]
    fn already_truncated_message_not_reprocessed() {
        let big = "x ".repeat(4000);
        let mut msgs = vec![tool_msg(&big, "shell"), ContextMessage::user("r")];
        prune_history(&mut msgs, &loose_policy());
        let first = msgs[0].content.clone();
        prune_history(&mut msgs, &loose_policy());
        assert_eq!(msgs[0].content, first);
    }
}
