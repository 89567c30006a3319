// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Token estimation without a tokenizer.
//!
//! English text averages roughly 4 characters per token; CJK ideographs are
//! denser at roughly 1.5 characters per token.  The estimate counts code
//! points in the CJK Unified Ideographs range U+4E00–U+9FA5 separately from
//! everything else and takes the ceiling of the combined quotient.

use crate::message::ContextMessage;

const CJK_START: char = '\u{4e00}';
const CJK_END: char = '\u{9fa5}';

/// Estimate the token count of a string.  Empty input is 0.
pub fn estimate(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let mut cjk = 0usize;
    let mut other = 0usize;
    for ch in text.chars() {
        if (CJK_START..=CJK_END).contains(&ch) {
            cjk += 1;
        } else {
            other += 1;
        }
    }
    (cjk as f64 / 1.5 + other as f64 / 4.0).ceil() as usize
}

/// Sum token counts over a message list, using each message's explicit
/// `tokens` field when present and estimating its content otherwise.
pub fn count_messages(messages: &[ContextMessage]) -> usize {
    messages
        .iter()
        .map(|m| m.tokens.unwrap_or_else(|| estimate(&m.content)))
        .sum()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
