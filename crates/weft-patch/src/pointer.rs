// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use crate::engine::PatchError;

/// Pointer tokens that are rejected outright.  Patches originate from model
/// output, so a hostile or confused completion must not be able to reach
/// prototype-mutation keys in any downstream JavaScript consumer of the
/// patched graph.
const FORBIDDEN_TOKENS: [&str; 3] = ["__proto__", "prototype", "constructor"];

/// Parse an RFC-6901 JSON Pointer into its decoded tokens.
///
/// `""` refers to the whole document and yields no tokens.  Escapes are
/// decoded `~1` → `/` first, then `~0` → `~`.  Any token matching the
/// forbidden set fails with [`PatchError::ForbiddenToken`] regardless of
/// strictness.
pub fn parse_pointer(pointer: &str) -> Result<Vec<String>, PatchError> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    if !pointer.starts_with('/') {
        return Err(PatchError::BadPointer {
            pointer: pointer.to_string(),
            reason: "must start with '/'".into(),
        });
    }
    let mut tokens = Vec::new();
    for raw in pointer[1..].split('/') {
        let token = raw.replace("~1", "/").replace("~0", "~");
        if FORBIDDEN_TOKENS.contains(&token.as_str()) {
            return Err(PatchError::ForbiddenToken { token });
        }
        tokens.push(token);
    }
    Ok(tokens)
}

/// Encode one token for embedding in a pointer: `~` → `~0`, then `/` → `~1`.
/// The inverse of the decoding in [`parse_pointer`].
pub fn encode_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
