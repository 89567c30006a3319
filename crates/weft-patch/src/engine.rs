// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::pointer::parse_pointer;

/// One RFC-6902 operation.  Field names match the RFC verbatim on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
    Move { from: String, path: String },
    Copy { from: String, path: String },
    Test { path: String, value: Value },
}

impl PatchOp {
    fn describe(&self) -> String {
        match self {
            Self::Add { path, .. } => format!("add {path}"),
            Self::Remove { path } => format!("remove {path}"),
            Self::Replace { path, .. } => format!("replace {path}"),
            Self::Move { from, path } => format!("move {from} -> {path}"),
            Self::Copy { from, path } => format!("copy {from} -> {path}"),
            Self::Test { path, .. } => format!("test {path}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PatchError {
    /// Prototype-pollution guard tripped.  Always fatal, even in lenient
    /// mode.
    #[error("forbidden pointer token {token:?}")]
    ForbiddenToken { token: String },
    #[error("invalid pointer {pointer:?}: {reason}")]
    BadPointer { pointer: String, reason: String },
    #[error("path not found: {pointer}")]
    PathNotFound { pointer: String },
    #[error("array index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("test failed at {pointer}")]
    TestFailed { pointer: String },
    #[error("'from' {from:?} must not be a prefix of 'path' {path:?}")]
    MoveIntoSelf { from: String, path: String },
    #[error("graph id mismatch: envelope {envelope:?} vs graph {graph:?}")]
    GraphMismatch { envelope: String, graph: String },
    #[error("version mismatch: envelope base {base} vs graph {version}")]
    VersionMismatch { base: u64, version: u64 },
    /// Wrapper attaching the offending operation, raised in strict mode.
    #[error("operation {index} ({op}) failed: {source}")]
    Operation {
        index: usize,
        op: String,
        #[source]
        source: Box<PatchError>,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct PatchOptions {
    /// Strict: the first failing operation aborts with the operation
    /// attached.  Lenient: failing operations are skipped.
    pub strict: bool,
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self { strict: true }
    }
}

/// Apply a patch to an immutable document, returning the patched clone.
/// The input is never modified, even on error.
pub fn apply_patch(doc: &Value, ops: &[PatchOp], opts: PatchOptions) -> Result<Value, PatchError> {
    let mut out = doc.clone();
    apply_patch_in_place(&mut out, ops, opts)?;
    Ok(out)
}

/// Apply a patch by mutating `doc` directly.
///
/// On a strict-mode error the document may retain the effects of earlier
/// operations in the list; callers that need atomicity use [`apply_patch`].
pub fn apply_patch_in_place(
    doc: &mut Value,
    ops: &[PatchOp],
    opts: PatchOptions,
) -> Result<(), PatchError> {
    for (index, op) in ops.iter().enumerate() {
        match apply_one(doc, op) {
            Ok(()) => {}
            // The pollution guard is a hard invariant: lenient mode does not
            // downgrade it to a skip.
            Err(e @ PatchError::ForbiddenToken { .. }) => {
                return Err(PatchError::Operation {
                    index,
                    op: op.describe(),
                    source: Box::new(e),
                })
            }
            Err(e) if opts.strict => {
                return Err(PatchError::Operation {
                    index,
                    op: op.describe(),
                    source: Box::new(e),
                })
            }
            Err(_) => continue,
        }
    }
    Ok(())
}

fn apply_one(doc: &mut Value, op: &PatchOp) -> Result<(), PatchError> {
    match op {
        PatchOp::Add { path, value } => add(doc, path, value.clone()),
        PatchOp::Remove { path } => remove(doc, path).map(|_| ()),
        PatchOp::Replace { path, value } => replace(doc, path, value.clone()),
        PatchOp::Move { from, path } => {
            if path.starts_with(from.as_str())
                && (path.len() == from.len() || path.as_bytes().get(from.len()) == Some(&b'/'))
            {
                return Err(PatchError::MoveIntoSelf { from: from.clone(), path: path.clone() });
            }
            let value = remove(doc, from)?;
            add(doc, path, value)
        }
        PatchOp::Copy { from, path } => {
            let value = resolve(doc, from)?.clone();
            add(doc, path, value)
        }
        PatchOp::Test { path, value } => {
            // Structural deep-equality via Value's PartialEq.
            if resolve(doc, path)? == value {
                Ok(())
            } else {
                Err(PatchError::TestFailed { pointer: path.clone() })
            }
        }
    }
}

// ─── Navigation ───────────────────────────────────────────────────────────────

fn resolve<'a>(doc: &'a Value, pointer: &str) -> Result<&'a Value, PatchError> {
    let tokens = parse_pointer(pointer)?;
    let mut node = doc;
    for token in &tokens {
        node = match node {
            Value::Object(map) => map
                .get(token)
                .ok_or_else(|| PatchError::PathNotFound { pointer: pointer.to_string() })?,
            Value::Array(arr) => {
                let idx = parse_index(token, arr.len(), false, pointer)?;
                &arr[idx]
            }
            _ => return Err(PatchError::PathNotFound { pointer: pointer.to_string() }),
        };
    }
    Ok(node)
}

/// Navigate to the parent of the pointer's terminal token.
fn resolve_parent<'a>(
    doc: &'a mut Value,
    tokens: &[String],
    pointer: &str,
) -> Result<&'a mut Value, PatchError> {
    let mut node = doc;
    for token in &tokens[..tokens.len() - 1] {
        node = match node {
            Value::Object(map) => map
                .get_mut(token)
                .ok_or_else(|| PatchError::PathNotFound { pointer: pointer.to_string() })?,
            Value::Array(arr) => {
                let len = arr.len();
                let idx = parse_index(token, len, false, pointer)?;
                &mut arr[idx]
            }
            _ => return Err(PatchError::PathNotFound { pointer: pointer.to_string() }),
        };
    }
    Ok(node)
}

/// Parse an array index token.  `-` means append and is accepted only when
/// `allow_append` is set (terminal position of `add`); an in-bounds check is
/// the caller's contract: `index <= len` when appending is allowed, else
/// `index < len`.
fn parse_index(
    token: &str,
    len: usize,
    allow_append: bool,
    pointer: &str,
) -> Result<usize, PatchError> {
    if token == "-" {
        if allow_append {
            return Ok(len);
        }
        return Err(PatchError::BadPointer {
            pointer: pointer.to_string(),
            reason: "'-' is only valid as the terminal token of an add".into(),
        });
    }
    let idx: usize = token.parse().map_err(|_| PatchError::BadPointer {
        pointer: pointer.to_string(),
        reason: format!("invalid array index {token:?}"),
    })?;
    let bound = if allow_append { len + 1 } else { len };
    if idx >= bound {
        return Err(PatchError::IndexOutOfBounds { index: idx, len });
    }
    Ok(idx)
}

// ─── Operations ───────────────────────────────────────────────────────────────

fn add(doc: &mut Value, pointer: &str, value: Value) -> Result<(), PatchError> {
    let tokens = parse_pointer(pointer)?;
    if tokens.is_empty() {
        *doc = value;
        return Ok(());
    }
    let parent = resolve_parent(doc, &tokens, pointer)?;
    let terminal = &tokens[tokens.len() - 1];
    match parent {
        Value::Object(map) => {
            // RFC add: inserting over an existing member replaces it.
            map.insert(terminal.clone(), value);
            Ok(())
        }
        Value::Array(arr) => {
            let idx = parse_index(terminal, arr.len(), true, pointer)?;
            arr.insert(idx, value);
            Ok(())
        }
        _ => Err(PatchError::PathNotFound { pointer: pointer.to_string() }),
    }
}

fn remove(doc: &mut Value, pointer: &str) -> Result<Value, PatchError> {
    let tokens = parse_pointer(pointer)?;
    if tokens.is_empty() {
        return Err(PatchError::BadPointer {
            pointer: pointer.to_string(),
            reason: "cannot remove the whole document".into(),
        });
    }
    let parent = resolve_parent(doc, &tokens, pointer)?;
    let terminal = &tokens[tokens.len() - 1];
    match parent {
        Value::Object(map) => map
            .remove(terminal)
            .ok_or_else(|| PatchError::PathNotFound { pointer: pointer.to_string() }),
        Value::Array(arr) => {
            let idx = parse_index(terminal, arr.len(), false, pointer)?;
            Ok(arr.remove(idx))
        }
        _ => Err(PatchError::PathNotFound { pointer: pointer.to_string() }),
    }
}

fn replace(doc: &mut Value, pointer: &str, value: Value) -> Result<(), PatchError> {
    let tokens = parse_pointer(pointer)?;
    if tokens.is_empty() {
        *doc = value;
        return Ok(());
    }
    let parent = resolve_parent(doc, &tokens, pointer)?;
    let terminal = &tokens[tokens.len() - 1];
    match parent {
        Value::Object(map) => match map.get_mut(terminal) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(PatchError::PathNotFound { pointer: pointer.to_string() }),
        },
        Value::Array(arr) => {
            let len = arr.len();
            let idx = parse_index(terminal, len, false, pointer)?;
            arr[idx] = value;
            Ok(())
        }
        _ => Err(PatchError::PathNotFound { pointer: pointer.to_string() }),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
