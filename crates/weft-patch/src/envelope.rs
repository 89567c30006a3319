// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::{apply_patch, PatchError, PatchOp, PatchOptions};

/// The application graph patches are applied to: an opaque node tree with a
/// monotonically increasing version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppGraph {
    pub graph_id: String,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    pub root: Value,
}

impl AppGraph {
    pub fn new(graph_id: impl Into<String>, root: Value) -> Self {
        Self { graph_id: graph_id.into(), version: 0, updated_at: Utc::now(), root }
    }
}

/// A versioned batch of patch operations, applied atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchEnvelope {
    pub graph_id: String,
    pub base_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_version: Option<u64>,
    pub operations: Vec<PatchOp>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeOptions {
    /// Skip the `base_version == graph.version` check (the graph-id check is
    /// never skipped).
    pub skip_version_check: bool,
    /// Strict patching: the first failing operation aborts the envelope.
    pub strict: bool,
}

/// What happened to an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeOutcome {
    /// Applied; the graph now has this version.
    Applied { new_version: u64 },
    /// Rejected without modification (lenient mode only).
    Rejected,
}

/// Apply an envelope to the graph.
///
/// Verification order: graph id first, then base version (unless waived).
/// In strict mode a verification or patch failure is an error and the graph
/// is left unmodified; in lenient mode verification failures return
/// [`EnvelopeOutcome::Rejected`] and failing operations are skipped.
///
/// On success the version becomes `target_version` when set, otherwise
/// `max(version + 1, base_version + 1)`, and `updated_at` is stamped.
pub fn apply_envelope(
    graph: &mut AppGraph,
    envelope: &PatchEnvelope,
    opts: EnvelopeOptions,
) -> Result<EnvelopeOutcome, PatchError> {
    if envelope.graph_id != graph.graph_id {
        let err = PatchError::GraphMismatch {
            envelope: envelope.graph_id.clone(),
            graph: graph.graph_id.clone(),
        };
        if opts.strict {
            return Err(err);
        }
        return Ok(EnvelopeOutcome::Rejected);
    }
    if !opts.skip_version_check && envelope.base_version != graph.version {
        let err = PatchError::VersionMismatch {
            base: envelope.base_version,
            version: graph.version,
        };
        if opts.strict {
            return Err(err);
        }
        return Ok(EnvelopeOutcome::Rejected);
    }

    // Patch a clone so a strict-mode failure leaves the graph untouched.
    let patched = apply_patch(&graph.root, &envelope.operations, PatchOptions { strict: opts.strict })?;
    graph.root = patched;
    graph.version = envelope
        .target_version
        .unwrap_or_else(|| (graph.version + 1).max(envelope.base_version + 1));
    graph.updated_at = Utc::now();
    Ok(EnvelopeOutcome::Applied { new_version: graph.version })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
