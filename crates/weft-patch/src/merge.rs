// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Last-writer-wins merge of concurrent file intents.
//!
//! Tasks in one wave run concurrently and may each propose content for the
//! same file.  The merge is a pure function of the intent set: per path the
//! winner is the latest `(created_at, id)`, every contributor is recorded
//! in timestamp order, and a conflict is flagged whenever two *different*
//! tasks wrote the path.  Re-writes by a single task are a local sequence,
//! not a conflict.  Because the inputs are explicitly enumerated, any
//! permutation of the same set converges to the same output.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use weft_plan::AgentId;

/// A proposed file edit emitted by an executing task.  Created by the
/// executor; read-only thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchIntent {
    pub id: String,
    pub wave_id: String,
    pub task_id: String,
    pub agent_id: AgentId,
    pub file_path: String,
    pub content: String,
    /// SHA-256 of `content`, hex-encoded.
    pub content_hash: String,
    /// Creation timestamp, milliseconds since the Unix epoch.
    pub created_at: i64,
}

impl PatchIntent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        wave_id: impl Into<String>,
        task_id: impl Into<String>,
        agent_id: AgentId,
        file_path: impl Into<String>,
        content: impl Into<String>,
        created_at: i64,
    ) -> Self {
        let content = content.into();
        let content_hash = hex::encode(Sha256::digest(content.as_bytes()));
        Self {
            id: id.into(),
            wave_id: wave_id.into(),
            task_id: task_id.into(),
            agent_id,
            file_path: file_path.into(),
            content,
            content_hash,
            created_at,
        }
    }
}

/// One contributor recorded on a merged patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentSource {
    pub intent_id: String,
    pub task_id: String,
    pub agent_id: AgentId,
    pub created_at: i64,
}

/// The merged result for one file path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedPatch {
    pub file_path: String,
    pub content: String,
    /// All contributing intents in `created_at` order.
    pub sources: Vec<IntentSource>,
    /// Two or more distinct tasks wrote this path in the wave.
    pub conflict: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    /// One entry per touched path, ordered by path.
    pub merged: Vec<MergedPatch>,
    /// Paths with a conflict, ordered by path.
    pub conflicts: Vec<String>,
    /// Every touched path, sorted.
    pub touched_files: Vec<String>,
}

/// Collapse one wave's intents into per-file merged patches.
pub fn merge_patch_intents(intents: &[PatchIntent]) -> MergeOutcome {
    // BTreeMap keeps the per-path output ordered independently of input order.
    let mut groups: BTreeMap<&str, Vec<&PatchIntent>> = BTreeMap::new();
    for intent in intents {
        groups.entry(intent.file_path.as_str()).or_default().push(intent);
    }

    let mut outcome = MergeOutcome::default();
    for (path, mut group) in groups {
        group.sort_by(|a, b| {
            (a.created_at, a.id.as_str()).cmp(&(b.created_at, b.id.as_str()))
        });
        let Some(winner) = group.last() else { continue };
        let mut distinct_tasks: Vec<&str> = group.iter().map(|i| i.task_id.as_str()).collect();
        distinct_tasks.sort_unstable();
        distinct_tasks.dedup();
        let conflict = distinct_tasks.len() > 1;

        outcome.merged.push(MergedPatch {
            file_path: path.to_string(),
            content: winner.content.clone(),
            sources: group
                .iter()
                .map(|i| IntentSource {
                    intent_id: i.id.clone(),
                    task_id: i.task_id.clone(),
                    agent_id: i.agent_id,
                    created_at: i.created_at,
                })
                .collect(),
            conflict,
        });
        if conflict {
            outcome.conflicts.push(path.to_string());
        }
        outcome.touched_files.push(path.to_string());
    }
    outcome
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
