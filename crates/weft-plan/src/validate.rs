// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;

use crate::task::{ExecutionPlan, TaskSpec};

/// Plan rejection reasons.  Each variant maps to a stable ingress error
/// code so external producers can match on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("E_EMPTY_ID: task with empty id")]
    EmptyId,
    #[error("E_DUP_ID: duplicate task ids: {ids:?}")]
    DuplicateId { ids: Vec<String> },
    #[error("E_MISSING_DEP: dangling dependencies: {pairs:?}")]
    MissingDependency {
        /// `(task_id, missing_dep_id)` pairs.
        pairs: Vec<(String, String)>,
    },
    #[error("E_CYCLE: dependency cycle over tasks: {cycle_task_ids:?}")]
    Cycle { cycle_task_ids: Vec<String> },
}

impl PlanError {
    /// Stable error code for the ingress contract.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyId => "E_EMPTY_ID",
            Self::DuplicateId { .. } => "E_DUP_ID",
            Self::MissingDependency { .. } => "E_MISSING_DEP",
            Self::Cycle { .. } => "E_CYCLE",
        }
    }
}

/// Validate a plan's task list; convenience wrapper over [`validate_tasks`].
pub fn validate_plan(plan: &ExecutionPlan) -> Result<Vec<TaskSpec>, PlanError> {
    validate_tasks(&plan.tasks)
}

/// Normalise and validate a task list.
///
/// Normalisation trims task and dependency ids and drops self-duplicates in
/// a task's dependency set.  Validation then fails fast on, in order:
/// empty ids, duplicate ids, dangling dependency references, and cycles.
/// On success the normalised task list is returned.
pub fn validate_tasks(tasks: &[TaskSpec]) -> Result<Vec<TaskSpec>, PlanError> {
    // Normalise: trim ids, dedup dependency sets.
    let mut normalised: Vec<TaskSpec> = tasks.to_vec();
    for t in &mut normalised {
        t.id = t.id.trim().to_string();
        let mut seen = HashSet::new();
        t.dependencies = t
            .dependencies
            .iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty() && seen.insert(d.clone()))
            .collect();
    }

    if normalised.iter().any(|t| t.id.is_empty()) {
        return Err(PlanError::EmptyId);
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for t in &normalised {
        *counts.entry(t.id.as_str()).or_default() += 1;
    }
    let mut dups: Vec<String> =
        counts.iter().filter(|(_, &n)| n > 1).map(|(id, _)| id.to_string()).collect();
    if !dups.is_empty() {
        dups.sort_unstable();
        return Err(PlanError::DuplicateId { ids: dups });
    }

    let ids: HashSet<&str> = normalised.iter().map(|t| t.id.as_str()).collect();
    let mut dangling: Vec<(String, String)> = Vec::new();
    for t in &normalised {
        for d in &t.dependencies {
            if !ids.contains(d.as_str()) {
                dangling.push((t.id.clone(), d.clone()));
            }
        }
    }
    if !dangling.is_empty() {
        return Err(PlanError::MissingDependency { pairs: dangling });
    }

    let cycle = detect_cycle(&normalised);
    if !cycle.is_empty() {
        return Err(PlanError::Cycle { cycle_task_ids: cycle });
    }

    Ok(normalised)
}

/// Kahn's algorithm: drain zero-in-degree nodes; whatever remains is on a
/// cycle (self-loops included, since their in-degree never reaches zero).
/// Returns the sorted ids of the remaining nodes, empty for a DAG.
fn detect_cycle(tasks: &[TaskSpec]) -> Vec<String> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for t in tasks {
        in_degree.entry(t.id.as_str()).or_insert(0);
        for d in &t.dependencies {
            *in_degree.entry(t.id.as_str()).or_insert(0) += 1;
            dependents.entry(d.as_str()).or_default().push(t.id.as_str());
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut drained = 0usize;
    while let Some(id) = queue.pop_front() {
        drained += 1;
        for &dep in dependents.get(id).into_iter().flatten() {
            if let Some(deg) = in_degree.get_mut(dep) {
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(dep);
                }
            }
        }
    }

    if drained == tasks.len() {
        return Vec::new();
    }
    let mut remaining: Vec<String> = in_degree
        .iter()
        .filter(|(_, &deg)| deg > 0)
        .map(|(&id, _)| id.to_string())
        .collect();
    remaining.sort_unstable();
    remaining
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
