// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::task::{ExecMode, TaskSpec};
use crate::validate::{validate_tasks, PlanError};

/// One wave of tasks that may run together.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledGroup {
    /// `"group-{n}"`, n counting from 1.
    pub id: String,
    pub mode: ExecMode,
    pub task_ids: Vec<String>,
    /// Monotonic wave index, starting at 1.
    pub wave: u32,
}

/// The full schedule produced from a validated plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub groups: Vec<ScheduledGroup>,
    /// Flat trace of task ids in emission order.
    pub ordered_task_ids: Vec<String>,
    /// Always `false` on success; cycles are raised as errors instead.
    pub has_cycle: bool,
}

/// Linearise the task DAG into ordered waves.
///
/// Repeatedly takes the set of tasks whose remaining in-degree is zero,
/// stable-sorts it by `(-priority, id)`, and emits one group according to
/// mode precedence: a single serial task if any is ready, else a single
/// pipeline task, else every ready parallel task at once.  The tie-break
/// plus the precedence rule make the schedule a pure function of the plan.
pub fn schedule_waves(tasks: &[TaskSpec]) -> Result<Schedule, PlanError> {
    let tasks = validate_tasks(tasks)?;

    let by_id: HashMap<&str, &TaskSpec> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut in_degree: HashMap<&str, usize> =
        tasks.iter().map(|t| (t.id.as_str(), t.dependencies.len())).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for t in &tasks {
        for d in &t.dependencies {
            dependents.entry(d.as_str()).or_default().push(t.id.as_str());
        }
    }

    let mut pending: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    let mut schedule = Schedule::default();
    let mut wave = 0u32;

    while !pending.is_empty() {
        let mut ready: Vec<&TaskSpec> = pending
            .iter()
            .filter(|id| in_degree[**id] == 0)
            .map(|id| by_id[*id])
            .collect();
        if ready.is_empty() {
            // Unreachable after validation, but the scheduler still refuses
            // to loop forever on a malformed input.
            let mut stuck: Vec<String> = pending.iter().map(|s| s.to_string()).collect();
            stuck.sort_unstable();
            return Err(PlanError::Cycle { cycle_task_ids: stuck });
        }
        ready.sort_by(|a, b| (-a.priority, a.id.as_str()).cmp(&(-b.priority, b.id.as_str())));

        // Mode precedence: serial > pipeline > parallel.
        let batch: Vec<&TaskSpec> =
            if let Some(serial) = ready.iter().find(|t| t.mode == ExecMode::Serial) {
                vec![serial]
            } else if let Some(pipeline) = ready.iter().find(|t| t.mode == ExecMode::Pipeline) {
                vec![pipeline]
            } else {
                ready
            };

        wave += 1;
        let group = ScheduledGroup {
            id: format!("group-{wave}"),
            mode: batch[0].mode,
            task_ids: batch.iter().map(|t| t.id.clone()).collect(),
            wave,
        };
        for t in &batch {
            pending.remove(t.id.as_str());
            schedule.ordered_task_ids.push(t.id.clone());
            for &dep in dependents.get(t.id.as_str()).into_iter().flatten() {
                if let Some(deg) = in_degree.get_mut(dep) {
                    *deg = deg.saturating_sub(1);
                }
            }
        }
        schedule.groups.push(group);
    }

    Ok(schedule)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
