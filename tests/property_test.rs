// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Property-based invariants over the planning, merging, patching, and
//! token-accounting layers.
use quickcheck::quickcheck;

use weft::context::tokens;
use weft::context::TtlCache;
use weft::patch::{
    apply_envelope, apply_patch, merge_patch_intents, AppGraph, EnvelopeOptions, PatchEnvelope,
    PatchIntent, PatchOp, PatchOptions,
};
use weft::plan::{schedule_waves, validate_tasks, AgentId, PlanError, TaskSpec};

/// Build a guaranteed-acyclic task list: task `i` depends on `i-1` (a
/// chain) plus a pseudo-random subset of earlier tasks drawn from `seed`.
fn chain_dag(n: usize, seed: &[u8]) -> Vec<TaskSpec> {
    let n = n.clamp(1, 12);
    (0..n)
        .map(|i| {
            let mut deps: Vec<String> = Vec::new();
            if i > 0 {
                deps.push(format!("t{}", i - 1));
            }
            for j in 0..i.saturating_sub(1) {
                let byte = seed.get(i * 7 + j).copied().unwrap_or(0);
                if byte % 3 == 0 {
                    deps.push(format!("t{j}"));
                }
            }
            let mut t = TaskSpec::new(format!("t{i}"), AgentId::Page);
            t.dependencies = deps;
            t.priority = (seed.get(i).copied().unwrap_or(0) % 5) as i32;
            t
        })
        .collect()
}

quickcheck! {
    // P1: every constructed DAG validates; adding a back-edge from the
    // chain's head to its tail always creates a detected cycle that names
    // the offending tasks.
    fn dag_closure(n: usize, seed: Vec<u8>) -> bool {
        let tasks = chain_dag(n, &seed);
        if validate_tasks(&tasks).is_err() {
            return false;
        }
        if tasks.len() < 2 {
            return true;
        }
        let mut cyclic = tasks.clone();
        let last_id = cyclic.last().unwrap().id.clone();
        cyclic[0].dependencies.push(last_id);
        match validate_tasks(&cyclic) {
            Err(PlanError::Cycle { cycle_task_ids }) => {
                !cycle_task_ids.is_empty()
                    && cycle_task_ids.contains(&"t0".to_string())
            }
            _ => false,
        }
    }

    // P2: a task's wave is strictly greater than each dependency's wave.
    fn wave_dependency_order(n: usize, seed: Vec<u8>) -> bool {
        let tasks = chain_dag(n, &seed);
        let schedule = schedule_waves(&tasks).unwrap();
        let wave_of = |id: &str| {
            schedule
                .groups
                .iter()
                .find(|g| g.task_ids.iter().any(|t| t == id))
                .map(|g| g.wave)
                .unwrap()
        };
        tasks.iter().all(|t| t.dependencies.iter().all(|d| wave_of(&t.id) > wave_of(d)))
    }

    // P3: the multiset of scheduled ids equals the input set, without
    // duplication.
    fn wave_coverage(n: usize, seed: Vec<u8>) -> bool {
        let tasks = chain_dag(n, &seed);
        let schedule = schedule_waves(&tasks).unwrap();
        let mut scheduled: Vec<String> =
            schedule.groups.iter().flat_map(|g| g.task_ids.clone()).collect();
        let trace_matches = scheduled == schedule.ordered_task_ids;
        scheduled.sort_unstable();
        let mut input: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
        input.sort_unstable();
        trace_matches && scheduled == input
    }

    // P4: no two tasks in one wave depend on each other.
    fn wave_independence(n: usize, seed: Vec<u8>) -> bool {
        let tasks = chain_dag(n, &seed);
        let schedule = schedule_waves(&tasks).unwrap();
        let dep_of = |id: &str| {
            tasks.iter().find(|t| t.id == id).map(|t| t.dependencies.clone()).unwrap_or_default()
        };
        schedule.groups.iter().all(|g| {
            g.task_ids.iter().all(|a| {
                g.task_ids
                    .iter()
                    .all(|b| a == b || !dep_of(a).contains(b) && !dep_of(b).contains(a))
            })
        })
    }

    // P5: merging is a pure function of the intent set — permuting the
    // input changes nothing.
    fn merge_convergence(raw: Vec<(u8, u8, u8, u8)>) -> bool {
        let intents: Vec<PatchIntent> = raw
            .iter()
            .enumerate()
            .map(|(i, &(path, content, created, tsk))| {
                PatchIntent::new(
                    format!("i{i}"),
                    "group-1",
                    format!("task-{}", tsk % 4),
                    AgentId::Page,
                    format!("src/f{}.ts", path % 5),
                    format!("content-{content}"),
                    (created as i64) % 16,
                )
            })
            .collect();
        let forward = merge_patch_intents(&intents);
        let mut shuffled = intents.clone();
        shuffled.reverse();
        if shuffled.len() > 2 {
            let mid = shuffled.len() / 2;
            shuffled.swap(0, mid);
        }
        let backward = merge_patch_intents(&shuffled);
        forward.touched_files == backward.touched_files
            && forward.conflicts == backward.conflicts
            && forward
                .merged
                .iter()
                .zip(backward.merged.iter())
                .all(|(a, b)| a.file_path == b.file_path && a.content == b.content)
    }

    // P6: any pointer containing a forbidden token is rejected.
    fn patch_pollution_safety(prefix: String, polluted_key: bool) -> bool {
        let token = if polluted_key { "__proto__" } else { "constructor" };
        let clean: String = prefix.chars().filter(|c| *c != '/' && *c != '~').take(8).collect();
        let path = if clean.is_empty() {
            format!("/{token}")
        } else {
            format!("/{clean}/{token}")
        };
        let doc = serde_json::json!({});
        apply_patch(
            &doc,
            &[PatchOp::Add { path, value: serde_json::json!(true) }],
            PatchOptions { strict: false },
        )
        .is_err()
    }

    // P7: mismatched envelopes never change the graph; applied envelopes
    // always advance the version by at least one.
    fn envelope_versioning(graph_version: u8, base: u8, target: Option<u8>) -> bool {
        let mut graph = AppGraph::new("g", serde_json::json!({}));
        graph.version = graph_version as u64;
        let envelope = PatchEnvelope {
            graph_id: "g".into(),
            base_version: base as u64,
            target_version: target.map(|t| (t as u64) + graph_version as u64 + 1),
            operations: vec![],
        };
        let strict = EnvelopeOptions { skip_version_check: false, strict: true };
        let before = graph.version;
        let result = apply_envelope(&mut graph, &envelope, strict);
        if base as u64 != before {
            result.is_err() && graph.version == before
        } else {
            match result {
                Ok(_) => graph.version >= before + 1,
                Err(_) => false,
            }
        }
    }

    // P8: token estimation is subadditive within one rounding step.
    fn token_monotonicity(a: String, b: String) -> bool {
        let joined = format!("{a}{b}");
        tokens::estimate(&joined) <= tokens::estimate(&a) + tokens::estimate(&b) + 1
    }

    // P9: a freshly set entry is readable until eviction or expiry.
    fn cache_liveness(key: String, value: String) -> bool {
        let cache: TtlCache<String> =
            TtlCache::new(8, std::time::Duration::from_secs(600), 0.0);
        cache.set(key.clone(), value.clone(), value.len());
        cache.get(&key).as_deref() == Some(value.as_str()) && cache.stats().hits == 1
    }
}
