// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The closed set of agent kinds a task can be assigned to.
///
/// Dispatch is by enum, not by string-keyed registry lookup; an unknown
/// agent id is a deserialisation error, caught at plan ingress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentId {
    Scaffold,
    Page,
    Interaction,
    State,
    Style,
    Quality,
    Repair,
    Planner,
    Architect,
    Research,
}

impl AgentId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scaffold => "scaffold",
            Self::Page => "page",
            Self::Interaction => "interaction",
            Self::State => "state",
            Self::Style => "style",
            Self::Quality => "quality",
            Self::Repair => "repair",
            Self::Planner => "planner",
            Self::Architect => "architect",
            Self::Research => "research",
        }
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a task is allowed to share a wave with others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    Serial,
    Pipeline,
    #[default]
    Parallel,
}

/// One node of the execution DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub id: String,
    pub agent_id: AgentId,
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub mode: ExecMode,
    /// Higher priority runs first within a ready set.
    #[serde(default)]
    pub priority: i32,
    /// Ids of tasks that must complete before this one starts.  The legacy
    /// field name `deps` is accepted on ingress.
    #[serde(default, alias = "deps")]
    pub dependencies: Vec<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_retry_limit() -> u32 {
    2
}

impl TaskSpec {
    pub fn new(id: impl Into<String>, agent_id: AgentId) -> Self {
        Self {
            id: id.into(),
            agent_id,
            phase: String::new(),
            mode: ExecMode::Parallel,
            priority: 0,
            dependencies: Vec::new(),
            timeout_ms: default_timeout_ms(),
            retry_limit: default_retry_limit(),
        }
    }

    pub fn with_mode(mut self, mode: ExecMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies(mut self, deps: &[&str]) -> Self {
        self.dependencies = deps.iter().map(|d| d.to_string()).collect();
        self
    }
}

/// Which analysis route produced the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RouteDecision {
    #[default]
    Generate,
    Refine,
    Repair,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplanPolicy {
    #[serde(default = "default_max_replan_depth")]
    pub max_replan_depth: u32,
}

fn default_max_replan_depth() -> u32 {
    2
}

impl Default for ReplanPolicy {
    fn default() -> Self {
        Self { max_replan_depth: default_max_replan_depth() }
    }
}

/// A complete execution plan: the DAG of tasks plus run policy.
///
/// Created once per user prompt and never mutated during execution; a
/// replan produces a new revision via [`ExecutionPlan::revise`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// The user prompt that produced the plan.
    pub user_message: String,
    #[serde(default)]
    pub route_decision: RouteDecision,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub replan_policy: ReplanPolicy,
    pub tasks: Vec<TaskSpec>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_max_iterations() -> u32 {
    3
}

impl ExecutionPlan {
    pub fn new(user_message: impl Into<String>, tasks: Vec<TaskSpec>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            user_message: user_message.into(),
            route_decision: RouteDecision::default(),
            max_iterations: default_max_iterations(),
            replan_policy: ReplanPolicy::default(),
            tasks,
            metadata: HashMap::new(),
        }
    }

    /// Produce the next plan revision with a fresh id and task list, keeping
    /// the original prompt and policies.
    pub fn revise(&self, tasks: Vec<TaskSpec>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            tasks,
            metadata: self.metadata.clone(),
            ..self.clone()
        }
    }

    pub fn task(&self, id: &str) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
