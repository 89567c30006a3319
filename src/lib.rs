// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! weft — orchestration core of a multi-agent code-generation pipeline.
//!
//! A user request becomes an execution plan (a DAG of typed agent tasks);
//! weft validates the DAG, schedules it into waves, drives each wave
//! against an LLM provider with streaming and tool calls, merges the
//! resulting file intents with a conflict-aware last-writer-wins policy,
//! applies them to a versioned app graph, and runs a rule-based reflection
//! gate that decides whether to replan.
//!
//! The subsystem crates are re-exported here so embedders depend on one
//! crate:
//!
//! - [`config`] — typed configuration and the layered YAML loader
//! - [`model`] — provider-neutral LLM client, adapters, SSE streaming
//! - [`context`] — token estimation, TTL caches, context store
//! - [`plan`] — plan model, DAG validation, wave scheduling
//! - [`patch`] — RFC-6902 engine, envelopes, intent merging
//! - the core types below — executor, blackboard, reflection, orchestrator

pub use weft_config as config;
pub use weft_context as context;
pub use weft_model as model;
pub use weft_patch as patch;
pub use weft_plan as plan;

pub use weft_config::Config;
pub use weft_core::{
    evaluate, Blackboard, CoreError, EventRecord, GeneratedArtifact, Issue, IssueCode,
    Orchestrator, ReflectionInput, ReflectionReport, RepairReplanner, Replanner, RunOutcome,
    RuntimeEvent, Severity, TaskResult, TaskStatus, WaveExecutor, WaveReport,
};
