// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod agents;
mod error;
mod events;
mod executor;
mod orchestrator;
mod reflect;

pub use agents::{emit_file_tool, profile, AgentProfile};
pub use error::CoreError;
pub use events::{Blackboard, EventRecord, RuntimeEvent};
pub use executor::{TaskResult, TaskStatus, WaveExecutor, WaveReport};
pub use orchestrator::{Orchestrator, RepairReplanner, Replanner, RunOutcome};
pub use reflect::{
    evaluate, GeneratedArtifact, Issue, IssueCode, ReflectionInput, ReflectionReport, Severity,
};
